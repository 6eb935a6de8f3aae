// ==========================================
// 考古数据导入 ETL - 流水线参数
// ==========================================
// 职责: 批大小 / 缓存有效期 / 租约有效期
// 覆写: config_kv 表 (scope_id='global', key='etl/...')
// ==========================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    /// 初始化阶段每次从暂存库拉取的行数
    pub init_chunk_rows: i64,
    /// 行批阶段每次处理的行数
    pub row_batch_size: i64,
    /// 标注批阶段每次处理的行数
    pub annotation_batch_size: i64,
    /// 对齐结果回写单元格的批大小
    pub record_write_batch: usize,
    /// 缓存写入的有效期（秒）
    pub cache_ttl_secs: i64,
    /// 单批次处理租约有效期（秒）
    pub lease_ttl_secs: i64,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            init_chunk_rows: 1000,
            row_batch_size: 250,
            annotation_batch_size: 500,
            record_write_batch: 100,
            cache_ttl_secs: 6 * 60 * 60,
            lease_ttl_secs: 600,
        }
    }
}
