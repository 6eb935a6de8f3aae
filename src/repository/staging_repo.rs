// ==========================================
// 考古数据导入 ETL - 暂存 Repository Trait
// ==========================================
// 职责: 定义导入批次 / 字段 / 单元格 / 标注的数据访问接口
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::domain::{Annotation, Field, Record, Source};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use uuid::Uuid;

// ==========================================
// StagingRepository Trait
// ==========================================
// 实现者: SqliteStagingRepository（使用 rusqlite）
#[async_trait]
pub trait StagingRepository: Send + Sync {
    // ===== 导入批次 =====

    async fn create_source(&self, source: Source) -> RepositoryResult<()>;

    async fn get_source(&self, source_id: &str) -> RepositoryResult<Option<Source>>;

    async fn update_source_status(&self, source_id: &str, status: &str) -> RepositoryResult<()>;

    /// 删除导入批次（级联删除字段、单元格、标注）
    ///
    /// # 返回
    /// - Ok(usize): 删除的批次数（0 或 1）
    async fn delete_source(&self, source_id: &str) -> RepositoryResult<usize>;

    // ===== 字段 =====

    /// 批量插入字段（字段序号冲突时整个事务回滚）
    async fn insert_fields(&self, fields: Vec<Field>) -> RepositoryResult<usize>;

    /// 按字段序号升序返回
    async fn list_fields(&self, source_id: &str) -> RepositoryResult<Vec<Field>>;

    async fn update_field_context(
        &self,
        source_id: &str,
        field_num: i64,
        context_uuid: Option<Uuid>,
    ) -> RepositoryResult<()>;

    /// 清空批次内所有字段的 context
    async fn clear_field_contexts(&self, source_id: &str) -> RepositoryResult<usize>;

    // ===== 单元格 =====

    /// 批量插入单元格（(行, 字段) 冲突时整个事务回滚）
    async fn insert_records(&self, records: Vec<Record>) -> RepositoryResult<usize>;

    /// 批次最大行号（无数据时为 0）
    async fn max_row(&self, source_id: &str) -> RepositoryResult<i64>;

    /// 读取行号区间 (after_row, through_row] 内的全部单元格
    async fn load_records(
        &self,
        source_id: &str,
        after_row: i64,
        through_row: i64,
    ) -> RepositoryResult<Vec<Record>>;

    /// 回写对齐结果（单事务）
    ///
    /// # 参数
    /// - rows: 需回写的行号（调用方负责分批）
    async fn update_record_resolutions(
        &self,
        source_id: &str,
        field_num: i64,
        rows: &[i64],
        context_uuid: Option<Uuid>,
        item_uuid: Option<Uuid>,
    ) -> RepositoryResult<usize>;

    /// 清空批次内所有单元格的对齐结果
    async fn clear_resolutions(&self, source_id: &str) -> RepositoryResult<usize>;

    // ===== 标注 =====

    async fn insert_annotation(&self, annotation: Annotation) -> RepositoryResult<()>;

    /// 按声明顺序 (sort, 创建时间) 返回
    async fn list_annotations(&self, source_id: &str) -> RepositoryResult<Vec<Annotation>>;

    async fn delete_annotations(&self, source_id: &str) -> RepositoryResult<usize>;
}
