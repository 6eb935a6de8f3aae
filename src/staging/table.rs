// ==========================================
// 考古数据导入 ETL - 暂存表
// ==========================================
// 职责: 单个导入批次的内存列式表（行号 → 字段序号 → 单元格）
// 用途: 流水线各阶段共享的工作表，序列化后写入缓存
// ==========================================

use crate::domain::Record;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

// ==========================================
// RowSource - 暂存表初始内容来源
// ==========================================
// 实现者: SqliteStagingRepository
#[async_trait]
pub trait RowSource: Send + Sync {
    /// 最大行号（无数据时为 0）
    async fn max_row_num(&self, source_id: &str) -> RepositoryResult<i64>;

    /// 读取行号区间 (after_row, through_row] 的单元格
    async fn load_rows(
        &self,
        source_id: &str,
        after_row: i64,
        through_row: i64,
    ) -> RepositoryResult<Vec<Record>>;
}

/// 单元格：原始值 + 对齐结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub raw: String,
    pub context_uuid: Option<Uuid>,
    pub item_uuid: Option<Uuid>,
}

impl Cell {
    pub fn is_blank(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingTable {
    pub source_id: String,
    rows: BTreeMap<i64, BTreeMap<i64, Cell>>,
}

impl StagingTable {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            rows: BTreeMap::new(),
        }
    }

    /// 追加单元格；已加载过的行整行跳过（按行号去重）
    ///
    /// # 返回
    /// 新增的行数
    pub fn append(&mut self, records: Vec<Record>) -> usize {
        let loaded: BTreeSet<i64> = self.rows.keys().copied().collect();
        let mut added = BTreeSet::new();
        for record in records {
            if loaded.contains(&record.row_num) {
                continue;
            }
            added.insert(record.row_num);
            self.rows.entry(record.row_num).or_default().insert(
                record.field_num,
                Cell {
                    raw: record.record,
                    context_uuid: record.context_uuid,
                    item_uuid: record.item_uuid,
                },
            );
        }
        added.len()
    }

    /// 已加载的最大行号（空表为 0）
    pub fn max_row(&self) -> i64 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 行号区间 (after_row, through_row] 内已加载的行号
    pub fn rows_in(&self, after_row: i64, through_row: i64) -> Vec<i64> {
        if through_row <= after_row {
            return Vec::new();
        }
        self.rows
            .range(after_row + 1..=through_row)
            .map(|(row, _)| *row)
            .collect()
    }

    pub fn all_rows(&self) -> Vec<i64> {
        self.rows.keys().copied().collect()
    }

    pub fn cell(&self, row_num: i64, field_num: i64) -> Option<&Cell> {
        self.rows.get(&row_num).and_then(|cells| cells.get(&field_num))
    }

    /// 单元格原始值（去首尾空白；空值视为缺失）
    pub fn value(&self, row_num: i64, field_num: i64) -> Option<&str> {
        self.cell(row_num, field_num)
            .map(|c| c.raw.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn item(&self, row_num: i64, field_num: i64) -> Option<Uuid> {
        self.cell(row_num, field_num).and_then(|c| c.item_uuid)
    }

    /// 给定行中满足条件的行号（保持升序）
    pub fn rows_where<F>(&self, rows: &[i64], field_num: i64, predicate: F) -> Vec<i64>
    where
        F: Fn(&Cell) -> bool,
    {
        rows.iter()
            .copied()
            .filter(|row| self.cell(*row, field_num).map(&predicate).unwrap_or(false))
            .collect()
    }

    /// 写入对齐结果（单元格不存在时不创建）
    pub fn set_resolution(
        &mut self,
        row_num: i64,
        field_num: i64,
        context_uuid: Option<Uuid>,
        item_uuid: Option<Uuid>,
    ) -> bool {
        match self.rows.get_mut(&row_num).and_then(|cells| cells.get_mut(&field_num)) {
            Some(cell) => {
                cell.context_uuid = context_uuid;
                cell.item_uuid = item_uuid;
                true
            }
            None => false,
        }
    }

    pub fn clear_resolutions(&mut self) {
        for cell in self.rows.values_mut().flat_map(|cells| cells.values_mut()) {
            cell.context_uuid = None;
            cell.item_uuid = None;
        }
    }
}
