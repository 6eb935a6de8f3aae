// ==========================================
// 考古数据导入 ETL - 导入批次 / 字段 / 单元格
// ==========================================
// 职责: Source（导入批次）、Field（暂存列）、Record（暂存单元格）
// 约束: 字段序号在批次内唯一；(行, 字段) 在批次内唯一
// ==========================================

use crate::domain::types::{DataType, ItemType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==========================================
// Source - 导入批次
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub source_id: String,
    pub project_uuid: Uuid,
    pub label: String,
    pub field_count: i64,
    pub row_count: i64,
    /// 状态（ingested / etl-complete 等）
    pub status: String,
    /// 自由格式元数据
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn new(source_id: &str, project_uuid: Uuid, label: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            project_uuid,
            label: label.to_string(),
            field_count: 0,
            row_count: 0,
            status: SOURCE_STATUS_INGESTED.to_string(),
            meta: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }
}

pub const SOURCE_STATUS_INGESTED: &str = "ingested";
pub const SOURCE_STATUS_COMPLETE: &str = "etl-complete";

// ==========================================
// 字段过滤条件
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAttribute {
    Label,
    Slug,
    ItemKey,
    ItemClass,
    Context,
    Uri,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeFilter {
    pub attribute: FilterAttribute,
    pub value: String,
}

// ==========================================
// FieldOptions - 对齐调优选项
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldOptions {
    /// 人员按姓名首字母匹配
    pub match_initials: bool,
    /// 标签之外同时按 slug 匹配
    pub match_slug: bool,
    /// 固定项目范围（覆盖批次所属项目）
    pub project_uuid: Option<Uuid>,
    /// 显式实体标识所在列
    pub id_field: Option<i64>,
    /// 显式外部键 / URI 所在列
    pub alt_id_field: Option<i64>,
    /// 额外包含条件（全部满足）
    pub filters: Vec<AttributeFilter>,
    /// 额外排除条件（任一满足即排除）
    pub excludes: Vec<AttributeFilter>,
}

// ==========================================
// Field - 暂存列
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub source_id: String,
    pub field_num: i64,
    pub label: String,
    pub item_type: ItemType,
    pub data_type: DataType,
    pub item_class_uuid: Option<Uuid>,
    /// 对齐作用域实体（上级地点 / 作为命名空间的谓词）
    pub context_uuid: Option<Uuid>,
    pub label_prefix: Option<String>,
    pub options: FieldOptions,
}

impl Field {
    pub fn new(
        source_id: &str,
        field_num: i64,
        label: &str,
        item_type: ItemType,
        data_type: DataType,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            field_num,
            label: label.to_string(),
            item_type,
            data_type,
            item_class_uuid: None,
            context_uuid: None,
            label_prefix: None,
            options: FieldOptions::default(),
        }
    }

    /// 单元格对齐后的实体角色（None 表示字面量列）
    pub fn entity_item_type(&self) -> Option<ItemType> {
        self.item_type.resolved_item_type(self.data_type)
    }

    pub fn is_entity_field(&self) -> bool {
        self.entity_item_type().is_some()
    }

    /// 对齐出的实体所携带的数据类型
    ///
    /// 谓词携带其取值的数据类型，其余实体一律为 id
    pub fn entity_data_type(&self) -> DataType {
        match self.entity_item_type() {
            Some(ItemType::Predicates) => self.data_type,
            _ => DataType::Id,
        }
    }
}

// ==========================================
// Record - 暂存单元格
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source_id: String,
    pub row_num: i64,
    pub field_num: i64,
    pub record: String,
    pub context_uuid: Option<Uuid>,
    pub item_uuid: Option<Uuid>,
}

impl Record {
    pub fn new(source_id: &str, row_num: i64, field_num: i64, value: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            row_num,
            field_num,
            record: value.to_string(),
            context_uuid: None,
            item_uuid: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_data_type() {
        let variable = Field::new("s1", 3, "Variable", ItemType::Variables, DataType::Double);
        assert_eq!(variable.entity_item_type(), Some(ItemType::Predicates));
        assert_eq!(variable.entity_data_type(), DataType::Double);

        let site = Field::new("s1", 1, "Site", ItemType::Subjects, DataType::Id);
        assert_eq!(site.entity_data_type(), DataType::Id);

        let notes = Field::new("s1", 2, "Notes", ItemType::Literal, DataType::String);
        assert!(!notes.is_entity_field());
    }

    #[test]
    fn test_field_options_tolerate_missing_keys() {
        let options: FieldOptions =
            serde_json::from_str(r#"{"match_initials": true}"#).unwrap();
        assert!(options.match_initials);
        assert!(options.filters.is_empty());
        assert_eq!(options.id_field, None);
    }
}
