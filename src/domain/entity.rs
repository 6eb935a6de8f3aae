// ==========================================
// 考古数据导入 ETL - 规范实体
// ==========================================
// 职责: 实体存储中的规范条目（外部拥有，暂存层只引用）
// ==========================================

use crate::domain::types::{DataType, ItemType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub uuid: Uuid,
    pub item_type: ItemType,
    pub data_type: DataType,
    pub label: String,
    pub slug: String,
    pub project_uuid: Uuid,
    pub item_class_uuid: Option<Uuid>,
    pub context_uuid: Option<Uuid>,
    /// 规范化 URI（无协议头、无尾斜杠）
    pub uri: Option<String>,
    /// 外部键
    pub item_key: Option<String>,
    pub initials: Option<String>,
    pub combined_name: Option<String>,
    /// 创建该实体的导入批次（系统实体为 None）
    pub source_id: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// 新建实体请求
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    /// 指定标识（显式 id 列），None 时随机生成
    pub uuid: Option<Uuid>,
    pub item_type: ItemType,
    pub data_type: DataType,
    pub label: String,
    pub slug: String,
    pub project_uuid: Uuid,
    pub item_class_uuid: Option<Uuid>,
    pub context_uuid: Option<Uuid>,
    pub uri: Option<String>,
    pub item_key: Option<String>,
    pub initials: Option<String>,
    pub combined_name: Option<String>,
    pub source_id: Option<String>,
    pub meta: serde_json::Value,
}

impl NewEntity {
    pub fn into_entity(self) -> Entity {
        Entity {
            uuid: self.uuid.unwrap_or_else(Uuid::new_v4),
            item_type: self.item_type,
            data_type: self.data_type,
            label: self.label,
            slug: self.slug,
            project_uuid: self.project_uuid,
            item_class_uuid: self.item_class_uuid,
            context_uuid: self.context_uuid,
            uri: self.uri,
            item_key: self.item_key,
            initials: self.initials,
            combined_name: self.combined_name,
            source_id: self.source_id,
            meta: self.meta,
            created_at: Utc::now(),
        }
    }
}

// ==========================================
// EntityQuery - 候选查询条件
// ==========================================

/// 标签类匹配项（多项之间为 OR）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchTerm {
    Uuid(Uuid),
    Label(String),
    Slug(String),
    Uri(String),
    ItemKey(String),
    Initials(String),
    CombinedName(String),
}

/// 附加过滤条件（列 = 值）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityFilter {
    Label(String),
    Slug(String),
    ItemKey(String),
    ItemClass(Uuid),
    Context(Uuid),
    Uri(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityQuery {
    /// 允许的所属项目集合（空集合不匹配任何实体）
    pub projects: Vec<Uuid>,
    pub item_type: Option<ItemType>,
    pub data_type: Option<DataType>,
    pub context_uuid: Option<Uuid>,
    pub item_class_uuid: Option<Uuid>,
    pub any_of: Vec<MatchTerm>,
    pub filters: Vec<EntityFilter>,
    pub excludes: Vec<EntityFilter>,
}
