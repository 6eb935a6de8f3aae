// ==========================================
// 考古数据导入 ETL - 领域类型定义
// ==========================================
// 职责: 语义角色 (item_type)、数据类型、系统保留实体
// 序列化格式: kebab-case (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==========================================
// 系统保留实体
// ==========================================
// 由 db::initialize_schema 写入 entity 表

/// 全局共享项目（所有项目都可匹配其下实体）
pub const GLOBAL_PROJECT_UUID: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0001);

/// 空间包含谓词（仅由层级遍历维护）
pub const PREDICATE_CONTAINS_UUID: Uuid =
    Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0010);

/// 媒体包含文件谓词（仅由媒体/资源对齐维护）
pub const PREDICATE_HAS_FILE_UUID: Uuid =
    Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0011);

/// 断言标识派生所用的 UUIDv5 命名空间
pub const ASSERTION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b0e_93a4_5d7e_8c21_4e5f_a0b3_c9d2);

/// 通用断言路径不得生成的谓词
pub const EXCLUDED_PREDICATES: [Uuid; 2] = [PREDICATE_CONTAINS_UUID, PREDICATE_HAS_FILE_UUID];

// ==========================================
// 语义角色 (Item Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    Subjects,        // 地点/遗物等空间实体
    Media,           // 媒体
    Documents,       // 文档
    Persons,         // 人员
    Projects,        // 项目
    Predicates,      // 谓词（属性/关系）
    Types,           // 分类值
    Variables,       // 变量列（取值为谓词名）
    Values,          // 变量值列
    Resources,       // 媒体文件
    Uri,             // 外部 URI
    Uuid,            // 显式实体标识
    Events,          // 事件
    Observations,    // 观测
    AttributeGroups, // 属性组
    Languages,       // 语言
    SpaceTime,       // 时空范围
    Literal,         // 按数据类型存储的字面量
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Subjects => "subjects",
            ItemType::Media => "media",
            ItemType::Documents => "documents",
            ItemType::Persons => "persons",
            ItemType::Projects => "projects",
            ItemType::Predicates => "predicates",
            ItemType::Types => "types",
            ItemType::Variables => "variables",
            ItemType::Values => "values",
            ItemType::Resources => "resources",
            ItemType::Uri => "uri",
            ItemType::Uuid => "uuid",
            ItemType::Events => "events",
            ItemType::Observations => "observations",
            ItemType::AttributeGroups => "attribute-groups",
            ItemType::Languages => "languages",
            ItemType::SpaceTime => "space-time",
            ItemType::Literal => "literal",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        let item_type = match s.trim() {
            "subjects" => ItemType::Subjects,
            "media" => ItemType::Media,
            "documents" => ItemType::Documents,
            "persons" => ItemType::Persons,
            "projects" => ItemType::Projects,
            "predicates" => ItemType::Predicates,
            "types" => ItemType::Types,
            "variables" => ItemType::Variables,
            "values" => ItemType::Values,
            "resources" => ItemType::Resources,
            "uri" => ItemType::Uri,
            "uuid" => ItemType::Uuid,
            "events" => ItemType::Events,
            "observations" => ItemType::Observations,
            "attribute-groups" => ItemType::AttributeGroups,
            "languages" => ItemType::Languages,
            "space-time" => ItemType::SpaceTime,
            "literal" => ItemType::Literal,
            _ => return None,
        };
        Some(item_type)
    }

    /// 该角色的单元格对齐后得到的实体角色
    ///
    /// # 规则
    /// - variables → predicates
    /// - values → types（仅当值列为 id 类型）
    /// - literal 不对齐
    pub fn resolved_item_type(&self, data_type: DataType) -> Option<ItemType> {
        match self {
            ItemType::Literal => None,
            ItemType::Variables => Some(ItemType::Predicates),
            ItemType::Values if data_type == DataType::Id => Some(ItemType::Types),
            ItemType::Values => None,
            other => Some(*other),
        }
    }

    /// 新建该角色实体时必须具备的上级实体角色
    ///
    /// 返回 None 表示任意上级（含项目兜底）均可
    pub fn required_context(&self) -> Option<ItemType> {
        match self {
            ItemType::Subjects | ItemType::SpaceTime => Some(ItemType::Subjects),
            ItemType::Types => Some(ItemType::Predicates),
            ItemType::Resources => Some(ItemType::Media),
            _ => None,
        }
    }

    /// 该角色的实体能否作为下级字段的上下文
    pub fn is_context_role(&self) -> bool {
        matches!(
            self,
            ItemType::Subjects | ItemType::Predicates | ItemType::Media | ItemType::Projects
        )
    }

    /// 该角色的实体能否作为指定角色的上下文
    pub fn can_scope(&self, child: ItemType) -> bool {
        match child.required_context() {
            Some(required) => *self == required,
            None => self.is_context_role(),
        }
    }

    /// URI / 外部键类角色：按 URI 或 item_key 或标签匹配
    pub fn is_key_bearing(&self) -> bool {
        matches!(self, ItemType::Uri | ItemType::Resources)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 数据类型 (Data Type)
// ==========================================
// id: 实体引用；其余为字面量类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataType {
    Id,
    String,
    Boolean,
    Integer,
    Double,
    Date,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Id => "id",
            DataType::String => "string",
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Double => "double",
            DataType::Date => "date",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        let data_type = match s.trim() {
            "id" => DataType::Id,
            "string" => DataType::String,
            "boolean" => DataType::Boolean,
            "integer" => DataType::Integer,
            "double" => DataType::Double,
            "date" => DataType::Date,
            _ => return None,
        };
        Some(data_type)
    }

    pub fn is_literal(&self) -> bool {
        !matches!(self, DataType::Id)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Double)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_type_roundtrip_names() {
        for item_type in [
            ItemType::Subjects,
            ItemType::AttributeGroups,
            ItemType::SpaceTime,
            ItemType::Literal,
        ] {
            assert_eq!(ItemType::parse_str(item_type.as_str()), Some(item_type));
        }
        assert_eq!(ItemType::parse_str("locations"), None);
    }

    #[test]
    fn test_resolved_item_type() {
        assert_eq!(
            ItemType::Variables.resolved_item_type(DataType::String),
            Some(ItemType::Predicates)
        );
        assert_eq!(
            ItemType::Values.resolved_item_type(DataType::Id),
            Some(ItemType::Types)
        );
        assert_eq!(ItemType::Values.resolved_item_type(DataType::Double), None);
        assert_eq!(ItemType::Literal.resolved_item_type(DataType::String), None);
    }

    #[test]
    fn test_context_compatibility() {
        assert!(ItemType::Subjects.can_scope(ItemType::Subjects));
        assert!(!ItemType::Projects.can_scope(ItemType::Subjects));
        assert!(ItemType::Predicates.can_scope(ItemType::Types));
        assert!(ItemType::Media.can_scope(ItemType::Resources));
        assert!(!ItemType::Persons.can_scope(ItemType::Persons));
        assert!(ItemType::Projects.can_scope(ItemType::Persons));
    }
}
