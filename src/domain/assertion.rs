// ==========================================
// 考古数据导入 ETL - 断言（物化关系记录）
// ==========================================
// 职责: 主体-谓词-对象/字面量 + 限定节点 + 排序权重
// 约束: 标识由全部身份相关属性确定性派生（UUIDv5）
// ==========================================

use crate::domain::types::ASSERTION_NAMESPACE;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 断言对象：实体或单个类型化字面量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum AssertionObject {
    Entity(Uuid),
    String(String),
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Date(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub uuid: Uuid,
    pub project_uuid: Uuid,
    pub source_id: String,
    pub subject_uuid: Uuid,
    pub predicate_uuid: Uuid,
    pub observation_uuid: Option<Uuid>,
    pub event_uuid: Option<Uuid>,
    pub attribute_group_uuid: Option<Uuid>,
    pub language_uuid: Option<Uuid>,
    pub object: AssertionObject,
    pub sort: f64,
}

/// 构造断言所需的身份相关属性
#[derive(Debug, Clone, PartialEq)]
pub struct AssertionKey {
    pub subject_uuid: Uuid,
    pub predicate_uuid: Uuid,
    pub observation_uuid: Option<Uuid>,
    pub event_uuid: Option<Uuid>,
    pub attribute_group_uuid: Option<Uuid>,
    pub language_uuid: Option<Uuid>,
    pub object: AssertionObject,
}

impl AssertionKey {
    /// 规范化身份串
    ///
    /// 格式: subject|predicate|observation|event|attribute_group|language|object|string|boolean|integer|double|date
    /// 缺省槽位为空串
    pub fn canonical_string(&self) -> String {
        let opt = |u: Option<Uuid>| u.map(|v| v.to_string()).unwrap_or_default();
        let mut slots: [String; 6] = Default::default();
        match &self.object {
            AssertionObject::Entity(u) => slots[0] = u.to_string(),
            AssertionObject::String(s) => slots[1] = s.clone(),
            AssertionObject::Boolean(b) => slots[2] = b.to_string(),
            AssertionObject::Integer(i) => slots[3] = i.to_string(),
            // 使用位模式，避免浮点格式化差异
            AssertionObject::Double(d) => slots[4] = format!("{:016x}", d.to_bits()),
            AssertionObject::Date(d) => slots[5] = d.format("%Y-%m-%d").to_string(),
        }
        [
            self.subject_uuid.to_string(),
            self.predicate_uuid.to_string(),
            opt(self.observation_uuid),
            opt(self.event_uuid),
            opt(self.attribute_group_uuid),
            opt(self.language_uuid),
        ]
        .into_iter()
        .chain(slots)
        .collect::<Vec<_>>()
        .join("|")
    }

    pub fn identity(&self) -> Uuid {
        Uuid::new_v5(&ASSERTION_NAMESPACE, self.canonical_string().as_bytes())
    }

    pub fn into_assertion(self, project_uuid: Uuid, source_id: &str, sort: f64) -> Assertion {
        Assertion {
            uuid: self.identity(),
            project_uuid,
            source_id: source_id.to_string(),
            subject_uuid: self.subject_uuid,
            predicate_uuid: self.predicate_uuid,
            observation_uuid: self.observation_uuid,
            event_uuid: self.event_uuid,
            attribute_group_uuid: self.attribute_group_uuid,
            language_uuid: self.language_uuid,
            object: self.object,
            sort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(object: AssertionObject) -> AssertionKey {
        AssertionKey {
            subject_uuid: Uuid::from_u128(1),
            predicate_uuid: Uuid::from_u128(2),
            observation_uuid: None,
            event_uuid: None,
            attribute_group_uuid: None,
            language_uuid: None,
            object,
        }
    }

    #[test]
    fn test_identity_is_deterministic() {
        let a = key(AssertionObject::String("Vast fortress".to_string()));
        let b = key(AssertionObject::String("Vast fortress".to_string()));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_distinguishes_slots() {
        // 相同文本落在不同类型槽位时身份不同
        let as_string = key(AssertionObject::String("12".to_string()));
        let as_integer = key(AssertionObject::Integer(12));
        assert_ne!(as_string.identity(), as_integer.identity());

        let mut qualified = key(AssertionObject::Integer(12));
        qualified.observation_uuid = Some(Uuid::from_u128(9));
        assert_ne!(qualified.identity(), as_integer.identity());
    }

    #[test]
    fn test_sort_does_not_affect_identity() {
        let a = key(AssertionObject::Boolean(true)).into_assertion(Uuid::nil(), "s1", 3.001);
        let b = key(AssertionObject::Boolean(true)).into_assertion(Uuid::nil(), "s1", 7.5);
        assert_eq!(a.uuid, b.uuid);
    }
}
