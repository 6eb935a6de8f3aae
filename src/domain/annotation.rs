// ==========================================
// 考古数据导入 ETL - 字段标注（关系模板）
// ==========================================
// 职责: 用户声明的字段间关系模板
// 类型: 层级边（包含 / 取值范围 / 从属 / 媒体文件）
//       描述边（描述 / 链接）、时空边
// 约束: 角色不匹配的标注在创建时拒绝
// ==========================================

use crate::domain::source::Field;
use crate::domain::types::{DataType, ItemType, EXCLUDED_PREDICATES};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// 标注配置错误（配置期硬失败）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnnotationError {
    #[error("字段不存在: source={source_id}, field_num={field_num}")]
    FieldNotFound { source_id: String, field_num: i64 },

    #[error("字段角色不匹配 (field_num={field_num}): 期望 {expected}，实际 {actual}")]
    RoleMismatch {
        field_num: i64,
        expected: String,
        actual: ItemType,
    },

    #[error("字段数据类型不匹配 (field_num={field_num}): 期望 {expected}，实际 {actual}")]
    DataTypeMismatch {
        field_num: i64,
        expected: String,
        actual: DataType,
    },

    #[error("层级边两端不能是同一字段: field_num={0}")]
    SelfReference(i64),

    #[error("谓词保留给专用处理，不能用于通用标注: {0}")]
    ReservedPredicate(Uuid),

    #[error("层级边会形成环: {parent_field} → {child_field}（下级已可到达上级）")]
    HierarchyCycle { parent_field: i64, child_field: i64 },
}

// ==========================================
// 限定节点（观测 / 事件 / 属性组 / 语言）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum QualifierNode {
    #[default]
    Default,
    Fixed(Uuid),
    Field(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Qualifiers {
    pub observation: QualifierNode,
    pub event: QualifierNode,
    pub attribute_group: QualifierNode,
    pub language: QualifierNode,
}

impl Qualifiers {
    fn field_refs(&self) -> Vec<(i64, ItemType)> {
        [
            (self.observation, ItemType::Observations),
            (self.event, ItemType::Events),
            (self.attribute_group, ItemType::AttributeGroups),
            (self.language, ItemType::Languages),
        ]
        .into_iter()
        .filter_map(|(node, role)| match node {
            QualifierNode::Field(num) => Some((num, role)),
            _ => None,
        })
        .collect()
    }
}

// ==========================================
// 描述边的谓词 / 取值来源
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum DescriptionSource {
    /// 取值列自身的 context 即为谓词
    FieldPredicate { object_field: i64 },
    /// 固定谓词 + 取值列
    FixedPredicate { predicate: Uuid, object_field: i64 },
    /// 变量列（逐行谓词）+ 值列
    VariableValue { variable_field: i64, value_field: i64 },
}

impl DescriptionSource {
    /// 提供对象 / 字面量的列
    pub fn object_field(&self) -> i64 {
        match self {
            DescriptionSource::FieldPredicate { object_field }
            | DescriptionSource::FixedPredicate { object_field, .. } => *object_field,
            DescriptionSource::VariableValue { value_field, .. } => *value_field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AnnotationKind {
    Contains { parent_field: i64, child_field: i64 },
    Range { variable_field: i64, value_field: i64 },
    Subordinate { parent_field: i64, child_field: i64 },
    MediaFile { media_field: i64, resource_field: i64 },
    Describes { subject_field: i64, source: DescriptionSource },
    Links { subject_field: i64, predicate: Uuid, object_field: i64 },
    Timespan { subject_field: i64, earliest_field: i64, latest_field: i64 },
}

impl AnnotationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationKind::Contains { .. } => "contains",
            AnnotationKind::Range { .. } => "range",
            AnnotationKind::Subordinate { .. } => "subordinate",
            AnnotationKind::MediaFile { .. } => "media_file",
            AnnotationKind::Describes { .. } => "describes",
            AnnotationKind::Links { .. } => "links",
            AnnotationKind::Timespan { .. } => "timespan",
        }
    }

    /// 层级边: (上级字段, 下级字段)
    pub fn hierarchy_edge(&self) -> Option<(i64, i64)> {
        match *self {
            AnnotationKind::Contains { parent_field, child_field }
            | AnnotationKind::Subordinate { parent_field, child_field } => {
                Some((parent_field, child_field))
            }
            AnnotationKind::Range { variable_field, value_field } => {
                Some((variable_field, value_field))
            }
            AnnotationKind::MediaFile { media_field, resource_field } => {
                Some((media_field, resource_field))
            }
            _ => None,
        }
    }
}

// ==========================================
// Annotation
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub annotation_id: Uuid,
    pub source_id: String,
    pub kind: AnnotationKind,
    pub qualifiers: Qualifiers,
    /// 声明顺序（批处理按此顺序逐个完成）
    pub sort: i64,
}

impl Annotation {
    pub fn new(source_id: &str, kind: AnnotationKind) -> Self {
        Self {
            annotation_id: Uuid::new_v4(),
            source_id: source_id.to_string(),
            kind,
            qualifiers: Qualifiers::default(),
            sort: 0,
        }
    }

    pub fn with_qualifiers(mut self, qualifiers: Qualifiers) -> Self {
        self.qualifiers = qualifiers;
        self
    }

    /// 校验标注与字段角色是否匹配
    ///
    /// # 规则
    /// - contains: 两端均为 subjects
    /// - range: variables|predicates → values|types，且数据类型一致
    /// - subordinate: 两端均为实体列，且不属于上述专用组合
    /// - media_file: media → resources
    /// - describes / links / timespan: 主体为实体列
    /// - 链接谓词不得为保留谓词
    pub fn validate(&self, fields: &[Field]) -> Result<(), AnnotationError> {
        let lookup = |num: i64| -> Result<&Field, AnnotationError> {
            fields
                .iter()
                .find(|f| f.field_num == num)
                .ok_or_else(|| AnnotationError::FieldNotFound {
                    source_id: self.source_id.clone(),
                    field_num: num,
                })
        };

        if let Some((parent, child)) = self.kind.hierarchy_edge() {
            if parent == child {
                return Err(AnnotationError::SelfReference(parent));
            }
        }

        match self.kind {
            AnnotationKind::Contains { parent_field, child_field } => {
                require_role(lookup(parent_field)?, &[ItemType::Subjects])?;
                require_role(lookup(child_field)?, &[ItemType::Subjects])?;
            }
            AnnotationKind::Range { variable_field, value_field } => {
                let variable = lookup(variable_field)?;
                let value = lookup(value_field)?;
                require_role(variable, &[ItemType::Variables, ItemType::Predicates])?;
                require_role(value, &[ItemType::Values, ItemType::Types])?;
                if variable.data_type != value.data_type {
                    return Err(AnnotationError::DataTypeMismatch {
                        field_num: value.field_num,
                        expected: variable.data_type.to_string(),
                        actual: value.data_type,
                    });
                }
            }
            AnnotationKind::Subordinate { parent_field, child_field } => {
                let parent = lookup(parent_field)?;
                let child = lookup(child_field)?;
                require_entity(parent)?;
                require_entity(child)?;
                if parent.item_type == ItemType::Subjects || child.item_type == ItemType::Subjects {
                    return Err(AnnotationError::RoleMismatch {
                        field_num: child.field_num,
                        expected: "非 subjects（地点层级使用 contains）".to_string(),
                        actual: child.item_type,
                    });
                }
            }
            AnnotationKind::MediaFile { media_field, resource_field } => {
                require_role(lookup(media_field)?, &[ItemType::Media])?;
                require_role(lookup(resource_field)?, &[ItemType::Resources])?;
            }
            AnnotationKind::Describes { subject_field, source } => {
                require_entity(lookup(subject_field)?)?;
                match source {
                    DescriptionSource::FieldPredicate { object_field } => {
                        require_role(lookup(object_field)?, &[ItemType::Types, ItemType::Literal])?;
                    }
                    DescriptionSource::FixedPredicate { predicate, object_field } => {
                        reject_reserved(predicate)?;
                        lookup(object_field)?;
                    }
                    DescriptionSource::VariableValue { variable_field, value_field } => {
                        require_role(
                            lookup(variable_field)?,
                            &[ItemType::Variables, ItemType::Predicates],
                        )?;
                        require_role(lookup(value_field)?, &[ItemType::Values, ItemType::Types])?;
                    }
                }
            }
            AnnotationKind::Links { subject_field, predicate, object_field } => {
                reject_reserved(predicate)?;
                require_entity(lookup(subject_field)?)?;
                lookup(object_field)?;
            }
            AnnotationKind::Timespan { subject_field, earliest_field, latest_field } => {
                require_entity(lookup(subject_field)?)?;
                for num in [earliest_field, latest_field] {
                    let field = lookup(num)?;
                    if !field.data_type.is_numeric() {
                        return Err(AnnotationError::DataTypeMismatch {
                            field_num: num,
                            expected: "integer|double".to_string(),
                            actual: field.data_type,
                        });
                    }
                }
            }
        }

        for (num, role) in self.qualifiers.field_refs() {
            require_role(lookup(num)?, &[role])?;
        }

        Ok(())
    }
}

impl Annotation {
    /// 校验新层级边加入后字段层级仍无环
    ///
    /// # 参数
    /// - existing: 同一导入批次已有的标注
    ///
    /// # 返回
    /// - Err(HierarchyCycle): 从下级字段沿已有层级边可到达上级字段
    pub fn check_acyclic(&self, existing: &[Annotation]) -> Result<(), AnnotationError> {
        let Some((parent_field, child_field)) = self.kind.hierarchy_edge() else {
            return Ok(());
        };
        let edges: Vec<(i64, i64)> = existing
            .iter()
            .filter(|a| a.source_id == self.source_id)
            .filter_map(|a| a.kind.hierarchy_edge())
            .collect();

        let mut visited = HashSet::new();
        let mut stack = vec![child_field];
        while let Some(current) = stack.pop() {
            if current == parent_field {
                return Err(AnnotationError::HierarchyCycle {
                    parent_field,
                    child_field,
                });
            }
            if !visited.insert(current) {
                continue;
            }
            stack.extend(
                edges
                    .iter()
                    .filter(|(from, _)| *from == current)
                    .map(|(_, to)| *to),
            );
        }
        Ok(())
    }
}

fn require_role(field: &Field, allowed: &[ItemType]) -> Result<(), AnnotationError> {
    if allowed.contains(&field.item_type) {
        return Ok(());
    }
    Err(AnnotationError::RoleMismatch {
        field_num: field.field_num,
        expected: allowed
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join("|"),
        actual: field.item_type,
    })
}

fn require_entity(field: &Field) -> Result<(), AnnotationError> {
    if field.is_entity_field() {
        return Ok(());
    }
    Err(AnnotationError::RoleMismatch {
        field_num: field.field_num,
        expected: "实体列".to_string(),
        actual: field.item_type,
    })
}

fn reject_reserved(predicate: Uuid) -> Result<(), AnnotationError> {
    if EXCLUDED_PREDICATES.contains(&predicate) {
        return Err(AnnotationError::ReservedPredicate(predicate));
    }
    Ok(())
}
