// ==========================================
// 考古数据导入 ETL - 断言物化器
// ==========================================
// 职责: 已对齐单元格 + 标注 → 去重、确定性标识的断言
// 流程: 组装键 → 丢弃缺主体/缺对象行 → 按键去重 → 字面量转换
//       → 计算标识与排序权重 → 先删同标识再批量插入（失败逐行兜底）
// 红线: 保留谓词（包含 / 媒体含文件）只由专用路径生成
// ==========================================

use crate::assertion::literal::coerce_literal;
use crate::domain::{
    Annotation, AnnotationKind, Assertion, AssertionKey, AssertionObject, DataType,
    DescriptionSource, Entity, Field, ItemType, QualifierNode, EXCLUDED_PREDICATES,
    PREDICATE_CONTAINS_UUID, PREDICATE_HAS_FILE_UUID,
};
use crate::error::EtlResult;
use crate::reconcile::{EntityResolver, EntitySpec};
use crate::repository::AssertionStore;
use crate::staging::StagingTable;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 单次物化结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializeReport {
    /// 去重后生成的断言数
    pub produced: usize,
    /// 成功写入的断言数
    pub written: usize,
    /// 写入失败的断言数
    pub failed: usize,
    /// 逐行兜底时的失败信息
    pub errors: Vec<String>,
    /// 缺主体 / 缺对象而丢弃的行数
    pub dropped_rows: usize,
    /// 改写到备注谓词的值数
    pub noted: usize,
}

impl MaterializeReport {
    pub fn merge(&mut self, other: MaterializeReport) {
        self.produced += other.produced;
        self.written += other.written;
        self.failed += other.failed;
        self.errors.extend(other.errors);
        self.dropped_rows += other.dropped_rows;
        self.noted += other.noted;
    }
}

/// 排序权重: 字段序号 + 行号 / 10^(最大行号位数 + 1)
pub fn sort_weight(field_num: i64, row_num: i64, max_row: i64) -> f64 {
    let digits = max_row.max(1).to_string().len() as i32;
    field_num as f64 + row_num as f64 / 10f64.powi(digits + 1)
}

/// 单行的谓词 / 对象来源
enum ObjectPlan {
    /// 整个标注跳过（配置未就绪或不满足链接约束）
    Skip(&'static str),
    Ready {
        /// None 表示逐行谓词（变量列）
        predicate: Option<Entity>,
        variable_field: Option<i64>,
        object_field: Field,
        /// 对象必须为实体（链接标注）
        entity_only: bool,
    },
}

pub struct AssertionMaterializer {
    resolver: Arc<EntityResolver>,
    store: Arc<dyn AssertionStore>,
    source_id: String,
    project_uuid: Uuid,
    fields: BTreeMap<i64, Field>,
    predicates: HashMap<Uuid, Option<Entity>>,
    notes: HashMap<Uuid, Option<Uuid>>,
}

impl AssertionMaterializer {
    pub fn new(
        resolver: Arc<EntityResolver>,
        store: Arc<dyn AssertionStore>,
        source_id: &str,
        project_uuid: Uuid,
        fields: Vec<Field>,
    ) -> Self {
        Self {
            resolver,
            store,
            source_id: source_id.to_string(),
            project_uuid,
            fields: fields.into_iter().map(|f| (f.field_num, f)).collect(),
            predicates: HashMap::new(),
            notes: HashMap::new(),
        }
    }

    /// 更新字段元数据（字段谓词上下文设定后调用）
    pub fn set_field(&mut self, field: Field) {
        self.fields.insert(field.field_num, field);
    }

    /// 物化一条标注在给定行上的断言
    pub async fn materialize(
        &mut self,
        annotation: &Annotation,
        table: &StagingTable,
        rows: &[i64],
    ) -> EtlResult<MaterializeReport> {
        let assertions = match annotation.kind {
            AnnotationKind::Describes { .. } | AnnotationKind::Links { .. } => {
                self.build_generic(annotation, table, rows).await?
            }
            AnnotationKind::Contains { parent_field, child_field } => {
                Self::build_structural(
                    &self.source_id,
                    self.project_uuid,
                    PREDICATE_CONTAINS_UUID,
                    parent_field,
                    child_field,
                    table,
                    rows,
                )
            }
            AnnotationKind::MediaFile { media_field, resource_field } => {
                Self::build_structural(
                    &self.source_id,
                    self.project_uuid,
                    PREDICATE_HAS_FILE_UUID,
                    media_field,
                    resource_field,
                    table,
                    rows,
                )
            }
            _ => return Ok(MaterializeReport::default()),
        };

        let (assertions, mut report) = assertions;
        let write = self.write(assertions).await?;
        report.merge(write);

        info!(
            source_id = %self.source_id,
            kind = annotation.kind.as_str(),
            rows = rows.len(),
            produced = report.produced,
            written = report.written,
            failed = report.failed,
            "标注物化完成"
        );
        Ok(report)
    }

    // ==========================================
    // 描述 / 链接（通用路径）
    // ==========================================

    async fn build_generic(
        &mut self,
        annotation: &Annotation,
        table: &StagingTable,
        rows: &[i64],
    ) -> EtlResult<(Vec<Assertion>, MaterializeReport)> {
        let mut report = MaterializeReport::default();
        let (subject_field, plan) = match annotation.kind {
            AnnotationKind::Describes { subject_field, source } => {
                (subject_field, self.describe_plan(source).await?)
            }
            AnnotationKind::Links { subject_field, predicate, object_field } => {
                (subject_field, self.link_plan(predicate, object_field).await?)
            }
            _ => return Ok((Vec::new(), report)),
        };

        let (predicate, variable_field, object_field, entity_only) = match plan {
            ObjectPlan::Skip(reason) => {
                warn!(
                    source_id = %self.source_id,
                    annotation_id = %annotation.annotation_id,
                    reason = reason,
                    "跳过标注"
                );
                return Ok((Vec::new(), report));
            }
            ObjectPlan::Ready { predicate, variable_field, object_field, entity_only } => {
                (predicate, variable_field, object_field, entity_only)
            }
        };

        let max_row = table.max_row();
        let mut seen = HashSet::new();
        let mut assertions = Vec::new();

        for &row in rows {
            let Some(subject) = table.item(row, subject_field) else {
                report.dropped_rows += 1;
                continue;
            };

            let row_predicate = match (&predicate, variable_field) {
                (Some(p), _) => Some(p.clone()),
                (None, Some(var)) => match table.item(row, var) {
                    Some(u) => self.predicate(u).await?,
                    None => None,
                },
                (None, None) => None,
            };
            let Some(row_predicate) = row_predicate else {
                report.dropped_rows += 1;
                continue;
            };
            if EXCLUDED_PREDICATES.contains(&row_predicate.uuid) {
                report.dropped_rows += 1;
                continue;
            }

            let Some((predicate_uuid, object, noted)) = self
                .object_for_row(table, row, &row_predicate, &object_field, entity_only)
                .await?
            else {
                report.dropped_rows += 1;
                continue;
            };
            if noted {
                report.noted += 1;
            }

            let key = AssertionKey {
                subject_uuid: subject,
                predicate_uuid,
                observation_uuid: Self::qualifier(annotation.qualifiers.observation, table, row),
                event_uuid: Self::qualifier(annotation.qualifiers.event, table, row),
                attribute_group_uuid: Self::qualifier(annotation.qualifiers.attribute_group, table, row),
                language_uuid: Self::qualifier(annotation.qualifiers.language, table, row),
                object,
            };
            // 同键多行只保留首行
            if !seen.insert(key.identity()) {
                continue;
            }
            let sort = sort_weight(object_field.field_num, row, max_row);
            assertions.push(key.into_assertion(self.project_uuid, &self.source_id, sort));
        }

        report.produced = assertions.len();
        Ok((assertions, report))
    }

    async fn describe_plan(&mut self, source: DescriptionSource) -> EtlResult<ObjectPlan> {
        let object_field = match self.fields.get(&source.object_field()) {
            Some(f) => f.clone(),
            None => return Ok(ObjectPlan::Skip("取值字段不存在")),
        };
        let plan = match source {
            DescriptionSource::FieldPredicate { .. } => {
                // 取值字段自身的 context 即谓词
                let Some(predicate_uuid) = object_field.context_uuid else {
                    return Ok(ObjectPlan::Skip("取值字段尚无谓词上下文"));
                };
                match self.predicate(predicate_uuid).await? {
                    Some(p) => ObjectPlan::Ready {
                        predicate: Some(p),
                        variable_field: None,
                        object_field,
                        entity_only: false,
                    },
                    None => ObjectPlan::Skip("字段谓词不存在"),
                }
            }
            DescriptionSource::FixedPredicate { predicate, .. } => {
                match self.predicate(predicate).await? {
                    Some(p) => ObjectPlan::Ready {
                        predicate: Some(p),
                        variable_field: None,
                        object_field,
                        entity_only: false,
                    },
                    None => ObjectPlan::Skip("固定谓词不存在"),
                }
            }
            DescriptionSource::VariableValue { variable_field, .. } => ObjectPlan::Ready {
                predicate: None,
                variable_field: Some(variable_field),
                object_field,
                entity_only: false,
            },
        };
        Ok(plan)
    }

    /// 链接: 谓词与对象均须为实体（id 类型）
    async fn link_plan(&mut self, predicate: Uuid, object_field: i64) -> EtlResult<ObjectPlan> {
        let Some(object_field) = self.fields.get(&object_field).cloned() else {
            return Ok(ObjectPlan::Skip("对象字段不存在"));
        };
        if !object_field.is_entity_field() {
            return Ok(ObjectPlan::Skip("链接对象字段不是实体列"));
        }
        let Some(predicate) = self.predicate(predicate).await? else {
            return Ok(ObjectPlan::Skip("链接谓词不存在"));
        };
        if predicate.data_type != DataType::Id {
            return Ok(ObjectPlan::Skip("链接谓词不是 id 类型"));
        }
        Ok(ObjectPlan::Ready {
            predicate: Some(predicate),
            variable_field: None,
            object_field,
            entity_only: true,
        })
    }

    /// 单行对象；字面量转换失败时改写到备注谓词
    ///
    /// # 返回
    /// (谓词, 对象, 是否改写为备注)
    async fn object_for_row(
        &mut self,
        table: &StagingTable,
        row: i64,
        predicate: &Entity,
        object_field: &Field,
        entity_only: bool,
    ) -> EtlResult<Option<(Uuid, AssertionObject, bool)>> {
        if object_field.is_entity_field() {
            return Ok(table
                .item(row, object_field.field_num)
                .map(|u| (predicate.uuid, AssertionObject::Entity(u), false)));
        }
        if entity_only {
            return Ok(None);
        }

        let Some(raw) = table.value(row, object_field.field_num) else {
            return Ok(None);
        };
        // 谓词为 id 类型时按取值字段自身的数据类型存字面量
        let data_type = if predicate.data_type.is_literal() {
            predicate.data_type
        } else {
            object_field.data_type
        };
        if let Some(object) = coerce_literal(data_type, raw) {
            return Ok(Some((predicate.uuid, object, false)));
        }

        let Some(note) = self.note_predicate(predicate).await? else {
            error!(
                source_id = %self.source_id,
                predicate = %predicate.uuid,
                row = row,
                "备注谓词不可用，值无法保存"
            );
            return Ok(None);
        };
        warn!(
            source_id = %self.source_id,
            field_num = object_field.field_num,
            row = row,
            data_type = %data_type,
            value = %raw,
            "字面量类型转换失败，改存备注谓词"
        );
        Ok(Some((note, AssertionObject::String(raw.to_string()), true)))
    }

    fn qualifier(node: QualifierNode, table: &StagingTable, row: i64) -> Option<Uuid> {
        match node {
            QualifierNode::Default => None,
            QualifierNode::Fixed(u) => Some(u),
            QualifierNode::Field(field_num) => table.item(row, field_num),
        }
    }

    async fn predicate(&mut self, uuid: Uuid) -> EtlResult<Option<Entity>> {
        if let Some(cached) = self.predicates.get(&uuid) {
            return Ok(cached.clone());
        }
        let entity = self
            .resolver
            .store()
            .get(uuid)
            .await?
            .filter(|e| e.item_type == ItemType::Predicates);
        self.predicates.insert(uuid, entity.clone());
        Ok(entity)
    }

    /// `<谓词标签> [Note]`，字符串类型，上下文为原谓词
    async fn note_predicate(&mut self, predicate: &Entity) -> EtlResult<Option<Uuid>> {
        if let Some(cached) = self.notes.get(&predicate.uuid) {
            return Ok(*cached);
        }
        let outcome = self
            .resolver
            .get_or_create(EntitySpec {
                item_type: ItemType::Predicates,
                data_type: DataType::String,
                label: format!("{} [Note]", predicate.label),
                context_uuid: Some(predicate.uuid),
                item_class_uuid: None,
                meta: json!({
                    "source_id": self.source_id,
                    "note_for": predicate.uuid,
                }),
            })
            .await?;
        let note = outcome.uuid();
        self.notes.insert(predicate.uuid, note);
        Ok(note)
    }

    // ==========================================
    // 层级 / 媒体文件（专用路径）
    // ==========================================

    fn build_structural(
        source_id: &str,
        project_uuid: Uuid,
        predicate: Uuid,
        parent_field: i64,
        child_field: i64,
        table: &StagingTable,
        rows: &[i64],
    ) -> (Vec<Assertion>, MaterializeReport) {
        let mut report = MaterializeReport::default();
        let max_row = table.max_row();
        let mut seen = HashSet::new();
        let mut assertions = Vec::new();

        for &row in rows {
            let (Some(parent), Some(child)) = (table.item(row, parent_field), table.item(row, child_field))
            else {
                report.dropped_rows += 1;
                continue;
            };
            let key = AssertionKey {
                subject_uuid: parent,
                predicate_uuid: predicate,
                observation_uuid: None,
                event_uuid: None,
                attribute_group_uuid: None,
                language_uuid: None,
                object: AssertionObject::Entity(child),
            };
            if !seen.insert(key.identity()) {
                continue;
            }
            let sort = sort_weight(child_field, row, max_row);
            assertions.push(key.into_assertion(project_uuid, source_id, sort));
        }

        report.produced = assertions.len();
        (assertions, report)
    }

    // ==========================================
    // 写入
    // ==========================================

    /// 先删同标识断言再批量插入；批量失败时逐行插入并收集失败
    pub async fn write(&self, assertions: Vec<Assertion>) -> EtlResult<MaterializeReport> {
        let mut report = MaterializeReport::default();
        if assertions.is_empty() {
            return Ok(report);
        }

        let uuids: Vec<Uuid> = assertions.iter().map(|a| a.uuid).collect();
        self.store.delete_by_uuids(&uuids).await?;

        match self.store.bulk_insert(&assertions).await {
            Ok(n) => {
                report.written = n;
                debug!(source_id = %self.source_id, written = n, "断言批量写入");
            }
            Err(bulk_err) => {
                warn!(
                    source_id = %self.source_id,
                    count = assertions.len(),
                    error = %bulk_err,
                    "批量写入失败，改为逐行写入"
                );
                for assertion in &assertions {
                    match self.store.insert_one(assertion).await {
                        Ok(()) => report.written += 1,
                        Err(e) => {
                            report.failed += 1;
                            let message = format!("assertion {}: {}", assertion.uuid, e);
                            warn!(source_id = %self.source_id, error = %message, "断言写入失败");
                            report.errors.push(message);
                        }
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_weight_orders_rows_within_field() {
        assert!((sort_weight(3, 1, 9) - 3.01).abs() < 1e-12);
        assert!((sort_weight(3, 7, 9) - 3.07).abs() < 1e-12);
        // 最大行号 120 → 3 位 → 分母 10^4
        assert!((sort_weight(2, 120, 120) - 2.012).abs() < 1e-12);
        assert!(sort_weight(2, 120, 120) < sort_weight(3, 1, 120));
    }
}
