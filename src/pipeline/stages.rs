// ==========================================
// 考古数据导入 ETL - 流水线阶段定义
// ==========================================
// 职责: 固定阶段顺序、批处理方式，以及各阶段对一批行的变换
// 阶段: 初始化暂存表 → 媒体/文件 → 地点层级 → 其他命名实体
//       → 时空 → 谓词/类型/变量 → 链接断言 → 描述断言
// ==========================================

use crate::assertion::{AssertionMaterializer, MaterializeReport};
use crate::domain::{Annotation, AnnotationKind, DataType, Field, ItemType};
use crate::error::EtlResult;
use crate::reconcile::{EntityResolver, EntitySpec, HierarchyWalker, WalkReport};
use crate::repository::StagingRepository;
use crate::staging::StagingTable;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    PrepareSourceTable,
    ReconcileMediaResources,
    ReconcileSpatialHierarchy,
    ReconcileNamedEntities,
    ReconcileSpaceTime,
    ReconcileTypesVariables,
    MakeLinkAssertions,
    MakeDescriptiveAssertions,
}

/// 批处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    /// 分段从暂存库拉取行，填充共享暂存表
    Initialize,
    /// 按行号水位线分批，变换共享暂存表
    RowBatch,
    /// 按 (标注序号, 行号水位线) 分批，只读暂存表
    AnnotationBatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDef {
    pub id: StageId,
    pub label: &'static str,
    pub mode: StageMode,
    /// 是否修改共享暂存表（修改后需回写缓存）
    pub mutates_table: bool,
}

pub const STAGES: [StageDef; 8] = [
    StageDef {
        id: StageId::PrepareSourceTable,
        label: "Prepare source table",
        mode: StageMode::Initialize,
        mutates_table: true,
    },
    StageDef {
        id: StageId::ReconcileMediaResources,
        label: "Reconcile media and resource files",
        mode: StageMode::RowBatch,
        mutates_table: true,
    },
    StageDef {
        id: StageId::ReconcileSpatialHierarchy,
        label: "Reconcile spatial containment hierarchy",
        mode: StageMode::RowBatch,
        mutates_table: true,
    },
    StageDef {
        id: StageId::ReconcileNamedEntities,
        label: "Reconcile persons, documents and other named entities",
        mode: StageMode::RowBatch,
        mutates_table: true,
    },
    StageDef {
        id: StageId::ReconcileSpaceTime,
        label: "Reconcile space-time spans",
        mode: StageMode::AnnotationBatch,
        mutates_table: false,
    },
    StageDef {
        id: StageId::ReconcileTypesVariables,
        label: "Reconcile predicates, types and variables",
        mode: StageMode::RowBatch,
        mutates_table: true,
    },
    StageDef {
        id: StageId::MakeLinkAssertions,
        label: "Make linking assertions",
        mode: StageMode::AnnotationBatch,
        mutates_table: false,
    },
    StageDef {
        id: StageId::MakeDescriptiveAssertions,
        label: "Make descriptive assertions",
        mode: StageMode::AnnotationBatch,
        mutates_table: false,
    },
];

/// 其他命名实体阶段处理的角色
const NAMED_ENTITY_ROLES: [ItemType; 9] = [
    ItemType::Persons,
    ItemType::Documents,
    ItemType::Projects,
    ItemType::Uri,
    ItemType::Uuid,
    ItemType::Events,
    ItemType::Observations,
    ItemType::AttributeGroups,
    ItemType::Languages,
];

impl StageId {
    pub fn def(&self) -> &'static StageDef {
        STAGES
            .iter()
            .find(|d| d.id == *self)
            .unwrap_or(&STAGES[0])
    }

    /// 标注批阶段消费的标注（保持声明顺序）
    pub fn annotations<'a>(&self, annotations: &'a [Annotation]) -> Vec<&'a Annotation> {
        annotations
            .iter()
            .filter(|a| match self {
                StageId::ReconcileSpaceTime => matches!(a.kind, AnnotationKind::Timespan { .. }),
                StageId::MakeLinkAssertions => matches!(a.kind, AnnotationKind::Links { .. }),
                StageId::MakeDescriptiveAssertions => {
                    matches!(a.kind, AnnotationKind::Describes { .. })
                }
                _ => false,
            })
            .collect()
    }
}

// ==========================================
// StageRunner - 单次调用内的阶段变换
// ==========================================
pub struct StageRunner {
    resolver: Arc<EntityResolver>,
    repo: Arc<dyn StagingRepository>,
    walker: HierarchyWalker,
    materializer: AssertionMaterializer,
    fields: Vec<Field>,
    annotations: Vec<Annotation>,
}

impl StageRunner {
    pub fn new(
        resolver: Arc<EntityResolver>,
        repo: Arc<dyn StagingRepository>,
        walker: HierarchyWalker,
        materializer: AssertionMaterializer,
        fields: Vec<Field>,
        annotations: Vec<Annotation>,
    ) -> Self {
        Self {
            resolver,
            repo,
            walker,
            materializer,
            fields,
            annotations,
        }
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// 行批阶段：对一批行执行变换（修改暂存表）
    pub async fn run_rows(
        &mut self,
        stage: StageId,
        table: &mut StagingTable,
        rows: &[i64],
    ) -> EtlResult<()> {
        let report = match stage {
            StageId::ReconcileMediaResources => {
                let report = self.walker.reconcile_roots(table, &[ItemType::Media], rows).await?;
                self.structural(table, rows, |k| matches!(k, AnnotationKind::MediaFile { .. }))
                    .await?;
                report
            }
            StageId::ReconcileSpatialHierarchy => {
                let report = self
                    .walker
                    .reconcile_roots(table, &[ItemType::Subjects], rows)
                    .await?;
                self.structural(table, rows, |k| matches!(k, AnnotationKind::Contains { .. }))
                    .await?;
                report
            }
            StageId::ReconcileNamedEntities => {
                self.walker
                    .reconcile_roots(table, &NAMED_ENTITY_ROLES, rows)
                    .await?
            }
            StageId::ReconcileTypesVariables => {
                self.ensure_field_predicates().await?;
                self.walker
                    .reconcile_roots(
                        table,
                        &[ItemType::Variables, ItemType::Predicates, ItemType::Types],
                        rows,
                    )
                    .await?
            }
            _ => WalkReport::default(),
        };
        debug!(stage = ?stage, rows = rows.len(), report = ?report, "行批变换完成");
        Ok(())
    }

    /// 标注批阶段：对一条标注的一批行执行变换（只读暂存表）
    pub async fn run_annotation(
        &mut self,
        stage: StageId,
        annotation: &Annotation,
        table: &StagingTable,
        rows: &[i64],
    ) -> EtlResult<MaterializeReport> {
        match stage {
            StageId::ReconcileSpaceTime => {
                self.space_time(annotation, table, rows).await?;
                Ok(MaterializeReport::default())
            }
            StageId::MakeLinkAssertions | StageId::MakeDescriptiveAssertions => {
                self.materializer.materialize(annotation, table, rows).await
            }
            _ => Ok(MaterializeReport::default()),
        }
    }

    /// 层级 / 媒体文件边的专用断言
    async fn structural<F>(&mut self, table: &StagingTable, rows: &[i64], wanted: F) -> EtlResult<()>
    where
        F: Fn(&AnnotationKind) -> bool,
    {
        let edges: Vec<Annotation> = self
            .annotations
            .iter()
            .filter(|a| wanted(&a.kind))
            .cloned()
            .collect();
        for annotation in &edges {
            let report = self.materializer.materialize(annotation, table, rows).await?;
            if report.failed > 0 {
                warn!(
                    annotation_id = %annotation.annotation_id,
                    failed = report.failed,
                    "层级断言部分写入失败"
                );
            }
        }
        Ok(())
    }

    /// 为非取值范围下级的 types / literal 字段建立字段标签谓词，并设为字段上下文
    async fn ensure_field_predicates(&mut self) -> EtlResult<()> {
        let range_children: Vec<i64> = self
            .annotations
            .iter()
            .filter_map(|a| match a.kind {
                AnnotationKind::Range { value_field, .. } => Some(value_field),
                _ => None,
            })
            .collect();

        let pending: Vec<Field> = self
            .fields
            .iter()
            .filter(|f| {
                matches!(f.item_type, ItemType::Types | ItemType::Literal)
                    && f.context_uuid.is_none()
                    && !range_children.contains(&f.field_num)
            })
            .cloned()
            .collect();

        for mut field in pending {
            let data_type = match field.item_type {
                ItemType::Types => DataType::Id,
                _ => field.data_type,
            };
            let outcome = self
                .resolver
                .get_or_create(EntitySpec {
                    item_type: ItemType::Predicates,
                    data_type,
                    label: field.label.clone(),
                    context_uuid: None,
                    item_class_uuid: None,
                    meta: json!({
                        "source_id": field.source_id,
                        "field_num": field.field_num,
                    }),
                })
                .await?;
            let Some(predicate) = outcome.uuid() else {
                warn!(
                    field_num = field.field_num,
                    label = %field.label,
                    match_count = outcome.match_count,
                    "字段标签谓词无法确定"
                );
                continue;
            };

            self.repo
                .update_field_context(&field.source_id, field.field_num, Some(predicate))
                .await?;
            field.context_uuid = Some(predicate);
            info!(field_num = field.field_num, predicate = %predicate, "字段标签谓词已设定");

            if let Some(slot) = self.fields.iter_mut().find(|f| f.field_num == field.field_num) {
                *slot = field.clone();
            }
            self.materializer.set_field(field.clone());
            self.walker.set_field(field);
        }
        Ok(())
    }

    /// 时空: 为每个主体按 (最早, 最晚) 建立 space-time 实体
    async fn space_time(
        &mut self,
        annotation: &Annotation,
        table: &StagingTable,
        rows: &[i64],
    ) -> EtlResult<()> {
        let AnnotationKind::Timespan { subject_field, earliest_field, latest_field } = annotation.kind
        else {
            return Ok(());
        };

        let mut created = 0;
        for &row in rows {
            let Some(subject) = table.item(row, subject_field) else {
                continue;
            };
            let Some(earliest) = table
                .value(row, earliest_field)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite())
            else {
                continue;
            };
            let latest = table
                .value(row, latest_field)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(earliest);
            let (earliest, latest) = if latest < earliest {
                (latest, earliest)
            } else {
                (earliest, latest)
            };

            let outcome = self
                .resolver
                .get_or_create(EntitySpec {
                    item_type: ItemType::SpaceTime,
                    data_type: DataType::Id,
                    label: format!("{} to {}", format_year(earliest), format_year(latest)),
                    context_uuid: Some(subject),
                    item_class_uuid: None,
                    meta: json!({
                        "source_id": table.source_id,
                        "earliest": earliest,
                        "latest": latest,
                    }),
                })
                .await?;
            if outcome.created {
                created += 1;
            }
        }
        debug!(
            source_id = %table.source_id,
            rows = rows.len(),
            created = created,
            "时空实体处理完成"
        );
        Ok(())
    }
}

/// 整数年份不带小数
fn format_year(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
