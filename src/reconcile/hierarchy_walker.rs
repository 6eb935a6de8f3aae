// ==========================================
// 考古数据导入 ETL - 层级遍历器
// ==========================================
// 职责: 按层级标注自上而下对齐字段，把上级实体作为下级上下文传递
// 实现: 显式工作队列 (字段, 上下文, 行集合) + 分组结果备忘
// 红线: 层级边单向（上级 → 下级）；上级未对齐的分支不为下级新建实体
// ==========================================

use crate::domain::{Annotation, Field, ItemType};
use crate::error::EtlResult;
use crate::reconcile::entity_resolver::EntityResolver;
use crate::repository::StagingRepository;
use crate::staging::StagingTable;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 单个字段的对齐任务
#[derive(Debug, Clone)]
struct WalkTask {
    field_num: i64,
    context: Option<Uuid>,
    rows: Vec<i64>,
    /// 上下文由上级字段传入（含空上级单元格的级联）
    from_parent: bool,
    /// 从根字段到本字段的路径（不含本字段）
    path: Vec<i64>,
}

/// 分组键: (值, 显式标识, 显式外部键)
type GroupKey = (String, Option<String>, Option<String>);

/// 备忘键: (字段, 上下文, 值, 显式标识, 显式外部键)
type MemoKey = (i64, Option<Uuid>, String, Option<String>, Option<String>);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// 对齐成功的值分组数
    pub resolved: usize,
    /// 其中新建实体的分组数
    pub created: usize,
    /// 歧义分组数
    pub ambiguous: usize,
    /// 未对齐分组数（含缺少上下文）
    pub unresolved: usize,
    /// 因缺少上下文而跳过的字段任务数
    pub skipped_tasks: usize,
    /// 回写的单元格数
    pub cells_written: usize,
}

impl WalkReport {
    pub fn merge(&mut self, other: WalkReport) {
        self.resolved += other.resolved;
        self.created += other.created;
        self.ambiguous += other.ambiguous;
        self.unresolved += other.unresolved;
        self.skipped_tasks += other.skipped_tasks;
        self.cells_written += other.cells_written;
    }
}

pub struct HierarchyWalker {
    resolver: Arc<EntityResolver>,
    repo: Arc<dyn StagingRepository>,
    fields: BTreeMap<i64, Field>,
    annotations: Vec<Annotation>,
    record_write_batch: usize,
    memo: HashMap<MemoKey, Option<Uuid>>,
}

impl HierarchyWalker {
    pub fn new(
        resolver: Arc<EntityResolver>,
        repo: Arc<dyn StagingRepository>,
        fields: Vec<Field>,
        annotations: Vec<Annotation>,
        record_write_batch: usize,
    ) -> Self {
        Self {
            resolver,
            repo,
            fields: fields.into_iter().map(|f| (f.field_num, f)).collect(),
            annotations,
            record_write_batch: record_write_batch.max(1),
            memo: HashMap::new(),
        }
    }

    /// 更新字段元数据（字段上下文被外部修改后调用）
    pub fn set_field(&mut self, field: Field) {
        self.fields.insert(field.field_num, field);
    }

    /// 下级字段（层级边 上级 → 下级）
    pub fn children_of(&self, field_num: i64) -> Vec<i64> {
        self.annotations
            .iter()
            .filter_map(|a| a.kind.hierarchy_edge())
            .filter(|(parent, _)| *parent == field_num)
            .map(|(_, child)| child)
            .collect()
    }

    /// 是否为某条层级边的下级端
    pub fn has_parent(&self, field_num: i64) -> bool {
        self.annotations
            .iter()
            .filter_map(|a| a.kind.hierarchy_edge())
            .any(|(_, child)| child == field_num)
    }

    /// 对齐指定角色的全部根字段（不是任何层级边下级端的字段），并向下递归
    pub async fn reconcile_roots(
        &mut self,
        table: &mut StagingTable,
        roles: &[ItemType],
        rows: &[i64],
    ) -> EtlResult<WalkReport> {
        let roots: Vec<i64> = self
            .fields
            .values()
            .filter(|f| roles.contains(&f.item_type) && !self.has_parent(f.field_num))
            .map(|f| f.field_num)
            .collect();

        let mut report = WalkReport::default();
        for field_num in roots {
            let r = self
                .reconcile_field(table, field_num, None, rows, true)
                .await?;
            report.merge(r);
        }
        Ok(report)
    }

    /// 对齐单个字段（可选向下递归）
    ///
    /// # 参数
    /// - context: 显式上下文（None 时回落到字段上下文 / 项目）
    /// - rows: 行过滤（只处理这些行）
    /// - recurse: 是否继续对齐下级字段
    pub async fn reconcile_field(
        &mut self,
        table: &mut StagingTable,
        field_num: i64,
        context: Option<Uuid>,
        rows: &[i64],
        recurse: bool,
    ) -> EtlResult<WalkReport> {
        let mut report = WalkReport::default();
        let mut queue = VecDeque::new();
        queue.push_back(WalkTask {
            field_num,
            context,
            rows: rows.to_vec(),
            from_parent: false,
            path: Vec::new(),
        });

        while let Some(task) = queue.pop_front() {
            let children = self.run_task(table, &task, recurse, &mut report).await?;
            queue.extend(children);
        }

        info!(
            source_id = %table.source_id,
            field_num = field_num,
            resolved = report.resolved,
            created = report.created,
            ambiguous = report.ambiguous,
            unresolved = report.unresolved,
            "字段层级对齐完成"
        );
        Ok(report)
    }

    /// 处理一个任务，返回下级任务
    async fn run_task(
        &mut self,
        table: &mut StagingTable,
        task: &WalkTask,
        recurse: bool,
        report: &mut WalkReport,
    ) -> EtlResult<Vec<WalkTask>> {
        let Some(field) = self.fields.get(&task.field_num).cloned() else {
            warn!(field_num = task.field_num, "字段不存在，跳过");
            return Ok(Vec::new());
        };
        let Some(role) = field.entity_item_type() else {
            return Ok(Vec::new());
        };

        // 下级字段必须由上级传入上下文（或自身声明上下文）
        if !task.from_parent
            && task.context.is_none()
            && field.context_uuid.is_none()
            && self.has_parent(field.field_num)
        {
            warn!(
                source_id = %table.source_id,
                field_num = field.field_num,
                "下级字段缺少上级上下文，跳过"
            );
            report.skipped_tasks += 1;
            return Ok(Vec::new());
        }

        let written_context = task.context.or(field.context_uuid);

        // 1. 分组（值 + 显式标识列），空单元格单独收集
        let mut groups: BTreeMap<GroupKey, Vec<i64>> = BTreeMap::new();
        let mut blank_rows = Vec::new();
        for &row in &task.rows {
            match table.value(row, field.field_num) {
                Some(value) => {
                    let id = field
                        .options
                        .id_field
                        .and_then(|f| table.value(row, f))
                        .map(str::to_string);
                    let alt = field
                        .options
                        .alt_id_field
                        .and_then(|f| table.value(row, f))
                        .map(str::to_string);
                    groups
                        .entry((value.to_string(), id, alt))
                        .or_default()
                        .push(row);
                }
                None => blank_rows.push(row),
            }
        }

        // 路径上已出现的字段不再进入（库中残留的成环标注）
        let child_fields: Vec<i64> = if recurse {
            self.children_of(field.field_num)
                .into_iter()
                .filter(|child| {
                    let seen = *child == field.field_num || task.path.contains(child);
                    if seen {
                        warn!(
                            source_id = %table.source_id,
                            field_num = field.field_num,
                            child_field = *child,
                            "层级标注成环，停止向下"
                        );
                    }
                    !seen
                })
                .collect()
        } else {
            Vec::new()
        };
        let mut child_path = task.path.clone();
        child_path.push(field.field_num);
        let mut next: BTreeMap<(i64, Option<Uuid>), Vec<i64>> = BTreeMap::new();

        // 2. 逐组对齐并回写
        for ((value, id, alt), group_rows) in groups {
            let memo_key: MemoKey = (
                field.field_num,
                task.context,
                value.clone(),
                id.clone(),
                alt.clone(),
            );
            let item = match self.memo.get(&memo_key) {
                Some(item) => *item,
                None => {
                    let outcome = self
                        .resolver
                        .resolve(&field, task.context, &value, id.as_deref(), alt.as_deref())
                        .await?;
                    match (&outcome.entity, outcome.match_count) {
                        (Some(_), _) => {
                            report.resolved += 1;
                            if outcome.created {
                                report.created += 1;
                            }
                        }
                        (None, n) if n > 1 => report.ambiguous += 1,
                        (None, _) => report.unresolved += 1,
                    }
                    let item = outcome.entity.as_ref().map(|e| (e.uuid, e.item_type));
                    self.memo.insert(memo_key, item.map(|(u, _)| u));
                    debug!(
                        field_num = field.field_num,
                        value = %value,
                        match_count = outcome.match_count,
                        "值分组对齐"
                    );
                    item.map(|(u, _)| u)
                }
            };

            self.write_group(table, &field, &group_rows, written_context, item, report)
                .await?;

            // 3. 下级上下文: 可作上下文的实体 → 该实体；否则级联当前上下文；未对齐 → 跳过分支
            let Some(item_uuid) = item else {
                continue;
            };
            for &child_num in &child_fields {
                let Some(child) = self.fields.get(&child_num) else {
                    continue;
                };
                let Some(child_role) = child.entity_item_type() else {
                    continue;
                };
                let next_context = if role.can_scope(child_role) {
                    Some(item_uuid)
                } else {
                    written_context
                };
                next.entry((child_num, next_context))
                    .or_default()
                    .extend(group_rows.iter().copied());
            }
        }

        // 空上级单元格：当前上下文级联给下级
        if !blank_rows.is_empty() {
            for &child_num in &child_fields {
                next.entry((child_num, written_context))
                    .or_default()
                    .extend(blank_rows.iter().copied());
            }
        }

        Ok(next
            .into_iter()
            .map(|((field_num, context), mut rows)| {
                rows.sort_unstable();
                WalkTask {
                    field_num,
                    context,
                    rows,
                    from_parent: true,
                    path: child_path.clone(),
                }
            })
            .collect())
    }

    /// 回写一组单元格（内存表 + 暂存库，按批次大小分段）
    async fn write_group(
        &self,
        table: &mut StagingTable,
        field: &Field,
        rows: &[i64],
        context: Option<Uuid>,
        item: Option<Uuid>,
        report: &mut WalkReport,
    ) -> EtlResult<()> {
        for &row in rows {
            table.set_resolution(row, field.field_num, context, item);
        }
        for chunk in rows.chunks(self.record_write_batch) {
            let written = self
                .repo
                .update_record_resolutions(&field.source_id, field.field_num, chunk, context, item)
                .await?;
            report.cells_written += written;
        }
        Ok(())
    }
}
