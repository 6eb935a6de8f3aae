// ==========================================
// 考古数据导入 ETL - 实体对齐器
// ==========================================
// 职责: 单个原始值 (+ 字段元数据 + 上下文实体) → 规范实体
// 流程: 有效上下文 → 标签清洗 → 候选过滤 → 角色匹配策略 → 计数判定
// 判定: 1 个候选命中 / 0 个候选新建 / 多个候选视为歧义（不猜测）
// ==========================================

use crate::domain::{
    AttributeFilter, DataType, Entity, EntityFilter, EntityQuery, Field, FilterAttribute,
    ItemType, MatchTerm, NewEntity, Source, GLOBAL_PROJECT_UUID,
};
use crate::error::{EtlError, EtlResult};
use crate::reconcile::label_cleaner::LabelCleaner;
use crate::repository::EntityStore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// 对齐结果
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutcome {
    pub entity: Option<Entity>,
    pub created: bool,
    pub match_count: usize,
}

impl ResolveOutcome {
    fn matched(entity: Entity) -> Self {
        Self {
            entity: Some(entity),
            created: false,
            match_count: 1,
        }
    }

    fn created(entity: Entity) -> Self {
        Self {
            entity: Some(entity),
            created: true,
            match_count: 1,
        }
    }

    fn unresolved(match_count: usize) -> Self {
        Self {
            entity: None,
            created: false,
            match_count,
        }
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.entity.as_ref().map(|e| e.uuid)
    }
}

/// 非单元格来源的实体（字段标签谓词 / 备注谓词 / 时空实体）
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    pub item_type: ItemType,
    pub data_type: DataType,
    pub label: String,
    pub context_uuid: Option<Uuid>,
    pub item_class_uuid: Option<Uuid>,
    pub meta: serde_json::Value,
}

/// 有效上下文
#[derive(Debug, Clone, Copy)]
struct EffectiveContext {
    uuid: Uuid,
    /// 上下文实体的角色（存储中不存在时为 None）
    item_type: Option<ItemType>,
    is_project: bool,
}

pub struct EntityResolver {
    store: Arc<dyn EntityStore>,
    source_id: String,
    project_uuid: Uuid,
    cleaner: LabelCleaner,
    /// 项目 → 允许匹配的所属项目集合
    scope_cache: Mutex<HashMap<Uuid, Vec<Uuid>>>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn EntityStore>, source: &Source) -> Self {
        Self {
            store,
            source_id: source.source_id.clone(),
            project_uuid: source.project_uuid,
            cleaner: LabelCleaner,
            scope_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cleaner(&self) -> &LabelCleaner {
        &self.cleaner
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// 对齐单个原始值
    ///
    /// # 参数
    /// - field: 单元格所在字段
    /// - context: 显式上下文（None 时依次回落到字段上下文、所属项目）
    /// - raw_value: 原始值
    /// - explicit_id: 显式实体标识（UUID 或外部键），覆盖其余匹配策略
    /// - explicit_alt_id: 显式外部键 / URI
    ///
    /// # 返回
    /// - Err: 仅在实体存储查询失败时
    pub async fn resolve(
        &self,
        field: &Field,
        context: Option<Uuid>,
        raw_value: &str,
        explicit_id: Option<&str>,
        explicit_alt_id: Option<&str>,
    ) -> EtlResult<ResolveOutcome> {
        let Some(role) = field.entity_item_type() else {
            return Ok(ResolveOutcome::unresolved(0));
        };
        let explicit_id = explicit_id.map(str::trim).filter(|v| !v.is_empty());
        let explicit_alt_id = explicit_alt_id.map(str::trim).filter(|v| !v.is_empty());

        if role == ItemType::Uuid {
            return self.resolve_uuid_cell(raw_value).await;
        }

        let Some(label) = self.cleaner.entity_label(field, raw_value) else {
            return Ok(ResolveOutcome::unresolved(0));
        };

        let own_project = field.options.project_uuid.unwrap_or(self.project_uuid);
        let ctx = self
            .effective_context(context.or(field.context_uuid), own_project)
            .await?;
        let context_usable = Self::context_usable(role, &ctx);

        let mut query = EntityQuery {
            projects: self.project_scope(own_project).await?,
            item_type: Some(role),
            data_type: Some(field.entity_data_type()),
            ..EntityQuery::default()
        };

        let explicit_uuid = explicit_id.and_then(|id| Uuid::parse_str(id).ok());
        if let Some(id) = explicit_id {
            // 显式标识精确匹配，忽略上下文与分类过滤
            query.any_of = match explicit_uuid {
                Some(u) => vec![MatchTerm::Uuid(u)],
                None => vec![MatchTerm::ItemKey(id.to_string())],
            };
        } else if let Some(alt) = explicit_alt_id {
            query.any_of = vec![MatchTerm::ItemKey(alt.to_string())];
            if let Some(uri) = self.cleaner.canonical_uri(alt) {
                query.any_of.push(MatchTerm::Uri(uri));
            }
        } else {
            query.any_of = self.match_terms(field, role, &label);
            // 项目兜底只对需要上下文的角色限定上下文（根层级实体的上下文即项目）
            if !ctx.is_project || role.required_context().is_some() {
                query.context_uuid = Some(ctx.uuid);
            }
            query.item_class_uuid = field.item_class_uuid;
        }

        query.filters = Self::entity_filters(&field.options.filters);
        query.excludes = Self::entity_filters(&field.options.excludes);

        let mut candidates = self.store.find(&query).await?;
        match candidates.len() {
            1 => {
                let outcome = candidates
                    .pop()
                    .map_or_else(|| ResolveOutcome::unresolved(0), ResolveOutcome::matched);
                debug!(field_num = field.field_num, label = %label, "命中已有实体");
                Ok(outcome)
            }
            0 => {
                if !context_usable {
                    warn!(
                        source_id = %self.source_id,
                        field_num = field.field_num,
                        label = %label,
                        context = %ctx.uuid,
                        "缺少可用上下文，不新建实体"
                    );
                    return Ok(ResolveOutcome::unresolved(0));
                }

                let mut new_entity = NewEntity {
                    uuid: explicit_uuid,
                    item_type: role,
                    data_type: field.entity_data_type(),
                    slug: self.cleaner.slugify(&label),
                    label: label.clone(),
                    project_uuid: own_project,
                    item_class_uuid: field.item_class_uuid,
                    context_uuid: Some(ctx.uuid),
                    uri: None,
                    item_key: None,
                    initials: None,
                    combined_name: None,
                    source_id: Some(self.source_id.clone()),
                    meta: json!({
                        "source_id": self.source_id,
                        "field_num": field.field_num,
                    }),
                };
                if explicit_uuid.is_none() {
                    new_entity.item_key = explicit_id.map(str::to_string);
                }
                if let Some(alt) = explicit_alt_id {
                    new_entity.item_key = Some(alt.to_string());
                    if self.cleaner.looks_like_uri(alt) {
                        new_entity.uri = self.cleaner.canonical_uri(alt);
                    }
                }
                if role == ItemType::Uri
                    || (role.is_key_bearing() && self.cleaner.looks_like_uri(raw_value))
                {
                    new_entity.uri = self.cleaner.canonical_uri(raw_value);
                }
                if role == ItemType::Persons {
                    new_entity.combined_name = self.cleaner.combined_name(&label);
                    new_entity.initials = self.cleaner.initials(&label);
                }

                Ok(self.create(new_entity, field.field_num).await)
            }
            n => {
                warn!(
                    source_id = %self.source_id,
                    field_num = field.field_num,
                    label = %label,
                    match_count = n,
                    "匹配到多个候选实体，保持未对齐"
                );
                Ok(ResolveOutcome::unresolved(n))
            }
        }
    }

    /// 按标签查找或创建非单元格来源的实体
    ///
    /// 候选判定规则与 resolve 相同：多个候选时不创建
    pub async fn get_or_create(&self, spec: EntitySpec) -> EtlResult<ResolveOutcome> {
        let label = match self.cleaner.normalize_text(&spec.label) {
            Some(label) => label,
            None => return Ok(ResolveOutcome::unresolved(0)),
        };

        let query = EntityQuery {
            projects: self.project_scope(self.project_uuid).await?,
            item_type: Some(spec.item_type),
            data_type: Some(spec.data_type),
            context_uuid: spec.context_uuid,
            item_class_uuid: spec.item_class_uuid,
            any_of: vec![MatchTerm::Label(label.clone())],
            ..EntityQuery::default()
        };

        let mut candidates = self.store.find(&query).await?;
        match candidates.len() {
            1 => Ok(candidates
                .pop()
                .map_or_else(|| ResolveOutcome::unresolved(0), ResolveOutcome::matched)),
            0 => {
                let new_entity = NewEntity {
                    uuid: None,
                    item_type: spec.item_type,
                    data_type: spec.data_type,
                    slug: self.cleaner.slugify(&label),
                    label,
                    project_uuid: self.project_uuid,
                    item_class_uuid: spec.item_class_uuid,
                    context_uuid: spec.context_uuid,
                    uri: None,
                    item_key: None,
                    initials: None,
                    combined_name: None,
                    source_id: Some(self.source_id.clone()),
                    meta: spec.meta,
                };
                Ok(self.create(new_entity, 0).await)
            }
            n => {
                warn!(
                    source_id = %self.source_id,
                    item_type = %spec.item_type,
                    label = %spec.label,
                    match_count = n,
                    "匹配到多个候选实体，不新建"
                );
                Ok(ResolveOutcome::unresolved(n))
            }
        }
    }

    // ==========================================
    // 内部步骤
    // ==========================================

    /// uuid 角色：单元格即标识，只匹配不新建
    async fn resolve_uuid_cell(&self, raw_value: &str) -> EtlResult<ResolveOutcome> {
        let Ok(uuid) = Uuid::parse_str(raw_value.trim()) else {
            return Ok(ResolveOutcome::unresolved(0));
        };
        Ok(match self.store.get(uuid).await? {
            Some(entity) => ResolveOutcome::matched(entity),
            None => ResolveOutcome::unresolved(0),
        })
    }

    async fn effective_context(
        &self,
        context: Option<Uuid>,
        own_project: Uuid,
    ) -> EtlResult<EffectiveContext> {
        let uuid = context.unwrap_or(own_project);
        let entity = self.store.get(uuid).await?;
        let item_type = entity.as_ref().map(|e| e.item_type);
        let is_project = match item_type {
            Some(t) => t == ItemType::Projects,
            None => uuid == own_project,
        };
        Ok(EffectiveContext {
            uuid,
            item_type,
            is_project,
        })
    }

    /// 上下文能否作为新建实体的上级
    ///
    /// - 项目兜底：仅适用于无上级要求或上级为地点的角色（根地点挂在项目下）
    /// - 其余：上下文实体角色必须等于要求角色，无要求时须为可作上下文的角色
    fn context_usable(role: ItemType, ctx: &EffectiveContext) -> bool {
        if ctx.is_project {
            return matches!(role.required_context(), None | Some(ItemType::Subjects));
        }
        match ctx.item_type {
            Some(ctx_role) => ctx_role.can_scope(role),
            None => false,
        }
    }

    /// 所属项目集合：本项目、全局共享项目、上级项目
    async fn project_scope(&self, project: Uuid) -> EtlResult<Vec<Uuid>> {
        {
            let cache = self
                .scope_cache
                .lock()
                .map_err(|e| EtlError::Other(anyhow::anyhow!("锁获取失败: {}", e)))?;
            if let Some(scope) = cache.get(&project) {
                return Ok(scope.clone());
            }
        }

        let mut scope = vec![project];
        if project != GLOBAL_PROJECT_UUID {
            scope.push(GLOBAL_PROJECT_UUID);
        }
        if let Some(entity) = self.store.get(project).await? {
            if let Some(parent) = entity.context_uuid {
                if !scope.contains(&parent) {
                    scope.push(parent);
                }
            }
        }

        let mut cache = self
            .scope_cache
            .lock()
            .map_err(|e| EtlError::Other(anyhow::anyhow!("锁获取失败: {}", e)))?;
        cache.insert(project, scope.clone());
        Ok(scope)
    }

    /// 按角色组装匹配项（多项之间为 OR）
    fn match_terms(&self, field: &Field, role: ItemType, label: &str) -> Vec<MatchTerm> {
        let mut terms = Vec::new();
        if role.is_key_bearing() {
            if let Some(uri) = self.cleaner.canonical_uri(label) {
                terms.push(MatchTerm::Uri(uri));
            }
            terms.push(MatchTerm::ItemKey(label.to_string()));
        } else if role == ItemType::Persons {
            if field.options.match_initials {
                terms.push(MatchTerm::Initials(label.to_string()));
            }
            let combined = self
                .cleaner
                .combined_name(label)
                .unwrap_or_else(|| label.to_string());
            terms.push(MatchTerm::CombinedName(combined));
        } else if field.options.match_slug {
            terms.push(MatchTerm::Slug(self.cleaner.slugify(label)));
        }
        terms.push(MatchTerm::Label(label.to_string()));
        terms
    }

    fn entity_filters(filters: &[AttributeFilter]) -> Vec<EntityFilter> {
        filters
            .iter()
            .filter_map(|f| {
                let value = f.value.trim().to_string();
                let parsed = match f.attribute {
                    FilterAttribute::Label => Some(EntityFilter::Label(value)),
                    FilterAttribute::Slug => Some(EntityFilter::Slug(value)),
                    FilterAttribute::ItemKey => Some(EntityFilter::ItemKey(value)),
                    FilterAttribute::Uri => Some(EntityFilter::Uri(value)),
                    FilterAttribute::ItemClass => {
                        Uuid::parse_str(&value).ok().map(EntityFilter::ItemClass)
                    }
                    FilterAttribute::Context => {
                        Uuid::parse_str(&value).ok().map(EntityFilter::Context)
                    }
                };
                if parsed.is_none() {
                    warn!(attribute = ?f.attribute, value = %f.value, "过滤条件值不是合法 UUID，已忽略");
                }
                parsed
            })
            .collect()
    }

    /// 新建实体；存储层约束冲突等失败视为未对齐
    async fn create(&self, new_entity: NewEntity, field_num: i64) -> ResolveOutcome {
        let label = new_entity.label.clone();
        match self.store.create(new_entity).await {
            Ok(entity) => {
                debug!(
                    source_id = %self.source_id,
                    field_num = field_num,
                    label = %label,
                    uuid = %entity.uuid,
                    "新建实体"
                );
                ResolveOutcome::created(entity)
            }
            Err(e) => {
                warn!(
                    source_id = %self.source_id,
                    field_num = field_num,
                    label = %label,
                    error = %e,
                    "新建实体失败"
                );
                ResolveOutcome::unresolved(0)
            }
        }
    }
}
