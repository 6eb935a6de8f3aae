// ==========================================
// 考古数据导入 ETL - 实体存储 Repository
// ==========================================
// 职责: 规范实体的候选查询与创建（外部实体存储的协作接口）
// 红线: Repository 不含对齐规则，匹配策略由 EntityResolver 组装
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::{Entity, EntityFilter, EntityQuery, MatchTerm, NewEntity};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_utils::{
    data_type_col, datetime_col, item_type_col, json_col, opt_uuid_col, opt_uuid_str, uuid_col,
    WhereBuilder,
};
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ==========================================
// EntityStore Trait
// ==========================================
// 实现者: SqliteEntityStore
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// 按条件查询候选实体（零个/一个/多个）
    async fn find(&self, query: &EntityQuery) -> RepositoryResult<Vec<Entity>>;

    async fn get(&self, uuid: Uuid) -> RepositoryResult<Option<Entity>>;

    /// 创建实体
    ///
    /// # 返回
    /// - Err(UniqueConstraintViolation): 同角色/项目/上级下已有同名实体
    async fn create(&self, entity: NewEntity) -> RepositoryResult<Entity>;

    /// 指定导入批次创建的实体（按创建顺序）
    async fn list_by_source(&self, source_id: &str) -> RepositoryResult<Vec<Entity>>;

    /// 删除指定导入批次创建的实体
    async fn delete_by_source(&self, source_id: &str) -> RepositoryResult<usize>;
}

const ENTITY_COLUMNS: &str = "uuid, item_type, data_type, label, slug, project_uuid, \
     item_class_uuid, context_uuid, uri, item_key, initials, combined_name, \
     source_id, meta_json, created_at";

// ==========================================
// SqliteEntityStore
// ==========================================
pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEntityStore {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
        Ok(Entity {
            uuid: uuid_col(row, 0)?,
            item_type: item_type_col(row, 1)?,
            data_type: data_type_col(row, 2)?,
            label: row.get(3)?,
            slug: row.get(4)?,
            project_uuid: uuid_col(row, 5)?,
            item_class_uuid: opt_uuid_col(row, 6)?,
            context_uuid: opt_uuid_col(row, 7)?,
            uri: row.get(8)?,
            item_key: row.get(9)?,
            initials: row.get(10)?,
            combined_name: row.get(11)?,
            source_id: row.get(12)?,
            meta: json_col(row, 13)?,
            created_at: datetime_col(row, 14)?,
        })
    }

    /// 过滤条件 → (列名, 参数值)
    fn filter_column(filter: &EntityFilter) -> (&'static str, String) {
        match filter {
            EntityFilter::Label(v) => ("label", v.clone()),
            EntityFilter::Slug(v) => ("slug", v.clone()),
            EntityFilter::ItemKey(v) => ("item_key", v.clone()),
            EntityFilter::ItemClass(u) => ("item_class_uuid", u.to_string()),
            EntityFilter::Context(u) => ("context_uuid", u.to_string()),
            EntityFilter::Uri(v) => ("uri", v.clone()),
        }
    }

    /// 匹配项 → (列名, 参数值)
    fn match_column(term: &MatchTerm) -> (&'static str, String) {
        match term {
            MatchTerm::Uuid(u) => ("uuid", u.to_string()),
            MatchTerm::Label(v) => ("label", v.clone()),
            MatchTerm::Slug(v) => ("slug", v.clone()),
            MatchTerm::Uri(v) => ("uri", v.clone()),
            MatchTerm::ItemKey(v) => ("item_key", v.clone()),
            MatchTerm::Initials(v) => ("initials", v.clone()),
            MatchTerm::CombinedName(v) => ("combined_name", v.clone()),
        }
    }

    fn build_where(query: &EntityQuery) -> WhereBuilder {
        let mut wb = WhereBuilder::new();
        wb.in_list("project_uuid", query.projects.iter().map(|p| p.to_string()));

        if let Some(item_type) = query.item_type {
            wb.eq("item_type", item_type.as_str().to_string());
        }
        if let Some(data_type) = query.data_type {
            wb.eq("data_type", data_type.as_str().to_string());
        }
        if let Some(context) = query.context_uuid {
            wb.eq("context_uuid", context.to_string());
        }
        if let Some(item_class) = query.item_class_uuid {
            wb.eq("item_class_uuid", item_class.to_string());
        }

        if !query.any_of.is_empty() {
            let mut ors = Vec::with_capacity(query.any_of.len());
            for term in &query.any_of {
                let (column, value) = Self::match_column(term);
                ors.push(format!("{} = {}", column, wb.bind(value)));
            }
            wb.push(format!("({})", ors.join(" OR ")));
        }

        for filter in &query.filters {
            let (column, value) = Self::filter_column(filter);
            wb.eq(column, value);
        }
        for exclude in &query.excludes {
            let (column, value) = Self::filter_column(exclude);
            let ph = wb.bind(value);
            // NULL 列视为不满足排除条件
            wb.push(format!("({} IS NULL OR {} != {})", column, column, ph));
        }
        wb
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn find(&self, query: &EntityQuery) -> RepositoryResult<Vec<Entity>> {
        if query.projects.is_empty() {
            return Ok(Vec::new());
        }
        let wb = Self::build_where(query);
        let sql = format!(
            "SELECT {} FROM entity{} ORDER BY created_at, rowid",
            ENTITY_COLUMNS,
            wb.where_sql()
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params_from_iter(wb.into_values()), Self::map_entity)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    async fn get(&self, uuid: Uuid) -> RepositoryResult<Option<Entity>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM entity WHERE uuid = ?1", ENTITY_COLUMNS);
        let entity = conn
            .query_row(&sql, params![uuid.to_string()], Self::map_entity)
            .optional()?;
        Ok(entity)
    }

    async fn create(&self, entity: NewEntity) -> RepositoryResult<Entity> {
        let entity = entity.into_entity();
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO entity (
                uuid, item_type, data_type, label, slug, project_uuid,
                item_class_uuid, context_uuid, uri, item_key, initials, combined_name,
                source_id, meta_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                entity.uuid.to_string(),
                entity.item_type.as_str(),
                entity.data_type.as_str(),
                entity.label,
                entity.slug,
                entity.project_uuid.to_string(),
                opt_uuid_str(entity.item_class_uuid),
                opt_uuid_str(entity.context_uuid),
                entity.uri,
                entity.item_key,
                entity.initials,
                entity.combined_name,
                entity.source_id,
                serde_json::to_string(&entity.meta)?,
                entity.created_at.to_rfc3339(),
            ],
        )?;
        Ok(entity)
    }

    async fn list_by_source(&self, source_id: &str) -> RepositoryResult<Vec<Entity>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM entity WHERE source_id = ?1 ORDER BY created_at, rowid",
            ENTITY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entities = stmt
            .query_map(params![source_id], Self::map_entity)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entities)
    }

    async fn delete_by_source(&self, source_id: &str) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM entity WHERE source_id = ?1", params![source_id])?;
        Ok(deleted)
    }
}
