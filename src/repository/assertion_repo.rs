// ==========================================
// 考古数据导入 ETL - 断言存储 Repository
// ==========================================
// 职责: 断言的按标识替换写入、批量/逐行插入、按批次清理
// 约束: 批量插入单事务，全部成功或全部回滚
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::{Assertion, AssertionObject};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_utils::{opt_uuid_col, opt_uuid_str, placeholders, uuid_col};
use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Transaction};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ==========================================
// AssertionStore Trait
// ==========================================
// 实现者: SqliteAssertionStore
#[async_trait]
pub trait AssertionStore: Send + Sync {
    /// 删除指定标识的断言（替换写入的第一步）
    async fn delete_by_uuids(&self, uuids: &[Uuid]) -> RepositoryResult<usize>;

    /// 单事务批量插入（任一行失败整体回滚）
    async fn bulk_insert(&self, assertions: &[Assertion]) -> RepositoryResult<usize>;

    /// 插入单条断言
    async fn insert_one(&self, assertion: &Assertion) -> RepositoryResult<()>;

    /// 指定批次的断言，按 (subject, sort) 排序
    async fn list_by_source(&self, source_id: &str) -> RepositoryResult<Vec<Assertion>>;

    async fn count_by_source(&self, source_id: &str) -> RepositoryResult<i64>;

    async fn delete_by_source(&self, source_id: &str) -> RepositoryResult<usize>;
}

/// 单条 DELETE ... IN (...) 的参数上限
const DELETE_CHUNK: usize = 500;

const INSERT_SQL: &str = r#"
    INSERT INTO assertion (
        uuid, project_uuid, source_id, subject_uuid, predicate_uuid,
        observation_uuid, event_uuid, attribute_group_uuid, language_uuid,
        object_uuid, obj_string, obj_boolean, obj_integer, obj_double, obj_date, sort
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
"#;

const SELECT_SQL: &str = r#"
    SELECT uuid, project_uuid, source_id, subject_uuid, predicate_uuid,
           observation_uuid, event_uuid, attribute_group_uuid, language_uuid,
           object_uuid, obj_string, obj_boolean, obj_integer, obj_double, obj_date, sort
    FROM assertion
"#;

// ==========================================
// SqliteAssertionStore
// ==========================================
pub struct SqliteAssertionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAssertionStore {
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

    fn insert_tx(tx: &Transaction, assertions: &[Assertion]) -> RepositoryResult<usize> {
        let mut stmt = tx.prepare(INSERT_SQL)?;
        let mut count = 0;
        for assertion in assertions {
            let (object_uuid, string, boolean, integer, double, date) =
                Self::object_columns(&assertion.object);
            stmt.execute(params![
                assertion.uuid.to_string(),
                assertion.project_uuid.to_string(),
                assertion.source_id,
                assertion.subject_uuid.to_string(),
                assertion.predicate_uuid.to_string(),
                opt_uuid_str(assertion.observation_uuid),
                opt_uuid_str(assertion.event_uuid),
                opt_uuid_str(assertion.attribute_group_uuid),
                opt_uuid_str(assertion.language_uuid),
                object_uuid,
                string,
                boolean,
                integer,
                double,
                date,
                assertion.sort,
            ])?;
            count += 1;
        }
        Ok(count)
    }

    /// 对象 → (object_uuid, string, boolean, integer, double, date) 列
    #[allow(clippy::type_complexity)]
    fn object_columns(
        object: &AssertionObject,
    ) -> (
        Option<String>,
        Option<String>,
        Option<bool>,
        Option<i64>,
        Option<f64>,
        Option<String>,
    ) {
        match object {
            AssertionObject::Entity(u) => (Some(u.to_string()), None, None, None, None, None),
            AssertionObject::String(s) => (None, Some(s.clone()), None, None, None, None),
            AssertionObject::Boolean(b) => (None, None, Some(*b), None, None, None),
            AssertionObject::Integer(i) => (None, None, None, Some(*i), None, None),
            AssertionObject::Double(d) => (None, None, None, None, Some(*d), None),
            AssertionObject::Date(d) => (
                None,
                None,
                None,
                None,
                None,
                Some(d.format("%Y-%m-%d").to_string()),
            ),
        }
    }

    fn map_assertion(row: &rusqlite::Row<'_>) -> rusqlite::Result<Assertion> {
        let object = if let Some(u) = opt_uuid_col(row, 9)? {
            AssertionObject::Entity(u)
        } else if let Some(s) = row.get::<_, Option<String>>(10)? {
            AssertionObject::String(s)
        } else if let Some(b) = row.get::<_, Option<bool>>(11)? {
            AssertionObject::Boolean(b)
        } else if let Some(i) = row.get::<_, Option<i64>>(12)? {
            AssertionObject::Integer(i)
        } else if let Some(d) = row.get::<_, Option<f64>>(13)? {
            AssertionObject::Double(d)
        } else {
            let raw: String = row.get(14)?;
            let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(14, Type::Text, Box::new(e))
            })?;
            AssertionObject::Date(date)
        };

        Ok(Assertion {
            uuid: uuid_col(row, 0)?,
            project_uuid: uuid_col(row, 1)?,
            source_id: row.get(2)?,
            subject_uuid: uuid_col(row, 3)?,
            predicate_uuid: uuid_col(row, 4)?,
            observation_uuid: opt_uuid_col(row, 5)?,
            event_uuid: opt_uuid_col(row, 6)?,
            attribute_group_uuid: opt_uuid_col(row, 7)?,
            language_uuid: opt_uuid_col(row, 8)?,
            object,
            sort: row.get(15)?,
        })
    }
}

#[async_trait]
impl AssertionStore for SqliteAssertionStore {
    async fn delete_by_uuids(&self, uuids: &[Uuid]) -> RepositoryResult<usize> {
        if uuids.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        for chunk in uuids.chunks(DELETE_CHUNK) {
            let sql = format!(
                "DELETE FROM assertion WHERE uuid IN ({})",
                placeholders(1, chunk.len())
            );
            deleted += tx.execute(
                &sql,
                params_from_iter(chunk.iter().map(|u| u.to_string())),
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    async fn bulk_insert(&self, assertions: &[Assertion]) -> RepositoryResult<usize> {
        if assertions.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let count = Self::insert_tx(&tx, assertions)?;
        tx.commit()?;
        Ok(count)
    }

    async fn insert_one(&self, assertion: &Assertion) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        Self::insert_tx(&tx, std::slice::from_ref(assertion))?;
        tx.commit()?;
        Ok(())
    }

    async fn list_by_source(&self, source_id: &str) -> RepositoryResult<Vec<Assertion>> {
        let conn = self.lock()?;
        let sql = format!("{} WHERE source_id = ?1 ORDER BY subject_uuid, sort", SELECT_SQL);
        let mut stmt = conn.prepare(&sql)?;
        let assertions = stmt
            .query_map(params![source_id], Self::map_assertion)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(assertions)
    }

    async fn count_by_source(&self, source_id: &str) -> RepositoryResult<i64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM assertion WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    async fn delete_by_source(&self, source_id: &str) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM assertion WHERE source_id = ?1", params![source_id])?;
        Ok(deleted)
    }
}
