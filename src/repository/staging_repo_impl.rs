// ==========================================
// 考古数据导入 ETL - 暂存 Repository 实现
// ==========================================
// 职责: 实现暂存数据访问（使用 rusqlite）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::{Annotation, Field, Record, Source};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::sql_utils::{
    data_type_col, datetime_col, item_type_col, json_col, opt_uuid_col, opt_uuid_str,
    placeholders, uuid_col,
};
use crate::repository::staging_repo::StagingRepository;
use crate::staging::table::RowSource;
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

// ==========================================
// SqliteStagingRepository
// ==========================================
pub struct SqliteStagingRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStagingRepository {
    /// 创建新的 Repository 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从共享连接创建
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn map_source(row: &rusqlite::Row<'_>) -> rusqlite::Result<Source> {
        Ok(Source {
            source_id: row.get(0)?,
            project_uuid: uuid_col(row, 1)?,
            label: row.get(2)?,
            field_count: row.get(3)?,
            row_count: row.get(4)?,
            status: row.get(5)?,
            meta: json_col(row, 6)?,
            created_at: datetime_col(row, 7)?,
        })
    }

    fn map_field(row: &rusqlite::Row<'_>) -> rusqlite::Result<Field> {
        Ok(Field {
            source_id: row.get(0)?,
            field_num: row.get(1)?,
            label: row.get(2)?,
            item_type: item_type_col(row, 3)?,
            data_type: data_type_col(row, 4)?,
            item_class_uuid: opt_uuid_col(row, 5)?,
            context_uuid: opt_uuid_col(row, 6)?,
            label_prefix: row.get(7)?,
            options: json_col(row, 8)?,
        })
    }

    fn map_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        Ok(Record {
            source_id: row.get(0)?,
            row_num: row.get(1)?,
            field_num: row.get(2)?,
            record: row.get(3)?,
            context_uuid: opt_uuid_col(row, 4)?,
            item_uuid: opt_uuid_col(row, 5)?,
        })
    }

    fn map_annotation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Annotation> {
        Ok(Annotation {
            annotation_id: uuid_col(row, 0)?,
            source_id: row.get(1)?,
            kind: json_col(row, 2)?,
            qualifiers: json_col(row, 3)?,
            sort: row.get(4)?,
        })
    }
}

#[async_trait]
impl StagingRepository for SqliteStagingRepository {
    async fn create_source(&self, source: Source) -> RepositoryResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO etl_source (
                source_id, project_uuid, label, field_count, row_count,
                status, meta_json, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                source.source_id,
                source.project_uuid.to_string(),
                source.label,
                source.field_count,
                source.row_count,
                source.status,
                serde_json::to_string(&source.meta)?,
                source.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_source(&self, source_id: &str) -> RepositoryResult<Option<Source>> {
        let conn = self.lock()?;
        let source = conn
            .query_row(
                r#"
                SELECT source_id, project_uuid, label, field_count, row_count,
                       status, meta_json, created_at
                FROM etl_source WHERE source_id = ?1
                "#,
                params![source_id],
                Self::map_source,
            )
            .optional()?;
        Ok(source)
    }

    async fn update_source_status(&self, source_id: &str, status: &str) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE etl_source SET status = ?1 WHERE source_id = ?2",
            params![status, source_id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "etl_source".to_string(),
                id: source_id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        // 单元格外键指向字段，先删单元格避免级联顺序依赖
        tx.execute("DELETE FROM etl_record WHERE source_id = ?1", params![source_id])?;
        let deleted = tx.execute("DELETE FROM etl_source WHERE source_id = ?1", params![source_id])?;
        tx.commit()?;
        Ok(deleted)
    }

    async fn insert_fields(&self, fields: Vec<Field>) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO etl_field (
                    source_id, field_num, label, item_type, data_type,
                    item_class_uuid, context_uuid, label_prefix, options_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;
            for field in &fields {
                stmt.execute(params![
                    field.source_id,
                    field.field_num,
                    field.label,
                    field.item_type.as_str(),
                    field.data_type.as_str(),
                    opt_uuid_str(field.item_class_uuid),
                    opt_uuid_str(field.context_uuid),
                    field.label_prefix,
                    serde_json::to_string(&field.options)?,
                ])?;
                count += 1;
            }
        }

        tx.execute(
            r#"
            UPDATE etl_source
            SET field_count = (SELECT COUNT(*) FROM etl_field f WHERE f.source_id = etl_source.source_id)
            WHERE source_id IN (SELECT DISTINCT source_id FROM etl_field)
            "#,
            [],
        )?;
        tx.commit()?;
        Ok(count)
    }

    async fn list_fields(&self, source_id: &str) -> RepositoryResult<Vec<Field>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT source_id, field_num, label, item_type, data_type,
                   item_class_uuid, context_uuid, label_prefix, options_json
            FROM etl_field WHERE source_id = ?1
            ORDER BY field_num
            "#,
        )?;
        let fields = stmt
            .query_map(params![source_id], Self::map_field)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fields)
    }

    async fn update_field_context(
        &self,
        source_id: &str,
        field_num: i64,
        context_uuid: Option<Uuid>,
    ) -> RepositoryResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE etl_field SET context_uuid = ?1 WHERE source_id = ?2 AND field_num = ?3",
            params![opt_uuid_str(context_uuid), source_id, field_num],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound {
                entity: "etl_field".to_string(),
                id: format!("{}/{}", source_id, field_num),
            });
        }
        Ok(())
    }

    async fn clear_field_contexts(&self, source_id: &str) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE etl_field SET context_uuid = NULL WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(changed)
    }

    async fn insert_records(&self, records: Vec<Record>) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO etl_record (
                    source_id, row_num, field_num, record, context_uuid, item_uuid
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for record in &records {
                stmt.execute(params![
                    record.source_id,
                    record.row_num,
                    record.field_num,
                    record.record,
                    opt_uuid_str(record.context_uuid),
                    opt_uuid_str(record.item_uuid),
                ])?;
                count += 1;
            }
        }

        tx.execute(
            r#"
            UPDATE etl_source
            SET row_count = (SELECT COALESCE(MAX(row_num), 0) FROM etl_record r
                             WHERE r.source_id = etl_source.source_id)
            WHERE source_id IN (SELECT DISTINCT source_id FROM etl_record)
            "#,
            [],
        )?;
        tx.commit()?;
        Ok(count)
    }

    async fn max_row(&self, source_id: &str) -> RepositoryResult<i64> {
        let conn = self.lock()?;
        let max: i64 = conn.query_row(
            "SELECT COALESCE(MAX(row_num), 0) FROM etl_record WHERE source_id = ?1",
            params![source_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    async fn load_records(
        &self,
        source_id: &str,
        after_row: i64,
        through_row: i64,
    ) -> RepositoryResult<Vec<Record>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT source_id, row_num, field_num, record, context_uuid, item_uuid
            FROM etl_record
            WHERE source_id = ?1 AND row_num > ?2 AND row_num <= ?3
            ORDER BY row_num, field_num
            "#,
        )?;
        let records = stmt
            .query_map(params![source_id, after_row, through_row], Self::map_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn update_record_resolutions(
        &self,
        source_id: &str,
        field_num: i64,
        rows: &[i64],
        context_uuid: Option<Uuid>,
        item_uuid: Option<Uuid>,
    ) -> RepositoryResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let conn = self.lock()?;
        let sql = format!(
            "UPDATE etl_record SET context_uuid = ?1, item_uuid = ?2 \
             WHERE source_id = ?3 AND field_num = ?4 AND row_num IN ({})",
            placeholders(5, rows.len())
        );

        let mut values: Vec<rusqlite::types::Value> = vec![
            opt_uuid_str(context_uuid).into(),
            opt_uuid_str(item_uuid).into(),
            source_id.to_string().into(),
            field_num.into(),
        ];
        values.extend(rows.iter().map(|r| rusqlite::types::Value::from(*r)));

        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(&sql, params_from_iter(values))?;
        tx.commit()?;
        Ok(changed)
    }

    async fn clear_resolutions(&self, source_id: &str) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE etl_record SET context_uuid = NULL, item_uuid = NULL WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(changed)
    }

    async fn insert_annotation(&self, annotation: Annotation) -> RepositoryResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO etl_annotation (
                annotation_id, source_id, kind, kind_json, qualifiers_json, sort
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                annotation.annotation_id.to_string(),
                annotation.source_id,
                annotation.kind.as_str(),
                serde_json::to_string(&annotation.kind)?,
                serde_json::to_string(&annotation.qualifiers)?,
                annotation.sort,
            ],
        )?;
        Ok(())
    }

    async fn list_annotations(&self, source_id: &str) -> RepositoryResult<Vec<Annotation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT annotation_id, source_id, kind_json, qualifiers_json, sort
            FROM etl_annotation WHERE source_id = ?1
            ORDER BY sort, rowid
            "#,
        )?;
        let annotations = stmt
            .query_map(params![source_id], Self::map_annotation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(annotations)
    }

    async fn delete_annotations(&self, source_id: &str) -> RepositoryResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM etl_annotation WHERE source_id = ?1",
            params![source_id],
        )?;
        Ok(deleted)
    }
}

// ==========================================
// RowSource 端口实现（暂存表分页读取）
// ==========================================
#[async_trait]
impl RowSource for SqliteStagingRepository {
    async fn max_row_num(&self, source_id: &str) -> RepositoryResult<i64> {
        self.max_row(source_id).await
    }

    async fn load_rows(
        &self,
        source_id: &str,
        after_row: i64,
        through_row: i64,
    ) -> RepositoryResult<Vec<Record>> {
        self.load_records(source_id, after_row, through_row).await
    }
}
