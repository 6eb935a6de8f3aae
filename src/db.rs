// ==========================================
// 考古数据导入 ETL - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键 / busy_timeout）
// - 幂等建表并写入系统保留实体
// ==========================================

use crate::domain::types::{GLOBAL_PROJECT_UUID, PREDICATE_CONTAINS_UUID, PREDICATE_HAS_FILE_UUID};
use rusqlite::{params, Connection, OptionalExtension};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等建表 + 写入系统保留实体
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS etl_source (
            source_id TEXT PRIMARY KEY,
            project_uuid TEXT NOT NULL,
            label TEXT NOT NULL,
            field_count INTEGER NOT NULL DEFAULT 0,
            row_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS etl_field (
            source_id TEXT NOT NULL REFERENCES etl_source(source_id) ON DELETE CASCADE,
            field_num INTEGER NOT NULL,
            label TEXT NOT NULL,
            item_type TEXT NOT NULL,
            data_type TEXT NOT NULL,
            item_class_uuid TEXT,
            context_uuid TEXT,
            label_prefix TEXT,
            options_json TEXT NOT NULL DEFAULT '{}',
            PRIMARY KEY (source_id, field_num)
        );

        CREATE TABLE IF NOT EXISTS etl_record (
            source_id TEXT NOT NULL,
            row_num INTEGER NOT NULL,
            field_num INTEGER NOT NULL,
            record TEXT NOT NULL,
            context_uuid TEXT,
            item_uuid TEXT,
            PRIMARY KEY (source_id, row_num, field_num),
            FOREIGN KEY (source_id, field_num)
                REFERENCES etl_field(source_id, field_num) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_etl_record_field_value
          ON etl_record(source_id, field_num, record);

        CREATE TABLE IF NOT EXISTS etl_annotation (
            annotation_id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES etl_source(source_id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            kind_json TEXT NOT NULL,
            qualifiers_json TEXT NOT NULL DEFAULT '{}',
            sort INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_etl_annotation_source
          ON etl_annotation(source_id, sort);

        CREATE TABLE IF NOT EXISTS entity (
            uuid TEXT PRIMARY KEY,
            item_type TEXT NOT NULL,
            data_type TEXT NOT NULL,
            label TEXT NOT NULL,
            slug TEXT NOT NULL,
            project_uuid TEXT NOT NULL,
            item_class_uuid TEXT,
            context_uuid TEXT,
            uri TEXT,
            item_key TEXT,
            initials TEXT,
            combined_name TEXT,
            source_id TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE (item_type, project_uuid, context_uuid, label)
        );

        CREATE INDEX IF NOT EXISTS idx_entity_type_label ON entity(item_type, label);
        CREATE INDEX IF NOT EXISTS idx_entity_uri ON entity(uri);
        CREATE INDEX IF NOT EXISTS idx_entity_source ON entity(source_id);

        CREATE TABLE IF NOT EXISTS assertion (
            uuid TEXT PRIMARY KEY,
            project_uuid TEXT NOT NULL,
            source_id TEXT NOT NULL,
            subject_uuid TEXT NOT NULL REFERENCES entity(uuid),
            predicate_uuid TEXT NOT NULL REFERENCES entity(uuid),
            observation_uuid TEXT,
            event_uuid TEXT,
            attribute_group_uuid TEXT,
            language_uuid TEXT,
            object_uuid TEXT REFERENCES entity(uuid),
            obj_string TEXT,
            obj_boolean INTEGER,
            obj_integer INTEGER,
            obj_double REAL,
            obj_date TEXT,
            sort REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_assertion_subject ON assertion(subject_uuid, sort);
        CREATE INDEX IF NOT EXISTS idx_assertion_source ON assertion(source_id);

        CREATE TABLE IF NOT EXISTS cache_entry (
            cache_key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at_ms INTEGER NOT NULL
        );
        "#,
    )?;

    seed_system_entities(conn)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        params![CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 写入系统保留实体（全局项目 / 保留谓词）
fn seed_system_entities(conn: &Connection) -> rusqlite::Result<()> {
    let global = GLOBAL_PROJECT_UUID.to_string();
    let seeds = [
        (global.clone(), "projects", "id", "Global Shared Project", "global-shared-project"),
        (PREDICATE_CONTAINS_UUID.to_string(), "predicates", "id", "Contains", "contains"),
        (PREDICATE_HAS_FILE_UUID.to_string(), "predicates", "id", "Has File", "has-file"),
    ];

    let mut stmt = conn.prepare(
        r#"
        INSERT OR IGNORE INTO entity (
            uuid, item_type, data_type, label, slug, project_uuid, meta_json, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{"system": true}', datetime('now'))
        "#,
    )?;
    for (uuid, item_type, data_type, label, slug) in seeds {
        stmt.execute(params![uuid, item_type, data_type, label, slug, global])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        initialize_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
        let seeded: i64 = conn
            .query_row("SELECT COUNT(*) FROM entity", [], |row| row.get(0))
            .unwrap();
        assert_eq!(seeded, 3);
    }
}
