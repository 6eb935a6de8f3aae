// ==========================================
// 考古数据导入 ETL - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::etl_config::EtlConfig;
use crate::db::open_sqlite_connection;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            crate::db::configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 配置（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取全部 etl/ 前缀的配置
    fn etl_overrides(&self) -> RepositoryResult<HashMap<String, String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' AND key LIKE 'etl/%'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// 加载流水线参数（缺省项取默认值，格式错误的项告警后取默认值）
    pub fn load_etl_config(&self) -> RepositoryResult<EtlConfig> {
        let overrides = self.etl_overrides()?;
        let defaults = EtlConfig::default();

        Ok(EtlConfig {
            init_chunk_rows: positive_or(&overrides, config_keys::INIT_CHUNK_ROWS, defaults.init_chunk_rows),
            row_batch_size: positive_or(&overrides, config_keys::ROW_BATCH_SIZE, defaults.row_batch_size),
            annotation_batch_size: positive_or(
                &overrides,
                config_keys::ANNOTATION_BATCH_SIZE,
                defaults.annotation_batch_size,
            ),
            record_write_batch: positive_or(
                &overrides,
                config_keys::RECORD_WRITE_BATCH,
                defaults.record_write_batch,
            ),
            cache_ttl_secs: positive_or(&overrides, config_keys::CACHE_TTL_SECS, defaults.cache_ttl_secs),
            lease_ttl_secs: positive_or(&overrides, config_keys::LEASE_TTL_SECS, defaults.lease_ttl_secs),
        })
    }
}

/// 解析正数配置值，缺失或非法时回落到默认值
fn positive_or<T>(overrides: &HashMap<String, String>, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(raw) = overrides.get(key) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(v) if v > T::default() => v,
        _ => {
            tracing::warn!(key = key, value = %raw, default = %default, "配置值非法，使用默认值");
            default
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    pub const INIT_CHUNK_ROWS: &str = "etl/init_chunk_rows";
    pub const ROW_BATCH_SIZE: &str = "etl/row_batch_size";
    pub const ANNOTATION_BATCH_SIZE: &str = "etl/annotation_batch_size";
    pub const RECORD_WRITE_BATCH: &str = "etl/record_write_batch";
    pub const CACHE_TTL_SECS: &str = "etl/cache_ttl_secs";
    pub const LEASE_TTL_SECS: &str = "etl/lease_ttl_secs";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, initialize_schema};

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        initialize_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = manager().load_etl_config().unwrap();
        assert_eq!(config, EtlConfig::default());
    }

    #[test]
    fn test_overrides_and_malformed_values() {
        let manager = manager();
        manager.set_global_config_value(config_keys::ROW_BATCH_SIZE, "2").unwrap();
        manager.set_global_config_value(config_keys::RECORD_WRITE_BATCH, "abc").unwrap();
        manager.set_global_config_value(config_keys::LEASE_TTL_SECS, "-5").unwrap();

        let config = manager.load_etl_config().unwrap();
        assert_eq!(config.row_batch_size, 2);
        assert_eq!(config.record_write_batch, 100);
        assert_eq!(config.lease_ttl_secs, 600);
        assert_eq!(
            manager.get_global_config_value(config_keys::ROW_BATCH_SIZE).unwrap(),
            Some("2".to_string())
        );
    }
}
