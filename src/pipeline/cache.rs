// ==========================================
// 考古数据导入 ETL - 流水线缓存
// ==========================================
// 职责: 阶段进度 / 暂存表 / 水位线 / 租约的带过期缓存
// 键: 结构化 CacheKey (source_id, stage, kind)，每个批次维护键登记表
// 实现: SqliteCache（cache_entry 表）/ MemoryCache（进程内）
// ==========================================

use crate::error::{EtlError, EtlResult};
use crate::pipeline::stages::StageId;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

// ==========================================
// CacheKey
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyKind {
    StageMap,
    StagingTable,
    RowWatermark,
    AnnotationIndex,
    Lease,
    KeyRegistry,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub source_id: String,
    pub stage: Option<StageId>,
    pub kind: CacheKeyKind,
}

impl CacheKey {
    pub fn source(source_id: &str, kind: CacheKeyKind) -> Self {
        Self {
            source_id: source_id.to_string(),
            stage: None,
            kind,
        }
    }

    pub fn stage(source_id: &str, stage: StageId, kind: CacheKeyKind) -> Self {
        Self {
            source_id: source_id.to_string(),
            stage: Some(stage),
            kind,
        }
    }

    /// 存储用键串
    ///
    /// 采用 JSON 编码，source_id 中的任意字符都不会与分隔符混淆
    pub fn storage_key(&self) -> String {
        serde_json::json!(["etl", self.kind, self.stage, self.source_id]).to_string()
    }
}

// ==========================================
// PipelineCache Trait
// ==========================================
// 实现者: SqliteCache / MemoryCache
#[async_trait]
pub trait PipelineCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> EtlResult<Option<String>>;

    /// 写入并设置有效期（秒）
    async fn set(&self, key: &CacheKey, value: &str, ttl_secs: i64) -> EtlResult<()>;

    async fn delete(&self, key: &CacheKey) -> EtlResult<()>;

    /// 键不存在（或已过期）时写入
    ///
    /// # 返回
    /// - true: 写入成功
    /// - false: 键已存在
    async fn set_if_absent(&self, key: &CacheKey, value: &str, ttl_secs: i64) -> EtlResult<bool>;
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expires_at(ttl_secs: i64) -> i64 {
    now_ms().saturating_add(ttl_secs.max(0).saturating_mul(1000))
}

// ==========================================
// SqliteCache
// ==========================================
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> EtlResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| EtlError::Cache(format!("锁获取失败: {}", e)))
    }

    fn cache_err(e: rusqlite::Error) -> EtlError {
        EtlError::Cache(e.to_string())
    }

    /// 清理全部过期条目
    pub fn purge_expired(&self) -> EtlResult<usize> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM cache_entry WHERE expires_at_ms <= ?1",
            params![now_ms()],
        )
        .map_err(Self::cache_err)
    }
}

#[async_trait]
impl PipelineCache for SqliteCache {
    async fn get(&self, key: &CacheKey) -> EtlResult<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM cache_entry WHERE cache_key = ?1 AND expires_at_ms > ?2",
            params![key.storage_key(), now_ms()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(Self::cache_err)
    }

    async fn set(&self, key: &CacheKey, value: &str, ttl_secs: i64) -> EtlResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO cache_entry (cache_key, value, expires_at_ms) VALUES (?1, ?2, ?3)
            ON CONFLICT(cache_key) DO UPDATE SET value = ?2, expires_at_ms = ?3
            "#,
            params![key.storage_key(), value, expires_at(ttl_secs)],
        )
        .map_err(Self::cache_err)?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> EtlResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM cache_entry WHERE cache_key = ?1",
            params![key.storage_key()],
        )
        .map_err(Self::cache_err)?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &CacheKey, value: &str, ttl_secs: i64) -> EtlResult<bool> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction().map_err(Self::cache_err)?;
        let storage_key = key.storage_key();
        tx.execute(
            "DELETE FROM cache_entry WHERE cache_key = ?1 AND expires_at_ms <= ?2",
            params![storage_key, now_ms()],
        )
        .map_err(Self::cache_err)?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO cache_entry (cache_key, value, expires_at_ms) VALUES (?1, ?2, ?3)",
                params![storage_key, value, expires_at(ttl_secs)],
            )
            .map_err(Self::cache_err)?;
        tx.commit().map_err(Self::cache_err)?;
        Ok(inserted == 1)
    }
}

// ==========================================
// MemoryCache
// ==========================================
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> EtlResult<MutexGuard<'_, HashMap<String, (String, i64)>>> {
        self.entries
            .lock()
            .map_err(|e| EtlError::Cache(format!("锁获取失败: {}", e)))
    }
}

#[async_trait]
impl PipelineCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> EtlResult<Option<String>> {
        let entries = self.lock()?;
        Ok(entries
            .get(&key.storage_key())
            .filter(|(_, expires)| *expires > now_ms())
            .map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &CacheKey, value: &str, ttl_secs: i64) -> EtlResult<()> {
        let mut entries = self.lock()?;
        entries.insert(key.storage_key(), (value.to_string(), expires_at(ttl_secs)));
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> EtlResult<()> {
        let mut entries = self.lock()?;
        entries.remove(&key.storage_key());
        Ok(())
    }

    async fn set_if_absent(&self, key: &CacheKey, value: &str, ttl_secs: i64) -> EtlResult<bool> {
        let mut entries = self.lock()?;
        let storage_key = key.storage_key();
        if let Some((_, expires)) = entries.get(&storage_key) {
            if *expires > now_ms() {
                return Ok(false);
            }
        }
        entries.insert(storage_key, (value.to_string(), expires_at(ttl_secs)));
        Ok(true)
    }
}

// ==========================================
// CheckpointStore - 类型化读写 + 键登记 + 租约
// ==========================================
pub struct CheckpointStore {
    cache: Arc<dyn PipelineCache>,
    ttl_secs: i64,
}

impl CheckpointStore {
    pub fn new(cache: Arc<dyn PipelineCache>, ttl_secs: i64) -> Self {
        Self { cache, ttl_secs }
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &CacheKey) -> EtlResult<Option<T>> {
        match self.cache.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// 写入并登记到批次键登记表
    pub async fn save<T: Serialize>(&self, key: &CacheKey, value: &T) -> EtlResult<()> {
        let raw = serde_json::to_string(value)?;
        self.cache.set(key, &raw, self.ttl_secs).await?;
        self.register(key).await
    }

    pub async fn remove(&self, key: &CacheKey) -> EtlResult<()> {
        self.cache.delete(key).await
    }

    /// 批次已登记的全部键
    pub async fn registered(&self, source_id: &str) -> EtlResult<Vec<CacheKey>> {
        let registry = CacheKey::source(source_id, CacheKeyKind::KeyRegistry);
        Ok(self.load(&registry).await?.unwrap_or_default())
    }

    async fn register(&self, key: &CacheKey) -> EtlResult<()> {
        let registry_key = CacheKey::source(&key.source_id, CacheKeyKind::KeyRegistry);
        let mut keys = self.registered(&key.source_id).await?;
        if !keys.contains(key) {
            keys.push(key.clone());
        }
        // 登记表每次都续期，保证不早于其登记的键过期
        let raw = serde_json::to_string(&keys)?;
        self.cache.set(&registry_key, &raw, self.ttl_secs).await
    }

    /// 删除批次的全部已登记缓存
    pub async fn purge(&self, source_id: &str) -> EtlResult<usize> {
        let keys = self.registered(source_id).await?;
        for key in &keys {
            self.cache.delete(key).await?;
        }
        self.cache
            .delete(&CacheKey::source(source_id, CacheKeyKind::KeyRegistry))
            .await?;
        debug!(source_id = source_id, keys = keys.len(), "批次缓存已清除");
        Ok(keys.len())
    }

    /// 获取批次处理租约
    pub async fn acquire_lease(&self, source_id: &str, holder: &str, ttl_secs: i64) -> EtlResult<bool> {
        let key = CacheKey::source(source_id, CacheKeyKind::Lease);
        self.cache.set_if_absent(&key, holder, ttl_secs).await
    }

    /// 释放租约（仅当仍由 holder 持有）
    pub async fn release_lease(&self, source_id: &str, holder: &str) -> EtlResult<()> {
        let key = CacheKey::source(source_id, CacheKeyKind::Lease);
        if self.cache.get(&key).await?.as_deref() == Some(holder) {
            self.cache.delete(&key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys_do_not_collide() {
        let a = CacheKey::stage("a/b", StageId::ReconcileSpaceTime, CacheKeyKind::RowWatermark);
        let b = CacheKey::stage("a", StageId::ReconcileSpaceTime, CacheKeyKind::RowWatermark);
        let c = CacheKey::stage("a/b", StageId::ReconcileSpaceTime, CacheKeyKind::AnnotationIndex);
        assert_ne!(a.storage_key(), b.storage_key());
        assert_ne!(a.storage_key(), c.storage_key());
        assert_eq!(a.storage_key(), a.clone().storage_key());
    }

    #[tokio::test]
    async fn test_memory_cache_expiry_and_set_if_absent() {
        let cache = MemoryCache::new();
        let key = CacheKey::source("s1", CacheKeyKind::Lease);

        assert!(cache.set_if_absent(&key, "a", 60).await.unwrap());
        assert!(!cache.set_if_absent(&key, "b", 60).await.unwrap());
        assert_eq!(cache.get(&key).await.unwrap(), Some("a".to_string()));

        // 有效期为 0 的条目立即过期
        cache.set(&key, "c", 0).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), None);
        assert!(cache.set_if_absent(&key, "d", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_checkpoint_registry_and_purge() {
        let store = CheckpointStore::new(Arc::new(MemoryCache::new()), 60);
        let watermark = CacheKey::stage("s1", StageId::ReconcileSpatialHierarchy, CacheKeyKind::RowWatermark);
        let map = CacheKey::source("s1", CacheKeyKind::StageMap);
        let other = CacheKey::source("s2", CacheKeyKind::StageMap);

        store.save(&watermark, &250i64).await.unwrap();
        store.save(&watermark, &500i64).await.unwrap();
        store.save(&map, &vec!["x"]).await.unwrap();
        store.save(&other, &1i64).await.unwrap();

        assert_eq!(store.registered("s1").await.unwrap().len(), 2);
        assert_eq!(store.load::<i64>(&watermark).await.unwrap(), Some(500));

        assert_eq!(store.purge("s1").await.unwrap(), 2);
        assert_eq!(store.load::<i64>(&watermark).await.unwrap(), None);
        assert_eq!(store.load::<i64>(&other).await.unwrap(), Some(1));
    }
}
