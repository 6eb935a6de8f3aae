// ==========================================
// 考古数据导入 ETL - 流水线编排器
// ==========================================
// 职责: 按固定阶段顺序推进单个导入批次，每次调用只做一个工作单元
// 状态: 阶段进度 / 暂存表 / 水位线 / 标注序号 全部存于缓存，调用间无常驻进程
// 并发: 每个批次一把带有效期的租约，同一时刻只允许一个推进者
// ==========================================

use crate::assertion::AssertionMaterializer;
use crate::config::EtlConfig;
use crate::domain::{Source, SOURCE_STATUS_COMPLETE, SOURCE_STATUS_INGESTED};
use crate::error::{EtlError, EtlResult};
use crate::pipeline::cache::{CacheKey, CacheKeyKind, CheckpointStore, PipelineCache, SqliteCache};
use crate::pipeline::stages::{StageDef, StageId, StageMode, StageRunner, STAGES};
use crate::reconcile::{EntityResolver, HierarchyWalker};
use crate::repository::{
    AssertionStore, EntityStore, SqliteAssertionStore, SqliteEntityStore, SqliteStagingRepository,
    StagingRepository,
};
use crate::staging::{RowSource, StagingTable};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 阶段进度（对外返回的调用结果）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub id: StageId,
    pub label: String,
    pub done: bool,
    pub rows_done: i64,
    pub rows_total: i64,
    /// 仅标注批阶段
    pub annotation_index: Option<usize>,
    pub annotation_total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStageMap {
    pub source_id: String,
    pub stages: Vec<StageStatus>,
    pub complete: bool,
}

impl SourceStageMap {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            stages: STAGES
                .iter()
                .map(|def| StageStatus {
                    id: def.id,
                    label: def.label.to_string(),
                    done: false,
                    rows_done: 0,
                    rows_total: 0,
                    annotation_index: match def.mode {
                        StageMode::AnnotationBatch => Some(0),
                        _ => None,
                    },
                    annotation_total: match def.mode {
                        StageMode::AnnotationBatch => Some(0),
                        _ => None,
                    },
                })
                .collect(),
            complete: false,
        }
    }

    pub fn stage(&self, id: StageId) -> Option<&StageStatus> {
        self.stages.iter().find(|s| s.id == id)
    }

    fn stage_mut(&mut self, id: StageId) -> Option<&mut StageStatus> {
        self.stages.iter_mut().find(|s| s.id == id)
    }

    /// 第一个未完成的阶段
    pub fn next_pending(&self) -> Option<StageId> {
        self.stages.iter().find(|s| !s.done).map(|s| s.id)
    }

    fn recompute(&mut self) {
        self.complete = self.stages.iter().all(|s| s.done);
    }
}

// ==========================================
// PipelineOrchestrator
// ==========================================
pub struct PipelineOrchestrator {
    repo: Arc<dyn StagingRepository>,
    rows: Arc<dyn RowSource>,
    entities: Arc<dyn EntityStore>,
    assertions: Arc<dyn AssertionStore>,
    checkpoints: CheckpointStore,
    config: EtlConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        repo: Arc<dyn StagingRepository>,
        rows: Arc<dyn RowSource>,
        entities: Arc<dyn EntityStore>,
        assertions: Arc<dyn AssertionStore>,
        cache: Arc<dyn PipelineCache>,
        config: EtlConfig,
    ) -> Self {
        let checkpoints = CheckpointStore::new(cache, config.cache_ttl_secs);
        Self {
            repo,
            rows,
            entities,
            assertions,
            checkpoints,
            config,
        }
    }

    /// 基于单个 SQLite 连接组装全部协作者（缓存使用 cache_entry 表）
    pub fn from_connection(conn: Arc<Mutex<Connection>>, config: EtlConfig) -> Self {
        let staging = Arc::new(SqliteStagingRepository::from_connection(conn.clone()));
        Self::new(
            staging.clone(),
            staging,
            Arc::new(SqliteEntityStore::from_connection(conn.clone())),
            Arc::new(SqliteAssertionStore::from_connection(conn.clone())),
            Arc::new(SqliteCache::from_connection(conn)),
            config,
        )
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    /// 推进一个工作单元
    ///
    /// # 返回
    /// - Ok(SourceStageMap): 推进后的阶段进度（complete=true 表示全部完成）
    /// - Err(LeaseHeld): 其他调用正在处理该批次
    /// - Err(SourceNotFound): 批次不存在
    #[instrument(skip(self), fields(stage))]
    pub async fn advance(&self, source_id: &str) -> EtlResult<SourceStageMap> {
        let holder = Uuid::new_v4().to_string();
        if !self
            .checkpoints
            .acquire_lease(source_id, &holder, self.config.lease_ttl_secs)
            .await?
        {
            warn!(source_id = source_id, "租约被占用");
            return Err(EtlError::LeaseHeld(source_id.to_string()));
        }

        let result = self.advance_locked(source_id).await;
        let released = self.checkpoints.release_lease(source_id, &holder).await;
        let map = result?;
        released?;
        Ok(map)
    }

    /// 读取当前阶段进度（不推进）
    pub async fn status(&self, source_id: &str) -> EtlResult<SourceStageMap> {
        Ok(self
            .checkpoints
            .load(&CacheKey::source(source_id, CacheKeyKind::StageMap))
            .await?
            .unwrap_or_else(|| SourceStageMap::new(source_id)))
    }

    /// 清除批次的全部缓存状态（下一次调用从头开始）
    pub async fn purge(&self, source_id: &str) -> EtlResult<usize> {
        self.checkpoints.purge(source_id).await
    }

    /// 撤销批次的对齐与物化结果
    ///
    /// # 流程
    /// 1. 清除缓存
    /// 2. 删除本批次断言、本批次新建的实体
    /// 3. 清空单元格对齐结果与字段上下文，状态回到 ingested
    pub async fn unreconcile(&self, source_id: &str) -> EtlResult<()> {
        let holder = Uuid::new_v4().to_string();
        if !self
            .checkpoints
            .acquire_lease(source_id, &holder, self.config.lease_ttl_secs)
            .await?
        {
            return Err(EtlError::LeaseHeld(source_id.to_string()));
        }

        let result = self.unreconcile_locked(source_id).await;
        let released = self.checkpoints.release_lease(source_id, &holder).await;
        result?;
        released
    }

    async fn unreconcile_locked(&self, source_id: &str) -> EtlResult<()> {
        if self.repo.get_source(source_id).await?.is_none() {
            return Err(EtlError::SourceNotFound(source_id.to_string()));
        }
        let keys = self.checkpoints.purge(source_id).await?;
        let assertions = self.assertions.delete_by_source(source_id).await?;
        let entities = self.entities.delete_by_source(source_id).await?;
        let cells = self.repo.clear_resolutions(source_id).await?;
        self.repo.clear_field_contexts(source_id).await?;
        self.repo
            .update_source_status(source_id, SOURCE_STATUS_INGESTED)
            .await?;
        info!(
            source_id = source_id,
            cache_keys = keys,
            assertions = assertions,
            entities = entities,
            cells = cells,
            "批次已撤销对齐"
        );
        Ok(())
    }

    async fn advance_locked(&self, source_id: &str) -> EtlResult<SourceStageMap> {
        let source = self
            .repo
            .get_source(source_id)
            .await?
            .ok_or_else(|| EtlError::SourceNotFound(source_id.to_string()))?;

        let map_key = CacheKey::source(source_id, CacheKeyKind::StageMap);
        let mut map: SourceStageMap = self
            .checkpoints
            .load(&map_key)
            .await?
            .unwrap_or_else(|| SourceStageMap::new(source_id));

        let Some(stage) = map.next_pending() else {
            map.recompute();
            return Ok(map);
        };
        tracing::Span::current().record("stage", tracing::field::debug(&stage));
        let def = stage.def();

        match def.mode {
            StageMode::Initialize => self.run_initialize(def, &mut map).await?,
            StageMode::RowBatch => self.run_row_batch(&source, def, &mut map).await?,
            StageMode::AnnotationBatch => self.run_annotation_batch(&source, def, &mut map).await?,
        }

        map.recompute();
        if map.complete {
            self.repo
                .update_source_status(source_id, SOURCE_STATUS_COMPLETE)
                .await?;
            info!(source_id = source_id, "批次全部阶段完成");
        }
        self.checkpoints.save(&map_key, &map).await?;
        Ok(map)
    }

    // ==========================================
    // 初始化: 分段拉取行填充暂存表
    // ==========================================
    async fn run_initialize(&self, def: &StageDef, map: &mut SourceStageMap) -> EtlResult<()> {
        let source_id = map.source_id.clone();
        let table_key = CacheKey::source(&source_id, CacheKeyKind::StagingTable);
        let fetched_key = CacheKey::stage(&source_id, def.id, CacheKeyKind::RowWatermark);

        let mut table: StagingTable = self
            .checkpoints
            .load(&table_key)
            .await?
            .unwrap_or_else(|| StagingTable::new(&source_id));
        let fetched: i64 = self.checkpoints.load(&fetched_key).await?.unwrap_or(0);
        let max_row = self.rows.max_row_num(&source_id).await?;

        let through = (fetched + self.config.init_chunk_rows).min(max_row);
        if through > fetched {
            let records = self.rows.load_rows(&source_id, fetched, through).await?;
            let added = table.append(records);
            info!(
                source_id = %source_id,
                after_row = fetched,
                through_row = through,
                rows_added = added,
                "暂存表分段加载"
            );
        }
        let fetched = through.max(fetched);

        self.checkpoints.save(&table_key, &table).await?;
        self.checkpoints.save(&fetched_key, &fetched).await?;

        if let Some(status) = map.stage_mut(def.id) {
            status.rows_done = fetched;
            status.rows_total = max_row;
            status.done = fetched >= max_row;
        }
        Ok(())
    }

    /// 读取共享暂存表；缓存已过期时把初始化阶段重新置为未完成
    async fn load_table(&self, map: &mut SourceStageMap) -> EtlResult<Option<StagingTable>> {
        let source_id = map.source_id.clone();
        let table_key = CacheKey::source(&source_id, CacheKeyKind::StagingTable);
        if let Some(table) = self.checkpoints.load(&table_key).await? {
            return Ok(Some(table));
        }

        warn!(source_id = %source_id, "暂存表缓存缺失，重新初始化");
        self.checkpoints
            .remove(&CacheKey::stage(
                &source_id,
                StageId::PrepareSourceTable,
                CacheKeyKind::RowWatermark,
            ))
            .await?;
        if let Some(status) = map.stage_mut(StageId::PrepareSourceTable) {
            status.done = false;
            status.rows_done = 0;
        }
        Ok(None)
    }

    async fn build_runner(&self, source: &Source) -> EtlResult<StageRunner> {
        let fields = self.repo.list_fields(&source.source_id).await?;
        let annotations = self.repo.list_annotations(&source.source_id).await?;
        let resolver = Arc::new(EntityResolver::new(self.entities.clone(), source));
        let walker = HierarchyWalker::new(
            resolver.clone(),
            self.repo.clone(),
            fields.clone(),
            annotations.clone(),
            self.config.record_write_batch,
        );
        let materializer = AssertionMaterializer::new(
            resolver.clone(),
            self.assertions.clone(),
            &source.source_id,
            source.project_uuid,
            fields.clone(),
        );
        Ok(StageRunner::new(
            resolver,
            self.repo.clone(),
            walker,
            materializer,
            fields,
            annotations,
        ))
    }

    // ==========================================
    // 行批阶段
    // ==========================================
    async fn run_row_batch(
        &self,
        source: &Source,
        def: &StageDef,
        map: &mut SourceStageMap,
    ) -> EtlResult<()> {
        let Some(mut table) = self.load_table(map).await? else {
            return Ok(());
        };
        let source_id = source.source_id.clone();
        let watermark_key = CacheKey::stage(&source_id, def.id, CacheKeyKind::RowWatermark);
        let watermark: i64 = self.checkpoints.load(&watermark_key).await?.unwrap_or(0);
        let max_row = table.max_row();

        let through = (watermark + self.config.row_batch_size).min(max_row);
        let rows = table.rows_in(watermark, through);
        if !rows.is_empty() {
            let mut runner = self.build_runner(source).await?;
            runner.run_rows(def.id, &mut table, &rows).await?;
        }
        let watermark = through.max(watermark);

        if def.mutates_table {
            self.checkpoints
                .save(&CacheKey::source(&source_id, CacheKeyKind::StagingTable), &table)
                .await?;
        }
        self.checkpoints.save(&watermark_key, &watermark).await?;

        info!(
            source_id = %source_id,
            stage = ?def.id,
            rows = rows.len(),
            watermark = watermark,
            max_row = max_row,
            "行批处理完成"
        );
        if let Some(status) = map.stage_mut(def.id) {
            status.rows_done = watermark;
            status.rows_total = max_row;
            status.done = watermark >= max_row;
        }
        Ok(())
    }

    // ==========================================
    // 标注批阶段
    // ==========================================
    async fn run_annotation_batch(
        &self,
        source: &Source,
        def: &StageDef,
        map: &mut SourceStageMap,
    ) -> EtlResult<()> {
        let Some(table) = self.load_table(map).await? else {
            return Ok(());
        };
        let source_id = source.source_id.clone();
        let index_key = CacheKey::stage(&source_id, def.id, CacheKeyKind::AnnotationIndex);
        let watermark_key = CacheKey::stage(&source_id, def.id, CacheKeyKind::RowWatermark);

        let mut runner = self.build_runner(source).await?;
        let annotations: Vec<_> = def
            .id
            .annotations(runner.annotations())
            .into_iter()
            .cloned()
            .collect();
        let total = annotations.len();
        let mut index: usize = self.checkpoints.load(&index_key).await?.unwrap_or(0);
        let mut watermark: i64 = self.checkpoints.load(&watermark_key).await?.unwrap_or(0);
        let max_row = table.max_row();

        if let Some(annotation) = annotations.get(index) {
            let through = (watermark + self.config.annotation_batch_size).min(max_row);
            let rows = table.rows_in(watermark, through);
            let report = runner.run_annotation(def.id, annotation, &table, &rows).await?;
            watermark = through.max(watermark);

            info!(
                source_id = %source_id,
                stage = ?def.id,
                annotation_index = index,
                annotation_total = total,
                rows = rows.len(),
                produced = report.produced,
                written = report.written,
                failed = report.failed,
                "标注批处理完成"
            );
            if watermark >= max_row {
                index += 1;
                watermark = 0;
            }
        }

        self.checkpoints.save(&index_key, &index).await?;
        self.checkpoints.save(&watermark_key, &watermark).await?;

        if let Some(status) = map.stage_mut(def.id) {
            status.annotation_index = Some(index.min(total));
            status.annotation_total = Some(total);
            status.rows_done = if index >= total { max_row } else { watermark };
            status.rows_total = max_row;
            status.done = index >= total;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stage_map_starts_pending() {
        let map = SourceStageMap::new("s1");
        assert_eq!(map.stages.len(), STAGES.len());
        assert_eq!(map.next_pending(), Some(StageId::PrepareSourceTable));
        assert!(!map.complete);
        assert_eq!(
            map.stage(StageId::MakeLinkAssertions).and_then(|s| s.annotation_total),
            Some(0)
        );
        assert_eq!(map.stage(StageId::ReconcileSpatialHierarchy).and_then(|s| s.annotation_index), None);
    }
}
