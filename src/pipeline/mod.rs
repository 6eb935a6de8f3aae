// ==========================================
// 考古数据导入 ETL - 分阶段流水线
// ==========================================
// 职责: 阶段定义、检查点缓存、单次推进编排
// ==========================================

pub mod cache;
pub mod orchestrator;
pub mod stages;

pub use cache::{CacheKey, CacheKeyKind, CheckpointStore, MemoryCache, PipelineCache, SqliteCache};
pub use orchestrator::{PipelineOrchestrator, SourceStageMap, StageStatus};
pub use stages::{StageDef, StageId, StageMode, StageRunner, STAGES};
