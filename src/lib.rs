// ==========================================
// 考古数据导入 ETL - 核心库
// ==========================================
// 职责: 将表格化导入批次对齐到实体图，并物化为断言
// 技术栈: Rust + SQLite + tokio
// 运行方式: 外部调度器反复调用 advance，每次推进一个工作单元
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 批次/字段/标注/实体/断言
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 暂存层 - 共享暂存表与标注维护
pub mod staging;

// 对齐层 - 实体匹配与层级遍历
pub mod reconcile;

// 物化层 - 断言生成
pub mod assertion;

// 流水线 - 阶段编排与检查点
pub mod pipeline;

// 配置层
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// 统一错误类型
pub mod error;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    Annotation, AnnotationKind, Assertion, AssertionObject, DataType, Entity, Field, ItemType,
    Record, Source,
};

pub use error::{EtlError, EtlResult};

pub use config::{ConfigManager, EtlConfig};

pub use pipeline::{PipelineOrchestrator, SourceStageMap, StageId};

pub use reconcile::{EntityResolver, HierarchyWalker};

pub use assertion::AssertionMaterializer;

pub use staging::{AnnotationService, StagingTable};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "考古数据导入 ETL";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
