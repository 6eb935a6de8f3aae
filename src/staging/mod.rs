// ==========================================
// 考古数据导入 ETL - 暂存层
// ==========================================
// 职责: 共享暂存表、行数据来源端口、标注创建校验
// ==========================================

pub mod annotation_service;
pub mod table;

pub use annotation_service::AnnotationService;
pub use table::{Cell, RowSource, StagingTable};
