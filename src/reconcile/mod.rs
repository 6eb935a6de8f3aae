// ==========================================
// 考古数据导入 ETL - 实体对齐层
// ==========================================
// 职责: 标签清洗、单值对齐、层级遍历
// ==========================================

pub mod entity_resolver;
pub mod hierarchy_walker;
pub mod label_cleaner;

pub use entity_resolver::{EntityResolver, EntitySpec, ResolveOutcome};
pub use hierarchy_walker::{HierarchyWalker, WalkReport};
pub use label_cleaner::LabelCleaner;
