// ==========================================
// 考古数据导入 ETL - 领域模型层
// ==========================================
// 职责: 定义导入批次、字段、标注、实体、断言等领域类型
// 红线: 不含数据访问逻辑,不含对齐/物化逻辑
// ==========================================

pub mod annotation;
pub mod assertion;
pub mod entity;
pub mod source;
pub mod types;

// 重导出核心类型
pub use annotation::{
    Annotation, AnnotationError, AnnotationKind, DescriptionSource, QualifierNode, Qualifiers,
};
pub use assertion::{Assertion, AssertionKey, AssertionObject};
pub use entity::{Entity, EntityFilter, EntityQuery, MatchTerm, NewEntity};
pub use source::{
    AttributeFilter, Field, FieldOptions, FilterAttribute, Record, Source,
    SOURCE_STATUS_COMPLETE, SOURCE_STATUS_INGESTED,
};
pub use types::{
    DataType, ItemType, ASSERTION_NAMESPACE, EXCLUDED_PREDICATES, GLOBAL_PROJECT_UUID,
    PREDICATE_CONTAINS_UUID, PREDICATE_HAS_FILE_UUID,
};
