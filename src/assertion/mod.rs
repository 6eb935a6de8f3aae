// ==========================================
// 考古数据导入 ETL - 断言物化层
// ==========================================
// 职责: 字面量类型转换、断言去重与确定性标识、替换写入
// ==========================================

pub mod literal;
pub mod materializer;

pub use literal::coerce_literal;
pub use materializer::{sort_weight, AssertionMaterializer, MaterializeReport};
