// ==========================================
// 考古数据导入 ETL - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod assertion_repo;
pub mod entity_repo;
pub mod error;
pub mod sql_utils;
pub mod staging_repo;
pub mod staging_repo_impl;

// 重导出核心仓储
pub use assertion_repo::{AssertionStore, SqliteAssertionStore};
pub use entity_repo::{EntityStore, SqliteEntityStore};
pub use error::{RepositoryError, RepositoryResult};
pub use staging_repo::StagingRepository;
pub use staging_repo_impl::SqliteStagingRepository;
