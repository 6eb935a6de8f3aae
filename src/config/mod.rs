// ==========================================
// 考古数据导入 ETL - 配置层
// ==========================================
// 职责: 流水线参数管理,支持数据库覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod etl_config;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use etl_config::EtlConfig;
