// ==========================================
// 考古数据导入 ETL - 流水线错误类型
// ==========================================
// 职责: 流水线层（编排 / 缓存 / 租约 / 配置）的统一错误
// 约定: 行级 / 值级失败不走错误通道，只记日志
// ==========================================

use crate::domain::AnnotationError;
use crate::repository::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("数据访问失败: {0}")]
    Repository(#[from] RepositoryError),

    #[error("标注配置无效: {0}")]
    InvalidAnnotation(#[from] AnnotationError),

    #[error("导入批次不存在: {0}")]
    SourceNotFound(String),

    #[error("字段不存在: source={source_id}, field_num={field_num}")]
    FieldNotFound { source_id: String, field_num: i64 },

    #[error("导入批次正由其他调用处理中: {0}")]
    LeaseHeld(String),

    #[error("缓存操作失败: {0}")]
    Cache(String),

    #[error("序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EtlResult<T> = Result<T, EtlError>;

impl EtlError {
    /// 是否为可直接重试的调用冲突（租约被占用）
    pub fn is_retryable(&self) -> bool {
        matches!(self, EtlError::LeaseHeld(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_converts() {
        let err: EtlError = RepositoryError::LockError("poisoned".to_string()).into();
        assert!(matches!(err, EtlError::Repository(_)));
        assert!(!err.is_retryable());
        assert!(EtlError::LeaseHeld("s1".to_string()).is_retryable());
    }
}
