// ==========================================
// 考古数据导入 ETL - 标注服务
// ==========================================
// 职责: 标注的创建（含配置期校验）、查询、删除
// 红线: 角色不匹配的标注必须在创建时拒绝，不能留给流水线
// ==========================================

use crate::domain::Annotation;
use crate::error::{EtlError, EtlResult};
use crate::repository::StagingRepository;
use std::sync::Arc;
use tracing::info;

pub struct AnnotationService {
    repo: Arc<dyn StagingRepository>,
}

impl AnnotationService {
    pub fn new(repo: Arc<dyn StagingRepository>) -> Self {
        Self { repo }
    }

    /// 创建标注
    ///
    /// # 流程
    /// 1. 确认导入批次存在
    /// 2. 按字段角色校验
    /// 3. 层级边不得形成环
    /// 4. 分配声明顺序（追加到末尾）并写入
    ///
    /// # 返回
    /// - Err(InvalidAnnotation): 字段缺失 / 角色不匹配 / 保留谓词 / 层级环
    pub async fn create(&self, mut annotation: Annotation) -> EtlResult<Annotation> {
        let source_id = annotation.source_id.clone();
        if self.repo.get_source(&source_id).await?.is_none() {
            return Err(EtlError::SourceNotFound(source_id));
        }

        let fields = self.repo.list_fields(&source_id).await?;
        annotation.validate(&fields)?;

        let existing = self.repo.list_annotations(&source_id).await?;
        annotation.check_acyclic(&existing)?;
        annotation.sort = existing.iter().map(|a| a.sort).max().map_or(0, |s| s + 1);

        self.repo.insert_annotation(annotation.clone()).await?;
        info!(
            source_id = %source_id,
            kind = annotation.kind.as_str(),
            sort = annotation.sort,
            "标注已创建"
        );
        Ok(annotation)
    }

    pub async fn list(&self, source_id: &str) -> EtlResult<Vec<Annotation>> {
        Ok(self.repo.list_annotations(source_id).await?)
    }

    pub async fn delete_all(&self, source_id: &str) -> EtlResult<usize> {
        Ok(self.repo.delete_annotations(source_id).await?)
    }
}
