// ==========================================
// 考古数据导入 ETL - SQL 列转换工具
// ==========================================
// 职责: UUID / 时间 / JSON 列与领域类型的互转
// 存储: UUID 与时间统一以 TEXT 落库
// ==========================================

use crate::domain::types::{DataType, ItemType};
use crate::repository::error::RepositoryError;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::Row;
use uuid::Uuid;

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// 读取非空 UUID 列
pub fn uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// 读取可空 UUID 列
pub fn opt_uuid_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// 可空 UUID → TEXT 参数
pub fn opt_uuid_str(value: Option<Uuid>) -> Option<String> {
    value.map(|u| u.to_string())
}

/// 读取时间列（兼容 RFC3339 与 SQLite datetime('now') 格式）
pub fn datetime_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| conversion_error(idx, e))
}

/// 读取语义角色列
pub fn item_type_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<ItemType> {
    let raw: String = row.get(idx)?;
    ItemType::parse_str(&raw).ok_or_else(|| {
        conversion_error(
            idx,
            RepositoryError::FieldValueError {
                field: "item_type".to_string(),
                message: format!("未知语义角色: {}", raw),
            },
        )
    })
}

/// 读取数据类型列
pub fn data_type_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DataType> {
    let raw: String = row.get(idx)?;
    DataType::parse_str(&raw).ok_or_else(|| {
        conversion_error(
            idx,
            RepositoryError::FieldValueError {
                field: "data_type".to_string(),
                message: format!("未知数据类型: {}", raw),
            },
        )
    })
}

/// 读取 JSON 文本列
pub fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

/// 生成 `?n, ?n+1, ...` 占位符串
pub fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

// ==========================================
// WhereBuilder - 动态 WHERE 子句构建
// ==========================================
// 占位符按参数追加顺序编号，调用方只描述条件

#[derive(Debug, Default)]
pub struct WhereBuilder {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl WhereBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加参数并返回其占位符
    pub fn bind(&mut self, value: impl Into<Value>) -> String {
        self.values.push(value.into());
        format!("?{}", self.values.len())
    }

    /// 追加一个完整条件片段
    pub fn push(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    /// `column = ?`
    pub fn eq(&mut self, column: &str, value: impl Into<Value>) {
        let ph = self.bind(value);
        self.push(format!("{} = {}", column, ph));
    }

    /// `column IN (?, ...)`；空集合生成恒假条件
    pub fn in_list<V: Into<Value>>(&mut self, column: &str, values: impl IntoIterator<Item = V>) {
        let phs: Vec<String> = values.into_iter().map(|v| self.bind(v)).collect();
        if phs.is_empty() {
            self.push("0 = 1".to_string());
        } else {
            self.push(format!("{} IN ({})", column, phs.join(", ")));
        }
    }

    /// 生成 ` WHERE a AND b`（无条件时为空串）
    pub fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}
