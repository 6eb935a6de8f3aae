// ==========================================
// 考古数据导入 ETL - 字面量类型转换
// ==========================================
// 职责: 原始文本 → 谓词声明的数据类型
// 失败: 返回 None，由物化器改写到备注谓词（不丢值）
// ==========================================

use crate::domain::{AssertionObject, DataType};
use chrono::{NaiveDate, NaiveDateTime};

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%Y%m%d", "%d.%m.%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// 把原始文本转换为指定数据类型的断言对象
///
/// # 返回
/// - Some: 转换成功
/// - None: 空值、id 类型或格式不符
pub fn coerce_literal(data_type: DataType, raw: &str) -> Option<AssertionObject> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    match data_type {
        DataType::Id => None,
        DataType::String => Some(AssertionObject::String(value.to_string())),
        DataType::Boolean => parse_boolean(value).map(AssertionObject::Boolean),
        DataType::Integer => parse_integer(value).map(AssertionObject::Integer),
        DataType::Double => parse_double(value).map(AssertionObject::Double),
        DataType::Date => parse_date(value).map(AssertionObject::Date),
    }
}

fn parse_boolean(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "是" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "否" => Some(false),
        _ => None,
    }
}

/// 整数；接受小数部分为 0 的浮点写法（`12.0`）
fn parse_integer(value: &str) -> Option<i64> {
    if let Ok(i) = value.parse::<i64>() {
        return Some(i);
    }
    let d = parse_double(value)?;
    if d.fract() == 0.0 && d >= i64::MIN as f64 && d <= i64::MAX as f64 {
        Some(d as i64)
    } else {
        None
    }
}

fn parse_double(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|d| d.is_finite())
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_variants() {
        assert_eq!(coerce_literal(DataType::Boolean, " Yes "), Some(AssertionObject::Boolean(true)));
        assert_eq!(coerce_literal(DataType::Boolean, "否"), Some(AssertionObject::Boolean(false)));
        assert_eq!(coerce_literal(DataType::Boolean, "maybe"), None);
    }

    #[test]
    fn test_numeric() {
        assert_eq!(coerce_literal(DataType::Integer, "12.0"), Some(AssertionObject::Integer(12)));
        assert_eq!(coerce_literal(DataType::Integer, "12.5"), None);
        assert_eq!(coerce_literal(DataType::Double, "-0.25"), Some(AssertionObject::Double(-0.25)));
        assert_eq!(coerce_literal(DataType::Double, "about 3 cm"), None);
        assert_eq!(coerce_literal(DataType::Double, "NaN"), None);
    }

    #[test]
    fn test_dates() {
        let expected = NaiveDate::from_ymd_opt(2019, 7, 14).map(AssertionObject::Date);
        assert_eq!(coerce_literal(DataType::Date, "2019-07-14"), expected);
        assert_eq!(coerce_literal(DataType::Date, "14/07/2019"), expected);
        assert_eq!(coerce_literal(DataType::Date, "20190714"), expected);
        assert_eq!(coerce_literal(DataType::Date, "2019-07-14 10:30:00"), expected);
        assert_eq!(coerce_literal(DataType::Date, "summer 2019"), None);
    }

    #[test]
    fn test_blank_and_id() {
        assert_eq!(coerce_literal(DataType::String, "   "), None);
        assert_eq!(coerce_literal(DataType::Id, "Mordor"), None);
    }
}
