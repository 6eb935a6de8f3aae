// ==========================================
// 考古数据导入 ETL - 标签清洗器
// ==========================================
// 职责: 原始单元格值 → 匹配用标签 / slug / URI / 姓名首字母
// 规则: TRIM + 合并空白 / 去除表格整数浮点尾巴 / 前缀只加一次
// ==========================================

use crate::domain::{Field, ItemType};

pub struct LabelCleaner;

impl LabelCleaner {
    /// TRIM + 合并内部连续空白；空值返回 None
    pub fn normalize_text(&self, raw: &str) -> Option<String> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed)
        }
    }

    /// 表格软件把整数存成浮点：`12.0` → `12`
    pub fn strip_float_artifact(&self, value: &str) -> String {
        if let Some((int_part, frac)) = value.split_once('.') {
            let digits = int_part.strip_prefix('-').unwrap_or(int_part);
            if !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
                && !frac.is_empty()
                && frac.chars().all(|c| c == '0')
            {
                return int_part.to_string();
            }
        }
        value.to_string()
    }

    /// 加前缀（已带前缀时不重复）
    pub fn apply_prefix(&self, prefix: Option<&str>, label: &str) -> String {
        match prefix.map(str::trim).filter(|p| !p.is_empty()) {
            Some(p) if !label.starts_with(p) => format!("{}{}", p, label),
            _ => label.to_string(),
        }
    }

    /// 字段单元格 → 匹配用标签
    pub fn entity_label(&self, field: &Field, raw: &str) -> Option<String> {
        let text = self.normalize_text(raw)?;
        let text = if field.is_entity_field() {
            self.strip_float_artifact(&text)
        } else {
            text
        };
        if field.item_type == ItemType::Uri {
            return self.canonical_uri(&text);
        }
        Some(self.apply_prefix(field.label_prefix.as_deref(), &text))
    }

    /// URI 规范化：去协议头、去尾斜杠、主机名小写
    pub fn canonical_uri(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let lower = trimmed.to_ascii_lowercase();
        let rest = if lower.starts_with("https://") {
            &trimmed[8..]
        } else if lower.starts_with("http://") {
            &trimmed[7..]
        } else {
            trimmed
        };
        let rest = rest.trim_end_matches('/');
        if rest.is_empty() {
            return None;
        }
        let (host, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        Some(format!("{}{}", host.to_lowercase(), path))
    }

    /// 是否形如 URI（带协议头）
    pub fn looks_like_uri(&self, raw: &str) -> bool {
        let lower = raw.trim().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// 标签 → slug（小写、非字母数字折叠为 `-`）
    pub fn slugify(&self, label: &str) -> String {
        let mut slug = String::with_capacity(label.len());
        let mut pending_dash = false;
        for c in label.chars() {
            if c.is_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.extend(c.to_lowercase());
            } else {
                pending_dash = true;
            }
        }
        slug
    }

    /// 姓名 → 合并形式（`Smith, John` → `John Smith`）
    pub fn combined_name(&self, name: &str) -> Option<String> {
        let name = self.normalize_text(name)?;
        match name.split_once(',') {
            Some((last, first)) if !first.trim().is_empty() && !last.trim().is_empty() => {
                Some(format!("{} {}", first.trim(), last.trim()))
            }
            _ => Some(name),
        }
    }

    /// 姓名 → 首字母（`John Smith` → `JS`）
    pub fn initials(&self, name: &str) -> Option<String> {
        let combined = self.combined_name(name)?;
        let initials: String = combined
            .split(|c: char| c.is_whitespace() || c == '.' || c == '-')
            .filter_map(|token| token.chars().find(|c| c.is_alphabetic()))
            .flat_map(|c| c.to_uppercase())
            .collect();
        if initials.is_empty() {
            None
        } else {
            Some(initials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DataType;

    #[test]
    fn test_normalize_and_float_artifact() {
        let cleaner = LabelCleaner;
        assert_eq!(cleaner.normalize_text("  Locus \t 12  "), Some("Locus 12".to_string()));
        assert_eq!(cleaner.normalize_text("   "), None);
        assert_eq!(cleaner.strip_float_artifact("12.0"), "12");
        assert_eq!(cleaner.strip_float_artifact("-3.00"), "-3");
        assert_eq!(cleaner.strip_float_artifact("12.5"), "12.5");
        assert_eq!(cleaner.strip_float_artifact("v.0"), "v.0");
    }

    #[test]
    fn test_entity_label_prefix_once() {
        let cleaner = LabelCleaner;
        let mut field = Field::new("s1", 2, "Locus", ItemType::Subjects, DataType::Id);
        field.label_prefix = Some("Locus ".to_string());

        assert_eq!(cleaner.entity_label(&field, "12.0"), Some("Locus 12".to_string()));
        assert_eq!(cleaner.entity_label(&field, "Locus 12"), Some("Locus 12".to_string()));
        assert_eq!(cleaner.entity_label(&field, " "), None);

        let notes = Field::new("s1", 3, "Notes", ItemType::Literal, DataType::String);
        assert_eq!(cleaner.entity_label(&notes, "12.0"), Some("12.0".to_string()));
    }

    #[test]
    fn test_canonical_uri() {
        let cleaner = LabelCleaner;
        assert_eq!(
            cleaner.canonical_uri("HTTPS://Vocab.Example.org/Pottery/"),
            Some("vocab.example.org/Pottery".to_string())
        );
        assert_eq!(
            cleaner.canonical_uri("vocab.example.org/Pottery"),
            Some("vocab.example.org/Pottery".to_string())
        );
        assert_eq!(cleaner.canonical_uri("http://"), None);
    }

    #[test]
    fn test_slug_and_person_names() {
        let cleaner = LabelCleaner;
        assert_eq!(cleaner.slugify("Barad-dûr (Tower)"), "barad-dûr-tower");
        assert_eq!(cleaner.slugify("  Trench 4B "), "trench-4b");

        assert_eq!(cleaner.combined_name("Smith, John"), Some("John Smith".to_string()));
        assert_eq!(cleaner.initials("John Smith"), Some("JS".to_string()));
        assert_eq!(cleaner.initials("Smith, Jane"), Some("JS".to_string()));
        assert_eq!(cleaner.initials("J.-P. Sartre"), Some("JPS".to_string()));
    }
}
