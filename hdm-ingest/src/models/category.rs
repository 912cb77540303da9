//! Document categories and sub-categories
//!
//! The classification model answers with label strings such as
//! `40_子供・教育`. They are parsed once into closed enums so every
//! routing decision downstream is an exhaustive `match`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Top-level document category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    MoneyTax,
    ProjectAsset,
    LifeAdmin,
    ChildrenEducation,
    PhotoOther,
    HealthMedical,
    Library,
    Archive,
    /// Model output outside the fixed set
    Unrecognized,
}

impl Category {
    /// Every recognised category, in label order
    pub const ALL: [Category; 8] = [
        Category::MoneyTax,
        Category::ProjectAsset,
        Category::LifeAdmin,
        Category::ChildrenEducation,
        Category::PhotoOther,
        Category::HealthMedical,
        Category::Library,
        Category::Archive,
    ];

    /// Categories offered to the classification model
    pub const PROMPTED: [Category; 7] = [
        Category::MoneyTax,
        Category::ProjectAsset,
        Category::LifeAdmin,
        Category::ChildrenEducation,
        Category::PhotoOther,
        Category::HealthMedical,
        Category::Library,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::MoneyTax => "10_マネー・税務",
            Category::ProjectAsset => "20_プロジェクト・資産",
            Category::LifeAdmin => "30_ライフ・行政",
            Category::ChildrenEducation => "40_子供・教育",
            Category::PhotoOther => "50_写真・その他",
            Category::HealthMedical => "60_ヘルス・医療",
            Category::Library => "90_ライブラリ",
            Category::Archive => "99_転送済みアーカイブ",
            Category::Unrecognized => "unrecognized",
        }
    }

    /// Two-digit code that prefixes the label
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Category::Unrecognized => None,
            other => Some(&other.label()[..2]),
        }
    }

    /// Parse a model answer: exact label, or a bare/prefixed two-digit code
    pub fn parse(s: &str) -> Category {
        let s = s.trim();
        if let Some(found) = Category::ALL.iter().find(|c| c.label() == s) {
            return *found;
        }
        let code = s.split('_').next().unwrap_or_default();
        Category::ALL
            .iter()
            .find(|c| c.code() == Some(code))
            .copied()
            .unwrap_or(Category::Unrecognized)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Category::Unrecognized)
    }

    /// Key used to name accumulated documents; `None` for categories never synced
    pub fn notebook_key(&self) -> Option<&'static str> {
        match self {
            Category::MoneyTax => Some("money"),
            Category::ProjectAsset => Some("assets"),
            Category::LifeAdmin => Some("life"),
            Category::ChildrenEducation => Some("children"),
            Category::HealthMedical => Some("medical"),
            Category::Library => Some("library"),
            Category::PhotoOther | Category::Archive | Category::Unrecognized => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Category::parse(&raw))
    }
}

/// Sub-category inside children/education
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SubCategory {
    /// Notices and schedules (default folder)
    #[default]
    Notices,
    /// Submissions, procedures, important papers
    Submissions,
    /// Records, artwork, grades
    Records,
}

impl SubCategory {
    pub const ALL: [SubCategory; 3] = [
        SubCategory::Notices,
        SubCategory::Submissions,
        SubCategory::Records,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SubCategory::Notices => "01_お便り・スケジュール",
            SubCategory::Submissions => "02_提出・手続き・重要",
            SubCategory::Records => "03_記録・作品・成績",
        }
    }

    /// Exact label or two-digit code; anything else is `None`
    pub fn parse(s: &str) -> Option<SubCategory> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let code = s.split('_').next().unwrap_or_default();
        SubCategory::ALL
            .iter()
            .find(|c| c.label() == s || &c.label()[..2] == code)
            .copied()
    }
}

impl fmt::Display for SubCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for SubCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for SubCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SubCategory::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown sub-category: {}", raw)))
    }
}

/// Where a record with an unrecognised category is filed
///
/// TOML: `unknown_category_fallback = "photo"` or
/// `unknown_category_fallback = { folder = "<folder id>" }`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// The photo/other container
    #[default]
    Photo,
    /// An explicitly configured container
    Folder(String),
}
