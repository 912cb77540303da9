//! Child grade computation
//!
//! Grades advance with the April-March fiscal year: a child's grade in
//! fiscal year `fy` is `base_grade + (fy - base_fiscal_year)`. Grades 0
//! and below are preschool classes, 1-6 elementary, 7-9 junior high,
//! 10-12 high school.

use crate::config::{GradeSettings, SharedGroup};
use std::collections::BTreeSet;

/// Display label and optional emoji for a grade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradeInfo {
    pub label: String,
    pub emoji: Option<String>,
}

/// Folder name and display label for a set of children
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFolder {
    pub folder_name: String,
    pub label: String,
}

pub struct GradeBook {
    settings: GradeSettings,
}

impl GradeBook {
    pub fn new(settings: GradeSettings) -> Self {
        Self { settings }
    }

    /// Grade of `child` in `fiscal_year`; `None` for an unknown child
    pub fn current_grade(&self, child: &str, fiscal_year: i32) -> Option<i32> {
        self.settings
            .children
            .iter()
            .find(|c| c.name == child)
            .map(|c| c.base_grade + (fiscal_year - self.settings.base_fiscal_year))
    }

    /// Unknown children are never graduated
    pub fn is_graduated(&self, child: &str, fiscal_year: i32) -> bool {
        self.current_grade(child, fiscal_year)
            .is_some_and(|g| g > self.settings.graduation_grade)
    }

    pub fn grade_info(&self, grade: i32) -> Option<GradeInfo> {
        if let Some(class) = self
            .settings
            .preschool_classes
            .iter()
            .find(|p| p.grade == grade)
        {
            return Some(GradeInfo {
                label: class.name.clone(),
                emoji: Some(class.emoji.clone()).filter(|e| !e.is_empty()),
            });
        }
        let label = match grade {
            1..=6 => format!("小{}", grade),
            7..=9 => format!("中{}", grade - 6),
            10..=12 => format!("高{}", grade - 9),
            _ => return None,
        };
        Some(GradeInfo { label, emoji: None })
    }

    /// Does `text` mention `grade`?
    fn matches_grade(&self, text: &str, grade: i32) -> bool {
        if (1..=6).contains(&grade)
            && (text.contains(&format!("小{}", grade)) || text.contains(&format!("{}年生", grade)))
        {
            return true;
        }
        self.settings
            .preschool_classes
            .iter()
            .any(|p| p.grade == grade && text.contains(&p.name))
    }

    /// Children targeted by a free-text grade/class mention
    ///
    /// Individual grade matches win; otherwise the first shared group
    /// whose classroom name appears in the text.
    pub fn identify_children(&self, grade_class: &str, fiscal_year: i32) -> Vec<String> {
        let text = grade_class.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let matched: Vec<String> = self
            .settings
            .children
            .iter()
            .filter(|c| {
                self.current_grade(&c.name, fiscal_year)
                    .is_some_and(|g| self.matches_grade(text, g))
            })
            .map(|c| c.name.clone())
            .collect();
        if !matched.is_empty() {
            return matched;
        }

        self.settings
            .shared_groups
            .iter()
            .find(|g| !g.class_name.is_empty() && text.contains(&g.class_name))
            .map(|g| g.children.clone())
            .unwrap_or_default()
    }

    /// Shared group whose membership equals `children` as a set
    pub fn shared_group_for(&self, children: &[String]) -> Option<&SharedGroup> {
        let wanted: BTreeSet<&str> = children.iter().map(String::as_str).collect();
        self.settings.shared_groups.iter().find(|g| {
            let members: BTreeSet<&str> = g.children.iter().map(String::as_str).collect();
            members == wanted
        })
    }

    /// Folder for a set of children: the matching shared group, or the
    /// single child's own folder. Several children without a group get none.
    pub fn resolve_folder(&self, children: &[String]) -> Option<ResolvedFolder> {
        match children {
            [] => None,
            [only] => match self.shared_group_for(children) {
                Some(group) => Some(group_folder(group)),
                None => Some(ResolvedFolder {
                    folder_name: only.clone(),
                    label: only.clone(),
                }),
            },
            _ => self.shared_group_for(children).map(group_folder),
        }
    }
}

fn group_folder(group: &SharedGroup) -> ResolvedFolder {
    ResolvedFolder {
        folder_name: group.folder_name.clone(),
        label: group.label.clone(),
    }
}
