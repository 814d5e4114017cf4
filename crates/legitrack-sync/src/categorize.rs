use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use legitrack_core::Category;
use serde::Deserialize;

const BUILTIN_TABLE: &str = include_str!("../../../rules/categories.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryTable {
    pub version: u32,
    pub categories: Vec<CategoryRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRule {
    pub category: Category,
    pub keywords: Vec<String>,
}

impl CategoryTable {
    pub fn from_yaml(text: &str) -> Result<Self> {
        let table: CategoryTable = serde_yaml::from_str(text).context("parsing category table")?;
        let mut seen = HashSet::new();
        for rule in &table.categories {
            if rule.category == Category::Unclassified {
                bail!("category table must not declare `unclassified`; it is the fallback");
            }
            if !seen.insert(rule.category) {
                bail!("category {} declared twice", rule.category);
            }
            if rule.keywords.iter().all(|k| k.trim().is_empty()) {
                bail!("category {} has no keywords", rule.category);
            }
        }
        Ok(table)
    }
}

/// Keyword categorizer; the first declared category with a substring hit wins.
#[derive(Debug, Clone)]
pub struct Categorizer {
    version: u32,
    rules: Vec<(Category, Vec<String>)>,
}

impl Categorizer {
    pub fn new(table: CategoryTable) -> Self {
        let rules = table
            .categories
            .into_iter()
            .map(|rule| {
                let keywords = rule
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (rule.category, keywords)
            })
            .collect();
        Self {
            version: table.version,
            rules,
        }
    }

    pub fn builtin() -> Result<Self> {
        Ok(Self::new(CategoryTable::from_yaml(BUILTIN_TABLE)?))
    }

    /// Prefers `<root>/rules/categories.yaml`, falling back to the built-in table.
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("categories.yaml");
        if !path.exists() {
            return Self::builtin();
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let table = CategoryTable::from_yaml(&text).with_context(|| format!("loading {}", path.display()))?;
        Ok(Self::new(table))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn categorize(&self, title: &str, description: &str) -> Category {
        let haystack = format!("{title} {description}").to_lowercase();
        self.rules
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|(category, _)| *category)
            .unwrap_or(Category::Unclassified)
    }
}
