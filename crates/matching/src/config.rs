use std::path::PathBuf;

use serde::Deserialize;

use crate::error::MatchError;
use crate::model::Row;
use crate::rules::{Criteria, RuleSet, DEFAULT_MIN_SCORE};
use crate::similarity::{CompareOptions, DateWindow, StringMode};

// ---------------------------------------------------------------------------
// Match job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MatchConfig {
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub join: Vec<JoinConfig>,
    #[serde(default)]
    pub compare: Vec<CompareConfig>,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinConfig {
    pub left: String,
    pub right: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompareConfig {
    pub left: String,
    pub right: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub fuzzy: bool,
    #[serde(default)]
    pub comparison: StringMode,
    /// Kept untyped so a non-integer window surfaces as `InvalidArgument`.
    #[serde(default)]
    pub days_scale: Option<toml::Value>,
}

impl CompareConfig {
    pub fn options(&self) -> Result<CompareOptions, MatchError> {
        let days_scale = match &self.days_scale {
            Some(value) => DateWindow::from_toml(value)?,
            None => DateWindow::default(),
        };
        Ok(CompareOptions {
            days_scale,
            comparison: self.comparison,
        })
    }
}

fn default_min_score() -> f64 {
    DEFAULT_MIN_SCORE
}

fn default_weight() -> f64 {
    1.0
}

// ---------------------------------------------------------------------------
// Dedup job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    pub criteria: Vec<CriteriaEntry>,
    #[serde(default)]
    pub index: IndexConfig,
}

/// A criteria group: a bare attribute name or a list of names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CriteriaEntry {
    One(String),
    Many(Vec<String>),
}

// ---------------------------------------------------------------------------
// Index backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum IndexConfig {
    #[default]
    Memory,
    /// SQLite set table. No path means an in-memory database.
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl MatchConfig {
    pub fn from_toml(input: &str) -> Result<Self, MatchError> {
        let config: MatchConfig =
            toml::from_str(input).map_err(|e| MatchError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if !self.min_score.is_finite() {
            return Err(MatchError::InvalidConfig(format!(
                "min_score must be finite, got {}",
                self.min_score
            )));
        }

        if self.join.is_empty() {
            return Err(MatchError::InvalidConfig(
                "at least one [[join]] rule is required".into(),
            ));
        }

        for join in &self.join {
            check_weight(&join.left, &join.right, join.weight)?;
        }
        for compare in &self.compare {
            check_weight(&compare.left, &compare.right, compare.weight)?;
            compare.options()?;
        }

        Ok(())
    }

    /// Build the rule set these settings describe, over generic rows.
    pub fn rules(&self) -> Result<RuleSet<Row, Row>, MatchError> {
        let mut rules = RuleSet::new();
        for join in &self.join {
            rules.join(join.left.clone(), join.right.clone(), join.weight)?;
        }
        for compare in &self.compare {
            if compare.fuzzy {
                rules.compare_fuzzy(
                    compare.left.clone(),
                    compare.right.clone(),
                    compare.weight,
                    compare.options()?,
                )?;
            } else {
                rules.compare(compare.left.clone(), compare.right.clone(), compare.weight)?;
            }
        }
        rules.set_min_score(self.min_score);
        Ok(rules)
    }
}

fn check_weight(left: &str, right: &str, weight: f64) -> Result<(), MatchError> {
    if !(weight > 0.0) || !weight.is_finite() {
        return Err(MatchError::InvalidConfig(format!(
            "rule '{left}' -> '{right}': weight must be > 0.0, got {weight}"
        )));
    }
    Ok(())
}

impl DedupConfig {
    pub fn from_toml(input: &str) -> Result<Self, MatchError> {
        let config: DedupConfig =
            toml::from_str(input).map_err(|e| MatchError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if self.criteria.is_empty() {
            return Err(MatchError::InvalidConfig(
                "at least one criteria group is required".into(),
            ));
        }
        for (i, entry) in self.criteria.iter().enumerate() {
            if let CriteriaEntry::Many(names) = entry {
                if names.is_empty() {
                    return Err(MatchError::InvalidConfig(format!(
                        "criteria group {i} is empty"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn criteria(&self) -> Result<Criteria<String>, MatchError> {
        let mut criteria = Criteria::new();
        for entry in &self.criteria {
            match entry {
                CriteriaEntry::One(name) => {
                    criteria.match_attr(name.clone());
                }
                CriteriaEntry::Many(names) => {
                    criteria.match_attrs(names.iter().cloned())?;
                }
            }
        }
        Ok(criteria)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
