//! Similarity scoring between two values of the same kind, in `[0.0, 1.0]`.
//!
//! Exact comparison is built in. Fuzzy comparison dispatches through a
//! [`SimilarityRegistry`] keyed by [`ValueKind`]; the default registry knows
//! text (edit distance or name tokens) and dates (linear decay window).

use chrono::{NaiveDate, NaiveDateTime};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::MatchError;
use crate::model::{Value, ValueKind};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Width, in days, of the linear decay applied to fuzzy date comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow(u32);

impl DateWindow {
    pub const DEFAULT_DAYS: u32 = 30;

    pub fn new(days: i64) -> Result<Self, MatchError> {
        if days <= 0 || days > u32::MAX as i64 {
            return Err(MatchError::InvalidArgument(format!(
                "days_scale must be a positive whole number, got {days}"
            )));
        }
        Ok(Self(days as u32))
    }

    /// Parse a window from an untyped config value; anything but an integer is rejected.
    pub fn from_toml(value: &toml::Value) -> Result<Self, MatchError> {
        match value {
            toml::Value::Integer(days) => Self::new(*days),
            other => Err(MatchError::InvalidArgument(format!(
                "days_scale must be a whole number, got {other}"
            ))),
        }
    }

    pub fn days(&self) -> u32 {
        self.0
    }
}

impl Default for DateWindow {
    fn default() -> Self {
        Self(Self::DEFAULT_DAYS)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMode {
    /// Normalized edit distance over the whole string.
    #[default]
    Raw,
    /// Token cross-product, order-insensitive ("Last, First" vs "First Last").
    Name,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompareOptions {
    pub days_scale: DateWindow,
    pub comparison: StringMode,
}

impl CompareOptions {
    pub fn names() -> Self {
        Self {
            comparison: StringMode::Name,
            ..Self::default()
        }
    }

    pub fn days(window: DateWindow) -> Self {
        Self {
            days_scale: window,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Case-insensitive edit-distance similarity.
///
/// 1.0 for distance 0, 0.0 once the distance exceeds the average length,
/// linear in between.
pub fn raw_similarity(a: &str, b: &str) -> f64 {
    let distance = strsim::levenshtein(&a.to_lowercase(), &b.to_lowercase());
    if distance == 0 {
        return 1.0;
    }

    let avg_len = (a.chars().count() + b.chars().count()) as f64 / 2.0;
    let distance = distance as f64;
    if distance > avg_len {
        return 0.0;
    }
    (avg_len - distance) / avg_len
}

/// Split a name into tokens: commas act as spaces, periods are dropped,
/// single-character tokens (initials, dashes) are discarded.
pub fn tokenize(s: &str) -> Vec<String> {
    s.replace(',', " ")
        .replace('.', "")
        .split_whitespace()
        .filter(|t| t.chars().count() != 1)
        .map(str::to_string)
        .collect()
}

/// Sum of pairwise raw similarities across both token lists, divided by the
/// average token count and capped at 1.0.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let left = tokenize(a);
    let right = tokenize(b);
    let avg_tokens = (left.len() + right.len()) as f64 / 2.0;
    if avg_tokens == 0.0 {
        return 0.0;
    }

    let total: f64 = left
        .iter()
        .flat_map(|l| right.iter().map(move |r| raw_similarity(l, r)))
        .sum();

    (total / avg_tokens).min(1.0)
}

pub fn string_similarity(a: &str, b: &str, mode: StringMode) -> f64 {
    match mode {
        StringMode::Raw => raw_similarity(a, b),
        StringMode::Name => name_similarity(a, b),
    }
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// `max(0, (W - |Δ|) / W)` with `Δ` in days.
pub fn decay(delta_days: f64, window: DateWindow) -> f64 {
    let scale = window.days() as f64;
    let delta = delta_days.abs();
    if delta < scale {
        (scale - delta) / scale
    } else {
        0.0
    }
}

pub fn date_similarity(a: NaiveDate, b: NaiveDate, window: DateWindow) -> f64 {
    decay((a - b).num_days() as f64, window)
}

/// Datetimes decay on the fractional day delta.
pub fn datetime_similarity(a: NaiveDateTime, b: NaiveDateTime, window: DateWindow) -> f64 {
    decay((a - b).num_seconds() as f64 / 86_400.0, window)
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type FuzzyComparator =
    Box<dyn Fn(&Value, &Value, &CompareOptions) -> Result<f64, MatchError> + Send + Sync>;

/// Fuzzy comparators keyed by value kind.
pub struct SimilarityRegistry {
    comparators: FxHashMap<ValueKind, FuzzyComparator>,
}

impl SimilarityRegistry {
    /// A registry with no fuzzy comparators at all.
    pub fn empty() -> Self {
        Self {
            comparators: FxHashMap::default(),
        }
    }

    /// Add or replace the fuzzy comparator for `kind`. The comparator is only
    /// ever called with two values of that kind.
    pub fn register<F>(&mut self, kind: ValueKind, comparator: F)
    where
        F: Fn(&Value, &Value, &CompareOptions) -> Result<f64, MatchError> + Send + Sync + 'static,
    {
        self.comparators.insert(kind, Box::new(comparator));
    }

    pub fn supports(&self, kind: ValueKind) -> bool {
        self.comparators.contains_key(&kind)
    }

    /// Score two optional values.
    ///
    /// Absent on either side scores 0.0 before anything else is checked.
    /// `fuzzy = None` is exact equality.
    pub fn compare(
        &self,
        left: Option<&Value>,
        right: Option<&Value>,
        fuzzy: Option<&CompareOptions>,
    ) -> Result<f64, MatchError> {
        let (left, right) = match (left, right) {
            (Some(l), Some(r)) => (l, r),
            _ => return Ok(0.0),
        };

        if left.kind() != right.kind() {
            return Err(MatchError::TypeMismatch {
                left: left.kind(),
                right: right.kind(),
            });
        }

        match fuzzy {
            None => Ok(if left == right { 1.0 } else { 0.0 }),
            Some(options) => {
                let comparator = self
                    .comparators
                    .get(&left.kind())
                    .ok_or(MatchError::UnsupportedType(left.kind()))?;
                comparator(left, right, options)
            }
        }
    }
}

impl Default for SimilarityRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(ValueKind::Text, |l, r, opts| match (l, r) {
            (Value::Text(a), Value::Text(b)) => Ok(string_similarity(a, b, opts.comparison)),
            _ => Err(mismatch(l, r)),
        });
        registry.register(ValueKind::Date, |l, r, opts| match (l, r) {
            (Value::Date(a), Value::Date(b)) => Ok(date_similarity(*a, *b, opts.days_scale)),
            _ => Err(mismatch(l, r)),
        });
        registry.register(ValueKind::DateTime, |l, r, opts| match (l, r) {
            (Value::DateTime(a), Value::DateTime(b)) => {
                Ok(datetime_similarity(*a, *b, opts.days_scale))
            }
            _ => Err(mismatch(l, r)),
        });
        registry
    }
}

impl std::fmt::Debug for SimilarityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.comparators.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        f.debug_struct("SimilarityRegistry").field("kinds", &kinds).finish()
    }
}

fn mismatch(l: &Value, r: &Value) -> MatchError {
    MatchError::TypeMismatch {
        left: l.kind(),
        right: r.kind(),
    }
}
