use std::fmt;

use crate::error::MatchError;
use crate::model::{Attribute, Record};
use crate::similarity::CompareOptions;

// ---------------------------------------------------------------------------
// Attribute pairs
// ---------------------------------------------------------------------------

/// One attribute from the left record compared with one from the right.
///
/// Used as a join rule (drives candidate lookup) or a compare rule (score only).
#[derive(Debug, Clone, PartialEq)]
pub struct AttributePair<L, R> {
    left_attr: L,
    right_attr: R,
    weight: f64,
    is_fuzzy: bool,
    options: CompareOptions,
}

impl<L, R> AttributePair<L, R> {
    /// Exact-comparison pair. Fails unless `weight > 0`.
    pub fn new(left_attr: L, right_attr: R, weight: f64) -> Result<Self, MatchError> {
        if !(weight > 0.0) || !weight.is_finite() {
            return Err(MatchError::InvalidConfig(format!(
                "weight must be > 0.0, got {weight}"
            )));
        }
        Ok(Self {
            left_attr,
            right_attr,
            weight,
            is_fuzzy: false,
            options: CompareOptions::default(),
        })
    }

    pub fn fuzzy(
        left_attr: L,
        right_attr: R,
        weight: f64,
        options: CompareOptions,
    ) -> Result<Self, MatchError> {
        let mut pair = Self::new(left_attr, right_attr, weight)?;
        pair.is_fuzzy = true;
        pair.options = options;
        Ok(pair)
    }

    pub fn left_attr(&self) -> &L {
        &self.left_attr
    }

    pub fn right_attr(&self) -> &R {
        &self.right_attr
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_fuzzy(&self) -> bool {
        self.is_fuzzy
    }

    /// Options to pass to the similarity registry, `None` for exact comparison.
    pub fn compare_options(&self) -> Option<&CompareOptions> {
        self.is_fuzzy.then_some(&self.options)
    }
}

// ---------------------------------------------------------------------------
// Rule set
// ---------------------------------------------------------------------------

pub type ScoreFn<L, R> = Box<dyn Fn(&L, &R) -> f64>;
pub type FilterFn<L, R> = Box<dyn Fn(&L, &R) -> bool>;

pub const DEFAULT_MIN_SCORE: f64 = 1.0;

/// Matching rules between a left record type and a right record type.
pub struct RuleSet<L: Record, R: Record> {
    join_pairs: Vec<AttributePair<L::Attr, R::Attr>>,
    compare_pairs: Vec<AttributePair<L::Attr, R::Attr>>,
    custom_functions: Vec<ScoreFn<L, R>>,
    filter_functions: Vec<FilterFn<L, R>>,
    min_score: f64,
}

impl<L: Record, R: Record> RuleSet<L, R> {
    pub fn new() -> Self {
        Self {
            join_pairs: Vec::new(),
            compare_pairs: Vec::new(),
            custom_functions: Vec::new(),
            filter_functions: Vec::new(),
            min_score: DEFAULT_MIN_SCORE,
        }
    }

    /// Attributes must be equal. Join rules select candidates and add to the score.
    pub fn join(
        &mut self,
        left_attr: L::Attr,
        right_attr: R::Attr,
        weight: f64,
    ) -> Result<&mut Self, MatchError> {
        self.join_pairs
            .push(AttributePair::new(left_attr, right_attr, weight)?);
        Ok(self)
    }

    /// Exact comparison that only adjusts the score of joined candidates.
    pub fn compare(
        &mut self,
        left_attr: L::Attr,
        right_attr: R::Attr,
        weight: f64,
    ) -> Result<&mut Self, MatchError> {
        self.compare_pairs
            .push(AttributePair::new(left_attr, right_attr, weight)?);
        Ok(self)
    }

    pub fn compare_fuzzy(
        &mut self,
        left_attr: L::Attr,
        right_attr: R::Attr,
        weight: f64,
        options: CompareOptions,
    ) -> Result<&mut Self, MatchError> {
        self.compare_pairs
            .push(AttributePair::fuzzy(left_attr, right_attr, weight, options)?);
        Ok(self)
    }

    /// Arbitrary score contribution beyond attribute comparisons.
    pub fn custom<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&L, &R) -> f64 + 'static,
    {
        self.custom_functions.push(Box::new(f));
        self
    }

    /// Veto predicate: returning `false` forces the pair's score to 0.
    pub fn filter<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&L, &R) -> bool + 'static,
    {
        self.filter_functions.push(Box::new(f));
        self
    }

    pub fn set_min_score(&mut self, min_score: f64) -> &mut Self {
        self.min_score = min_score;
        self
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    pub fn join_pairs(&self) -> &[AttributePair<L::Attr, R::Attr>] {
        &self.join_pairs
    }

    pub fn compare_pairs(&self) -> &[AttributePair<L::Attr, R::Attr>] {
        &self.compare_pairs
    }

    pub fn custom_functions(&self) -> &[ScoreFn<L, R>] {
        &self.custom_functions
    }

    pub fn filter_functions(&self) -> &[FilterFn<L, R>] {
        &self.filter_functions
    }
}

impl<L: Record, R: Record> Default for RuleSet<L, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Record, R: Record> fmt::Debug for RuleSet<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleSet")
            .field("join_pairs", &self.join_pairs)
            .field("compare_pairs", &self.compare_pairs)
            .field("custom_functions", &self.custom_functions.len())
            .field("filter_functions", &self.filter_functions.len())
            .field("min_score", &self.min_score)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dedup criteria
// ---------------------------------------------------------------------------

/// Ordered attribute groups. Records match when they agree on every non-nil
/// attribute of some group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criteria<A> {
    groups: Vec<Vec<A>>,
}

impl<A: Attribute> Criteria<A> {
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn match_attr(&mut self, attr: A) -> &mut Self {
        self.groups.push(vec![attr]);
        self
    }

    /// Append one group. Repeated attributes within the group are dropped.
    pub fn match_attrs<I>(&mut self, attrs: I) -> Result<&mut Self, MatchError>
    where
        I: IntoIterator<Item = A>,
    {
        let mut group: Vec<A> = Vec::new();
        for attr in attrs {
            if !group.contains(&attr) {
                group.push(attr);
            }
        }
        if group.is_empty() {
            return Err(MatchError::InvalidConfig(
                "criteria group must name at least one attribute".into(),
            ));
        }
        self.groups.push(group);
        Ok(self)
    }

    pub fn groups(&self) -> &[Vec<A>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Every attribute referenced by any group, first occurrence order.
    pub fn unique_attrs(&self) -> Vec<A> {
        let mut attrs: Vec<A> = Vec::new();
        for attr in self.groups.iter().flatten() {
            if !attrs.contains(attr) {
                attrs.push(attr.clone());
            }
        }
        attrs
    }
}

impl<A: Attribute> Default for Criteria<A> {
    fn default() -> Self {
        Self::new()
    }
}
