use std::borrow::Cow;
use std::collections::BTreeMap;

use log::{debug, info, trace};
use once_cell::unsync::OnceCell;
use rustc_hash::FxHashSet;

use crate::error::MatchError;
use crate::index::{AttributeIndex, HashIndex};
use crate::model::{Match, MatchReport, MatchSummary, RankedMatch, Record, RecordId, RunMeta};
use crate::rules::RuleSet;
use crate::similarity::SimilarityRegistry;
use crate::store::Store;

type RightAttr<R> = <<R as Store>::Record as Record>::Attr;

const PROGRESS_EVERY: usize = 100;

/// Two-sided matcher producing a 1:1 assignment between left and right records.
///
/// Right records are indexed on their join attributes. Each left record is
/// scored against the candidates its join values retrieve and claims the best
/// free right record, or displaces a weaker claim. Displaced left records are
/// re-evaluated until no displacements remain.
pub struct Matcher<L: Store, R: Store> {
    left_store: Option<L>,
    right_store: Option<R>,
    rules: RuleSet<L::Record, R::Record>,
    similarity: SimilarityRegistry,
    right_index: Box<dyn AttributeIndex<RightAttr<R>>>,
    assignment: Assignment,
    left_matches: BTreeMap<RecordId, Match>,
    left_count: usize,
    right_count: usize,
    passes: usize,
    left_exceptions: OnceCell<Vec<RecordId>>,
    right_exceptions: OnceCell<Vec<RecordId>>,
}

impl<L, R> Matcher<L, R>
where
    L: Store,
    R: Store,
    RightAttr<R>: 'static,
{
    pub fn new(rules: RuleSet<L::Record, R::Record>) -> Self {
        Self {
            left_store: None,
            right_store: None,
            rules,
            similarity: SimilarityRegistry::default(),
            right_index: Box::new(HashIndex::new()),
            assignment: Assignment::default(),
            left_matches: BTreeMap::new(),
            left_count: 0,
            right_count: 0,
            passes: 0,
            left_exceptions: OnceCell::new(),
            right_exceptions: OnceCell::new(),
        }
    }

    pub fn with_left_store(mut self, store: L) -> Self {
        self.left_store = Some(store);
        self
    }

    pub fn with_right_store(mut self, store: R) -> Self {
        self.right_store = Some(store);
        self
    }

    /// Replace the in-memory index with another backend.
    pub fn with_index(mut self, index: Box<dyn AttributeIndex<RightAttr<R>>>) -> Self {
        self.right_index = index;
        self
    }

    pub fn with_similarity(mut self, similarity: SimilarityRegistry) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn rules(&self) -> &RuleSet<L::Record, R::Record> {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut RuleSet<L::Record, R::Record> {
        &mut self.rules
    }

    pub fn set_min_score(&mut self, min_score: f64) {
        self.rules.set_min_score(min_score);
    }

    pub fn min_score(&self) -> f64 {
        self.rules.min_score()
    }

    pub fn similarity(&self) -> &SimilarityRegistry {
        &self.similarity
    }

    pub fn left_store(&self) -> Option<&L> {
        self.left_store.as_ref()
    }

    pub fn right_store(&self) -> Option<&R> {
        self.right_store.as_ref()
    }

    pub fn right_index(&self) -> &dyn AttributeIndex<RightAttr<R>> {
        self.right_index.as_ref()
    }

    // -----------------------------------------------------------------------
    // Scoring
    // -----------------------------------------------------------------------

    /// Weighted score of one pair under the current rules.
    pub fn score_pair(&self, left: &L::Record, right: &R::Record) -> Result<f64, MatchError> {
        score_pair(&self.rules, &self.similarity, left, right)
    }

    /// Index every right record on each join rule's right attribute.
    pub fn index_right_objects(&mut self) -> Result<(), MatchError> {
        let right_store = self.right_store.as_ref().ok_or_else(missing_stores)?;
        self.right_count = index_right(&self.rules, right_store, self.right_index.as_mut())?;
        Ok(())
    }

    /// Right records sharing at least one join value with `left`. No scoring.
    pub fn find_potential_matches(
        &self,
        left: &L::Record,
    ) -> Result<Vec<(RecordId, Cow<'_, R::Record>)>, MatchError> {
        self.scorer()?.find_potential_matches(left)
    }

    /// Candidates scoring at least `min_score`, best first.
    pub fn find_matches(&self, left: &L::Record) -> Result<Vec<RankedMatch>, MatchError> {
        self.scorer()?.find_matches(left)
    }

    /// Try to assign `left` to one of `ranked` (best first).
    pub fn pair_matches(&mut self, left: RecordId, ranked: &[RankedMatch]) {
        self.assignment.pair(left, ranked);
    }

    fn scorer(&self) -> Result<Scorer<'_, L, R>, MatchError> {
        let right_store = self.right_store.as_ref().ok_or_else(missing_stores)?;
        Ok(Scorer {
            rules: &self.rules,
            similarity: &self.similarity,
            index: self.right_index.as_ref(),
            right_store,
        })
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    pub fn run(&mut self) -> Result<(), MatchError> {
        self.run_with_progress(|_| {})
    }

    /// Match every left record. `progress` is called once per left record
    /// during the main pass.
    pub fn run_with_progress<F>(&mut self, mut progress: F) -> Result<(), MatchError>
    where
        F: FnMut(RecordId),
    {
        let (Some(left_store), Some(right_store)) = (self.left_store.as_ref(), self.right_store.as_ref())
        else {
            return Err(missing_stores());
        };

        self.assignment = Assignment::default();
        self.left_matches.clear();
        self.left_exceptions = OnceCell::new();
        self.right_exceptions = OnceCell::new();
        self.left_count = 0;
        self.right_count = 0;
        self.passes = 0;

        let right_count = index_right(&self.rules, right_store, self.right_index.as_mut())?;

        let scorer: Scorer<'_, L, R> = Scorer {
            rules: &self.rules,
            similarity: &self.similarity,
            index: self.right_index.as_ref(),
            right_store,
        };

        // Built locally so a failed run leaves the cleared state behind.
        let mut assignment = Assignment::default();
        let mut left_count = 0usize;
        left_store.for_each(&mut |left_id, left| {
            progress(left_id);
            left_count += 1;
            if left_count % PROGRESS_EVERY == 0 {
                debug!("matching left record {left_count} (id {left_id})");
            }
            let ranked = scorer.find_matches(left)?;
            assignment.pair(left_id, &ranked);
            Ok(())
        })?;

        // Each eviction strictly raises the score held by one right record, and
        // a right record can only be claimed by a finite set of left records.
        let max_passes = left_count.saturating_mul(right_count).saturating_add(1);
        let mut passes = 0usize;
        while !assignment.losers.is_empty() {
            passes += 1;
            if passes > max_passes {
                return Err(MatchError::Internal(format!(
                    "conflict resolution did not settle after {max_passes} passes"
                )));
            }
            let working = std::mem::take(&mut assignment.losers);
            debug!("re-evaluating {} displaced left records (pass {passes})", working.len());
            for left_id in working {
                let left = left_store.find(left_id)?;
                let ranked = scorer.find_matches(&left)?;
                assignment.pair(left_id, &ranked);
            }
        }

        self.left_matches = assignment
            .right_matches
            .values()
            .map(|m| (m.left, m.clone()))
            .collect();
        self.assignment = assignment;
        self.left_count = left_count;
        self.right_count = right_count;
        self.passes = passes;

        info!(
            "matched {} of {left_count} left records against {right_count} right records ({passes} re-evaluation passes)",
            self.left_matches.len()
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    /// Assignment keyed on right record.
    pub fn right_matches(&self) -> &BTreeMap<RecordId, Match> {
        &self.assignment.right_matches
    }

    /// Assignment keyed on left record; the inverse of [`Self::right_matches`].
    pub fn left_matches(&self) -> &BTreeMap<RecordId, Match> {
        &self.left_matches
    }

    pub fn matches(&self) -> impl Iterator<Item = &Match> {
        self.left_matches.values()
    }

    /// Loser re-evaluation passes taken by the last run.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Left records with no assignment, in store order. Cached until the next run.
    pub fn left_exceptions(&self) -> Result<&[RecordId], MatchError> {
        let store = self.left_store.as_ref().ok_or_else(missing_stores)?;
        self.left_exceptions
            .get_or_try_init(|| unmatched(store, &self.left_matches))
            .map(Vec::as_slice)
    }

    /// Right records with no assignment, in store order. Cached until the next run.
    pub fn right_exceptions(&self) -> Result<&[RecordId], MatchError> {
        let store = self.right_store.as_ref().ok_or_else(missing_stores)?;
        self.right_exceptions
            .get_or_try_init(|| unmatched(store, &self.assignment.right_matches))
            .map(Vec::as_slice)
    }

    pub fn report(&self) -> Result<MatchReport, MatchError> {
        let left_exceptions = self.left_exceptions()?.to_vec();
        let right_exceptions = self.right_exceptions()?.to_vec();
        Ok(MatchReport {
            meta: RunMeta::now(),
            summary: MatchSummary {
                left_records: self.left_count,
                right_records: self.right_count,
                matched: self.left_matches.len(),
                left_exceptions: left_exceptions.len(),
                right_exceptions: right_exceptions.len(),
                passes: self.passes,
            },
            matches: self.left_matches.values().cloned().collect(),
            left_exceptions,
            right_exceptions,
        })
    }
}

// ---------------------------------------------------------------------------
// Assignment state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Assignment {
    right_matches: BTreeMap<RecordId, Match>,
    losers: Vec<RecordId>,
}

impl Assignment {
    /// First free candidate wins. A taken candidate is won only with a strictly
    /// higher score, which queues the previous holder as a loser.
    fn pair(&mut self, left: RecordId, ranked: &[RankedMatch]) {
        for candidate in ranked {
            match self.right_matches.get_mut(&candidate.right) {
                Some(existing) => {
                    if candidate.score > existing.score {
                        trace!(
                            "left {left} displaces left {} on right {} ({} > {})",
                            existing.left,
                            candidate.right,
                            candidate.score,
                            existing.score
                        );
                        self.losers.push(existing.left);
                        *existing = Match {
                            left,
                            right: candidate.right,
                            score: candidate.score,
                        };
                        return;
                    }
                }
                None => {
                    self.right_matches.insert(
                        candidate.right,
                        Match {
                            left,
                            right: candidate.right,
                            score: candidate.score,
                        },
                    );
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate search + scoring
// ---------------------------------------------------------------------------

struct Scorer<'m, L: Store, R: Store> {
    rules: &'m RuleSet<L::Record, R::Record>,
    similarity: &'m SimilarityRegistry,
    index: &'m dyn AttributeIndex<RightAttr<R>>,
    right_store: &'m R,
}

impl<'m, L: Store, R: Store> Scorer<'m, L, R> {
    /// Union of the ids retrieved by each join rule, first-seen order. Any one
    /// shared join value nominates a candidate; scoring decides the rest.
    fn candidate_ids(&self, left: &L::Record) -> Result<Vec<RecordId>, MatchError> {
        let mut seen = FxHashSet::default();
        let mut ids = Vec::new();
        for pair in self.rules.join_pairs() {
            let Some(value) = left.value(pair.left_attr()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            if let Some(hits) = self.index.get(pair.right_attr(), &value)? {
                ids.extend(hits.into_iter().filter(|id| seen.insert(*id)));
            }
        }
        Ok(ids)
    }

    fn find_potential_matches(
        &self,
        left: &L::Record,
    ) -> Result<Vec<(RecordId, Cow<'m, R::Record>)>, MatchError> {
        self.candidate_ids(left)?
            .into_iter()
            .map(|id| Ok((id, self.right_store.find(id)?)))
            .collect()
    }

    fn find_matches(&self, left: &L::Record) -> Result<Vec<RankedMatch>, MatchError> {
        let min_score = self.rules.min_score();
        let mut ranked = Vec::new();
        for (right_id, right) in self.find_potential_matches(left)? {
            let score = score_pair(self.rules, self.similarity, left, &right)?;
            if score >= min_score {
                ranked.push(RankedMatch {
                    right: right_id,
                    score,
                });
            }
        }
        // Stable: equal scores keep candidate order.
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }
}

fn score_pair<L: Record, R: Record>(
    rules: &RuleSet<L, R>,
    similarity: &SimilarityRegistry,
    left: &L,
    right: &R,
) -> Result<f64, MatchError> {
    let mut score = 0.0;

    for pair in rules.join_pairs() {
        let l = left.value(pair.left_attr());
        let r = right.value(pair.right_attr());
        score += pair.weight() * similarity.compare(l.as_ref(), r.as_ref(), None)?;
    }

    for pair in rules.compare_pairs() {
        let l = left.value(pair.left_attr());
        let r = right.value(pair.right_attr());
        score += pair.weight() * similarity.compare(l.as_ref(), r.as_ref(), pair.compare_options())?;
    }

    for f in rules.custom_functions() {
        score += f(left, right);
    }

    if rules.filter_functions().iter().any(|f| !f(left, right)) {
        score = 0.0;
    }

    Ok(score)
}

fn index_right<L: Record, R: Store>(
    rules: &RuleSet<L, R::Record>,
    right_store: &R,
    index: &mut dyn AttributeIndex<<R::Record as Record>::Attr>,
) -> Result<usize, MatchError> {
    if rules.join_pairs().is_empty() {
        return Err(MatchError::InvalidConfig(
            "matcher requires at least one join pair to be defined".into(),
        ));
    }

    index.clear()?;
    let mut count = 0usize;
    right_store.for_each(&mut |id, right| {
        count += 1;
        for pair in rules.join_pairs() {
            index.put(pair.right_attr(), right.value(pair.right_attr()).as_ref(), id)?;
        }
        Ok(())
    })?;
    Ok(count)
}

fn unmatched<S: Store>(
    store: &S,
    matched: &BTreeMap<RecordId, Match>,
) -> Result<Vec<RecordId>, MatchError> {
    let mut ids = Vec::new();
    store.for_each(&mut |id, _| {
        if !matched.contains_key(&id) {
            ids.push(id);
        }
        Ok(())
    })?;
    Ok(ids)
}

fn missing_stores() -> MatchError {
    MatchError::InvalidConfig("matcher requires left_store and right_store".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Row, Value};
    use crate::similarity::CompareOptions;
    use crate::store::VecStore;
    use chrono::NaiveDate;

    type RowMatcher = Matcher<VecStore<Row>, VecStore<Row>>;

    fn txn(esn: &str, mid: &str, date: (i32, u32, u32)) -> Row {
        Row::new()
            .with("esn", esn)
            .with("mid", mid)
            .with("date", NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap())
    }

    // Match chart            esn   mid   date
    // left_a    right_b      X     X     X
    // left_a    right_a      X           X
    // left_b    right_c      X     X
    // left_c    right_d            X     (delta 1)
    fn lefts() -> Vec<Row> {
        vec![
            txn("11111111111", "7275551111", (2010, 6, 1)),
            txn("22222222222", "8135554444", (2010, 6, 1)),
            txn("33333333333", "7275551111", (2010, 6, 15)),
        ]
    }

    fn rights() -> Vec<Row> {
        vec![
            txn("11111111111", "2015559999", (2010, 6, 1)),
            txn("11111111111", "7275551111", (2010, 6, 1)),
            txn("22222222222", "8135554444", (2010, 6, 2)),
            txn("44444444444", "7275551111", (2010, 6, 14)),
        ]
    }

    const LEFT_A: usize = 0;
    const LEFT_B: usize = 1;
    const LEFT_C: usize = 2;
    const RIGHT_A: usize = 0;
    const RIGHT_B: usize = 1;
    const RIGHT_C: usize = 2;
    const RIGHT_D: usize = 3;

    fn s(name: &str) -> String {
        name.to_string()
    }

    fn matcher_with(rules: RuleSet<Row, Row>) -> RowMatcher {
        Matcher::new(rules)
            .with_left_store(VecStore::new(lefts()))
            .with_right_store(VecStore::new(rights()))
    }

    fn mid_esn_rules() -> RuleSet<Row, Row> {
        let mut rules = RuleSet::new();
        rules
            .join(s("mid"), s("mid"), 1.0)
            .unwrap()
            .join(s("esn"), s("esn"), 1.0)
            .unwrap();
        rules
    }

    fn esn_rules() -> RuleSet<Row, Row> {
        let mut rules = RuleSet::new();
        rules.join(s("esn"), s("esn"), 1.0).unwrap();
        rules
    }

    fn id(idx: usize) -> RecordId {
        RecordId::from(idx)
    }

    #[test]
    fn scores_pairs_by_rules() {
        let l = lefts();
        let r = rights();

        let mut rules = RuleSet::new();
        rules.join(s("mid"), s("mid"), 1.0).unwrap();
        let mut m = matcher_with(rules);
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_B]).unwrap(), 1.0);
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_A]).unwrap(), 0.0);

        m.rules_mut().join(s("esn"), s("esn"), 1.0).unwrap();
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_B]).unwrap(), 2.0);
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_A]).unwrap(), 1.0);

        m.rules_mut()
            .compare_fuzzy(s("date"), s("date"), 0.5, CompareOptions::default())
            .unwrap();
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_B]).unwrap(), 2.5);
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_A]).unwrap(), 1.5);
        assert!((m.score_pair(&l[LEFT_C], &r[RIGHT_D]).unwrap() - 1.5).abs() < 0.1);

        m.rules_mut().custom(|l: &Row, _: &Row| match l.get("mid") {
            Some(Value::Text(mid)) if mid.starts_with('7') => 1.0,
            _ => 0.0,
        });
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_B]).unwrap(), 3.5);
    }

    #[test]
    fn filter_veto_zeroes_score() {
        let l = lefts();
        let r = rights();
        let mut rules = mid_esn_rules();
        rules.filter(|_, _| false);
        let m = matcher_with(rules);
        assert_eq!(m.score_pair(&l[LEFT_A], &r[RIGHT_B]).unwrap(), 0.0);
    }

    #[test]
    fn requires_both_stores() {
        let mut m: RowMatcher = Matcher::new(mid_esn_rules());
        assert!(matches!(m.run(), Err(MatchError::InvalidConfig(_))));

        let mut m: RowMatcher =
            Matcher::new(mid_esn_rules()).with_left_store(VecStore::new(lefts()));
        assert!(m.run().is_err());
    }

    #[test]
    fn requires_a_join_pair() {
        let mut m = matcher_with(RuleSet::new());
        let err = m.index_right_objects().unwrap_err();
        assert!(err.to_string().contains("join pair"));
    }

    #[test]
    fn indexes_right_records_on_join_attributes() {
        let mut m = matcher_with(mid_esn_rules());
        m.index_right_objects().unwrap();
        let hits = m
            .right_index()
            .get(&s("esn"), &Value::from("11111111111"))
            .unwrap()
            .unwrap();
        assert_eq!(hits.len(), 2);
        let hits = m
            .right_index()
            .get(&s("mid"), &Value::from("8135554444"))
            .unwrap()
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn finds_potential_matches_by_join_union() {
        let mut m = matcher_with(mid_esn_rules());
        m.index_right_objects().unwrap();
        let found = m.find_potential_matches(&lefts()[LEFT_A]).unwrap();
        let ids: Vec<RecordId> = found.iter().map(|(id, _)| *id).collect();
        // mid hits first (b, d), then esn adds a.
        assert_eq!(ids, vec![id(RIGHT_B), id(RIGHT_D), id(RIGHT_A)]);
    }

    #[test]
    fn empty_join_values_are_not_looked_up() {
        let mut rules = RuleSet::new();
        rules.join(s("mid"), s("mid"), 1.0).unwrap();
        let mut m: RowMatcher = Matcher::new(rules)
            .with_left_store(VecStore::new(vec![Row::new().with("mid", "")]))
            .with_right_store(VecStore::new(vec![Row::new().with("mid", "")]));
        m.index_right_objects().unwrap();
        let left = Row::new().with("mid", "");
        assert!(m.find_potential_matches(&left).unwrap().is_empty());
    }

    #[test]
    fn find_matches_applies_min_score() {
        let mut m = matcher_with(mid_esn_rules());
        m.index_right_objects().unwrap();
        let ranked = m.find_matches(&lefts()[LEFT_A]).unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].right, id(RIGHT_B));

        m.set_min_score(2.0);
        let ranked = m.find_matches(&lefts()[LEFT_A]).unwrap();
        assert_eq!(
            ranked,
            vec![RankedMatch {
                right: id(RIGHT_B),
                score: 2.0
            }]
        );
    }

    #[test]
    fn reconciles_on_single_attribute() {
        let mut m = matcher_with(esn_rules());
        m.run().unwrap();
        assert_eq!(m.right_matches().len(), 2);
        assert_eq!(m.left_matches().len(), 2);
        assert!(m.left_matches().contains_key(&id(LEFT_A)));
        assert!(m.left_matches().contains_key(&id(LEFT_B)));
    }

    #[test]
    fn reconciles_on_two_attributes() {
        let mut m = matcher_with(mid_esn_rules());
        m.run().unwrap();
        assert_eq!(m.right_matches().len(), 3);
        assert_eq!(m.left_matches().len(), 3);

        let mut m = matcher_with(mid_esn_rules());
        m.set_min_score(2.0);
        m.run().unwrap();
        assert_eq!(m.right_matches().len(), 2);
        assert_eq!(m.left_matches().len(), 2);
    }

    #[test]
    fn failed_run_leaves_no_partial_assignment() {
        let lefts = vec![
            Row::new().with("mid", "a").with("amount", 1.0),
            Row::new().with("mid", "b").with("amount", 1.0),
        ];
        let rights = vec![
            Row::new().with("mid", "a").with("amount", 1.0),
            Row::new().with("mid", "b").with("amount", "x"),
        ];
        let mut rules = RuleSet::new();
        rules.join(s("mid"), s("mid"), 1.0).unwrap();
        let mut m: RowMatcher = Matcher::new(rules)
            .with_left_store(VecStore::new(lefts))
            .with_right_store(VecStore::new(rights));
        m.run().unwrap();
        assert_eq!(m.left_matches().len(), 2);

        // Left 0 pairs with right 0 before left 1 hits the text amount.
        m.rules_mut().compare(s("amount"), s("amount"), 1.0).unwrap();
        let err = m.run().unwrap_err();
        assert!(matches!(err, MatchError::TypeMismatch { .. }));

        assert!(m.right_matches().is_empty());
        assert!(m.left_matches().is_empty());
        assert_eq!(m.passes(), 0);
        assert_eq!(m.left_exceptions().unwrap(), &[id(0), id(1)]);
        assert_eq!(m.right_exceptions().unwrap(), &[id(0), id(1)]);
        assert_eq!(m.report().unwrap().summary.matched, 0);
    }

    #[test]
    fn lists_unmatched_records_as_exceptions() {
        let mut m = matcher_with(mid_esn_rules());
        m.set_min_score(2.0);
        m.run().unwrap();
        assert_eq!(m.left_exceptions().unwrap(), &[id(LEFT_C)]);
        assert_eq!(m.right_exceptions().unwrap(), &[id(RIGHT_A), id(RIGHT_D)]);
    }

    #[test]
    fn filters_veto_matches() {
        let mut rules = esn_rules();
        rules.filter(|l: &Row, r: &Row| {
            let has_one = |row: &Row| {
                row.get("esn")
                    .and_then(Value::as_text)
                    .is_some_and(|esn| esn.contains('1'))
            };
            has_one(l) && has_one(r)
        });
        let mut m = matcher_with(rules);
        m.run().unwrap();
        assert_eq!(m.left_matches().len(), 1);
        let only = &m.left_matches()[&id(LEFT_A)];
        assert_eq!(only.right, id(RIGHT_A));
    }

    #[test]
    fn progress_called_once_per_left_record() {
        let mut m = matcher_with(mid_esn_rules());
        let mut seen = Vec::new();
        m.run_with_progress(|left| seen.push(left)).unwrap();
        assert_eq!(seen, vec![id(LEFT_A), id(LEFT_B), id(LEFT_C)]);
    }

    #[test]
    fn left_and_right_maps_are_inverse() {
        let mut m = matcher_with(mid_esn_rules());
        m.run().unwrap();
        for (right, found) in m.right_matches() {
            assert_eq!(found.right, *right);
            assert_eq!(&m.left_matches()[&found.left], found);
        }
    }

    #[test]
    fn rerun_resets_state() {
        let mut m = matcher_with(mid_esn_rules());
        m.run().unwrap();
        assert!(m.left_exceptions().unwrap().is_empty());

        m.set_min_score(2.0);
        m.run().unwrap();
        assert_eq!(m.left_matches().len(), 2);
        assert_eq!(m.left_exceptions().unwrap(), &[id(LEFT_C)]);
    }

    #[test]
    fn pair_matches_prefers_free_then_strictly_better() {
        let mut m = matcher_with(esn_rules());
        let ranked = [RankedMatch {
            right: id(0),
            score: 1.0,
        }];
        m.pair_matches(id(0), &ranked);
        // Equal score does not displace.
        m.pair_matches(id(1), &ranked);
        assert_eq!(m.right_matches()[&id(0)].left, id(0));

        let better = [RankedMatch {
            right: id(0),
            score: 1.5,
        }];
        m.pair_matches(id(1), &better);
        assert_eq!(m.right_matches()[&id(0)].left, id(1));
        assert_eq!(m.assignment.losers, vec![id(0)]);
    }

    #[test]
    fn report_summarizes_run() {
        let mut m = matcher_with(mid_esn_rules());
        m.set_min_score(2.0);
        m.run().unwrap();
        let report = m.report().unwrap();
        assert_eq!(report.summary.left_records, 3);
        assert_eq!(report.summary.right_records, 4);
        assert_eq!(report.summary.matched, 2);
        assert_eq!(report.summary.left_exceptions, 1);
        assert_eq!(report.summary.right_exceptions, 2);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["matches"].as_array().unwrap().len(), 2);
    }
}
