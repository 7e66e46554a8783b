use log::{debug, info, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::MatchError;
use crate::index::{AttributeIndex, HashIndex};
use crate::model::{DedupReport, DedupSummary, Record, RecordId, RunMeta};
use crate::rules::Criteria;
use crate::store::Store;

type Attr<S> = <<S as Store>::Record as Record>::Attr;

const PROGRESS_EVERY: usize = 100;

/// One record's place in the final grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEntry {
    pub id: RecordId,
    pub group: usize,
    pub position: usize,
}

/// Partitions one store into groups of equivalent records.
///
/// Two records are equivalent when, for some criteria group, they agree on
/// every attribute of that group the first record has a value for. Groups are
/// the transitive closure of that relation. Records with no value on any
/// attribute of any criteria group land in a trailing nil group.
pub struct Deduplicator<S: Store> {
    store: S,
    criteria: Criteria<Attr<S>>,
    index: Box<dyn AttributeIndex<Attr<S>>>,
    groups: Vec<Vec<RecordId>>,
    grouped: FxHashMap<RecordId, usize>,
    nil_candidates: Vec<RecordId>,
    nil_seen: FxHashSet<RecordId>,
    nil_group_size: usize,
    record_count: usize,
}

impl<S> Deduplicator<S>
where
    S: Store,
    Attr<S>: 'static,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            criteria: Criteria::new(),
            index: Box::new(HashIndex::new()),
            groups: Vec::new(),
            grouped: FxHashMap::default(),
            nil_candidates: Vec::new(),
            nil_seen: FxHashSet::default(),
            nil_group_size: 0,
            record_count: 0,
        }
    }

    pub fn with_index(mut self, index: Box<dyn AttributeIndex<Attr<S>>>) -> Self {
        self.index = index;
        self
    }

    pub fn with_criteria(mut self, criteria: Criteria<Attr<S>>) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn match_attr(&mut self, attr: Attr<S>) -> &mut Self {
        self.criteria.match_attr(attr);
        self
    }

    pub fn match_attrs<I>(&mut self, attrs: I) -> Result<&mut Self, MatchError>
    where
        I: IntoIterator<Item = Attr<S>>,
    {
        self.criteria.match_attrs(attrs)?;
        Ok(self)
    }

    pub fn criteria(&self) -> &Criteria<Attr<S>> {
        &self.criteria
    }

    /// Attributes the index covers.
    pub fn unique_attrs(&self) -> Vec<Attr<S>> {
        self.criteria.unique_attrs()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn index(&self) -> &dyn AttributeIndex<Attr<S>> {
        self.index.as_ref()
    }

    /// Index every record on every attribute any criteria group names.
    pub fn create_index(&mut self) -> Result<(), MatchError> {
        if self.criteria.is_empty() {
            return Err(MatchError::InvalidConfig(
                "deduplicator requires at least one criteria group".into(),
            ));
        }

        let attrs = self.unique_attrs();
        let index = self.index.as_mut();
        index.clear()?;
        let mut count = 0usize;
        self.store.for_each(&mut |id, record| {
            count += 1;
            for attr in &attrs {
                index.put(attr, record.value(attr).as_ref(), id)?;
            }
            Ok(())
        })?;
        self.record_count = count;
        Ok(())
    }

    pub fn deduplicate(&mut self) -> Result<(), MatchError> {
        self.deduplicate_with_progress(|_| {})
    }

    /// Group every record. `progress` is called once per record.
    pub fn deduplicate_with_progress<F>(&mut self, mut progress: F) -> Result<(), MatchError>
    where
        F: FnMut(RecordId),
    {
        self.reset();
        let result = self.group_records(&mut progress);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn reset(&mut self) {
        self.groups.clear();
        self.grouped.clear();
        self.nil_candidates.clear();
        self.nil_seen.clear();
        self.nil_group_size = 0;
        self.record_count = 0;
    }

    fn group_records<F>(&mut self, progress: &mut F) -> Result<(), MatchError>
    where
        F: FnMut(RecordId),
    {
        self.create_index()?;

        let ids = self.store.ids()?;
        let single_group = self.criteria.len() == 1;
        for (n, id) in ids.into_iter().enumerate() {
            progress(id);
            if (n + 1) % PROGRESS_EVERY == 0 {
                debug!("deduplicating record {} (id {id})", n + 1);
            }
            if single_group && self.grouped.contains_key(&id) {
                continue;
            }

            let record = self.store.find(id)?.into_owned();
            for group_idx in 0..self.criteria.len() {
                match self.candidates(&record, group_idx)? {
                    Some(candidates) => self.absorb(&candidates),
                    None => {
                        if self.nil_seen.insert(id) {
                            self.nil_candidates.push(id);
                        }
                    }
                }
            }
        }

        let nil_group: Vec<RecordId> = self
            .nil_candidates
            .iter()
            .copied()
            .filter(|id| !self.grouped.contains_key(id))
            .collect();
        if !nil_group.is_empty() {
            let position = self.groups.len();
            for id in &nil_group {
                self.grouped.insert(*id, position);
            }
            self.nil_group_size = nil_group.len();
            self.groups.push(nil_group);
        }

        info!(
            "deduplicated {} records into {} groups ({} in nil group)",
            self.record_count,
            self.groups.len(),
            self.nil_group_size
        );
        Ok(())
    }

    /// Ids agreeing with `record` on every non-nil attribute of one criteria
    /// group, in the order of the first attribute's candidates. `None` when the
    /// record has no value on any attribute of the group.
    fn candidates(
        &self,
        record: &S::Record,
        group_idx: usize,
    ) -> Result<Option<Vec<RecordId>>, MatchError> {
        let mut result: Option<Vec<RecordId>> = None;
        for attr in &self.criteria.groups()[group_idx] {
            let Some(value) = record.value(attr) else {
                continue;
            };
            let hits = self.index.get(attr, &value)?.unwrap_or_default();
            result = Some(match result {
                None => hits,
                Some(acc) => {
                    let hits: FxHashSet<RecordId> = hits.into_iter().collect();
                    acc.into_iter().filter(|id| hits.contains(id)).collect()
                }
            });
        }
        Ok(result)
    }

    /// Fold one candidate set into the grouping, merging every group it touches.
    fn absorb(&mut self, candidates: &[RecordId]) {
        let mut owners: Vec<usize> = Vec::new();
        let mut fresh: Vec<RecordId> = Vec::new();
        for id in candidates {
            match self.grouped.get(id) {
                Some(&owner) => {
                    if !owners.contains(&owner) {
                        owners.push(owner);
                    }
                }
                None => fresh.push(*id),
            }
        }

        match owners.as_slice() {
            [] => {
                if fresh.is_empty() {
                    return;
                }
                let position = self.groups.len();
                for id in &fresh {
                    self.grouped.insert(*id, position);
                }
                self.groups.push(fresh);
            }
            [owner] => {
                let owner = *owner;
                for id in fresh {
                    self.grouped.insert(id, owner);
                    self.groups[owner].push(id);
                }
            }
            [first, rest @ ..] => {
                let first = *first;
                trace!("merging groups {rest:?} into group {first}");
                for &other in rest {
                    let members = std::mem::take(&mut self.groups[other]);
                    self.groups[first].extend(members);
                }
                self.groups[first].extend(fresh);

                let mut removed = rest.to_vec();
                removed.sort_unstable_by(|a, b| b.cmp(a));
                for &position in &removed {
                    self.groups.remove(position);
                }
                let lowest = removed.last().map_or(first, |&low| low.min(first));
                self.reindex_from(lowest);
            }
        }
    }

    fn reindex_from(&mut self, start: usize) {
        for (position, group) in self.groups.iter().enumerate().skip(start) {
            for id in group {
                self.grouped.insert(*id, position);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------------

    pub fn groups(&self) -> &[Vec<RecordId>] {
        &self.groups
    }

    /// The group holding `id`, if it was processed.
    pub fn group_of(&self, id: RecordId) -> Option<&[RecordId]> {
        self.grouped
            .get(&id)
            .and_then(|&position| self.groups.get(position))
            .map(Vec::as_slice)
    }

    /// Every grouped record in group order, then within-group order.
    pub fn entries(&self) -> impl Iterator<Item = GroupEntry> + '_ {
        self.groups.iter().enumerate().flat_map(|(group, ids)| {
            ids.iter().enumerate().map(move |(position, &id)| GroupEntry {
                id,
                group,
                position,
            })
        })
    }

    /// Like [`Self::entries`], with each record loaded from the store.
    pub fn each_with_groups<F>(&self, mut f: F) -> Result<(), MatchError>
    where
        F: FnMut(&S::Record, GroupEntry) -> Result<(), MatchError>,
    {
        for entry in self.entries() {
            let record = self.store.find(entry.id)?;
            f(&record, entry)?;
        }
        Ok(())
    }

    pub fn report(&self) -> DedupReport {
        DedupReport {
            meta: RunMeta::now(),
            summary: DedupSummary {
                records: self.record_count,
                groups: self.groups.len(),
                largest_group: self.groups.iter().map(Vec::len).max().unwrap_or(0),
                nil_group_size: self.nil_group_size,
            },
            groups: self.groups.clone(),
        }
    }
}
