use rustc_hash::FxHashMap;

use crate::error::MatchError;
use crate::model::{Attribute, RecordId, Value};

/// Maps `(attribute, value)` to the ids of records holding that value.
///
/// Backends differ (in-process map, SQLite set table) but all share the same
/// contract: absent values are never stored, ids come back in insertion
/// order, and `get` distinguishes "never indexed" (`None`) from a hit.
pub trait AttributeIndex<A: Attribute> {
    /// Record `id` under `(attr, value)`. A `None` value is a no-op.
    fn put(&mut self, attr: &A, value: Option<&Value>, id: RecordId) -> Result<(), MatchError>;

    /// Ids previously put under `(attr, value)`, or `None` if there are none.
    fn get(&self, attr: &A, value: &Value) -> Result<Option<Vec<RecordId>>, MatchError>;

    /// Drop every entry. Engines call this before each run.
    fn clear(&mut self) -> Result<(), MatchError>;
}

/// In-memory index: one value map per attribute.
#[derive(Debug, Clone)]
pub struct HashIndex<A: Attribute> {
    maps: FxHashMap<A, FxHashMap<Value, Vec<RecordId>>>,
}

impl<A: Attribute> HashIndex<A> {
    pub fn new() -> Self {
        Self {
            maps: FxHashMap::default(),
        }
    }

    /// Number of distinct values indexed for `attr`.
    pub fn distinct_values(&self, attr: &A) -> usize {
        self.maps.get(attr).map_or(0, |m| m.len())
    }
}

impl<A: Attribute> Default for HashIndex<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Attribute> AttributeIndex<A> for HashIndex<A> {
    fn put(&mut self, attr: &A, value: Option<&Value>, id: RecordId) -> Result<(), MatchError> {
        if let Some(value) = value {
            self.maps
                .entry(attr.clone())
                .or_default()
                .entry(value.clone())
                .or_default()
                .push(id);
        }
        Ok(())
    }

    fn get(&self, attr: &A, value: &Value) -> Result<Option<Vec<RecordId>>, MatchError> {
        Ok(self
            .maps
            .get(attr)
            .and_then(|values| values.get(value))
            .cloned())
    }

    fn clear(&mut self) -> Result<(), MatchError> {
        self.maps.clear();
        Ok(())
    }
}
