use std::borrow::Cow;

use crate::error::MatchError;
use crate::model::{Record, RecordId};

pub type Visitor<'v, R> = dyn FnMut(RecordId, &R) -> Result<(), MatchError> + 'v;

/// A finite, restartable collection of records with stable ids.
pub trait Store {
    type Record: Record + Clone;

    /// Visit every record in store order. Errors from `visit` abort the walk.
    fn for_each(&self, visit: &mut Visitor<'_, Self::Record>) -> Result<(), MatchError>;

    /// Point lookup by id.
    fn find(&self, id: RecordId) -> Result<Cow<'_, Self::Record>, MatchError>;

    /// Record count when it is known without a full scan.
    fn len_hint(&self) -> Option<usize> {
        None
    }

    /// All ids in store order.
    fn ids(&self) -> Result<Vec<RecordId>, MatchError> {
        let mut ids = Vec::with_capacity(self.len_hint().unwrap_or(0));
        self.for_each(&mut |id, _| {
            ids.push(id);
            Ok(())
        })?;
        Ok(ids)
    }
}

impl<S: Store + ?Sized> Store for &S {
    type Record = S::Record;

    fn for_each(&self, visit: &mut Visitor<'_, Self::Record>) -> Result<(), MatchError> {
        (**self).for_each(visit)
    }

    fn find(&self, id: RecordId) -> Result<Cow<'_, Self::Record>, MatchError> {
        (**self).find(id)
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }
}

/// In-memory ordered store; a record's id is its position.
#[derive(Debug, Clone, Default)]
pub struct VecStore<T> {
    records: Vec<T>,
}

impl<T> VecStore<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: RecordId) -> Option<&T> {
        usize::try_from(id.0).ok().and_then(|i| self.records.get(i))
    }
}

impl<T> From<Vec<T>> for VecStore<T> {
    fn from(records: Vec<T>) -> Self {
        Self::new(records)
    }
}

impl<T: Record + Clone> Store for VecStore<T> {
    type Record = T;

    fn for_each(&self, visit: &mut Visitor<'_, T>) -> Result<(), MatchError> {
        for (idx, record) in self.records.iter().enumerate() {
            visit(RecordId::from(idx), record)?;
        }
        Ok(())
    }

    fn find(&self, id: RecordId) -> Result<Cow<'_, T>, MatchError> {
        self.get(id)
            .map(Cow::Borrowed)
            .ok_or(MatchError::RecordNotFound(id))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.records.len())
    }
}
