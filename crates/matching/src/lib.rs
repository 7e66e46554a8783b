//! `visigrid-matching` — Record linkage and deduplication engine.
//!
//! Pure engine crate: reads records through the [`Store`] trait, indexes them
//! through [`AttributeIndex`], and returns 1:1 assignments ([`Matcher`]) or
//! equivalence groups ([`Deduplicator`]). File and database adapters live in
//! `visigrid-matching-io`.

pub mod config;
pub mod dedup;
pub mod error;
pub mod index;
pub mod matcher;
pub mod model;
pub mod rules;
pub mod similarity;
pub mod store;

pub use config::{DedupConfig, IndexConfig, MatchConfig};
pub use dedup::{Deduplicator, GroupEntry};
pub use error::MatchError;
pub use index::{AttributeIndex, HashIndex};
pub use matcher::Matcher;
pub use model::{Attribute, Match, RankedMatch, Record, RecordId, Row, Value, ValueKind};
pub use rules::{AttributePair, Criteria, RuleSet};
pub use similarity::{CompareOptions, DateWindow, SimilarityRegistry, StringMode};
pub use store::{Store, VecStore};
