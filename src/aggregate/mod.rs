//! Composite-record aggregation and subject hashing
//!
//! Facts from many independent category × year queries are merged per
//! subject and summarized as one deterministic SHA-256 digest.

pub mod category;
pub mod engine;
pub mod hash;
pub mod map;
pub mod record;

pub use category::{
    Category, CategoryDefinition, CategoryFetcher, FactColumns, QueryCategoryFetcher, Sex,
    SubjectFact,
};
pub use engine::{Aggregation, Aggregator, Slice};
pub use hash::{SubjectHashEntry, canonical_form, digest_all, hash_table, subject_digest};
pub use map::SubjectMap;
pub use record::{CodeBag, CompositeRecord};
