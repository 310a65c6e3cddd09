//! Core types for engrave.

mod category;
mod record;

pub use category::{Category, Tier};
pub use record::{canonical_pair, AccessEvent, AccessHistory, HebbianLink, Record, RecordId};
