//! Data structures backing the hubs.

pub mod store;

pub use store::{Lookup, TimestampedStore};
