//! Differencing of two stored runs, one resource kind at a time.

mod comparator;
mod pairing;

pub use comparator::{compare_kind, CompareError, Comparator, ComparisonResult};
