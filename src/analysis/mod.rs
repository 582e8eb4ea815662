//! Analysis modules.
//!
//! One aggregator per dashboard question, all over the enriched records.

pub mod aggregator;

pub use aggregator::*;
