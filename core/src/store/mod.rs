// Store module: in-memory state kept between scheduler rounds

pub mod dedup;

pub use dedup::{DedupScope, DedupStore};
