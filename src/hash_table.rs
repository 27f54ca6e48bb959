//! A concurrent hash index with an extendible directory.
//!
//! The table hashes each key to a 64-bit value and uses the low
//! `global_depth` bits to pick a directory slot. Every slot references a
//! bucket; a bucket whose `local_depth` is below the global depth is shared
//! by several slots. Inserting into a full bucket splits it, doubling the
//! directory first when the bucket already uses every directory bit.
//! The directory only ever grows; buckets are never merged.

mod bucket;
mod table;

pub use table::ExtendibleHashTable;

use std::collections::hash_map::RandomState;

/// Default hasher for `ExtendibleHashTable`.
pub type DefaultHashBuilder = RandomState;
