#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! Concurrent building blocks for a database buffer pool.
//!
//! This crate provides the two in-memory data structures at the core of a
//! buffer manager:
//!
//! - [`ExtendibleHashTable`], a thread-safe hash index with directory
//!   doubling and bucket splitting. A buffer manager uses it to translate
//!   page identifiers into frame handles.
//! - [`LruKReplacer`], a thread-safe LRU-K eviction policy engine. It tracks
//!   per-frame access history and, on demand, picks the evictable frame
//!   whose K-th most recent access lies furthest in the past.
//!
//! The two structures are independent; the buffer manager wires them
//! together. Each takes `&self` on every operation and serializes its
//! callers with a single internal lock.
//!
//! # Examples
//!
//! ```rust
//! use bufcore::{ExtendibleHashTable, LruKReplacer, FrameId, PageId};
//!
//! // Page table: page id -> frame id, up to 4 entries per bucket.
//! let page_table: ExtendibleHashTable<PageId, FrameId> = ExtendibleHashTable::new(4);
//! // Replacer for an 8-frame pool, ranking victims by their 2nd most
//! // recent access.
//! let replacer = LruKReplacer::new(8, 2);
//!
//! // Page 100 is loaded into frame 0 and pinned.
//! page_table.insert(100, 0);
//! replacer.record_access(0);
//!
//! // Unpinning the frame makes it a candidate for eviction.
//! replacer.set_evictable(0, true);
//! assert_eq!(replacer.evict(), Some(0));
//!
//! // The eviction unmaps the page.
//! assert_eq!(page_table.remove(&100), Some(0));
//! assert_eq!(page_table.get(&100), None);
//! ```

mod common;
pub mod hash_table;
pub mod replacer;

pub use common::{FrameId, PageId};
pub use hash_table::ExtendibleHashTable;
pub use replacer::LruKReplacer;
