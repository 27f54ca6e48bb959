//! Frame-eviction policies for a buffer pool.
//!
//! A replacer tracks which frames the buffer manager may reclaim and, when
//! asked, picks the victim. Frames become candidates only after the caller
//! marks them evictable; pinned frames are never selected.

mod lru_k;

pub use lru_k::LruKReplacer;
