//! Identifier types shared with the host buffer manager.

/// Identifier of an on-disk page.
pub type PageId = u64;

/// Identifier of a buffer-pool frame.
pub type FrameId = u64;
