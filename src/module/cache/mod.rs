//! Content-addressed module cache

pub mod content_cache;
pub mod hashing;

pub use content_cache::{CacheEntry, ContentCache};
pub use hashing::{hash160, ContentHash};
