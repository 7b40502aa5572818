//! Versioned cache generations and the strategies that read and fill them.
//!
//! This module provides:
//! - Two generations per worker version: a precached shell and a runtime cache
//! - Cache-first, network-first, stale-while-revalidate and
//!   network-first-with-placeholder strategies
//! - Offline fallbacks (JSON for API calls, SVG for images, HTML for pages)

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Generations};

#[cfg(test)]
pub use storage::testing;
