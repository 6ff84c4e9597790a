//! Quill Plugin SDK
//!
//! Capability traits and configuration schema types for Quill extensions.
//! Extension packages implement these traits and register a factory with the
//! kernel at startup; the kernel never resolves implementation classes from
//! strings at request time.

pub mod extension;
pub mod schema;

// Re-export serde_json so extensions build config values with the same version.
#[doc(hidden)]
pub use serde_json;

pub mod prelude {
    pub use crate::extension::*;
    pub use crate::schema::*;
}
