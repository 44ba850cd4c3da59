//! Settings management for Creator Studio
//!
//! - **schema**: the canonical default document and category keys
//! - **merge**: reconciliation of loaded files against the schema
//! - **store**: loading, copying out and persisting the document

pub mod merge;
pub mod schema;
pub mod store;

// Re-export commonly used types
pub use schema::{Document, default_document};
pub use store::{SettingsStore, load_or_default};
