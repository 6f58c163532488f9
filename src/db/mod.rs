//! Database module for pingtrail.
//!
//! Provides SQLite storage for targets and probe results, with embedded
//! migrations.

mod models;
mod store;

pub use models::*;
pub use store::*;
