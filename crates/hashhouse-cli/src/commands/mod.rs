//! Command handlers for hibp
//!
//! - Migrate: schema provisioning
//! - Import: file and range imports

pub mod import;
pub mod migrate;

// Re-export for convenience
pub use import::{DataImportArgs, RangeImportArgs};
pub use migrate::MigrateArgs;
