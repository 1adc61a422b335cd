// Each file adds an `impl Database` block for one table family.
mod cache;
pub mod core;
mod document;
mod feedback;
mod model;
mod schema;
mod usage;

pub use self::core::Database;
pub use self::core::DbLockErrorExt;
