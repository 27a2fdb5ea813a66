pub mod registry;
pub mod schema;

pub use registry::SqliteRegistry;
