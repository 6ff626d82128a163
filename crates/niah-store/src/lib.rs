mod context_dump;
mod json_store;
mod schema;
mod sqlite_store;

pub use context_dump::ContextDumper;
pub use json_store::JsonDirStore;
pub use sqlite_store::SqliteStore;
