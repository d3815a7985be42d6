// Implementations of the moderation store.

pub mod fixtures;
pub mod in_memory;
pub mod sqlite_store;

// Re-export for convenience
pub use in_memory::InMemoryModerationStore;
pub use sqlite_store::SqliteModerationStore;
