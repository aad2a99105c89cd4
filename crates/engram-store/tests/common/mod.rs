//! Shared helpers for engram-store integration tests.

use engram_core::CreateMemory;
use engram_store::MemoryStore;

/// Fresh in-memory store at the latest schema.
#[allow(dead_code)]
pub fn store() -> MemoryStore {
    MemoryStore::in_memory().expect("open in-memory store")
}

/// A create request with inference off, so graph-shape assertions only see
/// the links a test makes on purpose.
#[allow(dead_code)]
pub fn note(content: &str) -> CreateMemory {
    CreateMemory { auto_link: false, ..CreateMemory::new(content) }
}

/// Create one memory with inference off and return its id.
#[allow(dead_code)]
pub fn create_note(store: &mut MemoryStore, content: &str) -> String {
    store.create(note(content)).expect("create").memory.id
}
