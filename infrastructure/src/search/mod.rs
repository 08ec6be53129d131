pub mod in_memory_index;

pub use in_memory_index::InMemoryIndex;
