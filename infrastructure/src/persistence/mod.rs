//! Stores for collection schemas and admitted documents.

pub mod in_memory_repository;

pub use in_memory_repository::{InMemoryDocumentRepository, InMemorySchemaRepository};
