//! In-memory implementations of the application's collaborator traits.

pub mod persistence;
pub mod search;

pub use persistence::{InMemoryDocumentRepository, InMemorySchemaRepository};
pub use search::InMemoryIndex;
