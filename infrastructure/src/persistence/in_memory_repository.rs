use application::{ApplicationError, DocumentRepository, SchemaRepository};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use domain::{CollectionSchema, Document, DocumentId};
use std::sync::Arc;
use tracing::{debug, instrument};

// --- Schema Repository Implementation ---

#[derive(Debug, Clone, Default)]
pub struct InMemorySchemaRepository {
    // Collection Name -> Schema snapshot
    schemas: Arc<DashMap<String, Arc<CollectionSchema>>>,
}

impl InMemorySchemaRepository {
    pub fn new() -> Self {
        Self {
            schemas: Arc::new(DashMap::new()),
        }
    }
}

#[async_trait]
impl SchemaRepository for InMemorySchemaRepository {
    #[instrument(skip(self, schema))]
    async fn save(&self, schema: &CollectionSchema) -> Result<(), ApplicationError> {
        debug!(collection = %schema.name, "Saving schema definition to in-memory store");
        // Replacing the Arc leaves snapshots held by in-flight writes untouched
        self.schemas
            .insert(schema.name.clone(), Arc::new(schema.clone()));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<Option<Arc<CollectionSchema>>, ApplicationError> {
        debug!(collection = %name, "Getting schema definition from in-memory store");
        Ok(self
            .schemas
            .get(name)
            .map(|schema_ref| Arc::clone(schema_ref.value())))
    }

    #[instrument(skip(self))]
    async fn delete(&self, name: &str) -> Result<bool, ApplicationError> {
        debug!(collection = %name, "Deleting schema definition from in-memory store");
        Ok(self.schemas.remove(name).is_some())
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<String>, ApplicationError> {
        debug!("Listing all schemas from in-memory store");
        let mut names: Vec<String> = self
            .schemas
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

// --- Document Repository Implementation (Collection-Aware) ---

#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentRepository {
    // Collection Name -> (Document ID -> Document)
    store: Arc<DashMap<String, DashMap<DocumentId, Arc<Document>>>>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self {
            store: Arc::new(DashMap::new()),
        }
    }

    /// Number of documents stored for a collection.
    pub fn count(&self, collection_name: &str) -> usize {
        self.store
            .get(collection_name)
            .map(|collection_store| collection_store.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    #[instrument(skip(self, document))]
    async fn save(
        &self,
        collection_name: &str,
        document: &Document,
    ) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, doc_id = %document.id().as_str(), "Saving document to in-memory store");
        let collection_store = self
            .store
            .entry(collection_name.to_string())
            .or_insert_with(DashMap::new);
        collection_store.insert(document.id().clone(), Arc::new(document.clone()));
        Ok(())
    }

    #[instrument(skip(self, document))]
    async fn insert_new(
        &self,
        collection_name: &str,
        document: &Document,
    ) -> Result<bool, ApplicationError> {
        let collection_store = self
            .store
            .entry(collection_name.to_string())
            .or_insert_with(DashMap::new);
        match collection_store.entry(document.id().clone()) {
            Entry::Occupied(_) => {
                debug!(collection = %collection_name, doc_id = %document.id().as_str(), "Document id already taken");
                Ok(false)
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(document.clone()));
                Ok(true)
            }
        }
    }

    #[instrument(skip(self))]
    async fn get(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, ApplicationError> {
        debug!(collection = %collection_name, doc_id = %id.as_str(), "Getting document from in-memory store");
        Ok(self.store.get(collection_name).and_then(|collection_store| {
            collection_store.get(id).map(|doc_ref| (**doc_ref).clone())
        }))
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<bool, ApplicationError> {
        debug!(collection = %collection_name, doc_id = %id.as_str(), "Deleting document from in-memory store");
        match self.store.get(collection_name) {
            Some(collection_store) => Ok(collection_store.remove(id).is_some()),
            None => Ok(false),
        }
    }

    #[instrument(skip(self))]
    async fn delete_collection(&self, collection_name: &str) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, "Dropping all documents of collection from in-memory store");
        self.store.remove(collection_name);
        Ok(())
    }

    /// Inserts the whole batch under a single collection entry.
    #[instrument(skip(self, documents))]
    async fn save_batch(
        &self,
        collection_name: &str,
        documents: &[Document],
    ) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, count = documents.len(), "Saving batch directly to in-memory store");
        let collection_store = self
            .store
            .entry(collection_name.to_string())
            .or_insert_with(DashMap::new);
        for doc in documents {
            collection_store.insert(doc.id().clone(), Arc::new(doc.clone()));
        }
        Ok(())
    }
}
