use application::{ApplicationError, Index};
use async_trait::async_trait;
use dashmap::DashMap;
use domain::{CollectionSchema, Document, DocumentId};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Represents the data stored for a single collection within the in-memory index.
#[derive(Debug, Default)]
struct CollectionIndexData {
    documents: DashMap<DocumentId, Arc<Document>>,
    // Name of the numeric field documents are ranked by, empty when unset
    default_sorting_field: String,
}

impl CollectionIndexData {
    /// Numeric value a document is ranked by. Documents only arrive here
    /// after validation, so a present sort field always holds a number.
    fn sort_value(&self, document: &Document) -> Option<f64> {
        if self.default_sorting_field.is_empty() {
            return None;
        }
        document
            .get_field_value(&self.default_sorting_field)
            .and_then(|value| value.as_f64())
    }
}

/// In-memory index over validated documents, supporting multiple collections.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndex {
    // Collection Name -> Collection Index Data
    collections: Arc<DashMap<String, Arc<CollectionIndexData>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(DashMap::new()),
        }
    }

    /// Number of documents indexed in one collection.
    pub fn collection_document_count(&self, collection_name: &str) -> usize {
        self.collections
            .get(collection_name)
            .map(|data| data.documents.len())
            .unwrap_or(0)
    }

    /// Document ids of a collection ordered by the default sorting field,
    /// highest first. Ties and unsorted documents fall back to `seq_id`.
    #[instrument(skip(self))]
    pub fn ranked_ids(&self, collection_name: &str) -> Result<Vec<DocumentId>, ApplicationError> {
        let collection_data = self
            .collections
            .get(collection_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ApplicationError::CollectionNotFound(collection_name.to_string()))?;

        let mut ranked: Vec<(Option<f64>, u32, DocumentId)> = collection_data
            .documents
            .iter()
            .map(|entry| {
                let doc = entry.value();
                (collection_data.sort_value(doc), doc.seq_id(), doc.id().clone())
            })
            .collect();
        ranked.sort_by(|a, b| compare_sort_values(a.0, b.0).then_with(|| a.1.cmp(&b.1)));
        debug!(collection = %collection_name, count = ranked.len(), "Ranked documents by default sorting field");
        Ok(ranked.into_iter().map(|(_, _, id)| id).collect())
    }
}

// Descending, with missing values last.
fn compare_sort_values(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl Index for InMemoryIndex {
    #[instrument(skip(self, schema))]
    async fn ensure_collection_exists(
        &self,
        schema: &CollectionSchema,
    ) -> Result<(), ApplicationError> {
        let name = schema.name.clone();
        debug!(collection = %name, "Ensuring collection exists in in-memory index");
        if !self.collections.contains_key(&name) {
            info!(collection = %name, "Creating new index entry for collection");
            let collection_data = Arc::new(CollectionIndexData {
                documents: DashMap::new(),
                default_sorting_field: schema.default_sorting_field.clone(),
            });
            self.collections.insert(name, collection_data);
        } else {
            debug!(collection = %name, "Collection already exists in index");
        }
        Ok(())
    }

    #[instrument(skip(self, document))]
    async fn index_document(
        &self,
        collection_name: &str,
        document: &Document,
    ) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, doc_id = %document.id().as_str(), "Indexing document in-memory");
        match self.collections.get(collection_name) {
            Some(collection_data) => {
                collection_data
                    .documents
                    .insert(document.id().clone(), Arc::new(document.clone()));
                Ok(())
            }
            None => {
                warn!(collection = %collection_name, "Attempted to index into non-existent collection index");
                Err(ApplicationError::CollectionNotFound(
                    collection_name.to_string(),
                ))
            }
        }
    }

    #[instrument(skip(self))]
    async fn delete_document(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, doc_id = %id.as_str(), "Removing document from in-memory index");
        if let Some(collection_data) = self.collections.get(collection_name) {
            collection_data.documents.remove(id);
        } else {
            warn!(collection = %collection_name, "Attempted to delete from non-existent collection index");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_collection(&self, collection_name: &str) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, "Deleting collection from in-memory index");
        if self.collections.remove(collection_name).is_some() {
            info!(collection = %collection_name, "Collection removed from index.");
        } else {
            warn!(collection = %collection_name, "Attempted to delete non-existent collection index");
        }
        Ok(())
    }

    /// Inserts the whole batch under a single collection lookup.
    #[instrument(skip(self, documents))]
    async fn index_batch(
        &self,
        collection_name: &str,
        documents: &[Document],
    ) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, count = documents.len(), "Indexing batch directly in-memory");
        let collection_data = self
            .collections
            .get(collection_name)
            .ok_or_else(|| ApplicationError::CollectionNotFound(collection_name.to_string()))?;
        for doc in documents {
            collection_data
                .documents
                .insert(doc.id().clone(), Arc::new(doc.clone()));
        }
        Ok(())
    }
}
