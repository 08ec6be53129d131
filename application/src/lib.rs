use async_trait::async_trait;
use domain::{
    CollectionSchema, DirtyValues, Document, DocumentId, DomainError, IndexOperation,
    ValidationError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

// --- Application Errors ---
#[derive(Error, Debug)]
pub enum ApplicationError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Document already exists: {0}")]
    DocumentAlreadyExists(String),
    #[error("Indexing failed in collection '{collection}': {source}")]
    IndexError {
        collection: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Infrastructure error: {0}")]
    InfrastructureError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("Domain validation error: {0}")]
    DomainError(#[from] DomainError),
    #[error("Schema operation failed: {0}")]
    SchemaError(String),
}

// --- Collaborators ---

/// Keyed store of collection schemas.
///
/// Schemas are handed out as shared snapshots: a schema change replaces the
/// stored `Arc`, it never mutates one that a validation may be reading.
#[async_trait]
pub trait SchemaRepository: Send + Sync {
    /// Saves (creates or replaces) a collection schema.
    async fn save(&self, schema: &CollectionSchema) -> Result<(), ApplicationError>;
    /// Retrieves a schema snapshot by its name.
    async fn get(&self, name: &str) -> Result<Option<Arc<CollectionSchema>>, ApplicationError>;
    /// Returns whether a schema was removed.
    async fn delete(&self, name: &str) -> Result<bool, ApplicationError>;
    /// Names of all stored schemas, sorted.
    async fn list(&self) -> Result<Vec<String>, ApplicationError>;
}

/// Interface for storing and retrieving admitted documents.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Adds or replaces a document in a specific collection.
    async fn save(
        &self,
        collection_name: &str,
        document: &Document,
    ) -> Result<(), ApplicationError>;
    /// Stores a document only when its id is free. Returns whether it was stored.
    ///
    /// The check and the insert are one atomic step, so concurrent creates of
    /// one id admit exactly one document.
    async fn insert_new(
        &self,
        collection_name: &str,
        document: &Document,
    ) -> Result<bool, ApplicationError>;
    /// Stored document, `None` when the collection or the id is unknown.
    async fn get(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, ApplicationError>;
    /// Returns whether a document was removed.
    async fn delete(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<bool, ApplicationError>;
    /// Drops every document of a collection.
    async fn delete_collection(&self, collection_name: &str) -> Result<(), ApplicationError>;
    /// Adds or replaces multiple documents.
    #[instrument(skip(self, documents))]
    async fn save_batch(
        &self,
        collection_name: &str,
        documents: &[Document],
    ) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, count = documents.len(), "Saving documents one by one");
        for doc in documents {
            self.save(collection_name, doc).await?;
        }
        Ok(())
    }
}

/// Interface for the indexing engine that consumes validated documents.
///
/// Implementations may rely on every field of a received document matching
/// its declared type.
#[async_trait]
pub trait Index: Send + Sync {
    /// Registers a collection. Registering an existing one is a no-op.
    async fn ensure_collection_exists(
        &self,
        schema: &CollectionSchema,
    ) -> Result<(), ApplicationError>;
    /// Adds or replaces a document in the specified collection's index.
    async fn index_document(
        &self,
        collection_name: &str,
        document: &Document,
    ) -> Result<(), ApplicationError>;
    /// Unknown ids are ignored.
    async fn delete_document(
        &self,
        collection_name: &str,
        id: &DocumentId,
    ) -> Result<(), ApplicationError>;
    async fn delete_collection(&self, collection_name: &str) -> Result<(), ApplicationError>;
    /// Indexes multiple documents.
    #[instrument(skip(self, documents))]
    async fn index_batch(
        &self,
        collection_name: &str,
        documents: &[Document],
    ) -> Result<(), ApplicationError> {
        debug!(collection = %collection_name, count = documents.len(), "Indexing documents one by one");
        for doc in documents {
            self.index_document(collection_name, doc).await?;
        }
        Ok(())
    }
}

// --- Requests and Responses ---

#[derive(Serialize, Debug)]
pub struct CollectionResponse {
    pub name: String,
}

#[derive(Serialize, Debug)]
pub struct ListCollectionsResponse {
    pub collections: Vec<CollectionResponse>,
}

/// Request to write a document (flexible fields).
#[derive(Deserialize, Debug, Clone)]
pub struct IndexDocumentRequest {
    /// The ID for the document.
    pub id: String,
    /// Raw field values, coerced in place during validation.
    pub fields: Map<String, Value>,
}

/// Per-request write settings, usually taken from the query string.
#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Ingestion intent. Defaults to `create`.
    #[serde(default)]
    pub action: IndexOperation,
    /// Overrides the collection's dirty values policy.
    #[serde(default)]
    pub dirty_values: Option<DirtyValues>,
}

/// A stored document as returned to clients.
#[derive(Serialize, Debug, Clone)]
pub struct DocumentResponse {
    pub id: String,
    pub seq_id: u32,
    pub fields: Map<String, Value>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id().as_str().to_string(),
            seq_id: doc.seq_id(),
            fields: doc.fields().clone(),
        }
    }
}

/// Outcome of one document in a batch import.
#[derive(Serialize, Debug, Clone)]
pub struct ImportResult {
    pub success: bool,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct BatchResponse {
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// One entry per request, in request order.
    pub results: Vec<ImportResult>,
}

// --- Services ---

/// Owns the lifecycle of collections.
///
/// A collection is live once its schema is stored and the index knows it.
/// Creation undoes the stored schema when index registration fails.
pub struct SchemaService {
    schema_repo: Arc<dyn SchemaRepository>,
    index: Arc<dyn Index>,
    doc_repo: Arc<dyn DocumentRepository>, // Cleared when a collection is deleted
}

impl SchemaService {
    pub fn new(
        schema_repo: Arc<dyn SchemaRepository>,
        index: Arc<dyn Index>,
        doc_repo: Arc<dyn DocumentRepository>,
    ) -> Self {
        Self {
            schema_repo,
            index,
            doc_repo,
        }
    }

    /// Checks the definition, then stores it and registers it with the index.
    #[instrument(skip(self, definition), fields(collection = %definition.name))]
    pub async fn create_collection(
        &self,
        definition: CollectionSchema,
    ) -> Result<Arc<CollectionSchema>, ApplicationError> {
        let schema = definition.build()?;

        if self.schema_repo.get(&schema.name).await?.is_some() {
            warn!("Collection already registered");
            return Err(ApplicationError::CollectionAlreadyExists(schema.name));
        }

        self.schema_repo.save(&schema).await.map_err(|e| {
            error!("Storing schema failed: {}", e);
            ApplicationError::SchemaError(format!("Failed to save schema: {}", e))
        })?;

        if let Err(e) = self.index.ensure_collection_exists(&schema).await {
            error!("Index registration failed, removing stored schema: {}", e);
            if let Err(undo_err) = self.schema_repo.delete(&schema.name).await {
                error!("Stored schema could not be removed: {}", undo_err);
            }
            return Err(e);
        }

        info!(
            fields = schema.fields.len(),
            default_sorting_field = %schema.default_sorting_field,
            "Collection created"
        );
        Ok(Arc::new(schema))
    }

    #[instrument(skip(self))]
    pub async fn get_collection(
        &self,
        name: &str,
    ) -> Result<Arc<CollectionSchema>, ApplicationError> {
        self.schema_repo
            .get(name)
            .await?
            .ok_or_else(|| ApplicationError::CollectionNotFound(name.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn list_collections(&self) -> Result<Vec<String>, ApplicationError> {
        self.schema_repo.list().await.map_err(|e| {
            error!("Listing schemas failed: {}", e);
            ApplicationError::SchemaError(format!("Failed to list schemas: {}", e))
        })
    }

    /// Drops the collection from the index, its documents, then its schema.
    #[instrument(skip(self))]
    pub async fn delete_collection(&self, name: &str) -> Result<(), ApplicationError> {
        let schema = self.get_collection(name).await?;

        self.index.delete_collection(&schema.name).await?;
        self.doc_repo.delete_collection(&schema.name).await?;

        if !self.schema_repo.delete(&schema.name).await? {
            // Removed concurrently between the lookup and here.
            warn!(collection = %name, "Schema vanished during deletion");
            return Err(ApplicationError::CollectionNotFound(name.to_string()));
        }
        info!(collection = %name, "Collection deleted");
        Ok(())
    }
}

/// Documents validated per blocking task during a batch import.
const VALIDATION_CHUNK_SIZE: usize = 64;

/// A write resolved against the stored state, waiting for validation.
#[derive(Debug)]
struct PendingWrite {
    id: DocumentId,
    /// Operation the payload is validated under (an emplace of a new document is a create).
    op: IndexOperation,
    seq_id: u32,
    fields: Map<String, Value>,
    existing: Option<Document>,
}

impl PendingWrite {
    fn validate(
        &mut self,
        schema: &CollectionSchema,
        dirty_values: DirtyValues,
    ) -> Result<u32, ValidationError> {
        schema.validate(&mut self.fields, self.seq_id, self.op, dirty_values)
    }

    /// The document to store once the payload has been validated.
    fn into_document(self) -> Document {
        match self.existing {
            Some(mut doc) if self.op.is_partial() => {
                doc.merge(self.fields);
                doc
            }
            _ => Document::new(self.id, self.seq_id, self.fields),
        }
    }
}

/// Service responsible for admitting documents into collections.
pub struct IndexingService {
    schema_repo: Arc<dyn SchemaRepository>,
    doc_repo: Arc<dyn DocumentRepository>,
    index: Arc<dyn Index>,
    next_seq_id: AtomicU32,
    /// Policy used when neither the request nor the collection picks one.
    default_dirty_values: DirtyValues,
}

impl IndexingService {
    pub fn new(
        schema_repo: Arc<dyn SchemaRepository>,
        doc_repo: Arc<dyn DocumentRepository>,
        index: Arc<dyn Index>,
    ) -> Self {
        Self {
            schema_repo,
            doc_repo,
            index,
            next_seq_id: AtomicU32::new(0),
            default_dirty_values: DirtyValues::default(),
        }
    }

    pub fn with_default_dirty_values(mut self, dirty_values: DirtyValues) -> Self {
        self.default_dirty_values = dirty_values;
        self
    }

    async fn load_schema(
        &self,
        collection_name: &str,
    ) -> Result<Arc<CollectionSchema>, ApplicationError> {
        self.schema_repo
            .get(collection_name)
            .await?
            .ok_or_else(|| {
                warn!(collection = %collection_name, "Write failed: collection not found");
                ApplicationError::CollectionNotFound(collection_name.to_string())
            })
    }

    /// Resolves the operation and sequence id of a write against the stored document.
    async fn prepare(
        &self,
        collection_name: &str,
        request: IndexDocumentRequest,
        action: IndexOperation,
    ) -> Result<PendingWrite, ApplicationError> {
        if request.id.trim().is_empty() {
            return Err(ApplicationError::InvalidInput(
                "Document id cannot be empty".to_string(),
            ));
        }
        let id = DocumentId::new(request.id);
        let existing = self.doc_repo.get(collection_name, &id).await?;

        let (op, seq_id) = match (action, &existing) {
            (IndexOperation::Delete, _) => {
                return Err(ApplicationError::InvalidInput(
                    "Use the delete endpoint to remove documents".to_string(),
                ));
            }
            (IndexOperation::Create, Some(_)) => {
                return Err(ApplicationError::DocumentAlreadyExists(
                    id.as_str().to_string(),
                ));
            }
            (IndexOperation::Update, None) => {
                return Err(ApplicationError::NotFound(id.as_str().to_string()));
            }
            (IndexOperation::Emplace, None) => (IndexOperation::Create, self.assign_seq_id()),
            (IndexOperation::Create | IndexOperation::Upsert, None) => {
                (action, self.assign_seq_id())
            }
            (IndexOperation::Upsert | IndexOperation::Update | IndexOperation::Emplace, Some(doc)) => {
                (action, doc.seq_id())
            }
        };

        Ok(PendingWrite {
            id,
            op,
            seq_id,
            fields: request.fields,
            existing,
        })
    }

    fn assign_seq_id(&self) -> u32 {
        self.next_seq_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Stores a validated document. Creates only succeed while the id is free.
    async fn store(
        &self,
        collection_name: &str,
        document: &Document,
        op: IndexOperation,
    ) -> Result<(), ApplicationError> {
        let stored = if op == IndexOperation::Create {
            self.doc_repo.insert_new(collection_name, document).await
        } else {
            self.doc_repo
                .save(collection_name, document)
                .await
                .map(|()| true)
        };
        match stored {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(collection = %collection_name, doc_id = %document.id().as_str(), "Id taken by a concurrent write");
                Err(ApplicationError::DocumentAlreadyExists(
                    document.id().as_str().to_string(),
                ))
            }
            Err(e) => {
                error!(collection = %collection_name, doc_id = %document.id().as_str(), "Failed to save document to repository: {}", e);
                Err(ApplicationError::InfrastructureError(format!(
                    "Repository save failed: {}",
                    e
                )))
            }
        }
    }

    async fn commit(
        &self,
        collection_name: &str,
        document: &Document,
        op: IndexOperation,
    ) -> Result<(), ApplicationError> {
        self.store(collection_name, document, op).await?;
        if let Err(e) = self.index.index_document(collection_name, document).await {
            error!(collection = %collection_name, doc_id = %document.id().as_str(), "Failed to index document: {}", e);
            return Err(ApplicationError::IndexError {
                collection: collection_name.to_string(),
                source: Box::new(e),
            });
        }
        Ok(())
    }

    /// Validates and stores one document according to `options.action`.
    ///
    /// Returns the stored document, after coercion and, for partial writes,
    /// after merging into the existing document.
    #[instrument(skip(self, request), fields(collection = %collection_name, doc_id = %request.id, action = %options.action))]
    pub async fn write_document(
        &self,
        collection_name: &str,
        request: IndexDocumentRequest,
        options: WriteOptions,
    ) -> Result<Document, ApplicationError> {
        info!("Attempting to write document");

        let schema = self.load_schema(collection_name).await?;
        let dirty_values =
            schema.effective_dirty_values(options.dirty_values, self.default_dirty_values);
        let mut pending = self.prepare(collection_name, request, options.action).await?;

        // Validation is CPU-only and bounded by the document size.
        pending.validate(&schema, dirty_values).map_err(|e| {
            warn!(collection = %collection_name, %dirty_values, "Document rejected: {}", e);
            e
        })?;
        debug!(collection = %collection_name, %dirty_values, "Document validated against schema");

        let op = pending.op;
        let document = pending.into_document();
        self.commit(collection_name, &document, op).await?;
        info!(collection = %collection_name, doc_id = %document.id().as_str(), seq_id = document.seq_id(), "Document written successfully");
        Ok(document)
    }

    /// Handles a batch import.
    ///
    /// Every document is validated independently; documents that pass are
    /// stored even when others in the batch fail. Validation runs on the
    /// blocking pool, sharing one schema snapshot across tasks.
    #[instrument(skip(self, batch_request), fields(collection = %collection_name, batch_size = batch_request.len(), action = %options.action))]
    pub async fn import_documents(
        &self,
        collection_name: &str,
        batch_request: Vec<IndexDocumentRequest>,
        options: WriteOptions,
    ) -> Result<BatchResponse, ApplicationError> {
        info!("Attempting to import batch of documents");

        if batch_request.is_empty() {
            warn!("Received an empty batch request.");
            return Ok(BatchResponse {
                total_processed: 0,
                successful: 0,
                failed: 0,
                results: Vec::new(),
            });
        }

        let schema = self.load_schema(collection_name).await?;
        let dirty_values =
            schema.effective_dirty_values(options.dirty_values, self.default_dirty_values);
        let total_processed = batch_request.len();

        // 1. Resolve every request against stored state
        let mut results: Vec<Option<ImportResult>> = vec![None; total_processed];
        let mut pending = Vec::with_capacity(total_processed);
        let mut seen = HashSet::new();
        for (position, request) in batch_request.into_iter().enumerate() {
            let id = request.id.clone();
            if !seen.insert(id.clone()) {
                results[position] = Some(failed_import(
                    id.clone(),
                    format!("Document id '{}' appears more than once in the batch", id),
                ));
                continue;
            }
            match self.prepare(collection_name, request, options.action).await {
                Ok(write) => pending.push((position, write)),
                Err(e) => results[position] = Some(failed_import(id, e.to_string())),
            }
        }

        // 2. Validate concurrently
        let mut handles = Vec::new();
        while !pending.is_empty() {
            let chunk: Vec<(usize, PendingWrite)> = pending
                .drain(..pending.len().min(VALIDATION_CHUNK_SIZE))
                .collect();
            let schema = Arc::clone(&schema);
            handles.push(tokio::task::spawn_blocking(move || {
                chunk
                    .into_iter()
                    .map(|(position, mut write)| {
                        let outcome = write.validate(&schema, dirty_values);
                        (position, write, outcome)
                    })
                    .collect::<Vec<_>>()
            }));
        }

        let mut valid_documents = Vec::new();
        for handle in handles {
            let validated = handle.await.map_err(|e| {
                ApplicationError::InfrastructureError(format!(
                    "Validation task failed: {}",
                    e // JoinError
                ))
            })?;
            for (position, write, outcome) in validated {
                match outcome {
                    Ok(_) => {
                        let op = write.op;
                        valid_documents.push((position, op, write.into_document()));
                    }
                    Err(e) => {
                        debug!(doc_id = %write.id.as_str(), "Document in batch failed validation: {}", e);
                        results[position] = Some(failed_import(
                            write.id.as_str().to_string(),
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        // 3. Store the valid documents. Creates go one by one so a taken id
        // fails only its own entry.
        let mut replacements = Vec::new();
        let mut stored = Vec::with_capacity(valid_documents.len());
        for (position, op, doc) in valid_documents {
            if op != IndexOperation::Create {
                replacements.push(doc.clone());
                stored.push((position, doc));
                continue;
            }
            match self.store(collection_name, &doc, op).await {
                Ok(()) => stored.push((position, doc)),
                Err(e @ ApplicationError::DocumentAlreadyExists(_)) => {
                    results[position] =
                        Some(failed_import(doc.id().as_str().to_string(), e.to_string()));
                }
                Err(e) => return Err(e),
            }
        }
        if let Err(e) = self.doc_repo.save_batch(collection_name, &replacements).await {
            error!(collection = %collection_name, count = replacements.len(), "Failed to save document batch to repository: {}", e);
            return Err(ApplicationError::InfrastructureError(format!(
                "Repository batch save failed: {}",
                e
            )));
        }

        // 4. Index everything that was stored
        let documents: Vec<Document> = stored.iter().map(|(_, doc)| doc.clone()).collect();
        if let Err(e) = self.index.index_batch(collection_name, &documents).await {
            error!(collection = %collection_name, count = documents.len(), "Failed to index document batch: {}", e);
            return Err(ApplicationError::IndexError {
                collection: collection_name.to_string(),
                source: Box::new(e),
            });
        }
        for (position, doc) in stored {
            results[position] = Some(ImportResult {
                success: true,
                id: doc.id().as_str().to_string(),
                error: None,
            });
        }

        let results: Vec<ImportResult> = results.into_iter().flatten().collect();
        let successful = results.iter().filter(|r| r.success).count();
        info!(collection = %collection_name, successful, failed = total_processed - successful, "Batch import finished");

        Ok(BatchResponse {
            total_processed,
            successful,
            failed: total_processed - successful,
            results,
        })
    }

    #[instrument(skip(self), fields(collection = %collection_name, doc_id = %id))]
    pub async fn get_document(
        &self,
        collection_name: &str,
        id: &str,
    ) -> Result<Document, ApplicationError> {
        self.load_schema(collection_name).await?;
        let doc_id = DocumentId::new(id.to_string());
        self.doc_repo
            .get(collection_name, &doc_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(id.to_string()))
    }

    /// Removes a document from the index and the store. Deletes never run
    /// field validation.
    #[instrument(skip(self), fields(collection = %collection_name, doc_id = %id))]
    pub async fn delete_document(
        &self,
        collection_name: &str,
        id: &str,
    ) -> Result<(), ApplicationError> {
        self.load_schema(collection_name).await?;
        let doc_id = DocumentId::new(id.to_string());

        self.index
            .delete_document(collection_name, &doc_id)
            .await
            .map_err(|e| ApplicationError::IndexError {
                collection: collection_name.to_string(),
                source: Box::new(e),
            })?;

        if !self.doc_repo.delete(collection_name, &doc_id).await? {
            debug!("No stored document to delete");
            return Err(ApplicationError::NotFound(id.to_string()));
        }
        info!("Document deleted");
        Ok(())
    }
}

fn failed_import(id: String, error: String) -> ImportResult {
    ImportResult {
        success: false,
        id,
        error: Some(error),
    }
}
