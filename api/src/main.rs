use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json as JsonResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use application::{
    ApplicationError, CollectionResponse, DocumentResponse, IndexDocumentRequest,
    IndexingService, ListCollectionsResponse, SchemaService, WriteOptions,
};
use domain::{CollectionSchema, DirtyValues, IndexOperation};
use infrastructure::{InMemoryDocumentRepository, InMemoryIndex, InMemorySchemaRepository};

mod config;

use config::AppConfig;

#[derive(Clone)]
struct AppState {
    schema_service: Arc<SchemaService>,
    indexing_service: Arc<IndexingService>,
}

impl AppState {
    /// Wires the in-memory infrastructure into the application services.
    fn in_memory(config: &AppConfig) -> Self {
        let schema_repository = Arc::new(InMemorySchemaRepository::new());
        let document_repository = Arc::new(InMemoryDocumentRepository::new());
        let index = Arc::new(InMemoryIndex::new());

        let schema_service = Arc::new(SchemaService::new(
            schema_repository.clone(),
            index.clone(),
            document_repository.clone(),
        ));
        let indexing_service = Arc::new(
            IndexingService::new(schema_repository, document_repository, index)
                .with_default_dirty_values(config.dirty_values),
        );
        Self {
            schema_service,
            indexing_service,
        }
    }
}

#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    let config = AppConfig::from_env();
    let app = app(AppState::in_memory(&config));
    info!(dirty_values = %config.dirty_values, "Application services and routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // Collection Management Endpoints
        .route(
            "/collections",
            post(create_collection_handler).get(list_collections_handler),
        )
        .route(
            "/collections/:collection_name",
            get(get_collection_handler).delete(delete_collection_handler),
        )
        // Document Endpoints
        .route(
            "/collections/:collection_name/documents",
            post(write_document_handler),
        )
        .route(
            "/collections/:collection_name/documents/import",
            post(import_documents_handler),
        )
        .route(
            "/collections/:collection_name/documents/:doc_id",
            get(get_document_handler)
                .patch(update_document_handler)
                .delete(delete_document_handler),
        )
        .with_state(state)
}

// --- API Handlers ---

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

// --- Collection Handlers ---

/// Handler for creating a new collection (POST /collections).
async fn create_collection_handler(
    State(state): State<AppState>,
    Json(payload): Json<CollectionSchema>,
) -> Response {
    info!(collection_name = %payload.name, "Received request to create collection");
    match state.schema_service.create_collection(payload).await {
        Ok(schema) => {
            info!(collection = %schema.name, "Collection created successfully via handler");
            (StatusCode::CREATED, JsonResponse((*schema).clone())).into_response()
        }
        Err(e) => {
            error!("Failed to create collection via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for listing all collections (GET /collections).
async fn list_collections_handler(State(state): State<AppState>) -> Response {
    info!("Received request to list collections");
    match state.schema_service.list_collections().await {
        Ok(names) => {
            let response = ListCollectionsResponse {
                collections: names
                    .into_iter()
                    .map(|name| CollectionResponse { name })
                    .collect(),
            };
            (StatusCode::OK, JsonResponse(response)).into_response()
        }
        Err(e) => {
            error!("Failed to list collections via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for getting a collection schema (GET /collections/:collection_name).
async fn get_collection_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    info!(collection = %name, "Received request to get collection schema");
    match state.schema_service.get_collection(&name).await {
        Ok(schema) => (StatusCode::OK, JsonResponse((*schema).clone())).into_response(),
        Err(e) => {
            error!(collection = %name, "Failed to get collection via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for deleting a collection (DELETE /collections/:collection_name).
async fn delete_collection_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    info!(collection = %name, "Received request to delete collection");
    match state.schema_service.delete_collection(&name).await {
        Ok(()) => (StatusCode::NO_CONTENT, "").into_response(),
        Err(e) => {
            error!(collection = %name, "Failed to delete collection via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

// --- Document Handlers ---

/// Handler for writing a document (POST /collections/:collection_name/documents?action=&dirty_values=).
async fn write_document_handler(
    State(state): State<AppState>,
    Path(collection_name): Path<String>,
    options: Result<Query<WriteOptions>, QueryRejection>,
    Json(payload): Json<IndexDocumentRequest>,
) -> Response {
    let options = match query_params(options) {
        Ok(options) => options,
        Err(response) => return response,
    };
    info!(collection = %collection_name, doc_id = %payload.id, action = %options.action, "Received request to write document");
    let status = match options.action {
        IndexOperation::Create => StatusCode::CREATED,
        _ => StatusCode::OK,
    };
    match state
        .indexing_service
        .write_document(&collection_name, payload, options)
        .await
    {
        Ok(document) => (status, JsonResponse(DocumentResponse::from(document))).into_response(),
        Err(e) => {
            warn!(collection = %collection_name, "Failed to write document via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for a batch import (POST /collections/:collection_name/documents/import).
///
/// Responds 200 as long as the batch was processed; per-document failures
/// are reported in the body.
async fn import_documents_handler(
    State(state): State<AppState>,
    Path(collection_name): Path<String>,
    options: Result<Query<WriteOptions>, QueryRejection>,
    Json(batch_payload): Json<Vec<IndexDocumentRequest>>,
) -> Response {
    let options = match query_params(options) {
        Ok(options) => options,
        Err(response) => return response,
    };
    info!(collection = %collection_name, batch_size = batch_payload.len(), action = %options.action, "Received request to import documents");
    match state
        .indexing_service
        .import_documents(&collection_name, batch_payload, options)
        .await
    {
        Ok(batch_response) => {
            info!(collection = %collection_name, processed = batch_response.total_processed, successful = batch_response.successful, "Batch processed via handler");
            (StatusCode::OK, JsonResponse(batch_response)).into_response()
        }
        Err(e) => {
            error!(collection = %collection_name, "Batch import failed via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

#[derive(Deserialize, Debug, Default)]
struct UpdateParams {
    #[serde(default)]
    dirty_values: Option<DirtyValues>,
}

/// Handler for a partial update (PATCH /collections/:collection_name/documents/:doc_id).
async fn update_document_handler(
    State(state): State<AppState>,
    Path((collection_name, doc_id)): Path<(String, String)>,
    params: Result<Query<UpdateParams>, QueryRejection>,
    Json(fields): Json<Map<String, Value>>,
) -> Response {
    let params = match query_params(params) {
        Ok(params) => params,
        Err(response) => return response,
    };
    info!(collection = %collection_name, doc_id = %doc_id, "Received request to update document");
    let request = IndexDocumentRequest { id: doc_id, fields };
    let options = WriteOptions {
        action: IndexOperation::Update,
        dirty_values: params.dirty_values,
    };
    match state
        .indexing_service
        .write_document(&collection_name, request, options)
        .await
    {
        Ok(document) => {
            (StatusCode::OK, JsonResponse(DocumentResponse::from(document))).into_response()
        }
        Err(e) => {
            warn!(collection = %collection_name, "Failed to update document via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for fetching a document (GET /collections/:collection_name/documents/:doc_id).
async fn get_document_handler(
    State(state): State<AppState>,
    Path((collection_name, doc_id)): Path<(String, String)>,
) -> Response {
    match state
        .indexing_service
        .get_document(&collection_name, &doc_id)
        .await
    {
        Ok(document) => {
            (StatusCode::OK, JsonResponse(DocumentResponse::from(document))).into_response()
        }
        Err(e) => map_application_error_to_response(e),
    }
}

/// Handler for deleting a document (DELETE /collections/:collection_name/documents/:doc_id).
async fn delete_document_handler(
    State(state): State<AppState>,
    Path((collection_name, doc_id)): Path<(String, String)>,
) -> Response {
    info!(collection = %collection_name, doc_id = %doc_id, "Received request to delete document");
    match state
        .indexing_service
        .delete_document(&collection_name, &doc_id)
        .await
    {
        Ok(()) => (StatusCode::NO_CONTENT, "").into_response(),
        Err(e) => {
            error!(collection = %collection_name, doc_id = %doc_id, "Failed to delete document via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Unwraps query parameters, turning a malformed `action` or `dirty_values`
/// into the same `{"message": ...}` 400 as other invalid input.
fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, Response> {
    query.map(|Query(params)| params).map_err(|rejection| {
        warn!("Rejected query string: {}", rejection.body_text());
        map_application_error_to_response(ApplicationError::InvalidInput(rejection.body_text()))
    })
}

/// Maps ApplicationError to an HTTP status code and a `{"message": ...}` body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, message) = match err {
        ApplicationError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::Validation(validation_err) => (
            StatusCode::from_u16(validation_err.code()).unwrap_or(StatusCode::BAD_REQUEST),
            validation_err.to_string(),
        ),
        ApplicationError::DomainError(domain_err) => {
            warn!("Domain validation failed: {}", domain_err);
            (StatusCode::BAD_REQUEST, domain_err.to_string())
        }
        // --- Collection Errors ---
        ApplicationError::CollectionNotFound(name) => (
            StatusCode::NOT_FOUND,
            format!("Collection '{}' not found", name),
        ),
        ApplicationError::CollectionAlreadyExists(name) => (
            StatusCode::CONFLICT,
            format!("Collection '{}' already exists", name),
        ),
        ApplicationError::SchemaError(msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Schema operation failed: {}", msg),
        ),
        // --- Document Errors ---
        ApplicationError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            format!("Document '{}' not found", id),
        ),
        ApplicationError::DocumentAlreadyExists(id) => (
            StatusCode::CONFLICT,
            format!("A document with id '{}' already exists", id),
        ),
        ApplicationError::IndexError { collection, source } => {
            error!(collection = %collection, "Indexing error: {}", source);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Indexing failed in collection '{}'", collection),
            )
        }
        // --- Other Errors ---
        ApplicationError::InfrastructureError(msg) => {
            error!("Underlying infrastructure error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal server error occurred".to_string(),
            )
        }
    };
    (status, JsonResponse(json!({ "message": message }))).into_response()
}
