use std::collections::BTreeMap;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::info;

use super::{
    auth::{caller, require_user},
    models::{
        AddFileRequest, CollectionCreated, CreateCollectionRequest, CreateDatasetRequest,
        DatasetCreated, DatasetQuery, Envelope, HealthResponse, MessageResponse, MultipartQuery,
        UploadQuery, UploadUrlsQuery, UploadUrlsResponse,
    },
    state::AppState,
    utils::{parse_completed_parts, parse_content_type, read_limited_body, resolve_dataset},
};
use crate::api::error::ApiError;
use crate::catalog::{CollectionId, NodeRef};
use crate::drivers::{DatasetTarget, Principal};
use crate::identifier::{PersistentId, StorageIdentifier};
use crate::ingest::{CommitRequest, FileMetadata};

type ApiResult<T> = Result<T, ApiError>;

fn ok<T: serde::Serialize>(status: StatusCode, data: T) -> impl IntoResponse {
    (status, Json(Envelope::ok(data)))
}

fn authenticated(state: &AppState, headers: &HeaderMap) -> ApiResult<Principal> {
    let principal = caller(state.authenticator.as_ref(), headers)?;
    require_user(&principal)?;
    Ok(principal)
}

fn require_json(headers: &HeaderMap) -> ApiResult<()> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    parse_content_type(content_type)?;
    Ok(())
}

/// Resolve the dataset and its driver, releasing the catalog before any
/// backend call is made.
async fn dataset_target(
    state: &AppState,
    segment: &str,
    persistent_id: Option<&str>,
) -> ApiResult<DatasetTarget> {
    let catalog = state.catalog.read().await;
    let dataset = resolve_dataset(&catalog, segment, persistent_id)?;
    Ok(state.registry.dataset_target(&catalog, dataset)?)
}

async fn collection_id(state: &AppState, alias: &str) -> ApiResult<CollectionId> {
    Ok(state.catalog.read().await.collection_by_alias(alias)?.id)
}

/// `GET /api/admin/dataverse/storageDrivers`
pub async fn list_drivers(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let principal = caller(state.authenticator.as_ref(), &headers)?;
    let drivers = state.registry.list(&principal)?;
    Ok(ok(StatusCode::OK, drivers))
}

/// `GET /api/admin/dataverse/{alias}/storageDriver`
///
/// The collection's own binding, `"undefined"` when it inherits.
pub async fn get_collection_driver(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    caller(state.authenticator.as_ref(), &headers)?;
    let catalog = state.catalog.read().await;
    let collection = catalog.collection_by_alias(&alias)?.id;
    let binding = state
        .registry
        .binding(&catalog, NodeRef::Collection(collection))?;
    Ok(ok(StatusCode::OK, MessageResponse::new(binding.as_str())))
}

/// `PUT /api/admin/dataverse/{alias}/storageDriver`, body is the driver label
pub async fn set_collection_driver(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let principal = caller(state.authenticator.as_ref(), &headers)?;
    let label = body.trim();

    let mut catalog = state.catalog.write().await;
    let collection = catalog.collection_by_alias(&alias)?.id;
    let driver_id = state
        .registry
        .set_collection_binding(&principal, &mut catalog, collection, label)?;

    Ok(ok(
        StatusCode::OK,
        MessageResponse::new(format!("Storage set to: {label}/{driver_id}")),
    ))
}

/// `DELETE /api/admin/dataverse/{alias}/storageDriver`
pub async fn clear_collection_driver(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let principal = caller(state.authenticator.as_ref(), &headers)?;

    let mut catalog = state.catalog.write().await;
    let collection = catalog.collection_by_alias(&alias)?.id;
    state
        .registry
        .clear_collection_binding(&principal, &mut catalog, collection)?;
    let default = state.registry.default_driver()?;

    Ok(ok(
        StatusCode::OK,
        MessageResponse::new(format!("Storage reset to default: {}", default.id())),
    ))
}

/// `GET /api/datasets/{id}/storageDriver`
pub async fn get_dataset_driver(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DatasetQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    caller(state.authenticator.as_ref(), &headers)?;
    let catalog = state.catalog.read().await;
    let dataset = resolve_dataset(&catalog, &id, query.persistent_id.as_deref())?;
    let binding = state.registry.binding(&catalog, NodeRef::Dataset(dataset))?;
    Ok(ok(StatusCode::OK, MessageResponse::new(binding.as_str())))
}

/// `PUT /api/datasets/{id}/storageDriver`, body is the driver label
pub async fn set_dataset_driver(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DatasetQuery>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<impl IntoResponse> {
    let principal = caller(state.authenticator.as_ref(), &headers)?;
    let label = body.trim();

    let mut catalog = state.catalog.write().await;
    let dataset = resolve_dataset(&catalog, &id, query.persistent_id.as_deref())?;
    let driver_id = state
        .registry
        .set_dataset_binding(&principal, &mut catalog, dataset, label)?;

    Ok(ok(
        StatusCode::OK,
        MessageResponse::new(format!("Storage set to: {label}/{driver_id}")),
    ))
}

/// `DELETE /api/datasets/{id}/storageDriver`
pub async fn clear_dataset_driver(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DatasetQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let principal = caller(state.authenticator.as_ref(), &headers)?;

    let mut catalog = state.catalog.write().await;
    let dataset = resolve_dataset(&catalog, &id, query.persistent_id.as_deref())?;
    state
        .registry
        .clear_dataset_binding(&principal, &mut catalog, dataset)?;
    let resolved = state.registry.resolve(&catalog, NodeRef::Dataset(dataset))?;

    Ok(ok(
        StatusCode::OK,
        MessageResponse::new(format!("Storage reset to: {}", resolved.id())),
    ))
}

/// `GET /api/datasets/{id}/uploadurls?size=N`
pub async fn upload_urls(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UploadUrlsQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    let target = dataset_target(&state, &id, query.persistent_id.as_deref()).await?;

    let session = state
        .coordinator
        .request_upload_urls(&target, query.size)
        .await?;
    let response = UploadUrlsResponse::from_session(&session, &target.persistent_id.to_string());

    Ok(ok(StatusCode::OK, response))
}

/// Dataset and identifier named by the multipart query parameters.
async fn multipart_target(
    state: &AppState,
    query: &MultipartQuery,
) -> ApiResult<(DatasetTarget, StorageIdentifier)> {
    let pid: PersistentId = query.globalid.parse()?;
    let identifier: StorageIdentifier = query.storageidentifier.parse()?;

    let catalog = state.catalog.read().await;
    let dataset = catalog.dataset_by_persistent_id(&pid)?.id;
    let target = state.registry.dataset_target(&catalog, dataset)?;
    Ok((target, identifier))
}

/// `PUT /api/datasets/mpupload?globalid=&uploadid=&storageidentifier=`
///
/// Body maps part numbers to the ETags the backend returned for them.
pub async fn complete_multipart(
    State(state): State<AppState>,
    Query(query): Query<MultipartQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    let etags: BTreeMap<String, String> = serde_json::from_slice(&body)?;
    let parts = parse_completed_parts(etags)?;
    let (target, identifier) = multipart_target(&state, &query).await?;

    state
        .coordinator
        .complete_multipart(&target, &identifier, &query.uploadid, parts)
        .await?;

    Ok(ok(
        StatusCode::OK,
        MessageResponse::new(format!("Multipart upload completed for {identifier}")),
    ))
}

/// `DELETE /api/datasets/mpupload?globalid=&uploadid=&storageidentifier=`
pub async fn abort_multipart(
    State(state): State<AppState>,
    Query(query): Query<MultipartQuery>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    let (target, identifier) = multipart_target(&state, &query).await?;

    state
        .coordinator
        .abort_multipart(&target, &identifier, &query.uploadid)
        .await?;

    Ok(ok(
        StatusCode::OK,
        MessageResponse::new(format!("Multipart upload aborted for {identifier}")),
    ))
}

/// `POST /api/datasets/{id}/add`
///
/// Registers an object the client uploaded directly. The record is only
/// written once the backend shows the object.
pub async fn add_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DatasetQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    require_json(&headers)?;
    let request: AddFileRequest = serde_json::from_slice(&body)?;
    let target = dataset_target(&state, &id, query.persistent_id.as_deref()).await?;

    let commit = CommitRequest {
        storage_identifier: request.storage_identifier.clone(),
        declared_size: request.file_size,
        checksum: request.checksum.clone(),
        metadata: request.metadata(),
    };
    let record = state.ingest.commit_remote_file(&target, commit).await?;

    Ok(ok(StatusCode::OK, record))
}

/// `POST /api/datasets/{id}/upload?fileName=`
///
/// Streams the body through the server for drivers without direct upload.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    let target = dataset_target(&state, &id, query.persistent_id.as_deref()).await?;

    let max = usize::try_from(state.config.server.max_upload_bytes.as_u64()).unwrap_or(usize::MAX);
    let data = read_limited_body(body, max).await?;

    let metadata = FileMetadata {
        file_name: query.file_name,
        directory_label: query.directory_label,
        mime_type: query.mime_type,
        ..FileMetadata::default()
    };
    let record = state.ingest.ingest_bytes(&target, data, metadata).await?;

    Ok(ok(StatusCode::OK, record))
}

/// `GET /api/files/{id}`
pub async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    caller(state.authenticator.as_ref(), &headers)?;
    let record = state.ingest.get_file(id)?;
    Ok(ok(StatusCode::OK, record))
}

/// `DELETE /api/files/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    state.ingest.delete_file(id).await?;
    Ok(ok(
        StatusCode::OK,
        MessageResponse::new(format!("File {id} deleted")),
    ))
}

/// `POST /api/dataverses/{alias}`, creates a child collection of `alias`
pub async fn create_collection(
    State(state): State<AppState>,
    Path(parent): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    require_json(&headers)?;
    let request: CreateCollectionRequest = serde_json::from_slice(&body)?;

    let parent_id = collection_id(&state, &parent).await?;
    state
        .catalog
        .write()
        .await
        .create_collection(&request.alias, parent_id)?;

    info!(alias = %request.alias, parent = %parent, "Created collection");
    Ok(ok(
        StatusCode::CREATED,
        CollectionCreated {
            alias: request.alias,
            parent,
        },
    ))
}

/// `POST /api/dataverses/{alias}/datasets`
pub async fn create_dataset(
    State(state): State<AppState>,
    Path(alias): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    authenticated(&state, &headers)?;
    require_json(&headers)?;
    let request: CreateDatasetRequest = serde_json::from_slice(&body)?;
    let pid: PersistentId = request.persistent_id.parse()?;

    let mut catalog = state.catalog.write().await;
    let collection = catalog.collection_by_alias(&alias)?.id;
    let id = catalog.create_dataset(collection, pid.clone())?;
    let driver = state.registry.resolve(&catalog, NodeRef::Dataset(id))?;

    info!(dataset = %id, persistent_id = %pid, driver = %driver.id(), "Created dataset");
    Ok(ok(
        StatusCode::CREATED,
        DatasetCreated {
            id,
            persistent_id: pid.to_string(),
            storage_driver: driver.id().to_string(),
        },
    ))
}

/// Liveness plus counters (GET /health)
pub async fn health(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let ledger = state
        .ingest
        .ledger()
        .stats()
        .map_err(crate::Error::from)?;
    let response = HealthResponse {
        status: "healthy".to_string(),
        drivers: state.registry.drivers().count(),
        pending_uploads: state.coordinator.sessions().len(),
        ledger,
        metrics: state.metrics.snapshot(),
    };
    Ok(Json(response))
}
