//! Handlers for collections and archives.

use axum::{
    extract::{rejection::PathRejection, Path, State},
    response::IntoResponse,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error::AppResult, json::JsonBody};
use crate::{model::ArchiveId, state::AppState};

/// Message recorded for archives created without a request body.
pub const DEFAULT_ARCHIVE_MESSAGE: &str = "API created archive";

/// An archive as listed in a collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchiveInfo {
    pub id: u64,
    pub documents: Vec<String>,
}

/// GET handler listing the archives of a collection.
pub async fn list(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> AppResult<impl IntoResponse> {
    let Path(collection) = path?;
    let ctx = state.call_context();
    let listings = state
        .service
        .list_archives_with_documents(&ctx, &collection)
        .await?;
    let archives: Vec<_> = listings
        .into_iter()
        .map(|listing| ArchiveInfo {
            id: listing.archive.id.as_u64(),
            documents: listing.documents.into_iter().collect(),
        })
        .collect();
    Ok(JsonBody::ok(archives))
}

/// POST handler creating the next archive of a collection.
///
/// The id in the path is ignored, ids are allocated by the registry. A non-empty UTF-8 body
/// becomes the archive message.
pub async fn create(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let Path((collection, requested)) = path?;
    let message = match std::str::from_utf8(&body) {
        Ok(message) if !message.trim().is_empty() => message.trim(),
        _ => DEFAULT_ARCHIVE_MESSAGE,
    };
    let ctx = state.call_context();
    let archive = state
        .service
        .create_archive(&ctx, &collection, message)
        .await?;
    debug!(%collection, %requested, id = %archive.id, "archive created via api");
    Ok(JsonBody::ok("OK"))
}

/// GET handler listing the documents of an archive.
pub async fn documents(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> AppResult<impl IntoResponse> {
    let Path((collection, id)) = path?;
    let id: ArchiveId = id.parse()?;
    let ctx = state.call_context();
    let documents = state.service.list_documents(&ctx, &collection, id).await?;
    Ok(JsonBody::ok(documents))
}

/// DELETE handler removing an archive.
pub async fn delete(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> AppResult<impl IntoResponse> {
    let Path((collection, id)) = path?;
    let id: ArchiveId = id.parse()?;
    let ctx = state.call_context();
    state.service.delete_archive(&ctx, &collection, id).await?;
    Ok(JsonBody::ok("OK"))
}
