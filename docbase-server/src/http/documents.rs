//! Handlers for documents and their revisions.

use axum::{
    body::Body,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{error::AppResult, json::JsonBody};
use crate::{model::ArchiveId, state::AppState};

#[derive(Debug, Deserialize)]
pub struct GetParams {
    /// Revision to fetch instead of the head.
    rev: Option<String>,
}

/// A revision as listed in a document's history.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevisionInfo {
    pub id: String,
    pub created_at: String,
}

type DocumentPath = Result<Path<(String, String, String)>, PathRejection>;

fn parse_path(path: DocumentPath) -> AppResult<(String, ArchiveId, String)> {
    let Path((collection, id, key)) = path?;
    Ok((collection, id.parse()?, key))
}

/// GET handler for the raw bytes of a document.
///
/// The body is sent without a content type. Use `?rev=<id>` to fetch an older revision.
pub async fn get(
    State(state): State<AppState>,
    path: DocumentPath,
    query: Result<Query<GetParams>, QueryRejection>,
) -> AppResult<Response> {
    let (collection, id, key) = parse_path(path)?;
    let Query(params) = query?;
    let ctx = state.call_context();
    let payload = state
        .service
        .get_document(&ctx, &collection, id, &key, params.rev.as_deref())
        .await?;
    Ok(Response::new(Body::from(payload)))
}

/// GET handler for the history of a document, newest revision first.
pub async fn revisions(
    State(state): State<AppState>,
    path: DocumentPath,
) -> AppResult<impl IntoResponse> {
    let (collection, id, key) = parse_path(path)?;
    let ctx = state.call_context();
    let history = state.service.history(&ctx, &collection, id, &key).await?;
    let revisions: Vec<_> = history
        .into_iter()
        .map(|revision| RevisionInfo {
            id: revision.id.to_string(),
            created_at: revision.created_at.to_rfc3339(),
        })
        .collect();
    Ok(JsonBody::ok(revisions))
}

/// POST and PUT handler writing a new revision of a document from the request body.
pub async fn put(
    State(state): State<AppState>,
    path: DocumentPath,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let (collection, id, key) = parse_path(path)?;
    let ctx = state.call_context();
    state
        .service
        .put_document(&ctx, &collection, id, &key, body)
        .await?;
    Ok(JsonBody::ok("OK"))
}

/// DELETE handler appending a tombstone to a document.
pub async fn delete(
    State(state): State<AppState>,
    path: DocumentPath,
) -> AppResult<impl IntoResponse> {
    let (collection, id, key) = parse_path(path)?;
    let ctx = state.call_context();
    state
        .service
        .delete_document(&ctx, &collection, id, &key)
        .await?;
    Ok(JsonBody::ok("OK"))
}
