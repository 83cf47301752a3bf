//! Document CRUD, listing and file download endpoints.

use std::io::ErrorKind;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::auth::{Caller, Visibility};
use crate::error::{ApiError, FieldError};
use crate::models::{
    Document, DocumentListResponse, DocumentResponse, DocumentStatus, DocumentType,
    MessageResponse,
};
use crate::routes::AppState;
use crate::storage::{DocumentQuery, SortSpec, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::upload::{self, StoredFile};
use crate::validation;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub status: Option<String>,
    pub document_type: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

impl ListParams {
    pub fn into_query(self, scope: Visibility) -> Result<DocumentQuery, ApiError> {
        let mut query = DocumentQuery::new(scope);
        let mut errors = Vec::new();

        if let Some(raw) = present(&self.status) {
            match raw.parse::<DocumentStatus>() {
                Ok(status) => query.status = Some(status),
                Err(e) => errors.push(FieldError::new("status", e)),
            }
        }
        if let Some(raw) = present(&self.document_type) {
            match raw.parse::<DocumentType>() {
                Ok(document_type) => query.document_type = Some(document_type),
                Err(e) => errors.push(FieldError::new("documentType", e)),
            }
        }
        if let Some(raw) = present(&self.sort_by) {
            match raw.parse::<SortSpec>() {
                Ok(sort) => query.sort = sort,
                Err(e) => errors.push(FieldError::new("sortBy", e)),
            }
        }
        if let Some(raw) = present(&self.page) {
            match raw.parse::<usize>() {
                Ok(page) if page >= 1 => query.page = page,
                _ => errors.push(FieldError::new("page", "Page must be a positive integer")),
            }
        }
        if let Some(raw) = present(&self.limit) {
            match raw.parse::<usize>() {
                Ok(limit) if (1..=MAX_PAGE_SIZE).contains(&limit) => query.limit = limit,
                _ => errors.push(FieldError::new(
                    "limit",
                    format!("Limit must be between 1 and {MAX_PAGE_SIZE}"),
                )),
            }
        }
        query.search = self
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if errors.is_empty() {
            Ok(query)
        } else {
            Err(ApiError::Validation(errors))
        }
    }
}

async fn load(state: &AppState, id: &str) -> Result<Document, ApiError> {
    state
        .documents
        .get(id)
        .await
        .map_err(|e| ApiError::storage("Failed to load document", e))?
        .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))
}

async fn load_for(state: &AppState, caller: &Caller, id: &str) -> Result<Document, ApiError> {
    let document = load(state, id).await?;
    caller.authorize(&document)?;
    Ok(document)
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id))]
pub async fn create_document(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    let mut form = state.uploads.read_form(&mut multipart).await?;
    let fields = validation::new_document(&form)?;

    let file_ref = form.file.as_ref().map(StoredFile::file_ref);
    let document = state
        .documents
        .insert(Document::new(fields, caller.id.clone(), file_ref))
        .await
        .map_err(|e| ApiError::storage("Failed to create document", e))?;

    if let Some(file) = form.file.take() {
        file.persist();
    }

    tracing::info!(document_id = %document.id, has_file = document.file.is_some(), "document created");

    let rule = state.status_rule();
    Ok((
        StatusCode::CREATED,
        Json(DocumentResponse {
            success: true,
            document: state.view(document, &rule).await,
        }),
    ))
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id))]
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let query = params.into_query(caller.scope())?;
    let rule = state.status_rule();

    let page = state
        .documents
        .query(&query, &rule)
        .await
        .map_err(|e| ApiError::storage("Failed to list documents", e))?;

    let documents = state.views(page.documents, &rule).await;

    Ok(Json(DocumentListResponse {
        success: true,
        count: documents.len(),
        documents,
        total: page.total,
        page: page.page,
        pages: page.pages,
    }))
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id, document_id = %id))]
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = load_for(&state, &caller, &id).await?;
    let rule = state.status_rule();

    Ok(Json(DocumentResponse {
        success: true,
        document: state.view(document, &rule).await,
    }))
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id, document_id = %id))]
pub async fn update_document(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<DocumentResponse>, ApiError> {
    let existing = load_for(&state, &caller, &id).await?;

    let mut form = state.uploads.read_form(&mut multipart).await?;
    let patch = validation::document_patch(&form)?;
    let mut updated = validation::patched(&existing, patch)?;
    if let Some(file) = form.file.as_ref() {
        updated.file = Some(file.file_ref());
    }

    let previous = state
        .documents
        .replace(updated.clone())
        .await
        .map_err(|e| ApiError::storage("Failed to update document", e))?
        .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))?;

    if let Some(file) = form.file.take() {
        file.persist();
        if let Some(old) = previous.file {
            upload::discard(&old.path).await;
        }
    }

    tracing::info!("document updated");

    let rule = state.status_rule();
    Ok(Json(DocumentResponse {
        success: true,
        document: state.view(updated, &rule).await,
    }))
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id, document_id = %id))]
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    load_for(&state, &caller, &id).await?;

    let removed = state
        .documents
        .remove(&id)
        .await
        .map_err(|e| ApiError::storage("Failed to delete document", e))?
        .ok_or_else(|| ApiError::NotFound("Document not found".to_string()))?;

    if let Some(file) = removed.file {
        upload::discard(&file.path).await;
    }

    tracing::info!("document deleted");

    Ok(Json(MessageResponse::ok("Document deleted successfully")))
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id, document_id = %id))]
pub async fn download_document(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let document = load_for(&state, &caller, &id).await?;
    let file = document
        .file
        .ok_or_else(|| ApiError::NotFound("No file attached to this document".to_string()))?;

    let content = match tokio::fs::read(&file.path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %file.path.display(), "stored file missing on disk");
            return Err(ApiError::NotFound("File not found on server".to_string()));
        }
        Err(e) => return Err(ApiError::storage("Failed to read file", e.into())),
    };

    let mime = if file.mime_type.is_empty() {
        mime_guess::from_path(&file.original_name)
            .first_or_octet_stream()
            .to_string()
    } else {
        file.mime_type.clone()
    };

    Ok((
        [
            (header::CONTENT_TYPE, mime),
            (
                header::CONTENT_DISPOSITION,
                content_disposition(&file.original_name),
            ),
        ],
        content,
    )
        .into_response())
}

/// `attachment` header with an ASCII fallback name and an RFC 5987 encoded one.
fn content_disposition(original_name: &str) -> String {
    let fallback: String = original_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    let encoded: String = original_name
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect();

    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
