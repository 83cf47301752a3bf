use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::analytics;
use crate::auth;
use crate::config::Config;
use crate::documents_api;
use crate::models::{Document, DocumentView, StatusRule};
use crate::storage::DocumentStore;
use crate::upload::UploadPolicy;
use crate::user_storage::UserStorage;

/// Room for the text fields and multipart framing around an upload.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub struct AppState {
    pub config: Config,
    pub documents: DocumentStore,
    pub users: UserStorage,
    pub uploads: UploadPolicy,
}

impl AppState {
    pub fn open(config: Config) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data directory {}", config.data_dir.display())
        })?;
        std::fs::create_dir_all(&config.upload_dir).with_context(|| {
            format!(
                "Failed to create upload directory {}",
                config.upload_dir.display()
            )
        })?;

        let documents = DocumentStore::open(&config.data_dir)?;
        let users = UserStorage::open(&config.data_dir, config.session_ttl())?;
        let uploads = UploadPolicy::new(config.upload_dir.clone(), config.max_upload_bytes);

        Ok(Self {
            config,
            documents,
            users,
            uploads,
        })
    }

    pub fn status_rule(&self) -> StatusRule {
        StatusRule::now(self.config.expiring_window_days)
    }

    pub async fn view(&self, document: Document, rule: &StatusRule) -> DocumentView {
        let status = rule.status_of(&document);
        let owner = self.users.owner_ref(&document.owner).await;
        DocumentView::new(document, status, owner)
    }

    pub async fn views(&self, documents: Vec<Document>, rule: &StatusRule) -> Vec<DocumentView> {
        let mut views = Vec::with_capacity(documents.len());
        for document in documents {
            views.push(self.view(document, rule).await);
        }
        views
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route(
            "/documents",
            post(documents_api::create_document).get(documents_api::list_documents),
        )
        .route(
            "/documents/download/:id",
            get(documents_api::download_document),
        )
        .route(
            "/documents/:id",
            get(documents_api::get_document)
                .put(documents_api::update_document)
                .delete(documents_api::delete_document),
        )
        .route("/analytics/dashboard", get(analytics::dashboard))
        .route("/analytics/expiring", get(analytics::expiring))
        .route("/analytics/stats", get(analytics::stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
