//! Aggregate counts for the dashboard, computed on read over the caller's
//! visible documents.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::error::{ApiError, FieldError};
use crate::models::{Document, DocumentStatus, DocumentType, DocumentView, StatusRule};
use crate::routes::AppState;

const DASHBOARD_PREVIEW: usize = 5;
const MAX_EXPIRING_DAYS: i64 = 3650;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: usize,
    pub active: usize,
    pub expiring_soon: usize,
    pub expired: usize,
    pub renewed: usize,
}

pub fn summarize(documents: &[Document], rule: &StatusRule) -> StatusCounts {
    documents
        .iter()
        .fold(StatusCounts::default(), |mut counts, document| {
            counts.total += 1;
            match rule.status_of(document) {
                DocumentStatus::Active => counts.active += 1,
                DocumentStatus::ExpiringSoon => counts.expiring_soon += 1,
                DocumentStatus::Expired => counts.expired += 1,
                DocumentStatus::Renewed => counts.renewed += 1,
            }
            counts
        })
}

/// Documents not yet expired whose expiry falls within `days` of today,
/// nearest first. Renewed documents are left out.
pub fn expiring_within(documents: Vec<Document>, rule: &StatusRule, days: i64) -> Vec<Document> {
    let horizon = StatusRule::new(rule.today, days);
    let mut expiring: Vec<Document> = documents
        .into_iter()
        .filter(|d| d.status_override.is_none())
        .filter(|d| horizon.derive(d.expiry_date) == DocumentStatus::ExpiringSoon)
        .collect();
    expiring.sort_by(|a, b| {
        a.expiry_date
            .cmp(&b.expiry_date)
            .then_with(|| a.title.cmp(&b.title))
    });
    expiring
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub success: bool,
    pub stats: StatusCounts,
    pub expiring_soon: Vec<DocumentView>,
    pub recent: Vec<DocumentView>,
}

async fn visible_documents(state: &AppState, caller: &Caller) -> Result<Vec<Document>, ApiError> {
    state
        .documents
        .visible(&caller.scope())
        .await
        .map_err(|e| ApiError::storage("Failed to load analytics", e))
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id))]
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<DashboardResponse>, ApiError> {
    let documents = visible_documents(&state, &caller).await?;
    let rule = state.status_rule();
    let stats = summarize(&documents, &rule);

    let mut recent = documents.clone();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(DASHBOARD_PREVIEW);

    let mut expiring = expiring_within(documents, &rule, rule.window_days);
    expiring.truncate(DASHBOARD_PREVIEW);

    Ok(Json(DashboardResponse {
        success: true,
        stats,
        expiring_soon: state.views(expiring, &rule).await,
        recent: state.views(recent, &rule).await,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpiringParams {
    pub days: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpiringResponse {
    pub success: bool,
    pub days: i64,
    pub count: usize,
    pub documents: Vec<DocumentView>,
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id))]
pub async fn expiring(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Query(params): Query<ExpiringParams>,
) -> Result<Json<ExpiringResponse>, ApiError> {
    let rule = state.status_rule();
    let days = match params.days.as_deref().map(str::trim) {
        None | Some("") => rule.window_days,
        Some(raw) => match raw.parse::<i64>() {
            Ok(days) if (0..=MAX_EXPIRING_DAYS).contains(&days) => days,
            _ => {
                return Err(ApiError::Validation(vec![FieldError::new(
                    "days",
                    format!("Days must be a whole number between 0 and {MAX_EXPIRING_DAYS}"),
                )]))
            }
        },
    };

    let documents = visible_documents(&state, &caller).await?;
    let expiring = expiring_within(documents, &rule, days);
    let documents = state.views(expiring, &rule).await;

    Ok(Json(ExpiringResponse {
        success: true,
        days,
        count: documents.len(),
        documents,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCount {
    pub document_type: DocumentType,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: DocumentStatus,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub success: bool,
    pub total: usize,
    pub by_type: Vec<TypeCount>,
    pub by_status: Vec<StatusCount>,
}

pub fn breakdown(documents: &[Document], rule: &StatusRule) -> (Vec<TypeCount>, Vec<StatusCount>) {
    let by_type = DocumentType::ALL
        .into_iter()
        .map(|document_type| TypeCount {
            document_type,
            count: documents
                .iter()
                .filter(|d| d.document_type == document_type)
                .count(),
        })
        .collect();

    let by_status = DocumentStatus::ALL
        .into_iter()
        .map(|status| StatusCount {
            status,
            count: documents
                .iter()
                .filter(|d| rule.status_of(d) == status)
                .count(),
        })
        .collect();

    (by_type, by_status)
}

#[tracing::instrument(skip_all, fields(user_id = %caller.id))]
pub async fn stats(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<StatsResponse>, ApiError> {
    let documents = visible_documents(&state, &caller).await?;
    let rule = state.status_rule();
    let (by_type, by_status) = breakdown(&documents, &rule);

    Ok(Json(StatsResponse {
        success: true,
        total: documents.len(),
        by_type,
        by_status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentPatch, NewDocument};
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn doc(title: &str, document_type: DocumentType, expiry: &str) -> Document {
        Document::new(
            NewDocument {
                title: title.to_string(),
                document_type,
                document_number: None,
                issuer: None,
                notes: None,
                issue_date: date("2020-01-01"),
                expiry_date: date(expiry),
                status_override: None,
            },
            "u1".to_string(),
            None,
        )
    }

    fn fixture() -> Vec<Document> {
        let mut renewed = doc("Old Permit", DocumentType::Permit, "2024-01-01");
        renewed.apply(DocumentPatch {
            status: Some(DocumentStatus::Renewed),
            ..Default::default()
        });
        vec![
            doc("Lease", DocumentType::Lease, "2030-01-01"),
            doc("Policy", DocumentType::Insurance, "2025-01-20"),
            doc("Certificate", DocumentType::Certificate, "2025-01-05"),
            doc("Contract", DocumentType::Contract, "2024-12-01"),
            renewed,
        ]
    }

    fn rule() -> StatusRule {
        StatusRule::new(date("2025-01-01"), 30)
    }

    #[test]
    fn counts_each_status_once() {
        let counts = summarize(&fixture(), &rule());
        assert_eq!(
            counts,
            StatusCounts {
                total: 5,
                active: 1,
                expiring_soon: 2,
                expired: 1,
                renewed: 1,
            }
        );
    }

    #[test]
    fn expiring_list_is_nearest_first_and_honors_days() {
        let titles = |docs: Vec<Document>| -> Vec<String> {
            docs.into_iter().map(|d| d.title).collect()
        };

        assert_eq!(
            titles(expiring_within(fixture(), &rule(), 30)),
            ["Certificate", "Policy"]
        );
        assert_eq!(
            titles(expiring_within(fixture(), &rule(), 7)),
            ["Certificate"]
        );
    }

    #[test]
    fn breakdown_lists_every_type_and_status() {
        let (by_type, by_status) = breakdown(&fixture(), &rule());
        assert_eq!(by_type.len(), DocumentType::ALL.len());
        assert_eq!(by_type.iter().map(|t| t.count).sum::<usize>(), 5);
        let leases = by_type
            .iter()
            .find(|t| t.document_type == DocumentType::Lease)
            .unwrap();
        assert_eq!(leases.count, 1);
        assert_eq!(by_status.len(), 4);
        assert_eq!(by_status.iter().map(|s| s.count).sum::<usize>(), 5);
    }
}
