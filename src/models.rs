use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentType {
    Contract,
    License,
    Certificate,
    Insurance,
    Lease,
    Permit,
    Other,
}

impl DocumentType {
    pub const ALL: [DocumentType; 7] = [
        DocumentType::Contract,
        DocumentType::License,
        DocumentType::Certificate,
        DocumentType::Insurance,
        DocumentType::Lease,
        DocumentType::Permit,
        DocumentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Contract => "Contract",
            DocumentType::License => "License",
            DocumentType::Certificate => "Certificate",
            DocumentType::Insurance => "Insurance",
            DocumentType::Lease => "Lease",
            DocumentType::Permit => "Permit",
            DocumentType::Other => "Other",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "Document type must be one of: {}",
                    DocumentType::ALL.map(|t| t.as_str()).join(", ")
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentStatus {
    Active,
    #[serde(rename = "Expiring Soon")]
    ExpiringSoon,
    Expired,
    Renewed,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::Active,
        DocumentStatus::ExpiringSoon,
        DocumentStatus::Expired,
        DocumentStatus::Renewed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Active => "Active",
            DocumentStatus::ExpiringSoon => "Expiring Soon",
            DocumentStatus::Expired => "Expired",
            DocumentStatus::Renewed => "Renewed",
        }
    }

    /// Only `Renewed` can be stored on a record; the rest follow the expiry date.
    pub fn is_derived(&self) -> bool {
        !matches!(self, DocumentStatus::Renewed)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "active" => Ok(DocumentStatus::Active),
            "expiringsoon" => Ok(DocumentStatus::ExpiringSoon),
            "expired" => Ok(DocumentStatus::Expired),
            "renewed" => Ok(DocumentStatus::Renewed),
            _ => Err("Status must be one of: Active, Expiring Soon, Expired, Renewed".to_string()),
        }
    }
}

/// Computes a document's status for a given day.
///
/// An explicit `Renewed` marker always wins. Otherwise the status follows the
/// expiry date: past it the document is `Expired`, within the look-ahead
/// window it is `Expiring Soon`, and `Active` beyond that.
#[derive(Debug, Clone, Copy)]
pub struct StatusRule {
    pub today: NaiveDate,
    pub window_days: i64,
}

impl StatusRule {
    pub fn new(today: NaiveDate, window_days: i64) -> Self {
        Self { today, window_days }
    }

    pub fn now(window_days: i64) -> Self {
        Self::new(Utc::now().date_naive(), window_days)
    }

    pub fn derive(&self, expiry_date: NaiveDate) -> DocumentStatus {
        if expiry_date < self.today {
            DocumentStatus::Expired
        } else if expiry_date <= self.today + Duration::days(self.window_days) {
            DocumentStatus::ExpiringSoon
        } else {
            DocumentStatus::Active
        }
    }

    pub fn status_of(&self, document: &Document) -> DocumentStatus {
        document
            .status_override
            .unwrap_or_else(|| self.derive(document.expiry_date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFileRef {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub document_type: DocumentType,
    pub document_number: Option<String>,
    pub issuer: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
    #[serde(default)]
    pub status_override: Option<DocumentStatus>,
    pub file: Option<StoredFileRef>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Validated fields for a new document record.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub title: String,
    pub document_type: DocumentType,
    pub document_number: Option<String>,
    pub issuer: Option<String>,
    pub notes: Option<String>,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub status_override: Option<DocumentStatus>,
}

/// Field changes carried by an update request. `None` leaves a field untouched;
/// `Some(None)` on an optional field clears it.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub document_type: Option<DocumentType>,
    pub document_number: Option<Option<String>>,
    pub issuer: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub status: Option<DocumentStatus>,
}

impl Document {
    pub fn new(fields: NewDocument, owner: String, file: Option<StoredFileRef>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: fields.title,
            document_type: fields.document_type,
            document_number: fields.document_number,
            issuer: fields.issuer,
            notes: fields.notes,
            issue_date: fields.issue_date,
            expiry_date: fields.expiry_date,
            status_override: fields.status_override,
            file,
            owner,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apply(&mut self, patch: DocumentPatch) {
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(document_type) = patch.document_type {
            self.document_type = document_type;
        }
        if let Some(document_number) = patch.document_number {
            self.document_number = document_number;
        }
        if let Some(issuer) = patch.issuer {
            self.issuer = issuer;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
        if let Some(issue_date) = patch.issue_date {
            self.issue_date = issue_date;
        }
        if let Some(expiry_date) = patch.expiry_date {
            self.expiry_date = expiry_date;
        }
        if let Some(status) = patch.status {
            self.status_override = (!status.is_derived()).then_some(status);
        }
        self.updated_at = Utc::now();
    }

    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        let contains = |value: &str| value.to_lowercase().contains(&needle);

        contains(&self.title)
            || self.document_number.as_deref().is_some_and(contains)
            || self.issuer.as_deref().is_some_and(contains)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: String,
    pub username: Option<String>,
}

/// A document as returned by the API, with its status resolved for today and
/// the owner's identity filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: String,
    pub title: String,
    pub document_type: DocumentType,
    pub document_number: Option<String>,
    pub issuer: Option<String>,
    pub notes: Option<String>,
    pub issue_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub status: DocumentStatus,
    pub file: Option<StoredFileRef>,
    pub owner: OwnerRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentView {
    pub fn new(document: Document, status: DocumentStatus, owner: OwnerRef) -> Self {
        Self {
            id: document.id,
            title: document.title,
            document_type: document.document_type,
            document_number: document.document_number,
            issuer: document.issuer,
            notes: document.notes,
            issue_date: document.issue_date,
            expiry_date: document.expiry_date,
            status,
            file: document.file,
            owner,
            created_at: document.created_at,
            updated_at: document.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub success: bool,
    pub document: DocumentView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub success: bool,
    pub documents: Vec<DocumentView>,
    pub count: usize,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn sample(expiry: &str) -> Document {
        Document::new(
            NewDocument {
                title: "Business License".to_string(),
                document_type: DocumentType::License,
                document_number: Some("BL-2024-001".to_string()),
                issuer: Some("City Clerk".to_string()),
                notes: None,
                issue_date: date("2024-01-01"),
                expiry_date: date(expiry),
                status_override: None,
            },
            "owner-1".to_string(),
            None,
        )
    }

    #[test]
    fn status_follows_expiry_date() {
        let rule = StatusRule::new(date("2024-06-01"), 30);

        assert_eq!(rule.derive(date("2024-05-31")), DocumentStatus::Expired);
        assert_eq!(rule.derive(date("2024-06-01")), DocumentStatus::ExpiringSoon);
        assert_eq!(rule.derive(date("2024-07-01")), DocumentStatus::ExpiringSoon);
        assert_eq!(rule.derive(date("2024-07-02")), DocumentStatus::Active);
    }

    #[test]
    fn business_license_example_is_expired() {
        let doc = sample("2024-01-10");
        let rule = StatusRule::new(date("2024-02-01"), 30);
        assert_eq!(rule.status_of(&doc), DocumentStatus::Expired);
    }

    #[test]
    fn renewed_marker_overrides_expiry() {
        let mut doc = sample("2024-01-10");
        doc.apply(DocumentPatch {
            status: Some(DocumentStatus::Renewed),
            ..Default::default()
        });
        let rule = StatusRule::new(date("2024-02-01"), 30);
        assert_eq!(rule.status_of(&doc), DocumentStatus::Renewed);

        doc.apply(DocumentPatch {
            status: Some(DocumentStatus::Active),
            ..Default::default()
        });
        assert_eq!(doc.status_override, None);
        assert_eq!(rule.status_of(&doc), DocumentStatus::Expired);
    }

    #[test]
    fn parses_labels_loosely() {
        assert_eq!("license".parse::<DocumentType>(), Ok(DocumentType::License));
        assert!("Passport".parse::<DocumentType>().is_err());
        assert_eq!(
            "Expiring Soon".parse::<DocumentStatus>(),
            Ok(DocumentStatus::ExpiringSoon)
        );
        assert_eq!(
            "expiring-soon".parse::<DocumentStatus>(),
            Ok(DocumentStatus::ExpiringSoon)
        );
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let doc = sample("2030-01-01");
        assert!(doc.matches_search("business"));
        assert!(doc.matches_search("bl-2024"));
        assert!(doc.matches_search("CLERK"));
        assert!(!doc.matches_search("lease"));
    }

    #[test]
    fn status_serializes_with_display_labels() {
        let json = serde_json::to_string(&DocumentStatus::ExpiringSoon).unwrap();
        assert_eq!(json, "\"Expiring Soon\"");
    }
}
