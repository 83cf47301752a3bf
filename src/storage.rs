use crate::auth::Visibility;
use crate::models::{Document, DocumentStatus, DocumentType, StatusRule};
use crate::persistence::{load_or_default, save_to_disk};
use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::RwLock;

const STORAGE_FILE: &str = "documents.json";

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Title,
    DocumentType,
    IssueDate,
    ExpiryDate,
    Status,
    CreatedAt,
    UpdatedAt,
}

/// Ordering for list queries. Parsed from `field` (ascending) or `-field`
/// (descending); `field:asc` and `field:desc` are accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub descending: bool,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::ExpiryDate,
            descending: true,
        }
    }
}

impl FromStr for SortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, descending) = if let Some(rest) = s.strip_prefix('-') {
            (rest, true)
        } else if let Some((name, order)) = s.split_once(':') {
            match order.to_ascii_lowercase().as_str() {
                "asc" => (name, false),
                "desc" => (name, true),
                _ => return Err(format!("Unknown sort order '{order}'")),
            }
        } else {
            (s, false)
        };

        let key: String = name
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        let field = match key.as_str() {
            "title" => SortField::Title,
            "documenttype" | "type" => SortField::DocumentType,
            "issuedate" => SortField::IssueDate,
            "expirydate" => SortField::ExpiryDate,
            "status" => SortField::Status,
            "createdat" => SortField::CreatedAt,
            "updatedat" => SortField::UpdatedAt,
            _ => return Err(format!("Cannot sort by '{name}'")),
        };

        Ok(Self { field, descending })
    }
}

impl SortSpec {
    fn compare(&self, a: &Document, b: &Document, rule: &StatusRule) -> Ordering {
        let ordering = match self.field {
            SortField::Title => a.title.to_lowercase().cmp(&b.title.to_lowercase()),
            SortField::DocumentType => a.document_type.cmp(&b.document_type),
            SortField::IssueDate => a.issue_date.cmp(&b.issue_date),
            SortField::ExpiryDate => a.expiry_date.cmp(&b.expiry_date),
            SortField::Status => rule.status_of(a).cmp(&rule.status_of(b)),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        };
        let ordering = ordering
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id));

        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentQuery {
    pub scope: Visibility,
    pub status: Option<DocumentStatus>,
    pub document_type: Option<DocumentType>,
    pub search: Option<String>,
    pub sort: SortSpec,
    pub page: usize,
    pub limit: usize,
}

impl DocumentQuery {
    pub fn new(scope: Visibility) -> Self {
        Self {
            scope,
            status: None,
            document_type: None,
            search: None,
            sort: SortSpec::default(),
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
        }
    }

    fn matches(&self, document: &Document, rule: &StatusRule) -> bool {
        self.scope.includes(&document.owner)
            && self
                .document_type
                .map_or(true, |t| document.document_type == t)
            && self.status.map_or(true, |s| rule.status_of(document) == s)
            && self
                .search
                .as_deref()
                .map_or(true, |needle| document.matches_search(needle))
    }
}

#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub total: usize,
    pub page: usize,
    pub pages: usize,
}

pub struct DocumentStore {
    path: PathBuf,
    documents: RwLock<Vec<Document>>,
}

impl DocumentStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(STORAGE_FILE);
        let documents = load_or_default(&path).context("Failed to load documents")?;

        Ok(Self {
            path,
            documents: RwLock::new(documents),
        })
    }

    pub async fn insert(&self, document: Document) -> Result<Document> {
        let mut documents = self.documents.write().await;
        documents.push(document.clone());

        if let Err(e) = save_to_disk(&self.path, documents.as_slice()) {
            documents.pop();
            return Err(e.context("Failed to save document"));
        }
        Ok(document)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Document>> {
        let documents = self.documents.read().await;
        Ok(documents.iter().find(|d| d.id == id).cloned())
    }

    /// Swaps in a new version of an existing record and returns the previous
    /// one, or `None` if the record no longer exists.
    pub async fn replace(&self, document: Document) -> Result<Option<Document>> {
        let mut documents = self.documents.write().await;
        let Some(slot) = documents.iter_mut().find(|d| d.id == document.id) else {
            return Ok(None);
        };
        let previous = std::mem::replace(slot, document);

        if let Err(e) = save_to_disk(&self.path, documents.as_slice()) {
            if let Some(slot) = documents.iter_mut().find(|d| d.id == previous.id) {
                *slot = previous;
            }
            return Err(e.context("Failed to save document"));
        }
        Ok(Some(previous))
    }

    pub async fn remove(&self, id: &str) -> Result<Option<Document>> {
        let mut documents = self.documents.write().await;
        let Some(index) = documents.iter().position(|d| d.id == id) else {
            return Ok(None);
        };
        let removed = documents.remove(index);

        if let Err(e) = save_to_disk(&self.path, documents.as_slice()) {
            documents.insert(index, removed);
            return Err(e.context("Failed to delete document"));
        }
        Ok(Some(removed))
    }

    pub async fn query(&self, query: &DocumentQuery, rule: &StatusRule) -> Result<DocumentPage> {
        let documents = self.documents.read().await;

        let mut matching: Vec<&Document> = documents
            .iter()
            .filter(|d| query.matches(d, rule))
            .collect();
        matching.sort_by(|a, b| query.sort.compare(a, b, rule));

        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
        let page = query.page.max(1);
        let total = matching.len();
        let pages = total.div_ceil(limit);

        // A page far past the end overflows the offset; it holds nothing either way.
        let offset = (page - 1).checked_mul(limit).unwrap_or(usize::MAX);
        let documents = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(DocumentPage {
            documents,
            total,
            page,
            pages,
        })
    }

    pub async fn visible(&self, scope: &Visibility) -> Result<Vec<Document>> {
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .filter(|d| scope.includes(&d.owner))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewDocument;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn doc(title: &str, owner: &str, document_type: DocumentType, expiry: &str) -> Document {
        Document::new(
            NewDocument {
                title: title.to_string(),
                document_type,
                document_number: None,
                issuer: Some("County Office".to_string()),
                notes: None,
                issue_date: date("2020-01-01"),
                expiry_date: date(expiry),
                status_override: None,
            },
            owner.to_string(),
            None,
        )
    }

    fn rule() -> StatusRule {
        StatusRule::new(date("2025-01-01"), 30)
    }

    #[test]
    fn parses_sort_specs() {
        assert_eq!(
            "-expiryDate".parse::<SortSpec>().unwrap(),
            SortSpec::default()
        );
        assert_eq!(
            "title".parse::<SortSpec>().unwrap(),
            SortSpec {
                field: SortField::Title,
                descending: false
            }
        );
        assert_eq!(
            "issue_date:desc".parse::<SortSpec>().unwrap(),
            SortSpec {
                field: SortField::IssueDate,
                descending: true
            }
        );
        assert!("password".parse::<SortSpec>().is_err());
        assert!("title:sideways".parse::<SortSpec>().is_err());
    }

    #[tokio::test]
    async fn last_page_holds_the_remainder() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        for i in 0..23 {
            store
                .insert(doc(&format!("Doc {i}"), "u1", DocumentType::Permit, "2030-01-01"))
                .await
                .unwrap();
        }

        let mut query = DocumentQuery::new(Visibility::All);
        query.limit = 10;
        query.page = 3;
        let page = store.query(&query, &rule()).await.unwrap();
        assert_eq!(page.total, 23);
        assert_eq!(page.pages, 3);
        assert_eq!(page.documents.len(), 3);

        query.page = 4;
        let page = store.query(&query, &rule()).await.unwrap();
        assert!(page.documents.is_empty());
    }

    #[tokio::test]
    async fn huge_page_number_is_empty_instead_of_wrapping() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        for i in 0..3 {
            store
                .insert(doc(&format!("Doc {i}"), "u1", DocumentType::Permit, "2030-01-01"))
                .await
                .unwrap();
        }

        let mut query = DocumentQuery::new(Visibility::All);
        query.limit = 2;
        query.page = usize::MAX / 2 + 2;
        let page = store.query(&query, &rule()).await.unwrap();
        assert!(page.documents.is_empty());
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
    }

    #[tokio::test]
    async fn exact_multiple_fills_the_last_page() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        for i in 0..20 {
            store
                .insert(doc(&format!("Doc {i}"), "u1", DocumentType::Lease, "2030-01-01"))
                .await
                .unwrap();
        }

        let mut query = DocumentQuery::new(Visibility::All);
        query.page = 2;
        let page = store.query(&query, &rule()).await.unwrap();
        assert_eq!(page.pages, 2);
        assert_eq!(page.documents.len(), 10);
    }

    #[tokio::test]
    async fn filters_by_owner_type_status_and_search() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        store
            .insert(doc("Office Lease", "u1", DocumentType::Lease, "2030-01-01"))
            .await
            .unwrap();
        store
            .insert(doc("Fire Permit", "u1", DocumentType::Permit, "2024-06-01"))
            .await
            .unwrap();
        store
            .insert(doc("Liability Cover", "u2", DocumentType::Insurance, "2025-01-15"))
            .await
            .unwrap();

        let mine = DocumentQuery::new(Visibility::Owner("u1".to_string()));
        assert_eq!(store.query(&mine, &rule()).await.unwrap().total, 2);

        let mut expired = DocumentQuery::new(Visibility::All);
        expired.status = Some(DocumentStatus::Expired);
        let page = store.query(&expired, &rule()).await.unwrap();
        assert_eq!(page.documents[0].title, "Fire Permit");

        let mut soon = DocumentQuery::new(Visibility::All);
        soon.status = Some(DocumentStatus::ExpiringSoon);
        assert_eq!(store.query(&soon, &rule()).await.unwrap().total, 1);

        let mut typed = DocumentQuery::new(Visibility::All);
        typed.document_type = Some(DocumentType::Lease);
        assert_eq!(store.query(&typed, &rule()).await.unwrap().total, 1);

        let mut search = DocumentQuery::new(Visibility::All);
        search.search = Some("county".to_string());
        assert_eq!(store.query(&search, &rule()).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn default_sort_is_latest_expiry_first() {
        let dir = tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        for (title, expiry) in [("B", "2026-01-01"), ("A", "2031-01-01"), ("C", "2024-01-01")] {
            store
                .insert(doc(title, "u1", DocumentType::Other, expiry))
                .await
                .unwrap();
        }

        let page = store
            .query(&DocumentQuery::new(Visibility::All), &rule())
            .await
            .unwrap();
        let titles: Vec<_> = page.documents.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn records_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = DocumentStore::open(dir.path()).unwrap();
            store
                .insert(doc("Lease", "u1", DocumentType::Lease, "2030-01-01"))
                .await
                .unwrap()
                .id
        };

        let store = DocumentStore::open(dir.path()).unwrap();
        assert!(store.get(&id).await.unwrap().is_some());
        assert!(store.remove(&id).await.unwrap().is_some());
        assert!(store.remove(&id).await.unwrap().is_none());
        assert!(store.get(&id).await.unwrap().is_none());
    }
}
