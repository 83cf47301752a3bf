//! Turns multipart text fields into validated document changes, collecting
//! every field problem instead of stopping at the first.

use chrono::{DateTime, NaiveDate};

use crate::error::{ApiError, FieldError};
use crate::models::{Document, DocumentPatch, DocumentStatus, DocumentType, NewDocument};
use crate::upload::DocumentForm;

const MAX_TITLE_LEN: usize = 200;

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()))
}

fn optional_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Default)]
struct Collector {
    errors: Vec<FieldError>,
}

impl Collector {
    fn title(&mut self, raw: &str) -> Option<String> {
        let title = raw.trim();
        if title.is_empty() {
            self.errors.push(FieldError::new("title", "Title is required"));
            None
        } else if title.chars().count() > MAX_TITLE_LEN {
            self.errors.push(FieldError::new(
                "title",
                format!("Title cannot exceed {MAX_TITLE_LEN} characters"),
            ));
            None
        } else {
            Some(title.to_string())
        }
    }

    fn document_type(&mut self, raw: &str) -> Option<DocumentType> {
        raw.parse::<DocumentType>()
            .map_err(|e| self.errors.push(FieldError::new("documentType", e)))
            .ok()
    }

    fn date(&mut self, field: &str, raw: &str) -> Option<NaiveDate> {
        let parsed = parse_date(raw);
        if parsed.is_none() {
            self.errors.push(FieldError::new(
                field,
                format!("'{}' is not a valid date (expected YYYY-MM-DD)", raw.trim()),
            ));
        }
        parsed
    }

    fn status(&mut self, raw: &str) -> Option<DocumentStatus> {
        raw.parse::<DocumentStatus>()
            .map_err(|e| self.errors.push(FieldError::new("status", e)))
            .ok()
    }

    fn missing(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(field, message));
    }

    fn finish<T>(self, value: Option<T>) -> Result<T, ApiError> {
        match value {
            Some(value) if self.errors.is_empty() => Ok(value),
            _ => Err(ApiError::Validation(self.errors)),
        }
    }
}

fn date_order_error(issue_date: NaiveDate, expiry_date: NaiveDate) -> Option<FieldError> {
    (expiry_date < issue_date).then(|| {
        FieldError::new("expiryDate", "Expiry date cannot be before the issue date")
    })
}

pub fn check_date_order(issue_date: NaiveDate, expiry_date: NaiveDate) -> Result<(), ApiError> {
    match date_order_error(issue_date, expiry_date) {
        Some(error) => Err(ApiError::Validation(vec![error])),
        None => Ok(()),
    }
}

pub fn new_document(form: &DocumentForm) -> Result<NewDocument, ApiError> {
    let mut c = Collector::default();

    let title = c.title(form.text("title").unwrap_or_default());
    let document_type = match form.text("documentType") {
        Some(raw) if !raw.trim().is_empty() => c.document_type(raw),
        _ => {
            c.missing("documentType", "Document type is required");
            None
        }
    };
    let issue_date = match form.text("issueDate") {
        Some(raw) if !raw.trim().is_empty() => c.date("issueDate", raw),
        _ => {
            c.missing("issueDate", "Issue date is required");
            None
        }
    };
    let expiry_date = match form.text("expiryDate") {
        Some(raw) if !raw.trim().is_empty() => c.date("expiryDate", raw),
        _ => {
            c.missing("expiryDate", "Expiry date is required");
            None
        }
    };
    let status = match form.text("status") {
        Some(raw) if !raw.trim().is_empty() => c.status(raw),
        _ => None,
    };

    if let (Some(issue), Some(expiry)) = (issue_date, expiry_date) {
        c.errors.extend(date_order_error(issue, expiry));
    }

    let fields = match (title, document_type, issue_date, expiry_date) {
        (Some(title), Some(document_type), Some(issue_date), Some(expiry_date)) => {
            Some(NewDocument {
                title,
                document_type,
                document_number: form.text("documentNumber").and_then(optional_text),
                issuer: form.text("issuer").and_then(optional_text),
                notes: form.text("notes").and_then(optional_text),
                issue_date,
                expiry_date,
                status_override: status.filter(|s| !s.is_derived()),
            })
        }
        _ => None,
    };

    c.finish(fields)
}

pub fn document_patch(form: &DocumentForm) -> Result<DocumentPatch, ApiError> {
    let mut c = Collector::default();
    let mut patch = DocumentPatch::default();

    if let Some(raw) = form.text("title") {
        patch.title = c.title(raw);
    }
    if let Some(raw) = form.text("documentType") {
        patch.document_type = c.document_type(raw);
    }
    if let Some(raw) = form.text("issueDate") {
        patch.issue_date = c.date("issueDate", raw);
    }
    if let Some(raw) = form.text("expiryDate") {
        patch.expiry_date = c.date("expiryDate", raw);
    }
    if let Some(raw) = form.text("status") {
        patch.status = c.status(raw);
    }
    patch.document_number = form.text("documentNumber").map(optional_text);
    patch.issuer = form.text("issuer").map(optional_text);
    patch.notes = form.text("notes").map(optional_text);

    c.finish(Some(patch))
}

/// Applies a patch to a copy of the record and checks the merged dates.
pub fn patched(document: &Document, patch: DocumentPatch) -> Result<Document, ApiError> {
    let mut updated = document.clone();
    updated.apply(patch);
    check_date_order(updated.issue_date, updated.expiry_date)?;
    Ok(updated)
}
