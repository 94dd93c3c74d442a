//! Shared application state for the HTTP proxy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::core::config::{AppPaths, Settings};
use crate::mcp::client::ToolServerClient;

/// One uploaded PDF. A handle is registered only after the file is fully
/// persisted, and maps to exactly one path for its lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct UploadRecord {
    pub pdf_id: String,
    pub filename: String,
    #[serde(skip)]
    pub path: PathBuf,
    pub uploaded_at: DateTime<Utc>,
}

pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Settings,
    pub tool_server: ToolServerClient,
    uploads: RwLock<HashMap<String, UploadRecord>>,
}

impl AppState {
    pub fn new(paths: Arc<AppPaths>, settings: Settings) -> Arc<Self> {
        let tool_server = ToolServerClient::new(settings.clone());
        Arc::new(Self {
            paths,
            settings,
            tool_server,
            uploads: RwLock::new(HashMap::new()),
        })
    }

    pub async fn register_upload(&self, record: UploadRecord) {
        self.uploads
            .write()
            .await
            .insert(record.pdf_id.clone(), record);
    }

    pub async fn lookup_upload(&self, pdf_id: &str) -> Option<UploadRecord> {
        self.uploads.read().await.get(pdf_id).cloned()
    }

    pub async fn remove_upload(&self, pdf_id: &str) -> Option<UploadRecord> {
        self.uploads.write().await.remove(pdf_id)
    }

    pub async fn list_uploads(&self) -> Vec<UploadRecord> {
        let mut records: Vec<UploadRecord> = self.uploads.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        records
    }
}

/// Handle for an upload: sanitized stem, upload timestamp, and a short
/// random suffix so two uploads in the same second stay distinct.
pub fn new_pdf_id(filename: &str, uploaded_at: DateTime<Utc>) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let stem: String = stem
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(48)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{stem}_{}_{}",
        uploaded_at.format("%Y%m%d_%H%M%S"),
        &suffix[..8]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_ids_are_unique_for_identical_input() {
        let now = Utc::now();
        let a = new_pdf_id("report.pdf", now);
        let b = new_pdf_id("report.pdf", now);
        assert_ne!(a, b);
        assert!(a.starts_with("report_"));
    }

    #[test]
    fn pdf_ids_sanitize_awkward_filenames() {
        let id = new_pdf_id("q3 / results (final).pdf", Utc::now());
        assert!(!id.contains('/'));
        assert!(!id.contains(' '));
    }
}
