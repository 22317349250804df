//! Decrypted vault views held in the per-account caches.
//!
//! These are what the lock teardown purges: plain-text projections of
//! encrypted vault items, valid only while the account is unlocked.

use serde::{Deserialize, Serialize};

/// A decrypted vault item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherView {
    pub id: String,
    pub name: String,
    pub folder_id: Option<String>,
    pub login_uri: Option<String>,
    pub notes: Option<String>,
}

impl CipherView {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            folder_id: None,
            login_uri: None,
            notes: None,
        }
    }

    pub fn with_login_uri(mut self, uri: impl Into<String>) -> Self {
        self.login_uri = Some(uri.into());
        self
    }

    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    /// Lower-cased searchable text: name, uri and notes.
    pub fn search_text(&self) -> String {
        let mut text = self.name.to_lowercase();
        for extra in [&self.login_uri, &self.notes].into_iter().flatten() {
            text.push(' ');
            text.push_str(&extra.to_lowercase());
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderView {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionView {
    pub id: String,
    pub organization_id: String,
    pub name: String,
}
