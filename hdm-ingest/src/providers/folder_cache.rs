//! Get-or-create for named folders
//!
//! The mutex is held across cache check, remote lookup and creation, so
//! concurrent callers never create two folders with the same name under
//! the same parent.

use super::drive_client::FOLDER_MIME_TYPE;
use super::{ProviderResult, StorageProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct FolderCache {
    storage: Arc<dyn StorageProvider>,
    /// (parent id, folder name) → folder id
    folders: Mutex<HashMap<(String, String), String>>,
}

impl FolderCache {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage,
            folders: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create(&self, parent_id: &str, name: &str) -> ProviderResult<String> {
        let key = (parent_id.to_string(), name.to_string());
        let mut folders = self.folders.lock().await;

        if let Some(id) = folders.get(&key) {
            return Ok(id.clone());
        }

        let id = match self
            .storage
            .find_child(parent_id, name, Some(FOLDER_MIME_TYPE))
            .await?
        {
            Some(existing) => {
                debug!(parent_id, name, folder_id = %existing.id, "Found existing folder");
                existing.id
            }
            None => self.storage.create_folder(parent_id, name).await?,
        };

        folders.insert(key, id.clone());
        Ok(id)
    }
}
