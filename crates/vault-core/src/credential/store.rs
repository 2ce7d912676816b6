//! In-memory credential collection and its plaintext serialization

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::debug;
use uuid::Uuid;

use super::types::{require_field, Category, Credential, CredentialDraft, CredentialPatch};
use crate::error::{Result, VaultError};

/// Insertion-ordered set of credentials, unique by id
///
/// Holds no persistence responsibility; the session encrypts and writes
/// the output of [`CredentialStore::serialize`] after every mutation.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: IndexMap<Uuid, Credential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode the whole collection as a JSON array in insertion order
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let list: Vec<&Credential> = self.entries.values().collect();
        Ok(serde_json::to_vec(&list)?)
    }

    /// Decode a collection; fails as a whole on any malformed input
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let list: Vec<Credential> = serde_json::from_slice(bytes)
            .map_err(|e| VaultError::CorruptData(e.to_string()))?;

        let mut entries = IndexMap::with_capacity(list.len());
        for credential in list {
            let id = credential.id;
            if entries.insert(id, credential).is_some() {
                return Err(VaultError::CorruptData(format!(
                    "duplicate credential id {}",
                    id
                )));
            }
        }

        debug!("Loaded {} credentials", entries.len());
        Ok(Self { entries })
    }

    /// Add a new credential stamped with `now`
    pub fn add(&mut self, draft: CredentialDraft, now: DateTime<Utc>) -> Result<Credential> {
        require_field("title", &draft.title)?;
        require_field("username", &draft.username)?;
        require_field("password", &draft.password)?;

        let mut id = Uuid::new_v4();
        while self.entries.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let credential = Credential {
            id,
            title: draft.title.clone(),
            username: draft.username.clone(),
            password: draft.password.clone(),
            url: draft.url.clone(),
            category: draft.category,
            notes: draft.notes.clone(),
            created_at: now,
            updated_at: now,
        };

        self.entries.insert(id, credential.clone());
        debug!("Added credential {}", id);
        Ok(credential)
    }

    /// Merge the provided fields into an existing credential
    ///
    /// Validation happens before anything is written, so a rejected patch
    /// leaves the credential untouched.
    pub fn update(
        &mut self,
        id: Uuid,
        patch: CredentialPatch,
        now: DateTime<Utc>,
    ) -> Result<Credential> {
        let credential = self
            .entries
            .get_mut(&id)
            .ok_or(VaultError::CredentialNotFound(id))?;

        if let Some(title) = &patch.title {
            require_field("title", title)?;
        }
        if let Some(username) = &patch.username {
            require_field("username", username)?;
        }
        if let Some(password) = &patch.password {
            require_field("password", password)?;
        }

        if let Some(title) = &patch.title {
            credential.title = title.clone();
        }
        if let Some(username) = &patch.username {
            credential.username = username.clone();
        }
        if let Some(password) = &patch.password {
            credential.password = password.clone();
        }
        if let Some(url) = &patch.url {
            credential.url = url.clone();
        }
        if let Some(category) = patch.category {
            credential.category = category;
        }
        if let Some(notes) = &patch.notes {
            credential.notes = notes.clone();
        }
        credential.updated_at = now;

        debug!("Updated credential {}", id);
        Ok(credential.clone())
    }

    /// Remove a credential; removing an absent id is an error
    pub fn remove(&mut self, id: Uuid) -> Result<Credential> {
        let removed = self
            .entries
            .shift_remove(&id)
            .ok_or(VaultError::CredentialNotFound(id))?;

        debug!("Removed credential {}", id);
        Ok(removed)
    }

    pub fn get(&self, id: Uuid) -> Option<&Credential> {
        self.entries.get(&id)
    }

    /// All credentials in insertion order
    pub fn list(&self) -> Vec<Credential> {
        self.entries.values().cloned().collect()
    }

    /// Case-insensitive match over title, username and url, optionally
    /// limited to one category. An empty query matches everything.
    pub fn search(&self, query: &str, category: Option<Category>) -> Vec<Credential> {
        let needle = query.trim().to_lowercase();

        self.entries
            .values()
            .filter(|c| category.map_or(true, |wanted| c.category == wanted))
            .filter(|c| {
                needle.is_empty()
                    || c.title.to_lowercase().contains(&needle)
                    || c.username.to_lowercase().contains(&needle)
                    || c
                        .url
                        .as_deref()
                        .is_some_and(|u| u.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every credential (each one zeroes itself)
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
