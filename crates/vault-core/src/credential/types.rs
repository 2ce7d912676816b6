//! Credential type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

/// Category a credential is filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Social,
    Shopping,
    Work,
    Email,
    Finance,
    Gaming,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Social,
        Category::Shopping,
        Category::Work,
        Category::Email,
        Category::Finance,
        Category::Gaming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Social => "social",
            Category::Shopping => "shopping",
            Category::Work => "work",
            Category::Email => "email",
            Category::Finance => "finance",
            Category::Gaming => "gaming",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| VaultError::ValidationError(format!("unknown category: {}", s)))
    }
}

/// A stored login - plaintext fields are zeroed when dropped
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Unique identifier, fixed at creation
    #[zeroize(skip)]
    pub id: Uuid,

    pub title: String,

    pub username: String,

    pub password: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[zeroize(skip)]
    pub category: Category,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Created timestamp, fixed at creation
    #[zeroize(skip)]
    pub created_at: DateTime<Utc>,

    /// Refreshed on every mutation
    #[zeroize(skip)]
    pub updated_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("url", &self.url)
            .field("category", &self.category)
            .field("notes", &self.notes.as_ref().map(|_| "[REDACTED]"))
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Caller-supplied fields for a new credential
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDraft {
    pub title: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub url: Option<String>,
    #[zeroize(skip)]
    pub category: Category,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CredentialDraft {
    pub fn new(
        title: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        category: Category,
    ) -> Self {
        Self {
            title: title.into(),
            username: username.into(),
            password: password.into(),
            url: None,
            category,
            notes: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Partial update of a credential
///
/// There is no way to express a new id or creation time here; JSON input
/// carrying those keys has them dropped during deserialization.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPatch {
    pub title: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `Some(None)` clears the url
    #[serde(default, deserialize_with = "double_option")]
    pub url: Option<Option<String>>,
    #[zeroize(skip)]
    pub category: Option<Category>,
    /// `Some(None)` clears the notes
    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

impl CredentialPatch {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// `None` clears the url
    pub fn with_url(mut self, url: Option<String>) -> Self {
        self.url = Some(url);
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// `None` clears the notes
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.url.is_none()
            && self.category.is_none()
            && self.notes.is_none()
    }
}

// Distinguishes an absent key (no change) from an explicit null (clear).
fn double_option<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Reject a required field that is empty or whitespace
pub(crate) fn require_field(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(VaultError::ValidationError(format!("{} is required", name)));
    }
    Ok(())
}
