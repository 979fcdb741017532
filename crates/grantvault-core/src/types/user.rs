//! Resource owner type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Resource owner that authorized a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Stable user identifier (the ID token `sub` claim).
    pub id: String,

    /// Login name.
    pub username: String,

    /// Additional profile attributes released as claims.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl User {
    /// Creates a user without profile attributes.
    #[must_use]
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            attributes: BTreeMap::new(),
        }
    }
}
