//! Identity headers: user id and resource path.
//!
//! These are attached to every published message and restored on every
//! consumed message, whether or not tracing was requested.

use crate::message::{Header, Message};
use serde::{Deserialize, Serialize};

/// Header key carrying the acting user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header key carrying the tenant resource path.
pub const RESOURCE_PATH_HEADER: &str = "x-resource-path";

/// Request identity propagated across the publish/consume boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Acting user id
    pub user_id: String,
    /// Multi-tenant resource path
    pub resource_path: String,
}

impl UserInfo {
    /// Create a new identity.
    pub fn new(user_id: impl Into<String>, resource_path: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            resource_path: resource_path.into(),
        }
    }

    /// Identity headers for an outbound message. Always both keys, possibly empty.
    #[must_use]
    pub fn to_headers(&self) -> Vec<Header> {
        vec![
            Header::new(USER_ID_HEADER, self.user_id.clone()),
            Header::new(RESOURCE_PATH_HEADER, self.resource_path.clone()),
        ]
    }

    /// Restore identity from message headers. Missing keys become empty strings.
    #[must_use]
    pub fn from_message(message: &Message) -> Self {
        Self {
            user_id: message.header(USER_ID_HEADER).unwrap_or_default().to_string(),
            resource_path: message
                .header(RESOURCE_PATH_HEADER)
                .unwrap_or_default()
                .to_string(),
        }
    }
}
