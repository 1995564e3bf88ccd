//! Domain model types returned by the console management API.
//!
//! These are snapshots only; nothing here is cached between calls.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Saved configurations
// ---------------------------------------------------------------------------

/// One entry of the `GET /saved-configurations` listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedConfiguration {
    /// Unique key on the server.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub description: String,
    /// Creation date as rendered by the server.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub date: String,
    /// Owning user id.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub user: String,
}

/// Body of `POST /saved-configurations/{name}`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateConfigurationRequest<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
}

// ---------------------------------------------------------------------------
// CCS inventory
// ---------------------------------------------------------------------------

/// A console communication server definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CcsServer {
    pub name: String,
    #[serde(default)]
    pub upstream_host: String,
}

/// A console session defined under a [`CcsServer`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CcsSession {
    pub name: String,
    #[serde(default)]
    pub lu_name: String,
    #[serde(default)]
    pub upstream_port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CcsServerList {
    #[serde(default)]
    pub servers: Vec<CcsServer>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CcsSessionList {
    #[serde(default)]
    pub sessions: Vec<CcsSession>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
