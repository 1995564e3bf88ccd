//! Saved-configuration registry operations.
//!
//! [`ConfigRegistry`] is the seam between the merge pipeline and the wire:
//! [`Session`] implements it over HTTP, tests implement it in memory.

use std::path::Path;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};

use crate::errors::RegistryError;
use crate::models::{CreateConfigurationRequest, SavedConfiguration};
use crate::session::{ApiResponse, Session};

/// Route of the saved-configuration collection.
pub const CONFIGURATIONS_PATH: &str = "/saved-configurations";

/// Named saved-configuration bundles on one server.
#[async_trait]
pub trait ConfigRegistry: Send + Sync {
    /// Host name of the server behind this registry.
    fn host(&self) -> &str;

    /// All saved configurations. Empty when the server does not answer
    /// successfully; this call never fails.
    async fn list_configurations(&self) -> Vec<SavedConfiguration>;

    /// Create a new saved configuration snapshot of the server's current
    /// state. Creating an existing name fails or overwrites depending on the
    /// backend, so callers wanting a clean slate delete first.
    async fn create_configuration(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<(), RegistryError>;

    /// Delete a saved configuration. A missing name is
    /// [`RegistryError::NotFound`].
    async fn delete_configuration(&self, name: &str) -> Result<(), RegistryError>;

    /// Zip bytes of a saved configuration.
    async fn download_configuration(&self, name: &str) -> Result<Vec<u8>, RegistryError>;

    /// Restore the server to a saved configuration.
    async fn restore_configuration(&self, name: &str) -> Result<(), RegistryError>;

    /// Import a configuration archive from a local file.
    async fn upload_configuration(&self, file: &Path) -> Result<(), RegistryError>;

    /// Download a configuration into `dest`, creating parent directories.
    /// Returns the number of bytes written.
    async fn download_configuration_to(
        &self,
        name: &str,
        dest: &Path,
    ) -> Result<u64, RegistryError> {
        let bytes = self.download_configuration(name).await?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        info!(name, dest = %dest.display(), bytes = bytes.len(), "configuration saved");
        Ok(bytes.len() as u64)
    }
}

fn config_path(name: &str) -> String {
    format!("{}/{}", CONFIGURATIONS_PATH, name)
}

/// Map a non-success response to a registry error.
fn rejected(operation: &'static str, name: &str, resp: &ApiResponse) -> RegistryError {
    if resp.status == StatusCode::NOT_FOUND {
        return RegistryError::NotFound(name.to_string());
    }
    let mut body = resp.text();
    if body.len() > 200 {
        let mut cut = 200;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    RegistryError::Rejected {
        operation,
        name: name.to_string(),
        status: resp.status_code(),
        body,
    }
}

#[async_trait]
impl ConfigRegistry for Session {
    fn host(&self) -> &str {
        Session::host(self)
    }

    #[instrument(skip(self), fields(host = %self.host()))]
    async fn list_configurations(&self) -> Vec<SavedConfiguration> {
        let resp = match self.get(CONFIGURATIONS_PATH, "application/json").await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "listing saved configurations failed");
                return Vec::new();
            }
        };
        if !resp.is_success() {
            return Vec::new();
        }
        match resp.json::<Vec<SavedConfiguration>>() {
            Ok(configs) => {
                debug!(count = configs.len(), "listed saved configurations");
                configs
            }
            Err(e) => {
                warn!(error = %e, "unreadable saved configuration listing");
                Vec::new()
            }
        }
    }

    #[instrument(skip(self), fields(host = %self.host()))]
    async fn create_configuration(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<(), RegistryError> {
        let body = CreateConfigurationRequest {
            name,
            description: description.filter(|d| !d.is_empty()),
        };
        let resp = self.post(&config_path(name), &body).await?;
        if !resp.is_success() {
            return Err(rejected("create", name, &resp));
        }
        info!(name, "created saved configuration");
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host()))]
    async fn delete_configuration(&self, name: &str) -> Result<(), RegistryError> {
        let resp = self.delete(&config_path(name)).await?;
        if !resp.is_success() {
            return Err(rejected("delete", name, &resp));
        }
        info!(name, "deleted saved configuration");
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host()))]
    async fn download_configuration(&self, name: &str) -> Result<Vec<u8>, RegistryError> {
        let resp = self.get_zip(&config_path(name)).await?;
        if resp.status != StatusCode::OK {
            return Err(rejected("download", name, &resp));
        }
        debug!(name, bytes = resp.body.len(), "downloaded saved configuration");
        Ok(resp.body)
    }

    #[instrument(skip(self), fields(host = %self.host()))]
    async fn restore_configuration(&self, name: &str) -> Result<(), RegistryError> {
        let path = format!("{}/operations/restore", config_path(name));
        let resp = self.post_empty(&path).await?;
        if !resp.is_success() {
            return Err(rejected("restore", name, &resp));
        }
        info!(name, "restored saved configuration");
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host()))]
    async fn upload_configuration(&self, file: &Path) -> Result<(), RegistryError> {
        let resp = self.post_binary(CONFIGURATIONS_PATH, file).await?;
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !resp.is_success() {
            return Err(rejected("upload", &name, &resp));
        }
        info!(file = %name, "uploaded configuration archive");
        Ok(())
    }
}
