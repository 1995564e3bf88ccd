//! Console communication server (CCS) inventory listing.

use tracing::{debug, instrument, warn};

use crate::models::{CcsServer, CcsServerList, CcsSession, CcsSessionList};
use crate::session::Session;

impl Session {
    /// All CCS server definitions; empty on any failure.
    #[instrument(skip(self), fields(host = %self.host()))]
    pub async fn list_ccs_servers(&self) -> Vec<CcsServer> {
        match self.get("/ccs/servers", "application/json").await {
            Ok(resp) if resp.is_success() => match resp.json::<CcsServerList>() {
                Ok(list) => {
                    debug!(count = list.servers.len(), "listed ccs servers");
                    list.servers
                }
                Err(e) => {
                    warn!(error = %e, "unreadable ccs server listing");
                    Vec::new()
                }
            },
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "listing ccs servers failed");
                Vec::new()
            }
        }
    }

    /// Sessions defined under one CCS server; empty on any failure.
    #[instrument(skip(self), fields(host = %self.host()))]
    pub async fn list_ccs_sessions(&self, server: &str) -> Vec<CcsSession> {
        let path = format!("/ccs/servers/{}/sessions", server);
        match self.get(&path, "application/json").await {
            Ok(resp) if resp.is_success() => resp
                .json::<CcsSessionList>()
                .map(|list| list.sessions)
                .unwrap_or_else(|e| {
                    warn!(server, error = %e, "unreadable ccs session listing");
                    Vec::new()
                }),
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!(server, error = %e, "listing ccs sessions failed");
                Vec::new()
            }
        }
    }
}
