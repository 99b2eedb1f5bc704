//! Component I: owns one [`McpClient`] per configured external tool-server
//! and presents them as a single catalog.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::RuntimeError;
use crate::mcp::client::McpClient;
use crate::model::{CallResult, ExternalServerDefinition, ExternalToolSchema};

struct ActiveServer {
    client: Arc<McpClient>,
    proposal_required: bool,
}

#[derive(Default)]
pub struct ExternalToolManager {
    servers: RwLock<HashMap<String, ActiveServer>>,
}

impl ExternalToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts every configured server, tagging failures with `warn!` and
    /// dropping them from the active set rather than failing outright.
    /// Returns the tagged schema catalog for whichever servers came up.
    pub async fn start_all(
        &self,
        cancel: &CancellationToken,
        definitions: &[ExternalServerDefinition],
    ) -> Vec<ExternalToolSchema> {
        let mut servers = self.servers.write().await;
        servers.clear();
        let mut catalog = Vec::new();

        for def in definitions {
            let env: HashMap<String, String> =
                std::env::vars().chain(def.env.clone()).collect();

            match McpClient::spawn(&def.command, &def.args, env).await {
                Ok(client) => {
                    let client = Arc::new(client);
                    if let Err(e) = client.initialize(cancel).await {
                        warn!(server = %def.name, error = %e, "external tool-server failed to initialize");
                        let _ = client.close().await;
                        continue;
                    }
                    match client.list_tools(cancel).await {
                        Ok(tools) => {
                            catalog.extend(tools.into_iter().map(|mut schema| {
                                schema.server = def.name.clone();
                                schema
                            }));
                            servers.insert(
                                def.name.clone(),
                                ActiveServer {
                                    client,
                                    proposal_required: def.proposal_required.unwrap_or(false),
                                },
                            );
                        }
                        Err(e) => {
                            warn!(server = %def.name, error = %e, "external tool-server failed to list tools");
                            let _ = client.close().await;
                        }
                    }
                }
                Err(e) => {
                    warn!(server = %def.name, error = %e, "external tool-server failed to start");
                }
            }
        }

        catalog
    }

    pub async fn call_tool(
        &self,
        cancel: &CancellationToken,
        server: &str,
        tool: &str,
        args: Option<Value>,
    ) -> Result<CallResult, RuntimeError> {
        let servers = self.servers.read().await;
        let active = servers
            .get(server)
            .ok_or_else(|| RuntimeError::UnknownServer(server.to_string()))?;
        active.client.call_tool(cancel, tool, args).await
    }

    pub async fn is_proposal_required(&self, server: &str) -> bool {
        self.servers
            .read()
            .await
            .get(server)
            .map(|s| s.proposal_required)
            .unwrap_or(false)
    }

    /// Closes every client regardless of earlier failures; returns the last
    /// error observed, if any.
    pub async fn close(&self) -> Result<(), RuntimeError> {
        let mut servers = self.servers.write().await;
        let mut last_err = None;
        for (name, server) in servers.drain() {
            if let Err(e) = server.client.close().await {
                warn!(server = %name, error = %e, "error closing external tool-server");
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_server_is_an_error() {
        let manager = ExternalToolManager::new();
        let cancel = CancellationToken::new();
        let err = manager
            .call_tool(&cancel, "missing", "echo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn proposal_required_defaults_false_for_unknown_server() {
        let manager = ExternalToolManager::new();
        assert!(!manager.is_proposal_required("missing").await);
    }

    #[tokio::test]
    async fn start_all_with_no_definitions_yields_empty_catalog() {
        let manager = ExternalToolManager::new();
        let cancel = CancellationToken::new();
        let catalog = manager.start_all(&cancel, &[]).await;
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn start_all_with_unresolvable_command_drops_server_without_failing() {
        let manager = ExternalToolManager::new();
        let cancel = CancellationToken::new();
        let defs = vec![ExternalServerDefinition {
            name: "bogus".into(),
            command: "definitely-not-a-real-binary-xyz".into(),
            args: vec![],
            env: HashMap::new(),
            proposal_required: None,
        }];
        let catalog = manager.start_all(&cancel, &defs).await;
        assert!(catalog.is_empty());
        let err = manager
            .call_tool(&cancel, "bogus", "echo", None)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn close_with_no_active_servers_is_ok() {
        let manager = ExternalToolManager::new();
        manager.close().await.unwrap();
    }
}
