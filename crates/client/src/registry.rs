use std::sync::OnceLock;

use crate::{client::GatewayClient, config::GatewayConfig};

/// Explicit factory for a process's gateway client.
///
/// Constructs at most one client, lazily, from the captured configuration.
/// Callers own the registry and pass it (or a client handle) along; there is
/// no hidden global instance.
pub struct ClientRegistry {
    config: GatewayConfig,
    client: OnceLock<GatewayClient>,
}

impl ClientRegistry {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    /// Registry seeded from `PYLON_GATEWAY_URL` / `PYLON_GATEWAY_TOKEN`.
    pub fn from_env() -> Self {
        Self::new(GatewayConfig::from_env())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The lazily constructed client. Returned handles are cheap clones
    /// sharing the single connection.
    pub fn client(&self) -> GatewayClient {
        self.client
            .get_or_init(|| GatewayClient::new(self.config.clone()))
            .clone()
    }
}
