use serde::{Deserialize, Serialize};

/// Listen settings, peer list and chain selector handed to the node as one
/// opaque block. Built from `ConsoleConfig::net_prefs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPreferences {
    pub listen_ip: String,
    pub listen_port: u16,
    pub public_ip: Option<String>,
    pub upnp: bool,
    pub ideal_peers: u32,
    pub servers: Vec<String>,
    /// Opaque node-side network state carried through settings.
    pub network_config: Vec<u8>,
    /// `None` selects the public chain.
    pub private_chain: Option<String>,
}

impl NetworkPreferences {
    pub fn is_private(&self) -> bool {
        self.private_chain.is_some()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.listen_port)
    }
}

impl Default for NetworkPreferences {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".to_string(),
            listen_port: 30303,
            public_ip: None,
            upnp: true,
            ideal_peers: 11,
            servers: vec![],
            network_config: vec![],
            private_chain: None,
        }
    }
}
