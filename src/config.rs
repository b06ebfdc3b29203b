use std::env;
use std::net::IpAddr;

/// Process-level configuration for the local proxy.
///
/// Mirrors the "User-facing configuration" surface: everything else about a
/// gateway (its proxy/server/DNS fields) is a programmatic property of the
/// `GatewaySession` itself, not something loaded at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hex-encoded gateway id to attach to directly. If unset, the proxy
    /// discovers gateways on the broadcast network instead.
    pub gateway_id: Option<String>,

    /// Local address the UDP control client and HTTP proxy bind to.
    pub local_ip_address: Option<IpAddr>,

    /// Local port for the HTTP proxy. 0 selects an ephemeral port.
    pub local_port: u16,

    /// Whether accepted gateway uploads are relayed unchanged to the vendor
    /// cloud after local processing.
    pub send_data_to_cloud: bool,
}

impl Config {
    /// Loads configuration from environment variables, falling back to a
    /// `.env` file if present.
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let gateway_id = env::var("GATEWAY_ID").ok().filter(|s| !s.is_empty());

        let local_ip_address = env::var("LOCAL_IP_ADDRESS")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.parse())
            .transpose()?;

        let local_port = env::var("LOCAL_PORT")
            .unwrap_or_else(|_| "0".to_string())
            .parse()?;

        let send_data_to_cloud = env::var("SEND_DATA_TO_CLOUD")
            .unwrap_or_else(|_| "true".to_string())
            .parse()?;

        Ok(Config {
            gateway_id,
            local_ip_address,
            local_port,
            send_data_to_cloud,
        })
    }
}
