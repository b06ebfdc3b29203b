pub mod config_codec;
pub mod id;
pub mod name_lookup;
pub mod session;
pub mod udp_client;

pub use config_codec::{GatewayConfig, PreservedProxy};
pub use id::GatewayId;
pub use session::{GatewayRegistry, GatewaySession};
