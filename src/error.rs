use thiserror::Error;

/// Error taxonomy for the gateway control, frame codec and proxy layers.
///
/// `MalformedFrame`, `UnknownType` and `RelayFailure` are logged and swallowed
/// at the boundary that produces them and never reach the gateway-facing HTTP
/// response. `ConfigViolation` and `InitUse` are raised to the caller.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("transient network error: {0}")]
    TransientNetwork(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown sensor type code: 0x{0:02X}")]
    UnknownType(u8),

    #[error("invalid configuration value: {0}")]
    ConfigViolation(String),

    #[error("gateway session used before init()")]
    InitUse,

    #[error("cloud relay failed: {0}")]
    RelayFailure(String),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
