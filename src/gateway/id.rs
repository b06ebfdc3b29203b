use std::fmt;
use std::str::FromStr;

use crate::error::{ProxyError, Result};

/// A gateway's 6-octet hardware id. Textual form is uppercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GatewayId([u8; 6]);

impl GatewayId {
    pub const LEN: usize = 6;

    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn zero() -> Self {
        Self([0; 6])
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// The gateway's vendor-facing serial number, derived from the last
    /// three octets of the id (`"80" + id[3..6]` as hex).
    pub fn serial(&self) -> String {
        format!(
            "80{:02X}{:02X}{:02X}",
            self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl FromStr for GatewayId {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 12 {
            return Err(ProxyError::ConfigViolation(format!(
                "gateway id {s:?} must be 12 hex characters"
            )));
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let hex = &s[i * 2..i * 2 + 2];
            *byte = u8::from_str_radix(hex, 16)
                .map_err(|_| ProxyError::ConfigViolation(format!("invalid gateway id {s:?}")))?;
        }
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_renders_uppercase_hex() {
        let id: GatewayId = "001d8c0ea927".parse().unwrap();
        assert_eq!(id.to_string(), "001D8C0EA927");
    }

    #[test]
    fn serial_uses_last_three_octets() {
        let id: GatewayId = "1829EFCB988D".parse().unwrap();
        assert_eq!(id.serial(), "80CB988D");
    }

    #[test]
    fn rejects_wrong_length() {
        assert!("AABB".parse::<GatewayId>().is_err());
    }
}
