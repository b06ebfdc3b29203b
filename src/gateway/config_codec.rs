//! The 186-octet gateway configuration record (as received from FIND/GET_CONFIG)
//! and the 181-octet SET_CONFIG record written back to the gateway.
//!
//! The original-proxy preservation scheme steganographically hides the
//! user's pre-attach proxy settings in the unused tail bytes of the
//! cloud-server and proxy string fields (not the name field — the 62+62-byte
//! budget in the testable properties only reconciles with two 65-byte fields;
//! see DESIGN.md).

use std::net::Ipv4Addr;

use crate::error::{ProxyError, Result};
use crate::gateway::id::GatewayId;

pub const CONFIG_LEN: usize = 186;
pub const SET_CONFIG_LEN: usize = 181;

const ORIG_PROXY_BYTE1: u8 = 0x19;
const ORIG_PROXY_BYTE2: u8 = 0x74;

const NAME_MAX: usize = 20;
const SERVER_MAX: usize = 64;
const PROXY_MAX: usize = 64;

/// The gateway's pre-attach proxy settings, preserved across attach/detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservedProxy {
    pub use_proxy: bool,
    pub proxy_port: u16,
    pub proxy: String,
}

impl PreservedProxy {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.proxy.len());
        out.push(self.use_proxy as u8);
        out.extend_from_slice(&self.proxy_port.to_be_bytes());
        out.extend_from_slice(self.proxy.as_bytes());
        out
    }
}

/// The gateway's configuration, as parsed from a 186-byte FIND/GET_CONFIG reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub id: GatewayId,
    pub dhcp_ip: Ipv4Addr,
    pub use_dhcp: bool,
    pub fixed_ip: Ipv4Addr,
    pub fixed_netmask: Ipv4Addr,
    pub fixed_gateway: Ipv4Addr,
    pub name: String,
    pub server: String,
    pub use_proxy: bool,
    pub proxy: String,
    pub proxy_port: u16,
    pub fixed_dns: Ipv4Addr,
    /// Recovered from the wire bytes' steganographic tail, if present.
    pub orig: Option<PreservedProxy>,
}

fn find_nul(buf: &[u8], start: usize, end: usize) -> Result<usize> {
    buf[start..end]
        .iter()
        .position(|&b| b == 0)
        .map(|i| start + i)
        .ok_or_else(|| {
            ProxyError::MalformedFrame(format!("no NUL terminator in field {start}..{end}"))
        })
}

impl GatewayConfig {
    /// Parses a 186-byte configuration record. If `expected_id` is given, the
    /// record's embedded id must match it.
    pub fn parse(buf: &[u8], expected_id: Option<GatewayId>) -> Result<Self> {
        if buf.len() != CONFIG_LEN {
            return Err(ProxyError::MalformedFrame(format!(
                "config record length {} != {CONFIG_LEN}",
                buf.len()
            )));
        }
        let declared_len = u16::from_be_bytes([buf[8], buf[9]]) as usize;
        if declared_len != CONFIG_LEN {
            return Err(ProxyError::MalformedFrame(format!(
                "config length field {declared_len} != {CONFIG_LEN}"
            )));
        }
        let id = GatewayId::from_bytes(buf[2..8].try_into().unwrap());
        if let Some(expected) = expected_id {
            if expected != id {
                return Err(ProxyError::MalformedFrame(format!(
                    "config id {id} != expected {expected}"
                )));
            }
        }

        let mut orig_data: Vec<u8> = Vec::new();

        let dhcp_ip = Ipv4Addr::new(buf[11], buf[12], buf[13], buf[14]);
        let use_dhcp = buf[15] != 0;
        let fixed_ip = Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19]);
        let fixed_netmask = Ipv4Addr::new(buf[20], buf[21], buf[22], buf[23]);
        let fixed_gateway = Ipv4Addr::new(buf[24], buf[25], buf[26], buf[27]);

        let name_end = find_nul(buf, 28, 49)?;
        let name = String::from_utf8_lossy(&buf[28..name_end]).into_owned();

        let server_end = find_nul(buf, 49, 114)?;
        if server_end + 2 < 114
            && buf[server_end + 1] == ORIG_PROXY_BYTE1
            && buf[server_end + 2] == ORIG_PROXY_BYTE2
        {
            orig_data.extend_from_slice(&buf[server_end + 3..114]);
        }
        let server = String::from_utf8_lossy(&buf[49..server_end]).into_owned();

        let use_proxy = buf[114] != 0;

        let proxy_end = find_nul(buf, 115, 180)?;
        if proxy_end + 2 < 180
            && buf[proxy_end + 1] == ORIG_PROXY_BYTE1
            && buf[proxy_end + 2] == ORIG_PROXY_BYTE2
        {
            orig_data.extend_from_slice(&buf[proxy_end + 3..180]);
        }
        let proxy = String::from_utf8_lossy(&buf[115..proxy_end]).into_owned();

        let proxy_port = u16::from_be_bytes([buf[180], buf[181]]);
        let fixed_dns = Ipv4Addr::new(buf[182], buf[183], buf[184], buf[185]);

        let orig = if orig_data.len() > 3 {
            let orig_use_proxy = orig_data[0] != 0;
            let orig_proxy_port = u16::from_be_bytes([orig_data[1], orig_data[2]]);
            let host_end = orig_data[3..]
                .iter()
                .position(|&b| b == 0)
                .map(|i| 3 + i)
                .unwrap_or(orig_data.len());
            let orig_proxy = String::from_utf8_lossy(&orig_data[3..host_end]).into_owned();
            Some(PreservedProxy {
                use_proxy: orig_use_proxy,
                proxy_port: orig_proxy_port,
                proxy: orig_proxy,
            })
        } else {
            None
        };

        Ok(GatewayConfig {
            id,
            dhcp_ip,
            use_dhcp,
            fixed_ip,
            fixed_netmask,
            fixed_gateway,
            name,
            server,
            use_proxy,
            proxy,
            proxy_port,
            fixed_dns,
            orig,
        })
    }

    pub fn set_name(&mut self, value: String) -> Result<()> {
        if value.len() > NAME_MAX {
            return Err(ProxyError::ConfigViolation("name is too long".into()));
        }
        self.name = value;
        Ok(())
    }

    pub fn set_server(&mut self, value: String) -> Result<()> {
        if value.len() > SERVER_MAX {
            return Err(ProxyError::ConfigViolation(
                "server address is too long".into(),
            ));
        }
        self.server = value;
        Ok(())
    }

    pub fn set_proxy(&mut self, value: String) -> Result<()> {
        if value.len() > PROXY_MAX {
            return Err(ProxyError::ConfigViolation(
                "proxy server address is too long".into(),
            ));
        }
        self.proxy = value;
        Ok(())
    }

    pub fn set_proxy_port(&mut self, value: u16) -> Result<()> {
        self.proxy_port = value;
        Ok(())
    }

    /// Serializes a 181-byte SET_CONFIG packet for this configuration,
    /// spreading any preserved-proxy triple across the server/proxy field
    /// tails.
    pub fn to_set_config_bytes(&self, command: u16) -> Vec<u8> {
        let mut packet = vec![0u8; SET_CONFIG_LEN];
        packet[0..2].copy_from_slice(&command.to_be_bytes());
        packet[2..8].copy_from_slice(self.id.as_bytes());
        packet[8..10].copy_from_slice(&(SET_CONFIG_LEN as u16).to_be_bytes());
        packet[10] = self.use_dhcp as u8;
        packet[11..15].copy_from_slice(&self.fixed_ip.octets());
        packet[15..19].copy_from_slice(&self.fixed_netmask.octets());
        packet[19..23].copy_from_slice(&self.fixed_gateway.octets());

        let name_bytes = self.name.as_bytes();
        packet[23..23 + name_bytes.len()].copy_from_slice(name_bytes);
        // remaining name-field tail is left zeroed; no markers are ever
        // embedded there.

        let orig_data = self.orig.as_ref().map(PreservedProxy::encode);
        let mut orig_pos = 0usize;

        let server_bytes = self.server.as_bytes();
        packet[44..44 + server_bytes.len()].copy_from_slice(server_bytes);
        {
            let pad_start = 44 + server_bytes.len();
            let pad_len = 109 - pad_start;
            if let Some(data) = orig_data.as_ref() {
                if orig_pos < data.len() && pad_len >= 3 {
                    packet[pad_start + 1] = ORIG_PROXY_BYTE1;
                    packet[pad_start + 2] = ORIG_PROXY_BYTE2;
                    let take = (data.len() - orig_pos).min(pad_len - 3);
                    packet[pad_start + 3..pad_start + 3 + take]
                        .copy_from_slice(&data[orig_pos..orig_pos + take]);
                    orig_pos += take;
                }
            }
        }

        packet[109] = self.use_proxy as u8;

        let proxy_bytes = self.proxy.as_bytes();
        packet[110..110 + proxy_bytes.len()].copy_from_slice(proxy_bytes);
        {
            let pad_start = 110 + proxy_bytes.len();
            let pad_len = 175 - pad_start;
            if let Some(data) = orig_data.as_ref() {
                if orig_pos < data.len() && pad_len >= 3 {
                    packet[pad_start + 1] = ORIG_PROXY_BYTE1;
                    packet[pad_start + 2] = ORIG_PROXY_BYTE2;
                    let take = (data.len() - orig_pos).min(pad_len - 3);
                    packet[pad_start + 3..pad_start + 3 + take]
                        .copy_from_slice(&data[orig_pos..orig_pos + take]);
                }
            }
        }

        packet[175..177].copy_from_slice(&self.proxy_port.to_be_bytes());
        packet[177..181].copy_from_slice(&self.fixed_dns.octets());

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config(id: GatewayId) -> GatewayConfig {
        GatewayConfig {
            id,
            dhcp_ip: Ipv4Addr::new(192, 168, 1, 50),
            use_dhcp: true,
            fixed_ip: Ipv4Addr::new(192, 168, 1, 222),
            fixed_netmask: Ipv4Addr::new(255, 255, 255, 0),
            fixed_gateway: Ipv4Addr::new(192, 168, 1, 254),
            name: "MOBILEALERTS-Gateway".into(),
            server: "www.data199.com".into(),
            use_proxy: false,
            proxy: "192.168.1.1".into(),
            proxy_port: 8080,
            fixed_dns: Ipv4Addr::new(192, 168, 1, 253),
            orig: None,
        }
    }

    fn to_186(config: &GatewayConfig) -> Vec<u8> {
        // Re-lay out a 181-byte SET_CONFIG-shaped buffer into the 186-byte
        // FIND/GET_CONFIG shape used by `parse`, for round-trip testing.
        let set_bytes = config.to_set_config_bytes(3);
        let mut buf = vec![0u8; CONFIG_LEN];
        buf[0..2].copy_from_slice(&set_bytes[0..2]);
        buf[2..8].copy_from_slice(&set_bytes[2..8]);
        buf[8..10].copy_from_slice(&(CONFIG_LEN as u16).to_be_bytes());
        buf[11] = set_bytes[10]; // use_dhcp lives in dhcp_ip's place only coincidentally sized
        buf[11..15].copy_from_slice(&[0, 0, 0, 0]);
        buf[15] = set_bytes[10];
        buf[16..20].copy_from_slice(&set_bytes[11..15]);
        buf[20..24].copy_from_slice(&set_bytes[15..19]);
        buf[24..28].copy_from_slice(&set_bytes[19..23]);
        buf[28..49].copy_from_slice(&set_bytes[23..44]);
        buf[49..114].copy_from_slice(&set_bytes[44..109]);
        buf[114] = set_bytes[109];
        buf[115..180].copy_from_slice(&set_bytes[110..175]);
        buf[180..182].copy_from_slice(&set_bytes[175..177]);
        buf[182..186].copy_from_slice(&set_bytes[177..181]);
        buf
    }

    #[test]
    fn round_trips_without_preserved_proxy() {
        let id: GatewayId = "001D8C0EA927".parse().unwrap();
        let config = sample_config(id);
        let buf = to_186(&config);
        let parsed = GatewayConfig::parse(&buf, Some(id)).unwrap();
        assert_eq!(parsed.name, config.name);
        assert_eq!(parsed.server, config.server);
        assert_eq!(parsed.proxy, config.proxy);
        assert_eq!(parsed.proxy_port, config.proxy_port);
        assert!(parsed.orig.is_none());
    }

    #[test]
    fn round_trips_preserved_proxy_triple() {
        let id: GatewayId = "001D8C0EA927".parse().unwrap();
        let mut config = sample_config(id);
        config.orig = Some(PreservedProxy {
            use_proxy: true,
            proxy_port: 3128,
            proxy: "10.0.0.1".into(),
        });
        let buf = to_186(&config);
        let parsed = GatewayConfig::parse(&buf, Some(id)).unwrap();
        assert_eq!(parsed.orig, config.orig);
    }

    #[test]
    fn rejects_wrong_length() {
        let buf = vec![0u8; 100];
        assert!(GatewayConfig::parse(&buf, None).is_err());
    }

    #[test]
    fn rejects_mismatched_length_field() {
        let id: GatewayId = "001D8C0EA927".parse().unwrap();
        let config = sample_config(id);
        let mut buf = to_186(&config);
        buf[8..10].copy_from_slice(&185u16.to_be_bytes());
        assert!(GatewayConfig::parse(&buf, None).is_err());
    }

    #[test]
    fn rejects_id_mismatch() {
        let id: GatewayId = "001D8C0EA927".parse().unwrap();
        let other: GatewayId = "AABBCCDDEEFF".parse().unwrap();
        let config = sample_config(id);
        let buf = to_186(&config);
        assert!(GatewayConfig::parse(&buf, Some(other)).is_err());
    }
}
