//! Low-level UDP control-protocol transport. All gateway communication is a
//! broadcast send followed by an optional single-datagram read: the gateway
//! has no fixed listening address we can unicast to, and identifies itself
//! to us only in the payload.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout as tokio_timeout;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::gateway::id::GatewayId;

pub const BROADCAST_ADDR: &str = "255.255.255.255";
pub const PORT: u16 = 8003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    /// Find every gateway on the local network.
    DiscoverGateways = 1,
    /// Find a single gateway and get its configuration.
    FindGateway = 2,
    GetConfig = 3,
    SetConfig = 4,
    /// A reboot takes roughly 10s for the gateway to come back up.
    Reboot = 5,
}

const COMMAND_PACKET_LEN: u16 = 10;
const READ_BUF_LEN: usize = 256;

fn prepare_command(command: Command, id: &GatewayId) -> [u8; 10] {
    let mut packet = [0u8; 10];
    packet[0..2].copy_from_slice(&(command as u16).to_be_bytes());
    packet[2..8].copy_from_slice(id.as_bytes());
    packet[8..10].copy_from_slice(&COMMAND_PACKET_LEN.to_be_bytes());
    packet
}

/// Sends and receives UDP control-protocol datagrams for one or more
/// gateways. Cheap to construct; each call binds its own ephemeral socket,
/// mirroring how the vendor gateway itself expects short-lived clients.
#[derive(Debug, Clone)]
pub struct UdpClient {
    local_ip_address: Option<IpAddr>,
}

impl UdpClient {
    pub fn new(local_ip_address: Option<IpAddr>) -> Self {
        Self { local_ip_address }
    }

    /// Binds a fresh broadcast-capable UDP socket. `SO_REUSEADDR` and
    /// `SO_BROADCAST` are set on the raw `socket2` socket before it is handed
    /// to tokio — `tokio::net::UdpSocket` has no `SO_REUSEADDR` setter of its
    /// own.
    async fn bind_socket(&self) -> Result<UdpSocket> {
        let bind_ip = self
            .local_ip_address
            .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
        let bind_addr = SocketAddr::new(bind_ip, 0);

        let socket = Socket::new(Domain::for_address(bind_addr), Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&bind_addr.into())?;
        socket.set_broadcast(true)?;

        UdpSocket::from_std(socket.into()).map_err(ProxyError::from)
    }

    /// Sends `command` addressed to `id` and, if `wait_for_result` is set,
    /// waits up to `timeout` for a single reply datagram.
    pub async fn send_command(
        &self,
        command: Command,
        id: &GatewayId,
        wait_for_result: bool,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        let packet = prepare_command(command, id);
        let socket = self.bind_socket().await?;
        socket.send_to(&packet, (BROADCAST_ADDR, PORT)).await?;

        if !wait_for_result {
            return Ok(None);
        }

        let mut buf = [0u8; READ_BUF_LEN];
        match tokio_timeout(timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Ok(Some(buf[..n].to_vec())),
            Ok(Err(e)) => Err(ProxyError::from(e)),
            Err(_) => Ok(None),
        }
    }

    /// Repeatedly issues FIND_GATEWAY (5s per attempt) until a reply arrives
    /// or `deadline` has elapsed.
    pub async fn get_config(&self, id: &GatewayId, deadline: Duration) -> Option<Vec<u8>> {
        let start = tokio::time::Instant::now();
        loop {
            if start.elapsed() > deadline {
                return None;
            }
            match self
                .send_command(Command::FindGateway, id, true, Duration::from_secs(5))
                .await
            {
                Ok(Some(config)) => return Some(config),
                Ok(None) => {
                    debug!(gateway_id = %id, "FIND_GATEWAY timed out, retrying");
                    continue;
                }
                Err(e) => {
                    debug!(gateway_id = %id, error = %e, "FIND_GATEWAY failed, retrying");
                    continue;
                }
            }
        }
    }

    /// Sends a pre-built SET_CONFIG (or other fire-and-forget) packet.
    pub async fn send_packet(&self, packet: &[u8]) -> Result<()> {
        let socket = self.bind_socket().await?;
        socket.send_to(packet, (BROADCAST_ADDR, PORT)).await?;
        Ok(())
    }

    /// Broadcasts DISCOVER_GATEWAYS and collects replies for up to `timeout`,
    /// reading with a 1s per-datagram timeout, de-duplicated by gateway id.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<(GatewayId, Vec<u8>)>> {
        let socket = self.bind_socket().await?;
        let packet = prepare_command(Command::DiscoverGateways, &GatewayId::zero());
        socket.send_to(&packet, (BROADCAST_ADDR, PORT)).await?;
        debug!("gateway discovery packet sent");

        let mut found = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let start = tokio::time::Instant::now();
        let mut buf = [0u8; READ_BUF_LEN];

        loop {
            if start.elapsed() > timeout {
                break;
            }
            match tokio_timeout(Duration::from_secs(1), socket.recv(&mut buf)).await {
                Ok(Ok(n)) => {
                    let config = &buf[..n];
                    if config.len() >= 186 {
                        let id = GatewayId::from_bytes(config[2..8].try_into().unwrap());
                        if seen.insert(id) {
                            found.push((id, config.to_vec()));
                        }
                    }
                }
                Ok(Err(e)) => return Err(ProxyError::from(e)),
                Err(_) => break,
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepares_10_byte_command_frame() {
        let id: GatewayId = "001D8C0EA927".parse().unwrap();
        let packet = prepare_command(Command::GetConfig, &id);
        assert_eq!(packet.len(), 10);
        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), 3);
        assert_eq!(&packet[2..8], id.as_bytes());
        assert_eq!(u16::from_be_bytes([packet[8], packet[9]]), 10);
    }

    #[test]
    fn discover_uses_zero_id() {
        let packet = prepare_command(Command::DiscoverGateways, &GatewayId::zero());
        assert_eq!(&packet[2..8], &[0u8; 6]);
    }
}
