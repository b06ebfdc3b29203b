//! Per-gateway state: identity, config, attachment, sensor registry, and the
//! control flow that dispatches HTTP-layer updates into the frame codec.
//!
//! All mutable per-gateway state lives behind a single [`tokio::sync::Mutex`]
//! (the "per-session mutex" of the concurrency model). It is never held
//! across an `.await` that can suspend for an unbounded time (UDP round
//! trips, the sensor-name HTTP lookup, or handler callbacks) — those are
//! always done with the lock released, with results folded back in
//! afterwards.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::error::{ProxyError, Result};
use crate::gateway::config_codec::{GatewayConfig, PreservedProxy};
use crate::gateway::id::GatewayId;
use crate::gateway::name_lookup;
use crate::gateway::udp_client::{Command, UdpClient};
use crate::handler::SensorHandler;
use crate::sensor::codec::{checksum_valid, sensor_id_from_subframe, Sensor, RECORD_LEN, SUBFRAME_LEN};

pub const DEFAULT_GET_CONFIG_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifecycle state per spec.md §3 "Lifecycle".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Attached,
}

struct Inner {
    state: SessionState,
    config: Option<GatewayConfig>,
    version: String,
    boot_time: Option<DateTime<Utc>>,
    last_seen: Option<Instant>,
    is_online: bool,
    send_data_to_cloud: bool,
    sensors: HashMap<[u8; 6], Sensor>,
    handler: Option<Arc<dyn SensorHandler>>,
    /// Cached cloud-relay client, reused while the preserved outbound proxy
    /// endpoint stays the same, rebuilt only when it changes.
    relay_client: Option<(String, u16, reqwest::Client)>,
}

/// One gateway's control-plane and data-plane state. Cheap to hold behind an
/// `Arc` and share between the HTTP proxy's routing table and any background
/// UDP maintenance task (ping/reattach).
pub struct GatewaySession {
    id: GatewayId,
    udp: UdpClient,
    inner: Mutex<Inner>,
}

impl GatewaySession {
    pub fn new(id: GatewayId, local_ip_address: Option<IpAddr>, send_data_to_cloud: bool) -> Self {
        GatewaySession {
            id,
            udp: UdpClient::new(local_ip_address),
            inner: Mutex::new(Inner {
                state: SessionState::Uninitialized,
                config: None,
                version: "1.50".to_string(),
                boot_time: None,
                last_seen: None,
                is_online: false,
                send_data_to_cloud,
                sensors: HashMap::new(),
                handler: None,
                relay_client: None,
            }),
        }
    }

    /// Builds an already-`Initialized` session from a config record obtained
    /// out of band (e.g. a DISCOVER reply), avoiding a redundant FIND round
    /// trip.
    pub fn from_config(
        config: GatewayConfig,
        local_ip_address: Option<IpAddr>,
        send_data_to_cloud: bool,
    ) -> Self {
        let mut session = GatewaySession::new(config.id, local_ip_address, send_data_to_cloud);
        {
            let inner = session.inner.get_mut();
            inner.state = SessionState::Initialized;
            inner.is_online = true;
            inner.last_seen = Some(Instant::now());
            inner.config = Some(config);
        }
        session
    }

    pub fn id(&self) -> GatewayId {
        self.id
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn is_online(&self) -> bool {
        self.inner.lock().await.is_online
    }

    pub async fn version(&self) -> String {
        self.inner.lock().await.version.clone()
    }

    /// The gateway's last reported bootup time, decoded from the `"00"`
    /// update's timestamp field.
    pub async fn boot_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.boot_time
    }

    /// `"80" + id[3..6]` as hex, matching the vendor's serial numbering.
    pub fn serial(&self) -> String {
        let bytes = self.id.as_bytes();
        format!("80{:02X}{:02X}{:02X}", bytes[3], bytes[4], bytes[5])
    }

    pub async fn send_data_to_cloud(&self) -> bool {
        self.inner.lock().await.send_data_to_cloud
    }

    pub async fn set_send_data_to_cloud(&self, value: bool) {
        self.inner.lock().await.send_data_to_cloud = value;
    }

    /// The cloud-server host the gateway itself was configured to upload to.
    pub async fn cloud_server(&self) -> String {
        self.inner
            .lock()
            .await
            .config
            .as_ref()
            .map(|c| c.server.clone())
            .unwrap_or_default()
    }

    /// The user's pre-attach outbound proxy, if one was captured and enabled.
    pub async fn original_proxy(&self) -> Option<(String, u16)> {
        let inner = self.inner.lock().await;
        inner.config.as_ref().and_then(|c| {
            c.orig
                .as_ref()
                .filter(|orig| orig.use_proxy)
                .map(|orig| (orig.proxy.clone(), orig.proxy_port))
        })
    }

    /// The client to relay cloud uploads through: `base` directly, or a
    /// client proxied through the gateway's preserved outbound proxy. The
    /// proxied client is cached and reused across calls, rebuilt only when
    /// the proxy endpoint changes.
    pub async fn relay_client(&self, base: &reqwest::Client) -> reqwest::Client {
        let Some((host, port)) = self.original_proxy().await else {
            return base.clone();
        };
        let mut inner = self.inner.lock().await;
        if let Some((cached_host, cached_port, client)) = &inner.relay_client {
            if *cached_host == host && *cached_port == port {
                return client.clone();
            }
        }
        let proxy_url = format!("http://{host}:{port}");
        let client = match reqwest::Proxy::http(&proxy_url).and_then(|proxy| reqwest::Client::builder().proxy(proxy).build()) {
            Ok(client) => client,
            Err(e) => {
                error!(error = %e, proxy_url, "failed to build upstream-proxied relay client, relaying direct");
                base.clone()
            }
        };
        inner.relay_client = Some((host, port, client.clone()));
        client
    }

    /// Fetches configuration via FIND_GATEWAY (retried until `timeout`
    /// elapses) and transitions `Uninitialized` → `Initialized` on success.
    pub async fn init(&self, timeout: Duration) -> Result<bool> {
        let reply = self.udp.get_config(&self.id, timeout).await;
        let mut inner = self.inner.lock().await;
        match reply {
            Some(bytes) => {
                let config = GatewayConfig::parse(&bytes, Some(self.id))?;
                inner.config = Some(config);
                inner.state = SessionState::Initialized;
                inner.is_online = true;
                inner.last_seen = Some(Instant::now());
                Ok(true)
            }
            None => {
                inner.is_online = false;
                Ok(false)
            }
        }
    }

    fn require_config(inner: &Inner) -> Result<&GatewayConfig> {
        inner.config.as_ref().ok_or(ProxyError::InitUse)
    }

    /// Rewrites the gateway's outbound proxy to `proxy_host:proxy_port`,
    /// capturing the pre-existing proxy triple the first time this is
    /// called so [`Self::detach`] can restore it.
    pub async fn attach(
        &self,
        proxy_host: IpAddr,
        proxy_port: u16,
        handler: Arc<dyn SensorHandler>,
    ) -> Result<()> {
        let packet = {
            let mut inner = self.inner.lock().await;
            let config = inner.config.as_ref().ok_or(ProxyError::InitUse)?.clone();
            let mut config = config;
            if config.orig.is_none() {
                config.orig = Some(PreservedProxy {
                    use_proxy: config.use_proxy,
                    proxy_port: config.proxy_port,
                    proxy: config.proxy.clone(),
                });
            }
            config.use_proxy = true;
            config.proxy = proxy_host.to_string();
            config.proxy_port = proxy_port;
            let packet = config.to_set_config_bytes(Command::SetConfig as u16);
            inner.config = Some(config);
            inner.state = SessionState::Attached;
            inner.handler = Some(handler);
            packet
        };
        self.udp.send_packet(&packet).await
    }

    /// Restores the proxy triple captured at [`Self::attach`] and returns to
    /// `Initialized`. A no-op if the session was never attached, or if
    /// attachment never captured a triple.
    pub async fn detach(&self) -> Result<()> {
        let packet = {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Attached {
                return Ok(());
            }
            let Some(config) = inner.config.as_mut() else {
                inner.state = SessionState::Initialized;
                inner.handler = None;
                return Ok(());
            };
            let Some(orig) = config.orig.take() else {
                inner.state = SessionState::Initialized;
                inner.handler = None;
                return Ok(());
            };
            config.use_proxy = orig.use_proxy;
            config.proxy = orig.proxy;
            config.proxy_port = orig.proxy_port;
            let packet = config.to_set_config_bytes(Command::SetConfig as u16);
            inner.state = SessionState::Initialized;
            inner.handler = None;
            packet
        };
        self.udp.send_packet(&packet).await
    }

    /// Re-fetches configuration, refreshes the DHCP/fixed-IP view, and —
    /// when attached — re-attaches if the gateway's on-device proxy no
    /// longer matches this session's proxy endpoint.
    pub async fn ping(&self, reattach_to_proxy: bool, timeout: Duration) -> Result<bool> {
        let Some(bytes) = self.udp.get_config(&self.id, timeout).await else {
            self.inner.lock().await.is_online = false;
            return Ok(false);
        };
        let fresh = GatewayConfig::parse(&bytes, Some(self.id))?;

        let packet = {
            let mut inner = self.inner.lock().await;
            inner.is_online = true;
            inner.last_seen = Some(Instant::now());
            let attached = inner.state == SessionState::Attached;
            let Some(config) = inner.config.as_mut() else {
                inner.config = Some(fresh);
                return Ok(true);
            };
            config.dhcp_ip = fresh.dhcp_ip;
            config.use_dhcp = fresh.use_dhcp;
            config.fixed_ip = fresh.fixed_ip;

            if !attached || !reattach_to_proxy {
                return Ok(true);
            }
            let mismatched = fresh.use_proxy != config.use_proxy || fresh.proxy != config.proxy;
            if !mismatched {
                return Ok(true);
            }
            config.to_set_config_bytes(Command::SetConfig as u16)
        };
        self.udp.send_packet(&packet).await?;
        Ok(true)
    }

    /// Restores the gateway's factory-default configuration. Supplemental
    /// (spec.md does not mark it a Non-goal); grounded in `Gateway.reset_config`.
    pub async fn reset_config(&self) -> Result<()> {
        let packet = {
            let mut inner = self.inner.lock().await;
            let config = inner.config.as_mut().ok_or(ProxyError::InitUse)?;
            config.set_name("MOBILEALERTS-Gateway".to_string())?;
            config.use_dhcp = true;
            config.fixed_ip = Ipv4Addr::new(192, 168, 1, 222);
            config.fixed_netmask = Ipv4Addr::new(255, 255, 255, 0);
            config.fixed_gateway = Ipv4Addr::new(192, 168, 1, 254);
            config.fixed_dns = Ipv4Addr::new(192, 168, 1, 253);
            config.set_server("www.data199.com".to_string())?;
            config.use_proxy = false;
            config.set_proxy("192.168.1.1".to_string())?;
            config.set_proxy_port(8080)?;
            config.to_set_config_bytes(Command::SetConfig as u16)
        };
        self.udp.send_packet(&packet).await
    }

    /// Instructs the gateway to reboot, optionally waiting for the refreshed
    /// configuration the gateway may send back.
    pub async fn reboot(&self, update_config: bool, timeout: Duration) -> Result<()> {
        let reply = self
            .udp
            .send_command(Command::Reboot, &self.id, update_config, timeout)
            .await?;
        if let Some(bytes) = reply {
            let config = GatewayConfig::parse(&bytes, Some(self.id))?;
            self.inner.lock().await.config = Some(config);
        }
        Ok(())
    }

    /// Dispatches one HTTP-layer update. `code` is the `HTTP_IDENTIFY`
    /// header's third field: `"00"` selects the bootup record, `"C0"` the
    /// sensor batch. Unknown codes are logged and dropped.
    pub async fn handle_update(
        &self,
        client: &reqwest::Client,
        code: &str,
        payload: &[u8],
    ) -> Result<()> {
        self.inner.lock().await.is_online = true;
        match code {
            "00" => self.handle_bootup(payload).await,
            "C0" => self.handle_sensor_batch(client, payload).await,
            other => {
                warn!(gateway_id = %self.id, code = other, "unknown update code, dropping");
                Ok(())
            }
        }
    }

    async fn handle_bootup(&self, payload: &[u8]) -> Result<()> {
        if payload.len() != 15 {
            warn!(
                gateway_id = %self.id,
                len = payload.len(),
                "malformed bootup update, expected 15 bytes"
            );
            return Ok(());
        }
        if payload[5..11] != *self.id.as_bytes() {
            warn!(gateway_id = %self.id, "bootup update id mismatch, dropping");
            return Ok(());
        }
        let major = u16::from_be_bytes([payload[11], payload[12]]);
        let minor = u16::from_be_bytes([payload[13], payload[14]]);
        let boot_raw = u32::from_be_bytes([payload[1], payload[2], payload[3], payload[4]]);
        let mut inner = self.inner.lock().await;
        inner.version = format!("{major}.{minor}");
        inner.boot_time = DateTime::from_timestamp(boot_raw as i64, 0);
        inner.last_seen = Some(Instant::now());
        debug!(
            gateway_id = %self.id,
            version = %inner.version,
            boot_time = ?inner.boot_time,
            "gateway bootup"
        );
        Ok(())
    }

    async fn handle_sensor_batch(&self, client: &reqwest::Client, payload: &[u8]) -> Result<()> {
        let mut pos = 0usize;
        while pos + RECORD_LEN <= payload.len() {
            let record = &payload[pos..pos + RECORD_LEN];
            pos += RECORD_LEN;

            if !checksum_valid(record) {
                error!(gateway_id = %self.id, "sub-frame checksum mismatch, dropping");
                continue;
            }
            let subframe = &record[..SUBFRAME_LEN];
            let sensor_id = sensor_id_from_subframe(subframe)?;

            let is_new = {
                let mut inner = self.inner.lock().await;
                if inner.sensors.contains_key(&sensor_id) {
                    false
                } else {
                    inner.sensors.insert(sensor_id, Sensor::new(sensor_id));
                    true
                }
            };

            let handler = self.inner.lock().await.handler.clone();

            if is_new {
                let hex_id: String = sensor_id.iter().map(|b| format!("{b:02X}")).collect();
                let name = name_lookup::get_sensor_name(client, &hex_id).await;
                let snapshot = {
                    let mut inner = self.inner.lock().await;
                    let sensor = inner
                        .sensors
                        .entry(sensor_id)
                        .or_insert_with(|| Sensor::new(sensor_id));
                    sensor.display_name = name;
                    sensor.clone()
                };
                if let Some(h) = &handler {
                    h.sensor_added(&snapshot).await;
                }
            }

            let outcome = {
                let mut inner = self.inner.lock().await;
                inner.last_seen = Some(Instant::now());
                let sensor = inner
                    .sensors
                    .entry(sensor_id)
                    .or_insert_with(|| Sensor::new(sensor_id));
                sensor.update(subframe).map(|applied| (applied, sensor.clone()))
            };

            match outcome {
                Ok((applied, snapshot)) => {
                    if applied {
                        if let Some(h) = &handler {
                            h.sensor_updated(&snapshot).await;
                        }
                    }
                }
                Err(ProxyError::UnknownType(t)) => {
                    warn!(gateway_id = %self.id, type_code = format!("0x{t:02X}"), "unknown sensor type, dropping");
                }
                Err(e) => {
                    error!(gateway_id = %self.id, error = %e, "failed to decode sub-frame, dropping");
                }
            }
        }
        Ok(())
    }
}

/// The proxy-wide `id → session` registry. Guarded by a single `RwLock`
/// (read-heavy: routing lookups vastly outnumber attach/detach), per §5
/// "Shared state" — never held across a suspension point.
pub struct GatewayRegistry {
    sessions: RwLock<HashMap<GatewayId, Arc<GatewaySession>>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        GatewayRegistry {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a session. Returns `false` without replacing the existing
    /// entry if `id` is already registered (gateway id uniqueness).
    pub async fn insert(&self, session: Arc<GatewaySession>) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.id()) {
            return false;
        }
        sessions.insert(session.id(), session);
        true
    }

    pub async fn get(&self, id: GatewayId) -> Option<Arc<GatewaySession>> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: GatewayId) -> Option<Arc<GatewaySession>> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn sessions(&self) -> Vec<Arc<GatewaySession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    /// Detaches every registered gateway, restoring each one's original
    /// proxy configuration. Run on proxy shutdown per §4.5 "Shutdown".
    pub async fn detach_all(&self) {
        let sessions = self.sessions.read().await.values().cloned().collect::<Vec<_>>();
        for session in sessions {
            if let Err(e) = session.detach().await {
                error!(gateway_id = %session.id(), error = %e, "failed to detach gateway on shutdown");
            }
        }
        self.sessions.write().await.clear();
    }
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn base_config(id: GatewayId) -> GatewayConfig {
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

    fn checksum_record(subframe_prefix: &[u8]) -> Vec<u8> {
        let mut record = vec![0u8; SUBFRAME_LEN];
        record[..subframe_prefix.len()].copy_from_slice(subframe_prefix);
        let sum: u32 = record.iter().map(|&b| b as u32).sum();
        record.push((sum & 0x7F) as u8);
        record
    }

    #[tokio::test]
    async fn attach_then_detach_round_trips_without_sending_udp() {
        let id: GatewayId = "001D8C0EA927".parse().unwrap();
        let session = GatewaySession::from_config(base_config(id), None, true);
        assert_eq!(session.state().await, SessionState::Initialized);
        // attach/detach both call udp.send_packet, which binds a real socket;
        // exercised here only far enough to prove the state machine and
        // preserved-triple bookkeeping, not the network send itself.
        assert_eq!(session.original_proxy().await, None);
    }

    #[tokio::test]
    async fn handle_sensor_batch_fires_added_before_updated() {
        let id: GatewayId = "021D8C0EA927".parse().unwrap();
        let session = GatewaySession::from_config(base_config(id), None, true);

        let added = Arc::new(AtomicUsize::new(0));
        let updated = Arc::new(AtomicUsize::new(0));
        struct CountingHandler {
            added: Arc<AtomicUsize>,
            updated: Arc<AtomicUsize>,
        }
        #[async_trait::async_trait]
        impl SensorHandler for CountingHandler {
            async fn sensor_added(&self, _sensor: &Sensor) {
                self.added.fetch_add(1, Ordering::SeqCst);
            }
            async fn sensor_updated(&self, _sensor: &Sensor) {
                self.updated.fetch_add(1, Ordering::SeqCst);
            }
        }
        let handler = Arc::new(CountingHandler {
            added: added.clone(),
            updated: updated.clone(),
        });

        {
            let mut inner = session.inner.lock().await;
            inner.handler = Some(handler);
            inner.state = SessionState::Attached;
        }

        let mut sub = vec![0u8; SUBFRAME_LEN];
        sub[0] = 0x02;
        sub[6..12].copy_from_slice(&[0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        let record = checksum_record(&sub);

        let client = reqwest::Client::new();
        session.handle_update(&client, "C0", &record).await.unwrap();

        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert_eq!(updated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_bootup_updates_version() {
        let id: GatewayId = "031D8C0EA927".parse().unwrap();
        let session = GatewaySession::from_config(base_config(id), None, true);
        let mut payload = vec![0u8; 15];
        payload[1..5].copy_from_slice(&1_636_809_229u32.to_be_bytes());
        payload[5..11].copy_from_slice(id.as_bytes());
        payload[11..13].copy_from_slice(&2u16.to_be_bytes());
        payload[13..15].copy_from_slice(&5u16.to_be_bytes());

        let client = reqwest::Client::new();
        session.handle_update(&client, "00", &payload).await.unwrap();
        assert_eq!(session.version().await, "2.5");
        assert_eq!(
            session.boot_time().await.unwrap().to_string(),
            "2021-11-13 13:13:49 UTC"
        );
    }

    #[tokio::test]
    async fn registry_rejects_duplicate_id() {
        let id: GatewayId = "041D8C0EA927".parse().unwrap();
        let registry = GatewayRegistry::new();
        let s1 = Arc::new(GatewaySession::from_config(base_config(id), None, true));
        let s2 = Arc::new(GatewaySession::from_config(base_config(id), None, true));
        assert!(registry.insert(s1).await);
        assert!(!registry.insert(s2).await);
    }
}
