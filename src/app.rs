use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::gateway::session::{GatewayRegistry, GatewaySession, DEFAULT_GET_CONFIG_TIMEOUT};
use crate::gateway::udp_client::UdpClient;
use crate::gateway::GatewayConfig;
use crate::handler::SensorHandler;
use crate::proxy::{build_router, ProxyState};
use crate::startup::{logger, state::AppState};

/// Default `sensor_added`/`sensor_updated` handler used when the binary is
/// run standalone: logs every lifecycle event instead of acting on it. A
/// real deployment supplies its own [`SensorHandler`] and calls the library
/// directly rather than running this binary.
struct LoggingHandler;

#[async_trait::async_trait]
impl SensorHandler for LoggingHandler {
    async fn sensor_added(&self, sensor: &crate::sensor::Sensor) {
        info!(sensor_id = %sensor.id_hex(), name = ?sensor.display_name, "sensor added");
    }

    async fn sensor_updated(&self, sensor: &crate::sensor::Sensor) {
        info!("{sensor}");
    }
}

/// Broadcasts DISCOVER_GATEWAYS, registers every reply as an `Initialized`
/// session, and attaches each one to `proxy_host:proxy_port`.
async fn discover_and_attach(
    udp: &UdpClient,
    registry: &GatewayRegistry,
    config: &Config,
    proxy_host: IpAddr,
    proxy_port: u16,
    handler: Arc<dyn SensorHandler>,
) {
    let replies = match udp.discover(DEFAULT_GET_CONFIG_TIMEOUT).await {
        Ok(replies) => replies,
        Err(e) => {
            error!(error = %e, "gateway discovery failed");
            return;
        }
    };
    info!(count = replies.len(), "gateway discovery complete");

    for (id, bytes) in replies {
        let parsed = match GatewayConfig::parse(&bytes, Some(id)) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(gateway_id = %id, error = %e, "dropping malformed discovery reply");
                continue;
            }
        };
        let session = Arc::new(GatewaySession::from_config(
            parsed,
            config.local_ip_address,
            config.send_data_to_cloud,
        ));
        if !registry.insert(session.clone()).await {
            warn!(gateway_id = %id, "duplicate gateway id in discovery reply, keeping existing session");
            continue;
        }
        if let Err(e) = session.attach(proxy_host, proxy_port, handler.clone()).await {
            error!(gateway_id = %id, error = %e, "failed to attach discovered gateway");
        }
    }
}

/// Initializes a single gateway by explicit id (`GATEWAY_ID` env var) and
/// attaches it, skipping the broadcast discovery round entirely.
async fn init_and_attach_one(
    registry: &GatewayRegistry,
    config: &Config,
    gateway_id: &str,
    proxy_host: IpAddr,
    proxy_port: u16,
    handler: Arc<dyn SensorHandler>,
) {
    let id = match gateway_id.parse() {
        Ok(id) => id,
        Err(e) => {
            error!(gateway_id, error = %e, "invalid GATEWAY_ID, skipping startup attach");
            return;
        }
    };
    let session = Arc::new(GatewaySession::new(id, config.local_ip_address, config.send_data_to_cloud));
    match session.init(DEFAULT_GET_CONFIG_TIMEOUT).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(gateway_id = %id, "gateway did not respond to FIND_GATEWAY, not attaching");
            return;
        }
        Err(e) => {
            error!(gateway_id = %id, error = %e, "failed to fetch gateway config");
            return;
        }
    }
    if !registry.insert(session.clone()).await {
        warn!(gateway_id = %id, "gateway already registered");
        return;
    }
    if let Err(e) = session.attach(proxy_host, proxy_port, handler).await {
        error!(gateway_id = %id, error = %e, "failed to attach gateway");
    }
}

async fn shutdown_signal(registry: Arc<GatewayRegistry>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutting down, detaching all gateways");
    registry.detach_all().await;
}

pub async fn bootstrap() -> anyhow::Result<()> {
    logger::init();
    info!("starting mobilealerts-proxy");

    let config = Arc::new(Config::load()?);
    let http_client = reqwest::Client::new();
    let registry = Arc::new(GatewayRegistry::new());
    let handler: Arc<dyn SensorHandler> = Arc::new(LoggingHandler);

    let state = AppState {
        config: config.clone(),
        registry: registry.clone(),
        http_client: http_client.clone(),
    };

    let bind_ip = state.config.local_ip_address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let listener = TcpListener::bind((bind_ip, state.config.local_port)).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "local HTTP proxy listening");

    let proxy_host = state.config.local_ip_address.unwrap_or(local_addr.ip());
    let udp = UdpClient::new(state.config.local_ip_address);

    match &state.config.gateway_id {
        Some(gateway_id) => {
            init_and_attach_one(
                &registry,
                &state.config,
                gateway_id,
                proxy_host,
                local_addr.port(),
                handler.clone(),
            )
            .await;
        }
        None => {
            discover_and_attach(
                &udp,
                &registry,
                &state.config,
                proxy_host,
                local_addr.port(),
                handler.clone(),
            )
            .await;
        }
    }

    let proxy_state = ProxyState {
        registry: registry.clone(),
        http_client,
    };
    let app = build_router(proxy_state);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(registry.clone()));
    if let Err(e) = server.await {
        error!(error = %e, "HTTP server exited with error");
    }

    Ok(())
}
