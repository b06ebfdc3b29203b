//! The local HTTP proxy: a single fallback route that accepts any method or
//! path, because the wire contract here is "the gateway PUTs to an arbitrary
//! relative URL", not a JSON API with a fixed route table. Grounded in
//! `Proxy.request_handler` (`original_source/mobilealerts/proxy.py`).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{Method, Response};
use axum::response::IntoResponse;
use axum::Router;
use tracing::error;

use crate::gateway::id::GatewayId;
use crate::gateway::session::GatewayRegistry;
use crate::proxy::relay;

/// Upper bound on a gateway upload's body size; sensor batches are small
/// (a handful of 64-byte records) so this only guards against a gateway
/// lying about `Content-Length`.
const MAX_UPLOAD_BYTES: usize = 1 << 20;

#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<GatewayRegistry>,
    pub http_client: reqwest::Client,
}

pub fn build_router(state: ProxyState) -> Router {
    Router::new().fallback(handle_request).with_state(state)
}

/// The 24-octet acknowledgement every gateway request gets, regardless of
/// whether it was valid: `big-endian uint32 × 6 = (1, 0, now, 1, 0x1761D480, 1)`.
/// Gateway firmware treats any deviation from this exact layout as an
/// invalid response and retries.
fn synthetic_ack_body() -> Vec<u8> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    let mut body = Vec::with_capacity(24);
    for word in [1u32, 0, now, 1, 0x1761_D480, 1] {
        body.extend_from_slice(&word.to_be_bytes());
    }
    body
}

fn ack_response() -> axum::response::Response {
    let body = synthetic_ack_body();
    Response::builder()
        .header("Content-Type", "application/octet-stream")
        .header("Content-Length", body.len().to_string())
        .header("Connection", "close")
        .body(Body::from(body))
        .unwrap()
        .into_response()
}

/// Parses the `HTTP_IDENTIFY` header's `serial:gatewayId:code` form. Only
/// the middle and last fields are used.
fn parse_identify(value: &str) -> Option<(GatewayId, String)> {
    let mut fields = value.split(':');
    let _serial = fields.next()?;
    let gateway_id = fields.next()?;
    let code = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    let gateway_id: GatewayId = gateway_id.parse().ok()?;
    Some((gateway_id, code.to_string()))
}

async fn handle_request(State(state): State<ProxyState>, request: Request) -> axum::response::Response {
    // The synthetic ack is prepared and returned before payload processing
    // starts, per the ordering guarantees in §5; we build it up front and
    // return it on every exit path below.
    let ack = ack_response();

    if request.method() != Method::PUT {
        error!(method = %request.method(), "non-PUT request to gateway proxy");
        return ack;
    }

    let (parts, body) = request.into_parts();
    let headers = parts.headers;

    let valid_upload = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "application/octet-stream")
        && headers.get("content-length").is_some();
    if !valid_upload {
        error!("invalid content in gateway's PUT request");
        return ack;
    }

    let Some(identify) = headers
        .get("http_identify")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_identify)
    else {
        error!("invalid or missing HTTP_IDENTIFY header in gateway's PUT request");
        return ack;
    };
    let (gateway_id, code) = identify;

    let bytes = match axum::body::to_bytes(body, MAX_UPLOAD_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read gateway PUT body");
            return ack;
        }
    };

    let Some(session) = state.registry.get(gateway_id).await else {
        error!(gateway_id = %gateway_id, "PUT from unregistered gateway");
        return ack;
    };

    if let Err(e) = session.handle_update(&state.http_client, &code, &bytes).await {
        error!(gateway_id = %gateway_id, error = %e, "failed to handle gateway update");
    }

    if session.send_data_to_cloud().await {
        let client = session.relay_client(&state.http_client).await;
        let uri = parts.uri.clone();
        let relay_headers = headers.clone();
        let cloud_server = session.cloud_server().await;
        let body = bytes.to_vec();
        tokio::spawn(async move {
            relay::relay(&client, &uri, &cloud_server, &relay_headers, body).await;
        });
    }

    ack
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::config_codec::GatewayConfig;
    use crate::gateway::session::GatewaySession;
    use axum::http::StatusCode;
    use http_body_util::BodyExt;
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

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

    fn test_state() -> ProxyState {
        ProxyState {
            registry: Arc::new(GatewayRegistry::new()),
            http_client: reqwest::Client::new(),
        }
    }

    async fn read_24_byte_ack(response: axum::response::Response) -> Vec<u8> {
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), 24);
        body.to_vec()
    }

    #[tokio::test]
    async fn missing_identify_header_still_acks_with_no_handler_calls() {
        let state = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .method("PUT")
            .uri("/some/path")
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", "0")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        read_24_byte_ack(response).await;
    }

    #[tokio::test]
    async fn unregistered_gateway_still_acks() {
        let state = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .method("PUT")
            .uri("/some/path")
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", "0")
            .header("HTTP_IDENTIFY", "80AABBCC:001D8C0EA927:C0")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        read_24_byte_ack(response).await;
    }

    #[tokio::test]
    async fn non_put_method_still_acks() {
        let state = test_state();
        let app = build_router(state);

        let request = Request::builder()
            .method("GET")
            .uri("/some/path")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        read_24_byte_ack(response).await;
    }

    #[tokio::test]
    async fn registered_gateway_receives_update_and_does_not_relay_when_disabled() {
        let id: GatewayId = "001D8C0EA927".parse().unwrap();
        let session = Arc::new(GatewaySession::from_config(base_config(id), None, false));
        let registry = Arc::new(GatewayRegistry::new());
        registry.insert(session).await;
        let state = ProxyState {
            registry,
            http_client: reqwest::Client::new(),
        };
        let app = build_router(state);

        let request = Request::builder()
            .method("PUT")
            .uri("/some/path")
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", "0")
            .header("HTTP_IDENTIFY", "80AABBCC:001D8C0EA927:00")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        read_24_byte_ack(response).await;
    }

    #[test]
    fn parses_identify_header() {
        let (id, code) = parse_identify("80AABBCC:001D8C0EA927:C0").unwrap();
        assert_eq!(id.to_string(), "001D8C0EA927");
        assert_eq!(code, "C0");
    }

    #[test]
    fn rejects_identify_with_wrong_field_count() {
        assert!(parse_identify("80AABBCC:001D8C0EA927").is_none());
        assert!(parse_identify("a:b:c:d").is_none());
    }
}
