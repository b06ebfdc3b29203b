//! Unchanged forwarding of a gateway's PUT request to the vendor cloud,
//! through the gateway's captured original outbound proxy if one exists.
//! Grounded in `Gateway.resend_data_to_cloud` (`original_source/mobilealerts/gateway.py`):
//! relay failures are logged and never reach the gateway-facing response.

use axum::http::{HeaderMap, Uri};
use tracing::{debug, error};

/// Builds the absolute URL the gateway's own upload would have reached: the
/// request-target as sent if it was already absolute-form (the gateway talks
/// to us as if we were its configured outbound HTTP proxy), otherwise
/// `http://<cloud_server><path>`.
fn target_url(uri: &Uri, cloud_server: &str) -> String {
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    format!("http://{cloud_server}{path_and_query}")
}

/// Replays `body`/`headers` as a PUT to the cloud's upload URL, through
/// `client` (already resolved to the gateway's preserved outbound proxy when
/// it has one — see `GatewaySession::relay_client`). Never propagates
/// failure; the gateway-facing synthetic ack has already been sent by the
/// time this runs.
pub async fn relay(client: &reqwest::Client, uri: &Uri, cloud_server: &str, headers: &HeaderMap, body: Vec<u8>) {
    if cloud_server.is_empty() {
        error!("cloud relay skipped: gateway session has no known cloud server");
        return;
    }
    let target = target_url(uri, cloud_server);

    let mut request = client.put(&target);
    for (name, value) in headers.iter() {
        request = request.header(name, value);
    }

    match request.body(body).send().await {
        Ok(response) => {
            debug!(status = %response.status(), target, "cloud relay response");
        }
        Err(e) => {
            error!(error = %e, target, "cloud relay failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_absolute_url_from_relative_path() {
        let uri: Uri = "/path?x=1".parse().unwrap();
        assert_eq!(target_url(&uri, "www.data199.com"), "http://www.data199.com/path?x=1");
    }

    #[test]
    fn keeps_already_absolute_request_target() {
        let uri: Uri = "http://www.data199.com/path".parse().unwrap();
        assert_eq!(target_url(&uri, "unused"), "http://www.data199.com/path");
    }
}
