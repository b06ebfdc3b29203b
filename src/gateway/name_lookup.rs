//! Best-effort lookup of a sensor's user-assigned display name from the
//! vendor cloud's public measurement-details page.

use regex::Regex;
use tracing::{debug, error};

const URL_TEMPLATE: &str = "https://measurements.mobile-alerts.eu/Home/MeasurementDetails\
?deviceid=%s&vendorid=9ac3a789-6f6a-47bf-8cf5-f076f532fe64&appbundle=eu.mobile_alerts.mobilealerts";

/// Looks up `sensor_id`'s display name. Returns `None` on any network error
/// or if the page doesn't contain a recognizable name — this is a courtesy
/// lookup, never a hard dependency for ingesting sensor data.
pub async fn get_sensor_name(client: &reqwest::Client, sensor_id: &str) -> Option<String> {
    let url = URL_TEMPLATE.replace("%s", sensor_id);
    let body = match client.get(&url).send().await {
        Ok(response) => match response.text().await {
            Ok(body) => body,
            Err(e) => {
                error!(sensor_id, error = %e, "error reading sensor name response body");
                return None;
            }
        },
        Err(e) => {
            error!(sensor_id, error = %e, "error discovering sensor name");
            return None;
        }
    };

    let name = extract_name(&body);
    debug!(sensor_id, ?name, "discovered sensor name");
    name
}

fn extract_name(body: &str) -> Option<String> {
    // Matches Python's `<h3>(.*) [^ <]+</h3>`: a heading whose text is
    // "<name> <trailing-token>", keeping only the name portion.
    let re = Regex::new(r"<h3>(.*) [^ <]+</h3>").ok()?;
    re.captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_name_before_trailing_token() {
        let html = "<div><h3>Garden Sensor 12.3°C</h3></div>";
        assert_eq!(extract_name(html).as_deref(), Some("Garden Sensor"));
    }

    #[test]
    fn returns_none_without_heading() {
        assert_eq!(extract_name("<div>no heading here</div>"), None);
    }
}
