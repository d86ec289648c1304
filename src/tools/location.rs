//! IP 定位工具（ip-api.com，无需密钥）

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::tools::{Tool, GET_LOCATION};

const DEFAULT_ENDPOINT: &str = "http://ip-api.com/json/";

pub struct LocationTool {
    client: Client,
    endpoint: String,
}

impl LocationTool {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// 把 ip-api 响应整理为 {city, region, country, latitude, longitude, timezone}
pub fn parse_ip_api(body: &Value) -> Result<Value, String> {
    if body.get("status").and_then(Value::as_str) == Some("fail") {
        let reason = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown reason");
        return Err(format!("Geolocation failed: {reason}"));
    }
    let lat = body
        .get("lat")
        .and_then(Value::as_f64)
        .ok_or("Geolocation response has no latitude")?;
    let lon = body
        .get("lon")
        .and_then(Value::as_f64)
        .ok_or("Geolocation response has no longitude")?;
    Ok(json!({
        "city": body.get("city").cloned().unwrap_or(Value::Null),
        "region": body.get("regionName").cloned().unwrap_or(Value::Null),
        "country": body.get("country").cloned().unwrap_or(Value::Null),
        "latitude": lat,
        "longitude": lon,
        "timezone": body.get("timezone").cloned().unwrap_or(Value::Null),
    }))
}

#[async_trait]
impl Tool for LocationTool {
    fn name(&self) -> &str {
        GET_LOCATION
    }

    fn description(&self) -> &str {
        "Get the user's approximate current location (city, country, latitude, longitude)."
    }

    fn result_key(&self) -> &str {
        "location"
    }

    async fn execute(&self, _args: Value) -> Result<Value, String> {
        let resp = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Invalid geolocation response: {}", e))?;
        parse_ip_api(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success() {
        let body = json!({
            "status": "success", "city": "Pune", "regionName": "Maharashtra",
            "country": "India", "lat": 18.52, "lon": 73.85, "timezone": "Asia/Kolkata"
        });
        let out = parse_ip_api(&body).unwrap();
        assert_eq!(out["city"], "Pune");
        assert_eq!(out["latitude"], 18.52);
    }

    #[test]
    fn test_parse_failure_status() {
        let body = json!({"status": "fail", "message": "private range"});
        assert!(parse_ip_api(&body).unwrap_err().contains("private range"));
    }
}
