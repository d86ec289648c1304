//! 天气工具（Open-Meteo，无需密钥）
//!
//! 参数：latitude / longitude（必需，缺省时由执行器从定位结果补全），location（可选，仅用于展示）。

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};

use crate::tools::{Tool, GET_WEATHER};

const DEFAULT_ENDPOINT: &str = "https://api.open-meteo.com/v1/forecast";

pub struct WeatherTool {
    client: Client,
    endpoint: String,
}

impl WeatherTool {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// WMO 天气代码 → 文字描述
fn describe_weather_code(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1..=3 => "Partly cloudy",
        45 | 48 => "Fog",
        51..=57 => "Drizzle",
        61..=67 => "Rain",
        71..=77 => "Snow",
        80..=82 => "Rain showers",
        85 | 86 => "Snow showers",
        95..=99 => "Thunderstorm",
        _ => "Unknown",
    }
}

/// 把 Open-Meteo 响应整理为可读键值
pub fn summarize_forecast(body: &Value) -> Result<Value, String> {
    let current = body
        .get("current")
        .ok_or("Weather response has no current conditions")?;
    let daily = body.get("daily");
    let first_daily = |key: &str| -> Value {
        daily
            .and_then(|d| d.get(key))
            .and_then(|v| v.get(0))
            .cloned()
            .unwrap_or(Value::Null)
    };

    let mut out = Map::new();
    out.insert(
        "Temperature (°C)".into(),
        current.get("temperature_2m").cloned().unwrap_or(Value::Null),
    );
    out.insert("Max Temperature (°C)".into(), first_daily("temperature_2m_max"));
    out.insert("Min Temperature (°C)".into(), first_daily("temperature_2m_min"));
    out.insert(
        "Wind Speed (km/h)".into(),
        current.get("wind_speed_10m").cloned().unwrap_or(Value::Null),
    );
    out.insert(
        "Wind Direction (°)".into(),
        current.get("wind_direction_10m").cloned().unwrap_or(Value::Null),
    );
    out.insert(
        "Precipitation (mm)".into(),
        current.get("precipitation").cloned().unwrap_or(Value::Null),
    );
    out.insert("UV Index".into(), first_daily("uv_index_max"));
    if let Some(code) = current.get("weather_code").and_then(Value::as_i64) {
        out.insert("Weather Condition".into(), json!(describe_weather_code(code)));
    }
    out.insert("Sunrise Time".into(), first_daily("sunrise"));
    out.insert("Sunset Time".into(), first_daily("sunset"));
    Ok(Value::Object(out))
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        GET_WEATHER
    }

    fn description(&self) -> &str {
        "Get current weather conditions. Coordinates are filled in from the user's location when omitted."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "latitude": {"type": "number"},
                "longitude": {"type": "number"},
                "location": {"type": "string", "description": "Place name, for display only"}
            },
            "required": []
        })
    }

    fn result_key(&self) -> &str {
        "weather"
    }

    async fn execute(&self, args: Value) -> Result<Value, String> {
        let lat = args
            .get("latitude")
            .and_then(Value::as_f64)
            .ok_or("Invalid location. Cannot fetch weather data.")?;
        let lon = args
            .get("longitude")
            .and_then(Value::as_f64)
            .ok_or("Invalid location. Cannot fetch weather data.")?;

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                (
                    "current",
                    "temperature_2m,precipitation,weather_code,wind_speed_10m,wind_direction_10m"
                        .to_string(),
                ),
                (
                    "daily",
                    "temperature_2m_max,temperature_2m_min,uv_index_max,sunrise,sunset".to_string(),
                ),
                ("timezone", "auto".to_string()),
                ("forecast_days", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Invalid weather response: {}", e))?;

        let mut summary = summarize_forecast(&body)?;
        if let (Some(obj), Some(place)) = (summary.as_object_mut(), args.get("location")) {
            obj.insert("Location".into(), place.clone());
        }
        Ok(summary)
    }
}
