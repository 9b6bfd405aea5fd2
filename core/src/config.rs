//! Connector configuration and the shared send-time state.
//!
//! # Design
//! Configuration arrives as a JSON object with the keys `host`, `timeout`
//! (milliseconds) and `event.level` (event name to level). Everything is
//! validated up front so a bad value is reported to the caller before any
//! queued request is touched. Timeouts are accepted as numbers or numeric
//! strings; zero means no deadline.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;

use crate::cookie::CookieJar;
use crate::error::ConfigError;
use crate::sink::EventLevel;

/// Headers, cookie jar and timeouts applied to each request when it is
/// dequeued. Cloning shares the cookie jar.
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub headers: Vec<(String, String)>,
    pub cookie_jar: CookieJar,
    pub timeout: Option<Duration>,
    pub read_write_timeout: Option<Duration>,
}

impl SharedState {
    /// Set a header, replacing any existing one with the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }
}

/// Parsed connector configuration. Absent keys stay `None`/empty so a
/// partial config only touches what it names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub host: Option<String>,
    pub timeout: Option<Duration>,
    pub event_levels: HashMap<String, EventLevel>,
}

impl ConnectorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        Self::from_json(&value)
    }

    pub fn from_json(value: &Value) -> Result<Self, ConfigError> {
        let object = value.as_object().ok_or(ConfigError::NotAnObject)?;
        let mut config = ConnectorConfig::default();

        if let Some(host) = object.get("host") {
            config.host = Some(parse_host(host)?);
        }

        if let Some(timeout) = object.get("timeout") {
            let millis = parse_millis(timeout)?;
            config.timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }

        let levels = object
            .get("event.level")
            .or_else(|| object.get("event").and_then(|e| e.get("level")));
        if let Some(Value::Object(levels)) = levels {
            for (event, level) in levels {
                let parsed = level
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| ConfigError::InvalidEventLevel {
                        event: event.clone(),
                        value: level.to_string(),
                    })?;
                config.event_levels.insert(event.clone(), EventLevel(parsed));
            }
        }

        Ok(config)
    }

    /// Level configured for `event`, or `EventLevel::ALL`.
    pub fn level_for(&self, event: &str) -> EventLevel {
        self.event_levels.get(event).copied().unwrap_or_default()
    }
}

fn parse_host(value: &Value) -> Result<String, ConfigError> {
    let host = value.as_str().ok_or_else(|| ConfigError::InvalidHost(value.to_string()))?;
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(ConfigError::InvalidHost(value.to_string()));
    }
    Ok(host.to_string())
}

fn parse_millis(value: &Value) -> Result<u64, ConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ConfigError::InvalidTimeout(value.to_string()))
}
