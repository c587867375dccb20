//! YAML configuration loading.
//!
//! Ground: `examples/original_source/server/config/config.go` for the
//! field names, the defaults, and the "zero takes the default, anything
//! past the ceiling is clamped to the ceiling" behaviour for the two
//! timeouts that have one. `serde_yaml` isn't part of the teacher's
//! dependency stack; see `DESIGN.md` for why it's the natural counterpart
//! to the teacher's existing `serde`/`serde_json` use.

use std::path::Path;
use std::time::Duration;

use broker_common::Error;
use serde::Deserialize;

pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_OPEN_STREAM_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_OPEN_STREAM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(rename = "publisherPort")]
    publisher_port: u16,
    #[serde(rename = "subscriberPort")]
    subscriber_port: u16,
    #[serde(rename = "gracefulShutdownTimeout", default)]
    graceful_shutdown_timeout: Option<String>,
    #[serde(rename = "openStreamTimeout", default)]
    open_stream_timeout: Option<String>,
    #[serde(rename = "sendMessageTimeout", default)]
    send_message_timeout: Option<String>,
}

/// Resolved broker configuration: every timeout has already had its
/// default applied and its ceiling clamped.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub publisher_port: u16,
    pub subscriber_port: u16,
    pub graceful_shutdown_timeout: Duration,
    pub open_stream_timeout: Duration,
    /// Zero means "no deadline", per spec section 4.D: `sendMessage`
    /// applies a timeout only `if timeout > 0`. There is no default for
    /// this one; it's the only timeout the original leaves unclamped.
    pub send_message_timeout: Duration,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("reading {}: {err}", path.display())))?;
        let raw: RawConfig = serde_yaml::from_str(&contents)
            .map_err(|err| Error::Config(format!("parsing {}: {err}", path.display())))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, Error> {
        Ok(Self {
            publisher_port: raw.publisher_port,
            subscriber_port: raw.subscriber_port,
            graceful_shutdown_timeout: clamp_or_default(
                parse_duration_opt(raw.graceful_shutdown_timeout.as_deref())?,
                DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT,
                MAX_GRACEFUL_SHUTDOWN_TIMEOUT,
            ),
            open_stream_timeout: clamp_or_default(
                parse_duration_opt(raw.open_stream_timeout.as_deref())?,
                DEFAULT_OPEN_STREAM_TIMEOUT,
                MAX_OPEN_STREAM_TIMEOUT,
            ),
            send_message_timeout: parse_duration_opt(raw.send_message_timeout.as_deref())?
                .unwrap_or(Duration::ZERO),
        })
    }
}

fn clamp_or_default(value: Option<Duration>, default: Duration, max: Duration) -> Duration {
    match value {
        None => default,
        Some(d) if d == Duration::ZERO => default,
        Some(d) if d > max => max,
        Some(d) => d,
    }
}

fn parse_duration_opt(value: Option<&str>) -> Result<Option<Duration>, Error> {
    value.map(parse_duration).transpose()
}

/// Parses a `<integer><unit>` duration, `unit` one of `s`/`m`/`h`, matching
/// how the original config file writes its durations (e.g. `30s`, `5m`).
fn parse_duration(value: &str) -> Result<Duration, Error> {
    let value = value.trim();
    let split_at = value
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| Error::Config(format!("invalid duration {value:?}: missing unit")))?;
    let (number, unit) = value.split_at(split_at);
    let amount: u64 = number
        .parse()
        .map_err(|_| Error::Config(format!("invalid duration {value:?}")))?;
    let seconds = match unit {
        "s" => amount,
        "m" => amount * 60,
        "h" => amount * 3600,
        other => {
            return Err(Error::Config(format!(
                "unknown duration unit {other:?} in {value:?}"
            )))
        }
    };
    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(graceful: Option<&str>, open_stream: Option<&str>, send: Option<&str>) -> RawConfig {
        RawConfig {
            publisher_port: 9000,
            subscriber_port: 9001,
            graceful_shutdown_timeout: graceful.map(str::to_string),
            open_stream_timeout: open_stream.map(str::to_string),
            send_message_timeout: send.map(str::to_string),
        }
    }

    #[test]
    fn zero_and_absent_timeouts_take_the_default() {
        let config = Config::from_raw(raw(None, Some("0s"), None)).unwrap();
        assert_eq!(config.graceful_shutdown_timeout, DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT);
        assert_eq!(config.open_stream_timeout, DEFAULT_OPEN_STREAM_TIMEOUT);
    }

    #[test]
    fn send_message_timeout_has_no_default() {
        let config = Config::from_raw(raw(None, None, None)).unwrap();
        assert_eq!(config.send_message_timeout, Duration::ZERO);
    }

    #[test]
    fn oversized_timeout_is_clamped_to_the_ceiling() {
        let config = Config::from_raw(raw(Some("10h"), None, None)).unwrap();
        assert_eq!(config.graceful_shutdown_timeout, MAX_GRACEFUL_SHUTDOWN_TIMEOUT);
    }

    #[test]
    fn within_range_timeout_is_kept() {
        let config = Config::from_raw(raw(Some("45s"), None, None)).unwrap();
        assert_eq!(config.graceful_shutdown_timeout, Duration::from_secs(45));
    }

    #[test]
    fn unknown_unit_is_rejected() {
        let err = parse_duration("3x").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
