use std::time::Duration;

use crate::types::{ColorResolution, DepthResolution, Features};

/// Session tunables. Every field has a default and can be overridden from
/// the environment with [`SessionConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Longest a single `acquire_frame` may block. Bounds stop latency.
    pub acquire_timeout: Duration,
    /// Pause after a failed acquisition before retrying.
    pub retry_backoff: Duration,
    /// Features enabled when the session opens.
    pub features: Features,
    /// Color stream applied at open, if any.
    pub color: Option<ColorResolution>,
    /// Depth stream applied at open, if any.
    pub depth: Option<DepthResolution>,
    pub thread_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(20),
            features: Features::empty(),
            color: None,
            depth: None,
            thread_name: "sensebridge-acquire".to_string(),
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by:
    ///
    /// - `SENSEBRIDGE_ACQUIRE_TIMEOUT_MS`
    /// - `SENSEBRIDGE_RETRY_BACKOFF_MS`
    /// - `SENSEBRIDGE_FEATURES`: comma separated names, e.g. `camera,head`
    /// - `SENSEBRIDGE_COLOR`, `SENSEBRIDGE_DEPTH`: `WIDTHxHEIGHTxFPS`
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let acquire_timeout = read_millis(
            "SENSEBRIDGE_ACQUIRE_TIMEOUT_MS",
            read("SENSEBRIDGE_ACQUIRE_TIMEOUT_MS"),
            defaults.acquire_timeout,
        );
        let retry_backoff = read_millis(
            "SENSEBRIDGE_RETRY_BACKOFF_MS",
            read("SENSEBRIDGE_RETRY_BACKOFF_MS"),
            defaults.retry_backoff,
        );

        let features = match read("SENSEBRIDGE_FEATURES") {
            Some(list) => parse_features(&list),
            None => defaults.features,
        };

        let color = read("SENSEBRIDGE_COLOR").and_then(|v| {
            let parsed = ColorResolution::parse(&v);
            if parsed.is_none() {
                log::warn!("Ignoring SENSEBRIDGE_COLOR={:?}: unknown color mode", v);
            }
            parsed
        });
        let depth = read("SENSEBRIDGE_DEPTH").and_then(|v| {
            let parsed = DepthResolution::parse(&v);
            if parsed.is_none() {
                log::warn!("Ignoring SENSEBRIDGE_DEPTH={:?}: unknown depth mode", v);
            }
            parsed
        });

        Self {
            acquire_timeout,
            retry_backoff,
            features,
            color: color.or(defaults.color),
            depth: depth.or(defaults.depth),
            thread_name: defaults.thread_name,
        }
    }
}

fn read_millis(name: &str, value: Option<String>, default: Duration) -> Duration {
    match value {
        None => default,
        Some(v) => match v.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                log::warn!("Ignoring {}={:?}: expected milliseconds", name, v);
                default
            }
        },
    }
}

fn parse_features(list: &str) -> Features {
    let mut features = Features::empty();
    for name in list.split(',').filter(|n| !n.trim().is_empty()) {
        match Features::parse_name(name) {
            Some(f) => features |= f,
            None => log::warn!("Ignoring unknown feature {:?}", name.trim()),
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> SessionConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SessionConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config_from(&[]), SessionConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config_from(&[
            ("SENSEBRIDGE_ACQUIRE_TIMEOUT_MS", "250"),
            ("SENSEBRIDGE_FEATURES", "camera, head,blob"),
            ("SENSEBRIDGE_COLOR", "640x480x60"),
            ("SENSEBRIDGE_DEPTH", "640 x 480 x 30"),
        ]);
        assert_eq!(cfg.acquire_timeout, Duration::from_millis(250));
        assert_eq!(
            cfg.features,
            Features::CAMERA_STREAMING | Features::HEAD_TRACKING | Features::BLOB_TRACKING
        );
        assert_eq!(cfg.color, Some(ColorResolution::Res640x480x60));
        assert_eq!(cfg.depth, Some(DepthResolution::Res640x480x30));
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config_from(&[
            ("SENSEBRIDGE_RETRY_BACKOFF_MS", "soon"),
            ("SENSEBRIDGE_FEATURES", "camera,teleport"),
            ("SENSEBRIDGE_COLOR", "1x1x1"),
        ]);
        assert_eq!(cfg.retry_backoff, SessionConfig::default().retry_backoff);
        assert_eq!(cfg.features, Features::CAMERA_STREAMING);
        assert_eq!(cfg.color, None);
    }
}
