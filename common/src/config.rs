use crate::constants::{
    AUTH_CHECK_INTERVAL, CATALOG_REFRESH_MIN_INTERVAL, LOCATION_REPORT_INTERVAL,
    NEARBY_ORDERS_CAP, ORDER_SYNC_INTERVAL, STATS_POLL_INTERVAL, TRANSITION_TIMEOUT,
};
use crate::errors::DispatchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables of the dispatch engine. Durations are expressed in seconds in
/// JSON and in `DISPATCH_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub location_report_interval_secs: u64,
    pub catalog_refresh_min_interval_secs: u64,
    pub nearby_orders_cap: usize,
    pub transition_timeout_secs: u64,
    pub order_sync_interval_secs: u64,
    pub stats_poll_interval_secs: u64,
    pub auth_check_interval_secs: u64,
    pub verbose_logging: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            location_report_interval_secs: LOCATION_REPORT_INTERVAL.as_secs(),
            catalog_refresh_min_interval_secs: CATALOG_REFRESH_MIN_INTERVAL.as_secs(),
            nearby_orders_cap: NEARBY_ORDERS_CAP,
            transition_timeout_secs: TRANSITION_TIMEOUT.as_secs(),
            order_sync_interval_secs: ORDER_SYNC_INTERVAL.as_secs(),
            stats_poll_interval_secs: STATS_POLL_INTERVAL.as_secs(),
            auth_check_interval_secs: AUTH_CHECK_INTERVAL.as_secs(),
            verbose_logging: false,
        }
    }
}

impl DispatchConfig {
    pub fn from_json_str(json: &str) -> Result<Self, DispatchError> {
        let config: DispatchConfig = serde_json::from_str(json)
            .map_err(|e| DispatchError::validation(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DispatchError::validation(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Applies `DISPATCH_*` overrides found through `lookup` on top of `self`.
    ///
    /// `lookup` is usually `|key| std::env::var(key).ok()`.
    pub fn from_env_lookup<F>(mut self, lookup: F) -> Result<Self, DispatchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, DispatchError> {
            raw.trim()
                .parse()
                .map_err(|_| {
                    DispatchError::validation(format!("{} has invalid value '{}'", key, raw))
                })
        }

        let seconds = [
            ("DISPATCH_LOCATION_REPORT_INTERVAL", &mut self.location_report_interval_secs),
            (
                "DISPATCH_CATALOG_REFRESH_MIN_INTERVAL",
                &mut self.catalog_refresh_min_interval_secs,
            ),
            ("DISPATCH_TRANSITION_TIMEOUT", &mut self.transition_timeout_secs),
            ("DISPATCH_ORDER_SYNC_INTERVAL", &mut self.order_sync_interval_secs),
            ("DISPATCH_STATS_POLL_INTERVAL", &mut self.stats_poll_interval_secs),
            ("DISPATCH_AUTH_CHECK_INTERVAL", &mut self.auth_check_interval_secs),
        ];
        for (key, field) in seconds {
            if let Some(raw) = lookup(key) {
                *field = parse(key, raw)?;
            }
        }
        if let Some(raw) = lookup("DISPATCH_NEARBY_ORDERS_CAP") {
            self.nearby_orders_cap = parse("DISPATCH_NEARBY_ORDERS_CAP", raw)?;
        }
        if let Some(raw) = lookup("DISPATCH_VERBOSE") {
            self.verbose_logging = parse("DISPATCH_VERBOSE", raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.nearby_orders_cap == 0 {
            return Err(DispatchError::validation("nearby_orders_cap must be positive"));
        }
        let intervals = [
            ("transition_timeout_secs", self.transition_timeout_secs),
            ("order_sync_interval_secs", self.order_sync_interval_secs),
            ("stats_poll_interval_secs", self.stats_poll_interval_secs),
            ("auth_check_interval_secs", self.auth_check_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(DispatchError::validation(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    pub fn location_report_interval(&self) -> Duration {
        Duration::from_secs(self.location_report_interval_secs)
    }

    pub fn catalog_refresh_min_interval(&self) -> Duration {
        Duration::from_secs(self.catalog_refresh_min_interval_secs)
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_secs(self.transition_timeout_secs)
    }

    pub fn order_sync_interval(&self) -> Duration {
        Duration::from_secs(self.order_sync_interval_secs)
    }

    pub fn stats_poll_interval(&self) -> Duration {
        Duration::from_secs(self.stats_poll_interval_secs)
    }

    pub fn auth_check_interval(&self) -> Duration {
        Duration::from_secs(self.auth_check_interval_secs)
    }
}
