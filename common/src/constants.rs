use std::time::Duration;

/// Minimum time between two uploaded location samples.
pub const LOCATION_REPORT_INTERVAL: Duration = Duration::from_secs(30);
/// Minimum time between two location-triggered catalog refreshes.
pub const CATALOG_REFRESH_MIN_INTERVAL: Duration = Duration::from_secs(10);
/// Maximum number of nearby orders shown to the agent.
pub const NEARBY_ORDERS_CAP: usize = 5;
/// Deadline applied to every backend call.
pub const TRANSITION_TIMEOUT: Duration = Duration::from_secs(15);
/// How often the current order is re-fetched for reconciliation.
pub const ORDER_SYNC_INTERVAL: Duration = Duration::from_secs(20);
pub const STATS_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// How often a paused engine checks whether a credential came back.
pub const AUTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Radius around the agent used by the simulated backend when placing orders.
pub const SIMULATION_RADIUS_KM: f64 = 3.0;
pub const SIMULATED_ORDER_COUNT: usize = 7;
