use crate::errors::DispatchError;
use crate::types::order_status::OrderStatus;
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// WGS84 position in decimal degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting out-of-range or non-finite values.
    pub fn new(lat: f64, lon: f64) -> Result<Self, DispatchError> {
        let coordinate = Coordinate { lat, lon };
        coordinate.validate()?;
        Ok(coordinate)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(DispatchError::validation(format!(
                "latitude {} outside [-90, 90]",
                self.lat
            )));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(DispatchError::validation(format!(
                "longitude {} outside [-180, 180]",
                self.lon
            )));
        }
        Ok(())
    }
}

/// One reading from the device location source. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationSample {
    pub coordinate: Coordinate,
    pub captured_at: DateTime<Utc>,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    /// Meters per second, if the source reports it.
    pub speed: Option<f64>,
    /// Degrees clockwise from north, if the source reports it.
    pub heading: Option<f64>,
}

impl LocationSample {
    pub fn new(coordinate: Coordinate, captured_at: DateTime<Utc>, accuracy: f64) -> Self {
        Self {
            coordinate,
            captured_at,
            accuracy,
            speed: None,
            heading: None,
        }
    }
}

/// Entry of the nearby-orders list, as returned by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSummary {
    pub order_id: String,
    pub status: OrderStatus,
    pub pickup: Coordinate,
    pub dropoff: Coordinate,
    /// Estimated route length in kilometers.
    pub distance_km: f64,
    /// Estimated route duration in minutes.
    pub duration_minutes: u32,
    /// Payment total in minor currency units.
    pub payment_total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerDTO {
    pub name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItemDTO {
    pub name: String,
    pub quantity: u32,
    pub unit_price: u64,
}

/// Full place description for a pickup or drop-off point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaceDTO {
    pub coordinate: Coordinate,
    pub address: String,
    pub note: Option<String>,
}

/// Proof of delivery recorded on completion. Both fields are optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryProof {
    pub photo_url: Option<String>,
    pub signature_url: Option<String>,
}

impl DeliveryProof {
    pub fn new(photo_url: Option<String>, signature_url: Option<String>) -> Self {
        Self {
            photo_url,
            signature_url,
        }
    }

    /// Blank strings are rejected rather than silently recorded.
    pub fn validate(&self) -> Result<(), DispatchError> {
        for (name, value) in [
            ("photo url", &self.photo_url),
            ("signature url", &self.signature_url),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(DispatchError::validation(format!("{} cannot be blank", name)));
            }
        }
        Ok(())
    }
}

/// Detailed order: the summary plus customer, items, places and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDTO {
    pub order_id: String,
    pub status: OrderStatus,
    pub pickup: PlaceDTO,
    pub dropoff: PlaceDTO,
    pub distance_km: f64,
    pub duration_minutes: u32,
    pub payment_total: u64,
    pub customer: CustomerDTO,
    pub items: Vec<OrderItemDTO>,
    /// Agent the order is claimed by, if any.
    pub agent_id: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub proof: Option<DeliveryProof>,
}

impl OrderDTO {
    pub fn summary(&self) -> OrderSummary {
        OrderSummary {
            order_id: self.order_id.clone(),
            status: self.status,
            pickup: self.pickup.coordinate,
            dropoff: self.dropoff.coordinate,
            distance_km: self.distance_km,
            duration_minutes: self.duration_minutes,
            payment_total: self.payment_total,
        }
    }
}

impl PartialEq for OrderDTO {
    fn eq(&self, other: &Self) -> bool {
        self.order_id == other.order_id && self.status == other.status
    }
}

/// Date range for the statistics endpoint, both ends inclusive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl StatsRange {
    pub fn today() -> Self {
        let today = Local::now().date_naive();
        Self {
            from: today,
            to: today,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyStatistics {
    pub completed_count: u32,
    /// Earnings in minor currency units.
    pub earnings: u64,
}

/// Time spent online, kept by the presence controller.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OnlineStats {
    /// Start of the current online session, if online.
    pub online_since: Option<DateTime<Utc>>,
    /// Seconds accumulated by finished sessions.
    pub accumulated_secs: i64,
}

impl OnlineStats {
    /// Total online time up to `now`, including the running session.
    pub fn total_secs(&self, now: DateTime<Utc>) -> i64 {
        let running = self
            .online_since
            .map(|since| (now - since).num_seconds().max(0))
            .unwrap_or(0);
        self.accumulated_secs + running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use chrono::Duration;

    #[test]
    fn coordinate_bounds_are_enforced() {
        assert!(Coordinate::new(37.5665, 126.9780).is_ok());
        assert!(Coordinate::new(90.0, -180.0).is_ok());
        let err = Coordinate::new(91.0, 0.0).expect_err("latitude out of range");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(Coordinate::new(0.0, 180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn blank_proof_urls_are_rejected() {
        assert!(DeliveryProof::default().validate().is_ok());
        assert!(DeliveryProof::new(Some("x".into()), Some("y".into())).validate().is_ok());
        assert!(DeliveryProof::new(Some("  ".into()), None).validate().is_err());
    }

    #[test]
    fn online_time_includes_running_session() {
        let now = Utc::now();
        let stats = OnlineStats {
            online_since: Some(now - Duration::seconds(90)),
            accumulated_secs: 30,
        };
        assert_eq!(stats.total_secs(now), 120);
        assert_eq!(OnlineStats::default().total_secs(now), 0);
    }
}
