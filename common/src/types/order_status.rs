use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an order as seen by the delivery agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Published and waiting for any agent to take it
    Pending,
    /// Proposed to this agent by the dispatcher
    Assigned,
    /// Claimed by this agent
    Accepted,
    /// The agent is on the way to (or at) the pickup point
    PickingUp,
    /// Picked up and on the way to the customer
    Delivering,
    /// Handed over to the customer
    Completed,
    /// Cancelled by the agent or the backend
    Cancelled,
}

/// Events that move an order through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderEvent {
    Accept,
    Reject,
    StartPickup,
    CompletePickup,
    StartDelivery,
    Complete,
    Cancel,
}

impl OrderStatus {
    /// Completed and Cancelled admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// An order the agent is currently executing.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Accepted | OrderStatus::PickingUp | OrderStatus::Delivering
        )
    }

    /// Still up for grabs: may be accepted or rejected.
    pub fn is_open(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Assigned)
    }

    /// Returns the status reached by applying `event`, or `None` when the
    /// transition is not part of the lifecycle table.
    ///
    /// `Reject` has no target status: the order simply leaves consideration,
    /// so it maps onto the unchanged status when legal.
    pub fn next(self, event: OrderEvent) -> Option<OrderStatus> {
        use OrderEvent::*;
        use OrderStatus::*;
        match (self, event) {
            (Pending | Assigned, Accept) => Some(Accepted),
            (Pending | Assigned, Reject) => Some(self),
            (Accepted, StartPickup) => Some(PickingUp),
            (PickingUp, CompletePickup) => Some(Delivering),
            (PickingUp, StartDelivery) => Some(Delivering),
            (Delivering, Complete) => Some(Completed),
            (Accepted | PickingUp | Delivering, Cancel) => Some(Cancelled),
            _ => None,
        }
    }

    /// Position in the forward lifecycle, used to tell whether a server
    /// status is ahead of or behind the local one.
    pub fn progress(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Assigned => 1,
            OrderStatus::Accepted => 2,
            OrderStatus::PickingUp => 3,
            OrderStatus::Delivering => 4,
            OrderStatus::Completed | OrderStatus::Cancelled => 5,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "Pending"),
            OrderStatus::Assigned => write!(f, "Assigned"),
            OrderStatus::Accepted => write!(f, "Accepted"),
            OrderStatus::PickingUp => write!(f, "Picking up"),
            OrderStatus::Delivering => write!(f, "Delivering"),
            OrderStatus::Completed => write!(f, "Completed"),
            OrderStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    /// Accepts the backend's wire names (`PICKING_UP`, `delivering`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "PENDING" => Ok(OrderStatus::Pending),
            "ASSIGNED" => Ok(OrderStatus::Assigned),
            "ACCEPTED" => Ok(OrderStatus::Accepted),
            "PICKINGUP" => Ok(OrderStatus::PickingUp),
            "DELIVERING" => Ok(OrderStatus::Delivering),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
            _ => Err(format!("unknown order status '{}'", s)),
        }
    }
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderEvent::Accept => "accept",
            OrderEvent::Reject => "reject",
            OrderEvent::StartPickup => "start pickup",
            OrderEvent::CompletePickup => "complete pickup",
            OrderEvent::StartDelivery => "start delivery",
            OrderEvent::Complete => "complete",
            OrderEvent::Cancel => "cancel",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for OrderEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "accept" => Ok(OrderEvent::Accept),
            "reject" => Ok(OrderEvent::Reject),
            "startpickup" => Ok(OrderEvent::StartPickup),
            "completepickup" => Ok(OrderEvent::CompletePickup),
            "startdelivery" => Ok(OrderEvent::StartDelivery),
            "complete" => Ok(OrderEvent::Complete),
            "cancel" => Ok(OrderEvent::Cancel),
            _ => Err(format!("unknown order event '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::{test_case, timeout};

    fn status(s: &str) -> OrderStatus {
        s.parse().expect("valid status")
    }

    fn event(e: &str) -> OrderEvent {
        e.parse().expect("valid event")
    }

    #[test_case("PENDING", "accept", "ACCEPTED")]
    #[test_case("ASSIGNED", "accept", "ACCEPTED")]
    #[test_case("ACCEPTED", "start_pickup", "PICKING_UP")]
    #[test_case("PICKING_UP", "complete_pickup", "DELIVERING")]
    #[test_case("PICKING_UP", "start_delivery", "DELIVERING")]
    #[test_case("DELIVERING", "complete", "COMPLETED")]
    #[test_case("ACCEPTED", "cancel", "CANCELLED")]
    #[test_case("PICKING_UP", "cancel", "CANCELLED")]
    #[test_case("DELIVERING", "cancel", "CANCELLED")]
    fn legal_transition(from: &str, on: &str, to: &str) {
        assert_eq!(status(from).next(event(on)), Some(status(to)));
    }

    #[test_case("PENDING", "start_pickup")]
    #[test_case("PENDING", "cancel")]
    #[test_case("ACCEPTED", "accept")]
    #[test_case("ACCEPTED", "complete")]
    #[test_case("ACCEPTED", "reject")]
    #[test_case("PICKING_UP", "complete")]
    #[test_case("DELIVERING", "start_pickup")]
    #[test_case("COMPLETED", "cancel")]
    #[test_case("CANCELLED", "accept")]
    #[test_case("COMPLETED", "complete")]
    fn illegal_transition(from: &str, on: &str) {
        assert_eq!(status(from).next(event(on)), None);
    }

    #[test]
    #[timeout(1000)]
    fn terminal_statuses_admit_nothing() {
        let events = [
            OrderEvent::Accept,
            OrderEvent::Reject,
            OrderEvent::StartPickup,
            OrderEvent::CompletePickup,
            OrderEvent::StartDelivery,
            OrderEvent::Complete,
            OrderEvent::Cancel,
        ];
        for terminal in [OrderStatus::Completed, OrderStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for e in events {
                assert_eq!(terminal.next(e), None, "{} on {}", e, terminal);
            }
        }
    }

    #[test]
    fn parses_backend_wire_names() {
        assert_eq!(status("DELIVERING"), OrderStatus::Delivering);
        assert_eq!(status("picking_up"), OrderStatus::PickingUp);
        assert_eq!(status("Canceled"), OrderStatus::Cancelled);
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PickingUp).expect("serialize");
        assert_eq!(json, "\"PICKING_UP\"");
    }

    #[test]
    fn progress_orders_forward_lifecycle() {
        assert!(OrderStatus::Delivering.progress() > OrderStatus::PickingUp.progress());
        assert!(OrderStatus::Accepted.progress() > OrderStatus::Assigned.progress());
    }
}
