use actix::{Message, Recipient};
use common::errors::DispatchError;
use common::types::dtos::{
    Coordinate, DailyStatistics, DeliveryProof, LocationSample, OnlineStats, OrderDTO,
    OrderSummary,
};
use common::types::order_status::{OrderEvent, OrderStatus};
use common::types::presence_state::PresenceState;
use chrono::{DateTime, Utc};

/////////////////////////////////////////////////////////////////////
// Presence
/////////////////////////////////////////////////////////////////////

/// Flips presence. Resolves once the transition settled (or rolled back).
#[derive(Message, Debug)]
#[rtype(result = "Result<PresenceState, DispatchError>")]
pub struct TogglePresence;

#[derive(Message, Debug)]
#[rtype(result = "PresenceState")]
pub struct GetPresence;

#[derive(Message, Debug)]
#[rtype(result = "OnlineStats")]
pub struct GetOnlineStats;

/// Broadcast by the presence controller on every state change.
#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub struct PresenceChanged {
    pub state: PresenceState,
    pub stats: OnlineStats,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribePresence(pub Recipient<PresenceChanged>);

/////////////////////////////////////////////////////////////////////
// Location reporting
/////////////////////////////////////////////////////////////////////

/// Starts consuming the location source. No-op when already started.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct StartReporting;

/// Stops the source, the throttle clocks and any pending upload.
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct StopReporting;

/// A sample that passed the catalog-refresh throttle.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct LocationUpdated {
    pub sample: LocationSample,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribeLocation(pub Recipient<LocationUpdated>);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReporterStatus {
    pub active: bool,
    pub last_sample: Option<LocationSample>,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub samples_dropped: u64,
}

#[derive(Message, Debug)]
#[rtype(result = "ReporterStatus")]
pub struct GetReporterStatus;

/////////////////////////////////////////////////////////////////////
// Authentication
/////////////////////////////////////////////////////////////////////

/// Sent by any component whose backend call failed for lack of a valid
/// credential.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct AuthRejected {
    pub component: &'static str,
    pub error: DispatchError,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetAuthListener(pub Recipient<AuthRejected>);

/// Stops every backend call made on the component's own initiative
/// (refreshes, uploads, polls) until `ResumeAfterAuth`.
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct PauseForAuth;

#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct ResumeAfterAuth;

/////////////////////////////////////////////////////////////////////
// Catalog
/////////////////////////////////////////////////////////////////////

/// Fetches nearby orders around `origin`. Only legal while online.
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<Vec<OrderSummary>, DispatchError>")]
pub struct RefreshCatalog {
    pub origin: Coordinate,
}

#[derive(Message, Debug)]
#[rtype(result = "Vec<OrderSummary>")]
pub struct GetNearbyOrders;

/// The order became the current order: hide it and stop location polling.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct ClaimOrder {
    pub order_id: String,
}

/// The current order finished: resume polling.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct ReleaseClaim {
    pub order_id: String,
}

/// Never show this order again during the session.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct DismissOrder {
    pub order_id: String,
}

#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub struct CatalogUpdated {
    pub orders: Vec<OrderSummary>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribeCatalog(pub Recipient<CatalogUpdated>);

/// A listing reported the server-side status of the claimed order.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct ServerStatusObserved {
    pub order_id: String,
    pub status: OrderStatus,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SetStatusObserver(pub Recipient<ServerStatusObserved>);

/////////////////////////////////////////////////////////////////////
// Order lifecycle
/////////////////////////////////////////////////////////////////////

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct AcceptOrder {
    pub order_id: String,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<(), DispatchError>")]
pub struct RejectOrder {
    pub order_id: String,
    pub reason: String,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct StartPickup {
    pub order_id: String,
}

/// Completes the pickup and starts the delivery leg.
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct CompletePickup {
    pub order_id: String,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct CompleteDelivery {
    pub order_id: String,
    pub proof: DeliveryProof,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct CancelOrder {
    pub order_id: String,
    pub reason: String,
}

/// Moves the current order one step forward, whatever its status.
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct AdvanceOrder {
    pub order_id: String,
}

/// Re-fetches the current order and adopts the server status.
#[derive(Message, Debug)]
#[rtype(result = "Result<Option<OrderDTO>, DispatchError>")]
pub struct ReconcileCurrentOrder;

#[derive(Message, Debug)]
#[rtype(result = "Option<OrderDTO>")]
pub struct GetCurrentOrder;

/// Clears the finished order kept for the UI. Returns it.
#[derive(Message, Debug)]
#[rtype(result = "Option<OrderDTO>")]
pub struct AcknowledgeFinished;

#[derive(Debug, Clone, Default)]
pub struct LifecycleView {
    pub current: Option<OrderDTO>,
    pub last_finished: Option<OrderDTO>,
    pub in_flight: Option<(String, OrderEvent)>,
    pub revision: u64,
}

#[derive(Message, Debug)]
#[rtype(result = "LifecycleView")]
pub struct GetLifecycleView;

/// Broadcast whenever the current-order slot or its status changes.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct CurrentOrderChanged {
    pub current: Option<OrderDTO>,
    pub last_finished: Option<OrderDTO>,
    pub revision: u64,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribeOrder(pub Recipient<CurrentOrderChanged>);

/////////////////////////////////////////////////////////////////////
// Statistics
/////////////////////////////////////////////////////////////////////

#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct PollStatistics;

#[derive(Message, Debug, Clone, PartialEq)]
#[rtype(result = "()")]
pub struct StatsUpdated {
    pub stats: DailyStatistics,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribeStats(pub Recipient<StatsUpdated>);

#[derive(Message, Debug)]
#[rtype(result = "Option<StatsUpdated>")]
pub struct GetStatistics;
