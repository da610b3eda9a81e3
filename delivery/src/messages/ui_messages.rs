use actix::{Message, Recipient};
use common::errors::DispatchError;
use common::types::dtos::{
    DailyStatistics, LocationSample, OnlineStats, OrderDTO, OrderSummary,
};
use common::types::presence_state::PresenceState;
use serde::Serialize;

/// Everything the UI layer observes, captured at one point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSnapshot {
    pub presence: PresenceState,
    pub online_stats: OnlineStats,
    pub current_order: Option<OrderDTO>,
    /// Terminal order waiting for the UI to acknowledge it.
    pub last_finished: Option<OrderDTO>,
    /// Nearest first, capped.
    pub nearby_orders: Vec<OrderSummary>,
    pub daily_stats: Option<DailyStatistics>,
    pub last_location: Option<LocationSample>,
    /// Set while no valid credential is available.
    pub auth_paused: bool,
}

/// Pushed to UI subscribers after every observable change.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct DispatchUpdate(pub DispatchSnapshot);

#[derive(Message)]
#[rtype(result = "()")]
pub struct SubscribeDispatch(pub Recipient<DispatchUpdate>);

#[derive(Message, Debug)]
#[rtype(result = "DispatchSnapshot")]
pub struct GetDispatchSnapshot;

#[derive(Message, Debug)]
#[rtype(result = "Result<PresenceState, DispatchError>")]
pub struct RequestTogglePresence;

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct RequestAccept {
    pub order_id: String,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<(), DispatchError>")]
pub struct RequestReject {
    pub order_id: String,
    pub reason: String,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct RequestAdvance {
    pub order_id: String,
}

/// Completes the delivery, recording proof when given.
#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct RequestComplete {
    pub order_id: String,
    pub photo_url: Option<String>,
    pub signature_url: Option<String>,
}

#[derive(Message, Debug, Clone)]
#[rtype(result = "Result<OrderDTO, DispatchError>")]
pub struct RequestCancel {
    pub order_id: String,
    pub reason: String,
}

#[derive(Message, Debug)]
#[rtype(result = "Option<OrderDTO>")]
pub struct AcknowledgeFinishedOrder;
