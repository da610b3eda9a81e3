//! Contracts of the collaborators the engine consumes. Transport, token
//! acquisition and the device location stack live behind these traits.

use crate::errors::DispatchError;
use crate::types::dtos::{
    Coordinate, DailyStatistics, DeliveryProof, LocationSample, OrderDTO, OrderSummary, StatsRange,
};
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;

/// Bearer credential issued by the login flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
}

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

pub trait AuthProvider: Send + Sync {
    /// `None` means the agent is not authenticated.
    fn current_credential(&self) -> Option<Credential>;
}

/// Live sequence of location samples while tracking runs.
pub type LocationStream = Pin<Box<dyn Stream<Item = LocationSample> + Send>>;

pub trait LocationSource: Send + Sync {
    /// Starts a fresh sequence. Restartable after `stop`.
    fn start(&self) -> LocationStream;
    /// Ends the sequence returned by the last `start`.
    fn stop(&self);
}

/// Presence and location endpoints.
#[async_trait]
pub trait TrackingBackend: Send + Sync {
    async fn go_online(&self, credential: &Credential) -> Result<(), DispatchError>;
    async fn go_offline(&self, credential: &Credential) -> Result<(), DispatchError>;
    async fn report_location(
        &self,
        credential: &Credential,
        sample: &LocationSample,
    ) -> Result<(), DispatchError>;
}

#[async_trait]
pub trait OrderBackend: Send + Sync {
    async fn list_nearby(
        &self,
        credential: &Credential,
        origin: Coordinate,
    ) -> Result<Vec<OrderSummary>, DispatchError>;
    async fn fetch(&self, credential: &Credential, order_id: &str)
    -> Result<OrderDTO, DispatchError>;
    async fn accept(&self, credential: &Credential, order_id: &str)
    -> Result<OrderDTO, DispatchError>;
    async fn reject(
        &self,
        credential: &Credential,
        order_id: &str,
        reason: &str,
    ) -> Result<(), DispatchError>;
    async fn start_pickup(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError>;
    async fn complete_pickup(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError>;
    async fn start_delivery(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError>;
    async fn complete(
        &self,
        credential: &Credential,
        order_id: &str,
        proof: &DeliveryProof,
    ) -> Result<OrderDTO, DispatchError>;
    async fn cancel(
        &self,
        credential: &Credential,
        order_id: &str,
        reason: &str,
    ) -> Result<OrderDTO, DispatchError>;
}

#[async_trait]
pub trait StatsBackend: Send + Sync {
    async fn daily_statistics(
        &self,
        credential: &Credential,
        range: StatsRange,
    ) -> Result<DailyStatistics, DispatchError>;
}

/// Everything the engine needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthProvider>,
    pub location: Arc<dyn LocationSource>,
    pub tracking: Arc<dyn TrackingBackend>,
    pub orders: Arc<dyn OrderBackend>,
    pub stats: Arc<dyn StatsBackend>,
}
