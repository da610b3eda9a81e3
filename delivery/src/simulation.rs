//! In-memory stand-ins for the backend, the auth provider and the device
//! location stack. The binary runs a simulated shift on top of them and the
//! tests script failures and slow responses through them.

use actix::prelude::*;
use async_trait::async_trait;
use chrono::Utc;
use colored::Color;
use common::backend::{
    AuthProvider, Collaborators, Credential, LocationSource, LocationStream, OrderBackend,
    StatsBackend, TrackingBackend,
};
use common::errors::DispatchError;
use common::logger::Logger;
use common::types::dtos::{
    Coordinate, CustomerDTO, DailyStatistics, DeliveryProof, LocationSample, OrderDTO,
    OrderItemDTO, OrderSummary, PlaceDTO, StatsRange,
};
use common::types::order_status::OrderStatus;
use common::utils::{calculate_distance, random_point_near};
use futures_channel::mpsc::{UnboundedSender, unbounded};
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Backend endpoints, used to script failures and held responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    GoOnline,
    GoOffline,
    ReportLocation,
    ListNearby,
    Fetch,
    Accept,
    Reject,
    StartPickup,
    CompletePickup,
    StartDelivery,
    Complete,
    Cancel,
    DailyStatistics,
}

#[derive(Default)]
struct BackendState {
    orders: HashMap<String, OrderDTO>,
    rejected: HashSet<String>,
    online: bool,
    reported: Vec<LocationSample>,
    failures: HashMap<BackendOp, VecDeque<DispatchError>>,
    holds: HashMap<BackendOp, VecDeque<oneshot::Receiver<()>>>,
    calls: HashMap<BackendOp, usize>,
    /// When set, any other token is answered with SessionExpired.
    accepted_token: Option<String>,
}

/// Dispatch backend kept entirely in memory.
pub struct InMemoryBackend {
    agent_id: String,
    state: Mutex<BackendState>,
    logger: Logger,
}

impl InMemoryBackend {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            state: Mutex::new(BackendState::default()),
            logger: Logger::new("Backend", Color::BrightBlack),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_order(&self, order: OrderDTO) {
        self.lock().orders.insert(order.order_id.clone(), order);
    }

    /// Publishes `count` pending orders around `center` and returns their ids.
    pub fn seed_orders_around(
        &self,
        center: Coordinate,
        count: usize,
        radius_km: f64,
    ) -> Vec<String> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                let id = format!("order-{}", &Uuid::new_v4().simple().to_string()[..8]);
                let pickup = random_point_near(center, radius_km);
                let dropoff = random_point_near(pickup, radius_km);
                let payment = rng.gen_range(3_000..15_000);
                self.insert_order(sample_order(&id, pickup, dropoff, payment));
                id
            })
            .collect()
    }

    /// Changes an order on the server side, as a dispatcher or another
    /// device would.
    pub fn set_server_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.lock().orders.get_mut(order_id) {
            order.status = status;
        }
    }

    /// Makes another agent win the race for `order_id`.
    pub fn claim_by_other(&self, order_id: &str, other_agent: &str) {
        if let Some(order) = self.lock().orders.get_mut(order_id) {
            order.agent_id = Some(other_agent.to_string());
            order.status = OrderStatus::Accepted;
        }
    }

    /// The next call of `op` fails with `err`.
    pub fn fail_next(&self, op: BackendOp, err: DispatchError) {
        self.lock().failures.entry(op).or_default().push_back(err);
    }

    /// The next call of `op` waits until the returned sender fires (or is
    /// dropped).
    pub fn hold_next(&self, op: BackendOp) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().holds.entry(op).or_default().push_back(rx);
        tx
    }

    /// Only `token` is accepted from now on.
    pub fn accept_only_token(&self, token: impl Into<String>) {
        self.lock().accepted_token = Some(token.into());
    }

    pub fn call_count(&self, op: BackendOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn order(&self, order_id: &str) -> Option<OrderDTO> {
        self.lock().orders.get(order_id).cloned()
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    pub fn reported_locations(&self) -> Vec<LocationSample> {
        self.lock().reported.clone()
    }

    fn open_call(&self, op: BackendOp) -> Option<oneshot::Receiver<()>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        state.holds.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn admit(&self, op: BackendOp, credential: &Credential) -> Result<(), DispatchError> {
        let mut state = self.lock();
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        match &state.accepted_token {
            Some(token) if *token != credential.token => Err(DispatchError::session_expired()),
            _ => Ok(()),
        }
    }

    async fn enter(&self, op: BackendOp, credential: &Credential) -> Result<(), DispatchError> {
        if let Some(gate) = self.open_call(op) {
            let _ = gate.await;
        }
        self.admit(op, credential)
    }

    /// Applies `change` to one of this agent's orders.
    fn mutate_own<F>(&self, order_id: &str, change: F) -> Result<OrderDTO, DispatchError>
    where
        F: FnOnce(&mut OrderDTO) -> Result<(), DispatchError>,
    {
        let mut state = self.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| DispatchError::not_found(format!("order {} does not exist", order_id)))?;
        if order.agent_id.as_deref() != Some(self.agent_id.as_str()) {
            return Err(DispatchError::already_claimed(order_id));
        }
        change(order)?;
        Ok(order.clone())
    }
}

fn expect_status(order: &OrderDTO, expected: OrderStatus) -> Result<(), DispatchError> {
    if order.status == expected {
        Ok(())
    } else {
        Err(DispatchError::conflict(format!(
            "order {} is {}, expected {}",
            order.order_id, order.status, expected
        )))
    }
}

#[async_trait]
impl TrackingBackend for InMemoryBackend {
    async fn go_online(&self, credential: &Credential) -> Result<(), DispatchError> {
        self.enter(BackendOp::GoOnline, credential).await?;
        self.lock().online = true;
        Ok(())
    }

    async fn go_offline(&self, credential: &Credential) -> Result<(), DispatchError> {
        self.enter(BackendOp::GoOffline, credential).await?;
        self.lock().online = false;
        Ok(())
    }

    async fn report_location(
        &self,
        credential: &Credential,
        sample: &LocationSample,
    ) -> Result<(), DispatchError> {
        self.enter(BackendOp::ReportLocation, credential).await?;
        self.lock().reported.push(sample.clone());
        Ok(())
    }
}

#[async_trait]
impl OrderBackend for InMemoryBackend {
    async fn list_nearby(
        &self,
        credential: &Credential,
        origin: Coordinate,
    ) -> Result<Vec<OrderSummary>, DispatchError> {
        let gate = self.open_call(BackendOp::ListNearby);
        // The listing reflects the moment the request reached the server.
        let listing: Vec<OrderSummary> = {
            let state = self.lock();
            state
                .orders
                .values()
                .filter(|o| o.status.is_open() && o.agent_id.is_none())
                .filter(|o| !state.rejected.contains(&o.order_id))
                .map(OrderDTO::summary)
                .collect()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.admit(BackendOp::ListNearby, credential)?;
        self.logger.debug(format!(
            "Listing {} open orders around ({:.4}, {:.4})",
            listing.len(),
            origin.lat,
            origin.lon
        ));
        Ok(listing)
    }

    async fn fetch(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError> {
        self.enter(BackendOp::Fetch, credential).await?;
        self.order(order_id)
            .ok_or_else(|| DispatchError::not_found(format!("order {} does not exist", order_id)))
    }

    async fn accept(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError> {
        self.enter(BackendOp::Accept, credential).await?;
        let mut state = self.lock();
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| DispatchError::not_found(format!("order {} does not exist", order_id)))?;
        match order.agent_id.as_deref() {
            Some(agent) if agent == self.agent_id => {
                return Err(DispatchError::conflict(format!(
                    "order {} is already yours",
                    order_id
                )));
            }
            Some(_) => return Err(DispatchError::already_claimed(order_id)),
            None => {}
        }
        if !order.status.is_open() {
            return Err(DispatchError::conflict(format!(
                "order {} is {}",
                order_id, order.status
            )));
        }
        order.agent_id = Some(self.agent_id.clone());
        order.status = OrderStatus::Accepted;
        order.accepted_at = Some(Utc::now());
        Ok(order.clone())
    }

    async fn reject(
        &self,
        credential: &Credential,
        order_id: &str,
        reason: &str,
    ) -> Result<(), DispatchError> {
        self.enter(BackendOp::Reject, credential).await?;
        let mut state = self.lock();
        if !state.orders.contains_key(order_id) {
            return Err(DispatchError::not_found(format!("order {} does not exist", order_id)));
        }
        self.logger
            .debug(format!("Order {} rejected: {}", order_id, reason));
        state.rejected.insert(order_id.to_string());
        Ok(())
    }

    async fn start_pickup(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError> {
        self.enter(BackendOp::StartPickup, credential).await?;
        self.mutate_own(order_id, |order| {
            expect_status(order, OrderStatus::Accepted)?;
            order.status = OrderStatus::PickingUp;
            Ok(())
        })
    }

    async fn complete_pickup(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError> {
        self.enter(BackendOp::CompletePickup, credential).await?;
        self.mutate_own(order_id, |order| {
            expect_status(order, OrderStatus::PickingUp)?;
            order.picked_up_at = Some(Utc::now());
            Ok(())
        })
    }

    async fn start_delivery(
        &self,
        credential: &Credential,
        order_id: &str,
    ) -> Result<OrderDTO, DispatchError> {
        self.enter(BackendOp::StartDelivery, credential).await?;
        self.mutate_own(order_id, |order| {
            expect_status(order, OrderStatus::PickingUp)?;
            order.status = OrderStatus::Delivering;
            Ok(())
        })
    }

    async fn complete(
        &self,
        credential: &Credential,
        order_id: &str,
        proof: &DeliveryProof,
    ) -> Result<OrderDTO, DispatchError> {
        self.enter(BackendOp::Complete, credential).await?;
        self.mutate_own(order_id, |order| {
            expect_status(order, OrderStatus::Delivering)?;
            order.status = OrderStatus::Completed;
            order.completed_at = Some(Utc::now());
            order.proof = Some(proof.clone());
            Ok(())
        })
    }

    async fn cancel(
        &self,
        credential: &Credential,
        order_id: &str,
        reason: &str,
    ) -> Result<OrderDTO, DispatchError> {
        self.enter(BackendOp::Cancel, credential).await?;
        self.mutate_own(order_id, |order| {
            if !order.status.is_active() {
                return Err(DispatchError::conflict(format!(
                    "order {} is {}",
                    order.order_id, order.status
                )));
            }
            order.status = OrderStatus::Cancelled;
            order.cancelled_at = Some(Utc::now());
            order.cancel_reason = Some(reason.to_string());
            Ok(())
        })
    }
}

#[async_trait]
impl StatsBackend for InMemoryBackend {
    async fn daily_statistics(
        &self,
        credential: &Credential,
        range: StatsRange,
    ) -> Result<DailyStatistics, DispatchError> {
        self.enter(BackendOp::DailyStatistics, credential).await?;
        let state = self.lock();
        let completed: Vec<&OrderDTO> = state
            .orders
            .values()
            .filter(|o| o.agent_id.as_deref() == Some(self.agent_id.as_str()))
            .filter(|o| o.status == OrderStatus::Completed)
            .filter(|o| {
                o.completed_at.is_some_and(|at| {
                    let day = at.with_timezone(&chrono::Local).date_naive();
                    range.from <= day && day <= range.to
                })
            })
            .collect();
        Ok(DailyStatistics {
            completed_count: completed.len() as u32,
            earnings: completed.iter().map(|o| o.payment_total).sum(),
        })
    }
}

/// Builds a pending order with plausible detail.
pub fn sample_order(
    order_id: &str,
    pickup: Coordinate,
    dropoff: Coordinate,
    payment_total: u64,
) -> OrderDTO {
    let distance_km = calculate_distance(pickup, dropoff);
    OrderDTO {
        order_id: order_id.to_string(),
        status: OrderStatus::Pending,
        pickup: PlaceDTO {
            coordinate: pickup,
            address: format!("Store near {:.4}, {:.4}", pickup.lat, pickup.lon),
            note: None,
        },
        dropoff: PlaceDTO {
            coordinate: dropoff,
            address: format!("Door near {:.4}, {:.4}", dropoff.lat, dropoff.lon),
            note: Some("Leave at the door".to_string()),
        },
        distance_km,
        // Roughly 20 km/h through city traffic.
        duration_minutes: (distance_km * 3.0).ceil() as u32,
        payment_total,
        customer: CustomerDTO {
            name: "Customer".to_string(),
            phone: None,
        },
        items: vec![OrderItemDTO {
            name: "Lunch box".to_string(),
            quantity: 1,
            unit_price: payment_total,
        }],
        agent_id: None,
        assigned_at: None,
        accepted_at: None,
        picked_up_at: None,
        completed_at: None,
        cancelled_at: None,
        cancel_reason: None,
        proof: None,
    }
}

/// Auth provider whose credential can be swapped at runtime.
#[derive(Default)]
pub struct StaticAuth {
    credential: Mutex<Option<Credential>>,
}

impl StaticAuth {
    pub fn signed_in(token: impl Into<String>) -> Self {
        Self {
            credential: Mutex::new(Some(Credential::bearer(token))),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set(&self, credential: Option<Credential>) {
        *self
            .credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = credential;
    }
}

impl AuthProvider for StaticAuth {
    fn current_credential(&self) -> Option<Credential> {
        self.credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Location source fed by hand, one sample at a time.
#[derive(Default)]
pub struct ManualLocationSource {
    sender: Mutex<Option<UnboundedSender<LocationSample>>>,
    starts: AtomicUsize,
}

impl ManualLocationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a sample on the running sequence. Returns false when stopped.
    pub fn push(&self, sample: LocationSample) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|tx| tx.unbounded_send(sample).is_ok())
    }

    pub fn is_streaming(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl LocationSource for ManualLocationSource {
    fn start(&self) -> LocationStream {
        let (tx, rx) = unbounded();
        *self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(tx);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Box::pin(rx)
    }

    fn stop(&self) {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// Location source that wanders around a starting point at a fixed cadence.
pub struct SimulatedLocationSource {
    start_position: Coordinate,
    cadence: Duration,
    session: Arc<AtomicU64>,
}

impl SimulatedLocationSource {
    pub fn new(start_position: Coordinate, cadence: Duration) -> Self {
        Self {
            start_position,
            cadence,
            session: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl LocationSource for SimulatedLocationSource {
    fn start(&self) -> LocationStream {
        let (tx, rx) = unbounded();
        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        let current_session = self.session.clone();
        let cadence = self.cadence;
        let mut position = self.start_position;
        actix_rt::spawn(async move {
            loop {
                tokio::time::sleep(cadence).await;
                if current_session.load(Ordering::SeqCst) != session {
                    break;
                }
                position = random_point_near(position, 0.05);
                let mut sample = LocationSample::new(position, Utc::now(), 5.0);
                sample.speed = Some(rand::thread_rng().gen_range(0.0..8.0));
                if tx.unbounded_send(sample).is_err() {
                    break;
                }
            }
        });
        Box::pin(rx)
    }

    fn stop(&self) {
        self.session.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wires one in-memory backend behind every backend contract.
pub fn in_memory_collaborators(
    backend: Arc<InMemoryBackend>,
    auth: Arc<StaticAuth>,
    location: Arc<dyn LocationSource>,
) -> Collaborators {
    Collaborators {
        auth,
        location,
        tracking: backend.clone(),
        orders: backend.clone(),
        stats: backend,
    }
}

/// Actor that keeps every message of type `M` it receives. Handy as a
/// subscriber when observing the engine from the outside.
pub struct Recorder<M> {
    seen: Arc<Mutex<Vec<M>>>,
}

/// Read side of a [`Recorder`].
#[derive(Clone)]
pub struct RecordLog<M> {
    seen: Arc<Mutex<Vec<M>>>,
}

impl<M> Recorder<M> {
    pub fn new() -> (Self, RecordLog<M>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Self { seen: seen.clone() }, RecordLog { seen })
    }
}

impl<M: Clone> RecordLog<M> {
    pub fn snapshot(&self) -> Vec<M> {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn last(&self) -> Option<M> {
        self.snapshot().pop()
    }
}

impl<M: 'static> Actor for Recorder<M> {
    type Context = Context<Self>;
}

impl<M> Handler<M> for Recorder<M>
where
    M: Message<Result = ()> + 'static,
{
    type Result = ();

    fn handle(&mut self, msg: M, _ctx: &mut Self::Context) -> Self::Result {
        self.seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seoul() -> Coordinate {
        Coordinate {
            lat: 37.5665,
            lon: 126.9780,
        }
    }

    #[actix_rt::test]
    async fn accept_is_exclusive() {
        let backend = InMemoryBackend::new("agent-1");
        let credential = Credential::bearer("t");
        backend.insert_order(sample_order("o1", seoul(), seoul(), 5000));
        backend.claim_by_other("o1", "agent-2");

        let err = backend.accept(&credential, "o1").await.expect_err("claimed");
        assert_eq!(err.kind, common::errors::ErrorKind::AlreadyClaimed);
    }

    #[actix_rt::test]
    async fn full_delivery_on_the_server() {
        let backend = InMemoryBackend::new("agent-1");
        let credential = Credential::bearer("t");
        backend.insert_order(sample_order("o1", seoul(), seoul(), 5000));

        backend.accept(&credential, "o1").await.expect("accept");
        backend.start_pickup(&credential, "o1").await.expect("pickup");
        backend.complete_pickup(&credential, "o1").await.expect("picked up");
        let order = backend.start_delivery(&credential, "o1").await.expect("deliver");
        assert_eq!(order.status, OrderStatus::Delivering);
        backend
            .complete(&credential, "o1", &DeliveryProof::default())
            .await
            .expect("complete");

        let stats = backend
            .daily_statistics(&credential, StatsRange::today())
            .await
            .expect("stats");
        assert_eq!(stats.completed_count, 1);
        assert_eq!(stats.earnings, 5000);
    }

    #[actix_rt::test]
    async fn scripted_failures_are_consumed_once() {
        let backend = InMemoryBackend::new("agent-1");
        let credential = Credential::bearer("t");
        backend.fail_next(BackendOp::GoOnline, DispatchError::network("offline"));

        assert!(backend.go_online(&credential).await.is_err());
        assert!(backend.go_online(&credential).await.is_ok());
        assert_eq!(backend.call_count(BackendOp::GoOnline), 2);
    }

    #[actix_rt::test]
    async fn manual_source_restarts() {
        let source = ManualLocationSource::new();
        assert!(!source.push(LocationSample::new(seoul(), Utc::now(), 5.0)));
        let _first = source.start();
        assert!(source.push(LocationSample::new(seoul(), Utc::now(), 5.0)));
        source.stop();
        assert!(!source.is_streaming());
        let _second = source.start();
        assert_eq!(source.start_count(), 2);
    }
}
