use crate::delivery_actors::with_deadline;
use crate::messages::internal_messages::{
    AuthRejected, CatalogUpdated, ClaimOrder, DismissOrder, GetNearbyOrders, LocationUpdated,
    PauseForAuth, PresenceChanged, RefreshCatalog, ReleaseClaim, ResumeAfterAuth,
    ServerStatusObserved, SetAuthListener, SetStatusObserver, SubscribeCatalog,
};
use actix::prelude::*;
use colored::Color;
use common::backend::{AuthProvider, OrderBackend};
use common::config::DispatchConfig;
use common::errors::DispatchError;
use common::logger::Logger;
use common::types::dtos::{Coordinate, OrderSummary};
use common::types::presence_state::PresenceState;
use common::utils::calculate_distance;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// The `OrderCatalog` actor caches the orders available near the agent.
///
/// ## Responsibilities
/// - Lists nearby orders while the agent is online, on every location
///   trigger that passed the reporter's throttle.
/// - Applies refresh results in request-start order: a result is dropped when
///   a refresh started later has already been applied.
/// - Hides the claimed order and the dismissed ones, sorts by distance to the
///   refresh origin and caps the list.
/// - Cancels outstanding refreshes and clears the cache on going offline.
pub struct OrderCatalog {
    pub backend: Arc<dyn OrderBackend>,
    pub auth: Arc<dyn AuthProvider>,
    /// Presence is Online.
    pub polling: bool,
    /// Set while the credential is rejected.
    pub paused: bool,
    pub claimed_order_id: Option<String>,
    pub dismissed: HashSet<String>,
    pub orders: Vec<OrderSummary>,
    pub next_seq: u64,
    pub last_applied_seq: u64,
    /// Cancel signals of the outstanding refreshes. Dropping one cancels it.
    pub in_flight: HashMap<u64, oneshot::Sender<()>>,
    pub last_origin: Option<Coordinate>,
    pub cap: usize,
    pub timeout: Duration,
    pub subscribers: Vec<Recipient<CatalogUpdated>>,
    pub status_observer: Option<Recipient<ServerStatusObserved>>,
    pub auth_listener: Option<Recipient<AuthRejected>>,
    pub logger: Logger,
}

impl OrderCatalog {
    pub fn new(
        backend: Arc<dyn OrderBackend>,
        auth: Arc<dyn AuthProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            backend,
            auth,
            polling: false,
            paused: false,
            claimed_order_id: None,
            dismissed: HashSet::new(),
            orders: Vec::new(),
            next_seq: 0,
            last_applied_seq: 0,
            in_flight: HashMap::new(),
            last_origin: None,
            cap: config.nearby_orders_cap,
            timeout: config.transition_timeout(),
            subscribers: Vec::new(),
            status_observer: None,
            auth_listener: None,
            logger: Logger::new("Catalog", Color::BrightCyan).with_verbose(config.verbose_logging),
        }
    }

    fn broadcast(&self) {
        let update = CatalogUpdated {
            orders: self.orders.clone(),
        };
        for subscriber in &self.subscribers {
            subscriber.do_send(update.clone());
        }
    }

    fn should_poll(&self) -> bool {
        self.polling && !self.paused && self.claimed_order_id.is_none()
    }

    fn schedule_refresh(&mut self, ctx: &mut Context<Self>) {
        if !self.should_poll() {
            return;
        }
        if let Some(origin) = self.last_origin {
            ctx.notify(RefreshCatalog { origin });
        }
    }

    fn report_auth_failure(&self, err: &DispatchError) {
        if !err.is_auth() {
            return;
        }
        if let Some(listener) = &self.auth_listener {
            listener.do_send(AuthRejected {
                component: "catalog",
                error: err.clone(),
            });
        }
    }

    /// Applies the result of refresh `seq`. Returns the list now exposed.
    fn apply(
        &mut self,
        seq: u64,
        origin: Coordinate,
        listing: Vec<OrderSummary>,
    ) -> Vec<OrderSummary> {
        if seq <= self.last_applied_seq {
            self.logger.debug(format!(
                "Discarding stale refresh #{} (#{} already applied)",
                seq, self.last_applied_seq
            ));
            return self.orders.clone();
        }
        self.last_applied_seq = seq;

        if let (Some(claimed), Some(observer)) = (&self.claimed_order_id, &self.status_observer) {
            if let Some(entry) = listing.iter().find(|o| &o.order_id == claimed) {
                observer.do_send(ServerStatusObserved {
                    order_id: entry.order_id.clone(),
                    status: entry.status,
                });
            }
        }

        let mut seen = HashSet::new();
        let mut visible: Vec<OrderSummary> = listing
            .into_iter()
            .filter(|o| self.claimed_order_id.as_ref() != Some(&o.order_id))
            .filter(|o| !self.dismissed.contains(&o.order_id))
            .filter(|o| seen.insert(o.order_id.clone()))
            .collect();
        visible.sort_by(|a, b| {
            calculate_distance(origin, a.pickup).total_cmp(&calculate_distance(origin, b.pickup))
        });
        visible.truncate(self.cap);

        self.logger.info(format!(
            "Refresh #{} applied: {} nearby orders",
            seq,
            visible.len()
        ));
        self.orders = visible;
        self.broadcast();
        self.orders.clone()
    }

    /// Stops polling, cancels every outstanding refresh and drops the cache.
    fn go_dark(&mut self) {
        self.polling = false;
        if !self.in_flight.is_empty() {
            self.logger.info(format!(
                "Cancelling {} outstanding refreshes",
                self.in_flight.len()
            ));
        }
        self.in_flight.clear();
        self.last_applied_seq = self.next_seq;
        if !self.orders.is_empty() {
            self.orders.clear();
            self.broadcast();
        }
    }

    fn remove_from_cache(&mut self, order_id: &str) {
        let before = self.orders.len();
        self.orders.retain(|o| o.order_id != order_id);
        if self.orders.len() != before {
            self.broadcast();
        }
    }
}

impl Actor for OrderCatalog {
    type Context = Context<Self>;
}

impl Handler<RefreshCatalog> for OrderCatalog {
    type Result = ResponseActFuture<Self, Result<Vec<OrderSummary>, DispatchError>>;

    fn handle(&mut self, msg: RefreshCatalog, _ctx: &mut Self::Context) -> Self::Result {
        let origin = msg.origin;
        if !self.polling {
            return Box::pin(actix::fut::ready(Err(DispatchError::invalid_state(
                "the catalog is only refreshed while online",
            ))));
        }
        if let Err(err) = origin.validate() {
            return Box::pin(actix::fut::ready(Err(err)));
        }
        let Some(credential) = self.auth.current_credential() else {
            let err = DispatchError::unauthenticated();
            self.report_auth_failure(&err);
            return Box::pin(actix::fut::ready(Err(err)));
        };

        self.next_seq += 1;
        let seq = self.next_seq;
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        self.in_flight.insert(seq, cancel_tx);
        self.last_origin = Some(origin);
        self.logger.debug(format!(
            "Refresh #{} around ({:.4}, {:.4})",
            seq, origin.lat, origin.lon
        ));

        let backend = self.backend.clone();
        let deadline = self.timeout;
        Box::pin(
            async move {
                let listing = with_deadline(
                    deadline,
                    "list nearby orders",
                    backend.list_nearby(&credential, origin),
                );
                tokio::select! {
                    res = listing => res,
                    _ = cancel_rx => Err(DispatchError::invalid_state(format!(
                        "refresh #{} cancelled: agent went offline",
                        seq
                    ))),
                }
            }
            .into_actor(self)
            .map(move |res, act, _ctx| {
                act.in_flight.remove(&seq);
                match res {
                    Ok(listing) => Ok(act.apply(seq, origin, listing)),
                    Err(err) => {
                        act.logger
                            .warn(format!("Refresh #{} failed: {}", seq, err));
                        act.report_auth_failure(&err);
                        Err(err)
                    }
                }
            }),
        )
    }
}

impl Handler<LocationUpdated> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: LocationUpdated, ctx: &mut Self::Context) -> Self::Result {
        self.last_origin = Some(msg.sample.coordinate);
        self.schedule_refresh(ctx);
    }
}

impl Handler<PresenceChanged> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: PresenceChanged, ctx: &mut Self::Context) -> Self::Result {
        match msg.state {
            PresenceState::Online => {
                if self.polling {
                    return;
                }
                self.logger.info("Polling started");
                self.polling = true;
                // A sample seen while going online was already spent on the
                // reporter's trigger throttle.
                self.schedule_refresh(ctx);
            }
            PresenceState::TransitioningOffline | PresenceState::Offline => self.go_dark(),
            PresenceState::TransitioningOnline => {}
        }
    }
}

impl Handler<ClaimOrder> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: ClaimOrder, _ctx: &mut Self::Context) -> Self::Result {
        self.logger
            .info(format!("Order {} claimed, polling suspended", msg.order_id));
        self.remove_from_cache(&msg.order_id);
        self.claimed_order_id = Some(msg.order_id);
    }
}

impl Handler<ReleaseClaim> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: ReleaseClaim, ctx: &mut Self::Context) -> Self::Result {
        if self.claimed_order_id.as_deref() != Some(msg.order_id.as_str()) {
            return;
        }
        self.claimed_order_id = None;
        self.logger
            .info(format!("Order {} released, polling resumed", msg.order_id));
        self.schedule_refresh(ctx);
    }
}

impl Handler<DismissOrder> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: DismissOrder, _ctx: &mut Self::Context) -> Self::Result {
        self.remove_from_cache(&msg.order_id);
        self.dismissed.insert(msg.order_id);
    }
}

impl Handler<PauseForAuth> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, _msg: PauseForAuth, _ctx: &mut Self::Context) -> Self::Result {
        if !self.paused {
            self.logger.warn("Paused until a valid credential is available");
        }
        self.paused = true;
    }
}

impl Handler<ResumeAfterAuth> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, _msg: ResumeAfterAuth, ctx: &mut Self::Context) -> Self::Result {
        if !self.paused {
            return;
        }
        self.paused = false;
        self.logger.info("Resumed");
        self.schedule_refresh(ctx);
    }
}

impl Handler<GetNearbyOrders> for OrderCatalog {
    type Result = MessageResult<GetNearbyOrders>;

    fn handle(&mut self, _msg: GetNearbyOrders, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.orders.clone())
    }
}

impl Handler<SubscribeCatalog> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: SubscribeCatalog, _ctx: &mut Self::Context) -> Self::Result {
        msg.0.do_send(CatalogUpdated {
            orders: self.orders.clone(),
        });
        self.subscribers.push(msg.0);
    }
}

impl Handler<SetStatusObserver> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: SetStatusObserver, _ctx: &mut Self::Context) -> Self::Result {
        self.status_observer = Some(msg.0);
    }
}

impl Handler<SetAuthListener> for OrderCatalog {
    type Result = ();

    fn handle(&mut self, msg: SetAuthListener, _ctx: &mut Self::Context) -> Self::Result {
        self.auth_listener = Some(msg.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{BackendOp, InMemoryBackend, Recorder, StaticAuth, sample_order};
    use chrono::Utc;
    use common::errors::ErrorKind;
    use common::types::dtos::{LocationSample, OnlineStats};
    use common::types::order_status::OrderStatus;

    fn origin() -> Coordinate {
        Coordinate {
            lat: 37.5665,
            lon: 126.9780,
        }
    }

    /// `o{i}` lies `i` hundred meters north of the origin.
    fn order_at(i: u32) -> common::types::dtos::OrderDTO {
        let pickup = Coordinate {
            lat: origin().lat + 0.0009 * i as f64,
            lon: origin().lon,
        };
        sample_order(&format!("o{}", i), pickup, origin(), 5_000)
    }

    fn presence(state: PresenceState) -> PresenceChanged {
        PresenceChanged {
            state,
            stats: OnlineStats::default(),
        }
    }

    fn ids(orders: &[OrderSummary]) -> Vec<String> {
        orders.iter().map(|o| o.order_id.clone()).collect()
    }

    fn online_catalog(backend: &Arc<InMemoryBackend>) -> Addr<OrderCatalog> {
        let auth = Arc::new(StaticAuth::signed_in("token"));
        let catalog = OrderCatalog::new(backend.clone(), auth, &DispatchConfig::default()).start();
        catalog.do_send(presence(PresenceState::Online));
        catalog
    }

    async fn settle() {
        actix_rt::time::sleep(Duration::from_millis(20)).await;
    }

    #[actix_rt::test]
    async fn exposes_the_five_nearest_orders() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        for i in (1..=7).rev() {
            backend.insert_order(order_at(i));
        }
        let catalog = online_catalog(&backend);

        let orders = catalog
            .send(RefreshCatalog { origin: origin() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&orders), vec!["o1", "o2", "o3", "o4", "o5"]);
        assert_eq!(catalog.send(GetNearbyOrders).await.unwrap(), orders);
    }

    #[actix_rt::test]
    async fn stale_refresh_never_overwrites_a_newer_one() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        backend.insert_order(order_at(1));
        let catalog = online_catalog(&backend);

        let release_first = backend.hold_next(BackendOp::ListNearby);
        let first = catalog.send(RefreshCatalog { origin: origin() });
        settle().await;

        backend.set_server_status("o1", OrderStatus::Cancelled);
        backend.insert_order(order_at(2));
        let second = catalog
            .send(RefreshCatalog { origin: origin() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&second), vec!["o2"]);

        release_first.send(()).unwrap();
        let first = first.await.unwrap().unwrap();
        assert_eq!(ids(&first), vec!["o2"]);
        assert_eq!(ids(&catalog.send(GetNearbyOrders).await.unwrap()), vec!["o2"]);
    }

    #[actix_rt::test]
    async fn going_offline_cancels_and_clears() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        backend.insert_order(order_at(1));
        let catalog = online_catalog(&backend);
        catalog
            .send(RefreshCatalog { origin: origin() })
            .await
            .unwrap()
            .unwrap();

        let _held = backend.hold_next(BackendOp::ListNearby);
        let pending = catalog.send(RefreshCatalog { origin: origin() });
        settle().await;
        catalog.do_send(presence(PresenceState::TransitioningOffline));

        let err = pending.await.unwrap().expect_err("cancelled");
        assert_eq!(err.kind, ErrorKind::InvalidState);
        assert!(catalog.send(GetNearbyOrders).await.unwrap().is_empty());

        let err = catalog
            .send(RefreshCatalog { origin: origin() })
            .await
            .unwrap()
            .expect_err("offline");
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }

    #[actix_rt::test]
    async fn claimed_and_dismissed_orders_are_hidden() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        for i in 1..=3 {
            backend.insert_order(order_at(i));
        }
        let catalog = online_catalog(&backend);
        let (recorder, observed) = Recorder::<ServerStatusObserved>::new();
        catalog.do_send(SetStatusObserver(recorder.start().recipient()));

        catalog.do_send(ClaimOrder {
            order_id: "o1".to_string(),
        });
        catalog.do_send(DismissOrder {
            order_id: "o2".to_string(),
        });
        let orders = catalog
            .send(RefreshCatalog { origin: origin() })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ids(&orders), vec!["o3"]);

        settle().await;
        let seen = observed.last().expect("claimed order observed");
        assert_eq!(seen.order_id, "o1");
        assert_eq!(seen.status, OrderStatus::Pending);
    }

    #[actix_rt::test]
    async fn location_triggers_respect_claim_and_pause() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        backend.insert_order(order_at(1));
        let catalog = online_catalog(&backend);
        let moved = LocationUpdated {
            sample: LocationSample::new(origin(), Utc::now(), 5.0),
        };

        catalog.do_send(moved.clone());
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 1);

        catalog.do_send(PauseForAuth);
        catalog.do_send(moved.clone());
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 1);

        catalog.do_send(ResumeAfterAuth);
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 2);

        catalog.do_send(ClaimOrder {
            order_id: "o1".to_string(),
        });
        catalog.do_send(moved);
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 2);

        catalog.do_send(ReleaseClaim {
            order_id: "o1".to_string(),
        });
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 3);
    }

    #[actix_rt::test]
    async fn sample_seen_while_going_online_is_listed_once_online() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        backend.insert_order(order_at(1));
        let auth = Arc::new(StaticAuth::signed_in("token"));
        let catalog = OrderCatalog::new(backend.clone(), auth, &DispatchConfig::default()).start();

        catalog.do_send(presence(PresenceState::TransitioningOnline));
        catalog.do_send(LocationUpdated {
            sample: LocationSample::new(origin(), Utc::now(), 5.0),
        });
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 0);

        catalog.do_send(presence(PresenceState::Online));
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 1);
        assert_eq!(ids(&catalog.send(GetNearbyOrders).await.unwrap()), vec!["o1"]);

        catalog.do_send(presence(PresenceState::Online));
        settle().await;
        assert_eq!(backend.call_count(BackendOp::ListNearby), 1);
    }

    #[actix_rt::test]
    async fn invalid_origin_never_reaches_the_backend() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        let catalog = online_catalog(&backend);

        let err = catalog
            .send(RefreshCatalog {
                origin: Coordinate {
                    lat: 91.0,
                    lon: 0.0,
                },
            })
            .await
            .unwrap()
            .expect_err("invalid origin");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(backend.call_count(BackendOp::ListNearby), 0);
    }
}
