use crate::delivery_actors::location_reporter::LocationReporter;
use crate::delivery_actors::order_catalog::OrderCatalog;
use crate::delivery_actors::order_lifecycle::OrderLifecycle;
use crate::delivery_actors::presence::PresenceController;
use crate::delivery_actors::stats_poller::StatsPoller;
use crate::messages::internal_messages::{
    AcceptOrder, AcknowledgeFinished, AdvanceOrder, AuthRejected, CancelOrder, CatalogUpdated,
    CompleteDelivery, CurrentOrderChanged, GetCurrentOrder, LocationUpdated, PauseForAuth,
    PresenceChanged, ReconcileCurrentOrder, RejectOrder, ResumeAfterAuth, SetAuthListener,
    StatsUpdated, SubscribeCatalog, SubscribeLocation, SubscribeOrder, SubscribePresence,
    SubscribeStats, TogglePresence,
};
use crate::messages::ui_messages::{
    AcknowledgeFinishedOrder, DispatchSnapshot, DispatchUpdate, GetDispatchSnapshot,
    RequestAccept, RequestAdvance, RequestCancel, RequestComplete, RequestReject,
    RequestTogglePresence, SubscribeDispatch,
};
use actix::dev::ToEnvelope;
use actix::prelude::*;
use colored::Color;
use common::backend::{AuthProvider, Credential};
use common::config::DispatchConfig;
use common::errors::{DispatchError, ErrorKind};
use common::logger::Logger;
use common::types::dtos::{DeliveryProof, OrderDTO};
use common::types::presence_state::PresenceState;
use std::sync::Arc;
use std::time::Duration;

/// Addresses of the components the coordinator fronts.
#[derive(Clone)]
pub struct Components {
    pub presence: Addr<PresenceController>,
    pub reporter: Addr<LocationReporter>,
    pub catalog: Addr<OrderCatalog>,
    pub lifecycle: Addr<OrderLifecycle>,
    pub stats: Addr<StatsPoller>,
}

/// The `DispatchCoordinator` actor is the single entry point of the UI layer.
///
/// ## Responsibilities
/// - Observes presence, location, catalog, current order and statistics and
///   republishes them as one `DispatchSnapshot`.
/// - Serializes operations spanning several components: no accept while
///   presence is changing, no offline while an order is being executed or
///   accepted.
/// - Pauses dependent work while the credential is rejected and resumes it
///   once a new one is available.
/// - Keeps the current order in sync with the server while it is active.
pub struct DispatchCoordinator {
    pub components: Components,
    pub auth: Arc<dyn AuthProvider>,
    pub snapshot: DispatchSnapshot,
    pub toggle_in_flight: bool,
    pub accepts_in_flight: usize,
    /// Credential the backend refused, if it refused one.
    pub rejected_credential: Option<Credential>,
    /// Auth failure that paused dependent work.
    pub pause_cause: Option<ErrorKind>,
    pub auth_check: Option<SpawnHandle>,
    pub order_sync: Option<SpawnHandle>,
    pub auth_check_interval: Duration,
    pub order_sync_interval: Duration,
    pub ui_subscribers: Vec<Recipient<DispatchUpdate>>,
    pub logger: Logger,
}

impl DispatchCoordinator {
    pub fn new(
        components: Components,
        auth: Arc<dyn AuthProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            components,
            auth,
            snapshot: DispatchSnapshot::default(),
            toggle_in_flight: false,
            accepts_in_flight: 0,
            rejected_credential: None,
            pause_cause: None,
            auth_check: None,
            order_sync: None,
            auth_check_interval: config.auth_check_interval(),
            order_sync_interval: config.order_sync_interval(),
            ui_subscribers: Vec::new(),
            logger: Logger::new("Coordinator", Color::Blue).with_verbose(config.verbose_logging),
        }
    }

    fn publish(&self) {
        let update = DispatchUpdate(self.snapshot.clone());
        for subscriber in &self.ui_subscribers {
            subscriber.do_send(update.clone());
        }
    }

    fn pause_for_auth(&mut self, ctx: &mut Context<Self>, component: &str, error: &DispatchError) {
        if self.snapshot.auth_paused {
            return;
        }
        self.logger.warn(format!(
            "{} rejected by the backend ({}): pausing until re-authentication",
            component, error
        ));
        self.rejected_credential = match error.kind {
            ErrorKind::SessionExpired => self.auth.current_credential(),
            _ => None,
        };
        self.snapshot.auth_paused = true;
        self.pause_cause = Some(error.kind);
        self.components.catalog.do_send(PauseForAuth);
        self.components.reporter.do_send(PauseForAuth);
        self.components.stats.do_send(PauseForAuth);
        let handle = ctx.run_interval(self.auth_check_interval, |act, ctx| {
            act.check_credential(ctx);
        });
        self.auth_check = Some(handle);
        self.publish();
    }

    fn check_credential(&mut self, ctx: &mut Context<Self>) {
        let usable = match self.auth.current_credential() {
            Some(credential) => self.rejected_credential.as_ref() != Some(&credential),
            None => false,
        };
        if !usable {
            self.logger.debug("Still waiting for a valid credential");
            return;
        }
        self.logger.info("Credential available again, resuming");
        self.snapshot.auth_paused = false;
        self.rejected_credential = None;
        self.pause_cause = None;
        if let Some(handle) = self.auth_check.take() {
            ctx.cancel_future(handle);
        }
        self.components.catalog.do_send(ResumeAfterAuth);
        self.components.reporter.do_send(ResumeAfterAuth);
        self.components.stats.do_send(ResumeAfterAuth);
        self.publish();
    }

    fn update_order_sync(&mut self, ctx: &mut Context<Self>) {
        let active = self
            .snapshot
            .current_order
            .as_ref()
            .is_some_and(|o| o.status.is_active());
        match (active, self.order_sync.is_some()) {
            (true, false) => {
                let handle = ctx.run_interval(self.order_sync_interval, |act, _ctx| {
                    if !act.snapshot.auth_paused {
                        act.components.lifecycle.do_send(ReconcileCurrentOrder);
                    }
                });
                self.order_sync = Some(handle);
            }
            (false, true) => {
                if let Some(handle) = self.order_sync.take() {
                    ctx.cancel_future(handle);
                }
            }
            _ => {}
        }
    }

    /// Hands a lifecycle request over, unless dependent work is paused.
    fn forward<M, T>(&self, msg: M) -> ResponseActFuture<Self, Result<T, DispatchError>>
    where
        M: Message<Result = Result<T, DispatchError>> + Send + 'static,
        T: Send + 'static,
        OrderLifecycle: Handler<M>,
        <OrderLifecycle as Actor>::Context: ToEnvelope<OrderLifecycle, M>,
    {
        if let Some(kind) = self.pause_cause {
            let err = match kind {
                ErrorKind::SessionExpired => DispatchError::session_expired(),
                _ => DispatchError::unauthenticated(),
            };
            return Box::pin(actix::fut::ready(Err(err)));
        }
        let lifecycle = self.components.lifecycle.clone();
        Box::pin(
            async move {
                lifecycle
                    .send(msg)
                    .await
                    .unwrap_or_else(|err| Err(DispatchError::from(err)))
            }
            .into_actor(self),
        )
    }
}

/// Refuses to go offline while an order is being executed, then toggles.
async fn toggle_checked(
    presence: Addr<PresenceController>,
    lifecycle: Addr<OrderLifecycle>,
    going_offline: bool,
) -> Result<PresenceState, DispatchError> {
    if going_offline {
        let current = lifecycle.send(GetCurrentOrder).await?;
        if let Some(order) = current.filter(|o| o.status.is_active()) {
            return Err(DispatchError::active_order(&order.order_id));
        }
    }
    presence.send(TogglePresence).await?
}

impl Actor for DispatchCoordinator {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let me = ctx.address();
        let c = &self.components;
        c.presence.do_send(SubscribePresence(me.clone().recipient()));
        c.reporter.do_send(SubscribeLocation(me.clone().recipient()));
        c.catalog.do_send(SubscribeCatalog(me.clone().recipient()));
        c.lifecycle.do_send(SubscribeOrder(me.clone().recipient()));
        c.stats.do_send(SubscribeStats(me.clone().recipient()));

        let listener = me.recipient::<AuthRejected>();
        c.presence.do_send(SetAuthListener(listener.clone()));
        c.reporter.do_send(SetAuthListener(listener.clone()));
        c.catalog.do_send(SetAuthListener(listener.clone()));
        c.lifecycle.do_send(SetAuthListener(listener.clone()));
        c.stats.do_send(SetAuthListener(listener));
        self.logger.info("Coordinator started");
    }
}

/////////////////////////////////////////////////////////////////////
// Observation
/////////////////////////////////////////////////////////////////////

impl Handler<PresenceChanged> for DispatchCoordinator {
    type Result = ();

    fn handle(&mut self, msg: PresenceChanged, _ctx: &mut Self::Context) -> Self::Result {
        self.snapshot.presence = msg.state;
        self.snapshot.online_stats = msg.stats;
        self.publish();
    }
}

impl Handler<LocationUpdated> for DispatchCoordinator {
    type Result = ();

    fn handle(&mut self, msg: LocationUpdated, _ctx: &mut Self::Context) -> Self::Result {
        self.snapshot.last_location = Some(msg.sample);
        self.publish();
    }
}

impl Handler<CatalogUpdated> for DispatchCoordinator {
    type Result = ();

    fn handle(&mut self, msg: CatalogUpdated, _ctx: &mut Self::Context) -> Self::Result {
        self.snapshot.nearby_orders = msg.orders;
        self.publish();
    }
}

impl Handler<CurrentOrderChanged> for DispatchCoordinator {
    type Result = ();

    fn handle(&mut self, msg: CurrentOrderChanged, ctx: &mut Self::Context) -> Self::Result {
        self.snapshot.current_order = msg.current;
        self.snapshot.last_finished = msg.last_finished;
        self.update_order_sync(ctx);
        self.publish();
    }
}

impl Handler<StatsUpdated> for DispatchCoordinator {
    type Result = ();

    fn handle(&mut self, msg: StatsUpdated, _ctx: &mut Self::Context) -> Self::Result {
        self.snapshot.daily_stats = Some(msg.stats);
        self.publish();
    }
}

impl Handler<AuthRejected> for DispatchCoordinator {
    type Result = ();

    fn handle(&mut self, msg: AuthRejected, ctx: &mut Self::Context) -> Self::Result {
        self.pause_for_auth(ctx, msg.component, &msg.error);
    }
}

/////////////////////////////////////////////////////////////////////
// UI surface
/////////////////////////////////////////////////////////////////////

impl Handler<SubscribeDispatch> for DispatchCoordinator {
    type Result = ();

    fn handle(&mut self, msg: SubscribeDispatch, _ctx: &mut Self::Context) -> Self::Result {
        msg.0.do_send(DispatchUpdate(self.snapshot.clone()));
        self.ui_subscribers.push(msg.0);
    }
}

impl Handler<GetDispatchSnapshot> for DispatchCoordinator {
    type Result = MessageResult<GetDispatchSnapshot>;

    fn handle(&mut self, _msg: GetDispatchSnapshot, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.snapshot.clone())
    }
}

impl Handler<RequestTogglePresence> for DispatchCoordinator {
    type Result = ResponseActFuture<Self, Result<PresenceState, DispatchError>>;

    fn handle(&mut self, _msg: RequestTogglePresence, _ctx: &mut Self::Context) -> Self::Result {
        if self.toggle_in_flight {
            return Box::pin(actix::fut::ready(Err(DispatchError::busy(
                "presence is already changing",
            ))));
        }
        let going_offline = self.snapshot.presence == PresenceState::Online;
        if going_offline && self.accepts_in_flight > 0 {
            return Box::pin(actix::fut::ready(Err(DispatchError::busy(
                "an order is being accepted",
            ))));
        }

        self.toggle_in_flight = true;
        let presence = self.components.presence.clone();
        let lifecycle = self.components.lifecycle.clone();
        Box::pin(
            toggle_checked(presence, lifecycle, going_offline)
                .into_actor(self)
                .map(|res, act, _ctx| {
                    act.toggle_in_flight = false;
                    if let Err(err) = &res {
                        act.logger.warn(format!("Presence toggle refused: {}", err));
                    }
                    res
                }),
        )
    }
}

impl Handler<RequestAccept> for DispatchCoordinator {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: RequestAccept, _ctx: &mut Self::Context) -> Self::Result {
        if self.toggle_in_flight || self.snapshot.presence != PresenceState::Online {
            return Box::pin(actix::fut::ready(Err(DispatchError::invalid_state(format!(
                "cannot accept orders while {}",
                self.snapshot.presence
            )))));
        }
        self.accepts_in_flight += 1;
        let accept = self.forward(AcceptOrder {
            order_id: msg.order_id,
        });
        Box::pin(accept.map(|res, act, _ctx| {
            act.accepts_in_flight = act.accepts_in_flight.saturating_sub(1);
            res
        }))
    }
}

impl Handler<RequestReject> for DispatchCoordinator {
    type Result = ResponseActFuture<Self, Result<(), DispatchError>>;

    fn handle(&mut self, msg: RequestReject, _ctx: &mut Self::Context) -> Self::Result {
        self.forward(RejectOrder {
            order_id: msg.order_id,
            reason: msg.reason,
        })
    }
}

impl Handler<RequestAdvance> for DispatchCoordinator {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: RequestAdvance, _ctx: &mut Self::Context) -> Self::Result {
        self.forward(AdvanceOrder {
            order_id: msg.order_id,
        })
    }
}

impl Handler<RequestComplete> for DispatchCoordinator {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: RequestComplete, _ctx: &mut Self::Context) -> Self::Result {
        self.forward(CompleteDelivery {
            order_id: msg.order_id,
            proof: DeliveryProof::new(msg.photo_url, msg.signature_url),
        })
    }
}

impl Handler<RequestCancel> for DispatchCoordinator {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: RequestCancel, _ctx: &mut Self::Context) -> Self::Result {
        self.forward(CancelOrder {
            order_id: msg.order_id,
            reason: msg.reason,
        })
    }
}

impl Handler<AcknowledgeFinishedOrder> for DispatchCoordinator {
    type Result = ResponseActFuture<Self, Option<OrderDTO>>;

    fn handle(&mut self, _msg: AcknowledgeFinishedOrder, _ctx: &mut Self::Context) -> Self::Result {
        let lifecycle = self.components.lifecycle.clone();
        Box::pin(
            async move { lifecycle.send(AcknowledgeFinished).await.ok().flatten() }
                .into_actor(self),
        )
    }
}
