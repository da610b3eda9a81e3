use crate::delivery_actors::order_catalog::OrderCatalog;
use crate::delivery_actors::with_deadline;
use crate::messages::internal_messages::{
    AcceptOrder, AcknowledgeFinished, AdvanceOrder, AuthRejected, CancelOrder, ClaimOrder,
    CompleteDelivery, CompletePickup, CurrentOrderChanged, DismissOrder, GetCurrentOrder,
    GetLifecycleView, LifecycleView, ReconcileCurrentOrder, RejectOrder, ReleaseClaim,
    ServerStatusObserved, SetAuthListener, StartPickup, SubscribeOrder,
};
use actix::prelude::*;
use colored::Color;
use common::backend::{AuthProvider, Credential, OrderBackend};
use common::config::DispatchConfig;
use common::errors::{DispatchError, ErrorKind};
use common::logger::Logger;
use common::types::dtos::{DeliveryProof, OrderDTO};
use common::types::order_status::{OrderEvent, OrderStatus};
use common::utils::require_reason;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

type OrderResponse = ResponseActFuture<OrderLifecycle, Result<OrderDTO, DispatchError>>;

/// A transition of the current order together with what the backend needs
/// to perform it.
#[derive(Debug, Clone)]
enum Transition {
    StartPickup,
    /// Completes the pickup and starts the delivery leg in one step.
    CompletePickup,
    Complete(DeliveryProof),
    Cancel(String),
}

impl Transition {
    fn event(&self) -> OrderEvent {
        match self {
            Transition::StartPickup => OrderEvent::StartPickup,
            Transition::CompletePickup => OrderEvent::CompletePickup,
            Transition::Complete(_) => OrderEvent::Complete,
            Transition::Cancel(_) => OrderEvent::Cancel,
        }
    }

    /// Billable and auditable events wait for the server before the local
    /// status changes.
    fn is_optimistic(&self) -> bool {
        matches!(self, Transition::StartPickup | Transition::CompletePickup)
    }

    async fn perform(
        self,
        backend: Arc<dyn OrderBackend>,
        credential: Credential,
        order_id: String,
        deadline: Duration,
    ) -> Result<OrderDTO, DispatchError> {
        let result = match self {
            Transition::StartPickup => {
                with_deadline(
                    deadline,
                    "start pickup",
                    backend.start_pickup(&credential, &order_id),
                )
                .await
            }
            Transition::CompletePickup => {
                match with_deadline(
                    deadline,
                    "complete pickup",
                    backend.complete_pickup(&credential, &order_id),
                )
                .await
                {
                    Ok(_) => {
                        with_deadline(
                            deadline,
                            "start delivery",
                            backend.start_delivery(&credential, &order_id),
                        )
                        .await
                    }
                    Err(err) => Err(err),
                }
            }
            Transition::Complete(proof) => {
                with_deadline(
                    deadline,
                    "complete delivery",
                    backend.complete(&credential, &order_id, &proof),
                )
                .await
            }
            Transition::Cancel(reason) => {
                with_deadline(
                    deadline,
                    "cancel order",
                    backend.cancel(&credential, &order_id, &reason),
                )
                .await
            }
        };
        result.map_err(DispatchError::in_mutation)
    }
}

/// The `OrderLifecycle` actor owns the current-order slot.
///
/// ## Responsibilities
/// - Accepts orders into the slot (one at a time) and claims them from the
///   `OrderCatalog`.
/// - Drives the current order through pickup, delivery and completion or
///   cancellation, one transition in flight at a time.
/// - Applies pickup steps optimistically and rolls them back on failure;
///   accept, complete and cancel change nothing until the server confirms.
/// - Reconciles the local status with the server, the server winning.
/// - Clears the slot on a terminal status and releases the catalog.
pub struct OrderLifecycle {
    pub backend: Arc<dyn OrderBackend>,
    pub auth: Arc<dyn AuthProvider>,
    pub catalog: Addr<OrderCatalog>,
    pub current: Option<OrderDTO>,
    pub last_finished: Option<OrderDTO>,
    pub in_flight: Option<(String, OrderEvent)>,
    pub pending_rejects: HashSet<String>,
    /// Bumped on every change of the slot or of the current status.
    pub revision: u64,
    pub timeout: Duration,
    pub subscribers: Vec<Recipient<CurrentOrderChanged>>,
    pub auth_listener: Option<Recipient<AuthRejected>>,
    pub logger: Logger,
}

impl OrderLifecycle {
    pub fn new(
        catalog: Addr<OrderCatalog>,
        backend: Arc<dyn OrderBackend>,
        auth: Arc<dyn AuthProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            backend,
            auth,
            catalog,
            current: None,
            last_finished: None,
            in_flight: None,
            pending_rejects: HashSet::new(),
            revision: 0,
            timeout: config.transition_timeout(),
            subscribers: Vec::new(),
            auth_listener: None,
            logger: Logger::new("Lifecycle", Color::Magenta).with_verbose(config.verbose_logging),
        }
    }

    fn changed(&mut self) {
        self.revision += 1;
        let update = CurrentOrderChanged {
            current: self.current.clone(),
            last_finished: self.last_finished.clone(),
            revision: self.revision,
        };
        for subscriber in &self.subscribers {
            subscriber.do_send(update.clone());
        }
    }

    fn credential(&self) -> Result<Credential, DispatchError> {
        self.auth.current_credential().ok_or_else(|| {
            let err = DispatchError::unauthenticated();
            self.report_auth_failure(&err);
            err
        })
    }

    fn report_auth_failure(&self, err: &DispatchError) {
        if !err.is_auth() {
            return;
        }
        if let Some(listener) = &self.auth_listener {
            listener.do_send(AuthRejected {
                component: "lifecycle",
                error: err.clone(),
            });
        }
    }

    fn ensure_idle(&self) -> Result<(), DispatchError> {
        match &self.in_flight {
            Some((order_id, event)) => Err(DispatchError::busy(format!(
                "{} of order {} is still in flight",
                event, order_id
            ))),
            None => Ok(()),
        }
    }

    /// Checks that `event` is legal for the current order and returns the
    /// status it leads to.
    fn check_transition(
        &self,
        order_id: &str,
        event: OrderEvent,
    ) -> Result<OrderStatus, DispatchError> {
        self.ensure_idle()?;
        let current = self
            .current
            .as_ref()
            .filter(|o| o.order_id == order_id)
            .ok_or_else(|| {
                DispatchError::invalid_state(format!("order {} is not the current order", order_id))
            })?;
        current.status.next(event).ok_or_else(|| {
            DispatchError::invalid_state(format!(
                "cannot {} order {} while it is {}",
                event, order_id, current.status
            ))
        })
    }

    fn set_status(&mut self, status: OrderStatus) {
        if let Some(current) = self.current.as_mut() {
            self.logger.info(format!(
                "Order {}: {} -> {}",
                current.order_id, current.status, status
            ));
            current.status = status;
            self.changed();
        }
    }

    /// Moves a terminal order out of the slot and releases the catalog.
    fn finish(&mut self, order: OrderDTO) {
        self.logger.info(format!(
            "Order {} finished as {}",
            order.order_id, order.status
        ));
        let order_id = order.order_id.clone();
        self.current = None;
        self.last_finished = Some(order);
        self.changed();
        self.catalog.do_send(ReleaseClaim { order_id });
    }

    /// Stores the server's view of the current order.
    fn commit(&mut self, order: OrderDTO) -> OrderDTO {
        if order.status.is_terminal() {
            self.finish(order.clone());
            return order;
        }
        let status_changed = self.current.as_ref().is_none_or(|c| c.status != order.status);
        if status_changed {
            if let Some(current) = &self.current {
                self.logger.info(format!(
                    "Order {}: {} -> {}",
                    order.order_id, current.status, order.status
                ));
            }
        }
        self.current = Some(order.clone());
        if status_changed {
            self.changed();
        }
        order
    }

    /// Adopts a status reported by the server for the current order.
    fn adopt_server_status(&mut self, order: OrderDTO) {
        let Some(current) = &self.current else {
            return;
        };
        if current.order_id != order.order_id {
            return;
        }
        if current.status != order.status {
            self.logger.warn(format!(
                "Order {} reconciled: local {} -> server {}",
                order.order_id, current.status, order.status
            ));
        }
        if order.status.is_open() {
            self.logger
                .warn(format!("Order {} is no longer claimed by this agent", order.order_id));
            self.finish(order);
            return;
        }
        self.commit(order);
    }

    fn transition(&mut self, order_id: String, transition: Transition) -> OrderResponse {
        let event = transition.event();
        let target = match self.check_transition(&order_id, event) {
            Ok(target) => target,
            Err(err) => return Box::pin(actix::fut::ready(Err(err))),
        };
        let credential = match self.credential() {
            Ok(credential) => credential,
            Err(err) => return Box::pin(actix::fut::ready(Err(err))),
        };

        let optimistic = transition.is_optimistic();
        let prior = self.current.as_ref().map(|o| o.status);
        if optimistic {
            self.set_status(target);
        }
        self.in_flight = Some((order_id.clone(), event));

        let call = transition.perform(
            self.backend.clone(),
            credential,
            order_id.clone(),
            self.timeout,
        );
        Box::pin(call.into_actor(self).map(move |res, act, _ctx| {
            act.in_flight = None;
            match res {
                Ok(order) => Ok(act.commit(order)),
                Err(err) => {
                    act.logger
                        .warn(format!("{} of order {} failed: {}", event, order_id, err));
                    if optimistic {
                        if let Some(prior) = prior {
                            act.set_status(prior);
                        }
                    }
                    act.report_auth_failure(&err);
                    Err(err)
                }
            }
        }))
    }
}

impl Actor for OrderLifecycle {
    type Context = Context<Self>;
}

impl Handler<AcceptOrder> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: AcceptOrder, _ctx: &mut Self::Context) -> Self::Result {
        let order_id = msg.order_id;
        if let Err(err) = self.ensure_idle() {
            return Box::pin(actix::fut::ready(Err(err)));
        }
        if self.pending_rejects.contains(&order_id) {
            return Box::pin(actix::fut::ready(Err(DispatchError::busy(format!(
                "rejection of order {} is still in flight",
                order_id
            )))));
        }
        if let Some(current) = &self.current {
            return Box::pin(actix::fut::ready(Err(DispatchError::conflict(format!(
                "order {} is already in progress",
                current.order_id
            )))));
        }
        let credential = match self.credential() {
            Ok(credential) => credential,
            Err(err) => return Box::pin(actix::fut::ready(Err(err))),
        };

        self.in_flight = Some((order_id.clone(), OrderEvent::Accept));
        let backend = self.backend.clone();
        let deadline = self.timeout;
        let id = order_id.clone();
        Box::pin(
            async move {
                with_deadline(deadline, "accept order", backend.accept(&credential, &id))
                    .await
                    .map_err(DispatchError::in_mutation)
            }
            .into_actor(self)
            .map(move |res, act, _ctx| {
                act.in_flight = None;
                match res {
                    Ok(order) => {
                        act.logger.info(format!("Order {} accepted", order.order_id));
                        act.current = Some(order.clone());
                        act.changed();
                        act.catalog.do_send(ClaimOrder { order_id });
                        Ok(order)
                    }
                    Err(err) => {
                        act.logger
                            .warn(format!("Accepting order {} failed: {}", order_id, err));
                        if err.kind == ErrorKind::AlreadyClaimed {
                            act.catalog.do_send(DismissOrder { order_id });
                        }
                        act.report_auth_failure(&err);
                        Err(err)
                    }
                }
            }),
        )
    }
}

impl Handler<RejectOrder> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<(), DispatchError>>;

    fn handle(&mut self, msg: RejectOrder, _ctx: &mut Self::Context) -> Self::Result {
        let order_id = msg.order_id;
        let reason = match require_reason(&msg.reason) {
            Ok(reason) => reason,
            Err(err) => return Box::pin(actix::fut::ready(Err(err))),
        };
        if self.current.as_ref().is_some_and(|o| o.order_id == order_id) {
            return Box::pin(actix::fut::ready(Err(DispatchError::invalid_state(format!(
                "order {} is the current order, cancel it instead",
                order_id
            )))));
        }
        let busy = self.pending_rejects.contains(&order_id)
            || self.in_flight.as_ref().is_some_and(|(id, _)| *id == order_id);
        if busy {
            return Box::pin(actix::fut::ready(Err(DispatchError::busy(format!(
                "order {} has a request in flight",
                order_id
            )))));
        }
        let credential = match self.credential() {
            Ok(credential) => credential,
            Err(err) => return Box::pin(actix::fut::ready(Err(err))),
        };

        self.pending_rejects.insert(order_id.clone());
        let backend = self.backend.clone();
        let deadline = self.timeout;
        let id = order_id.clone();
        Box::pin(
            async move {
                with_deadline(deadline, "reject order", backend.reject(&credential, &id, &reason))
                    .await
                    .map_err(DispatchError::in_mutation)
            }
            .into_actor(self)
            .map(move |res, act, _ctx| {
                act.pending_rejects.remove(&order_id);
                match res {
                    Ok(()) => {
                        act.logger.info(format!("Order {} rejected", order_id));
                        act.catalog.do_send(DismissOrder { order_id });
                        Ok(())
                    }
                    Err(err) => {
                        act.logger
                            .warn(format!("Rejecting order {} failed: {}", order_id, err));
                        act.report_auth_failure(&err);
                        Err(err)
                    }
                }
            }),
        )
    }
}

impl Handler<StartPickup> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: StartPickup, _ctx: &mut Self::Context) -> Self::Result {
        self.transition(msg.order_id, Transition::StartPickup)
    }
}

impl Handler<CompletePickup> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: CompletePickup, _ctx: &mut Self::Context) -> Self::Result {
        self.transition(msg.order_id, Transition::CompletePickup)
    }
}

impl Handler<CompleteDelivery> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: CompleteDelivery, _ctx: &mut Self::Context) -> Self::Result {
        if let Err(err) = msg.proof.validate() {
            return Box::pin(actix::fut::ready(Err(err)));
        }
        self.transition(msg.order_id, Transition::Complete(msg.proof))
    }
}

impl Handler<CancelOrder> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: CancelOrder, _ctx: &mut Self::Context) -> Self::Result {
        match require_reason(&msg.reason) {
            Ok(reason) => self.transition(msg.order_id, Transition::Cancel(reason)),
            Err(err) => Box::pin(actix::fut::ready(Err(err))),
        }
    }
}

impl Handler<AdvanceOrder> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<OrderDTO, DispatchError>>;

    fn handle(&mut self, msg: AdvanceOrder, _ctx: &mut Self::Context) -> Self::Result {
        let status = self
            .current
            .as_ref()
            .filter(|o| o.order_id == msg.order_id)
            .map(|o| o.status);
        let transition = match status {
            Some(OrderStatus::Accepted) => Transition::StartPickup,
            Some(OrderStatus::PickingUp) => Transition::CompletePickup,
            Some(OrderStatus::Delivering) => Transition::Complete(DeliveryProof::default()),
            Some(status) => {
                return Box::pin(actix::fut::ready(Err(DispatchError::invalid_state(format!(
                    "order {} cannot advance from {}",
                    msg.order_id, status
                )))));
            }
            None => {
                return Box::pin(actix::fut::ready(Err(DispatchError::invalid_state(format!(
                    "order {} is not the current order",
                    msg.order_id
                )))));
            }
        };
        self.transition(msg.order_id, transition)
    }
}

impl Handler<ReconcileCurrentOrder> for OrderLifecycle {
    type Result = ResponseActFuture<Self, Result<Option<OrderDTO>, DispatchError>>;

    fn handle(&mut self, _msg: ReconcileCurrentOrder, _ctx: &mut Self::Context) -> Self::Result {
        let Some(order_id) = self.current.as_ref().map(|o| o.order_id.clone()) else {
            return Box::pin(actix::fut::ready(Ok(None)));
        };
        let credential = match self.credential() {
            Ok(credential) => credential,
            Err(err) => return Box::pin(actix::fut::ready(Err(err))),
        };

        let started_at = self.revision;
        let backend = self.backend.clone();
        let deadline = self.timeout;
        Box::pin(
            async move {
                with_deadline(deadline, "fetch order", backend.fetch(&credential, &order_id)).await
            }
            .into_actor(self)
            .map(move |res, act, _ctx| match res {
                Ok(order) => {
                    if act.revision != started_at || act.in_flight.is_some() {
                        act.logger.debug(format!(
                            "Ignoring fetched status of order {}: changed locally meanwhile",
                            order.order_id
                        ));
                    } else {
                        act.adopt_server_status(order);
                    }
                    Ok(act.current.clone())
                }
                Err(err) => {
                    act.logger.warn(format!("Order sync failed: {}", err));
                    act.report_auth_failure(&err);
                    Err(err)
                }
            }),
        )
    }
}

/// Listings lag behind, so only a status ahead of the local one is adopted.
impl Handler<ServerStatusObserved> for OrderLifecycle {
    type Result = ();

    fn handle(&mut self, msg: ServerStatusObserved, _ctx: &mut Self::Context) -> Self::Result {
        if self.in_flight.is_some() {
            return;
        }
        let Some(current) = self.current.as_ref().filter(|o| o.order_id == msg.order_id) else {
            return;
        };
        if msg.status.progress() <= current.status.progress() {
            return;
        }
        let mut order = current.clone();
        order.status = msg.status;
        self.adopt_server_status(order);
    }
}

impl Handler<GetCurrentOrder> for OrderLifecycle {
    type Result = Option<OrderDTO>;

    fn handle(&mut self, _msg: GetCurrentOrder, _ctx: &mut Self::Context) -> Self::Result {
        self.current.clone()
    }
}

impl Handler<AcknowledgeFinished> for OrderLifecycle {
    type Result = Option<OrderDTO>;

    fn handle(&mut self, _msg: AcknowledgeFinished, _ctx: &mut Self::Context) -> Self::Result {
        let finished = self.last_finished.take();
        if finished.is_some() {
            self.changed();
        }
        finished
    }
}

impl Handler<GetLifecycleView> for OrderLifecycle {
    type Result = MessageResult<GetLifecycleView>;

    fn handle(&mut self, _msg: GetLifecycleView, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(LifecycleView {
            current: self.current.clone(),
            last_finished: self.last_finished.clone(),
            in_flight: self.in_flight.clone(),
            revision: self.revision,
        })
    }
}

impl Handler<SubscribeOrder> for OrderLifecycle {
    type Result = ();

    fn handle(&mut self, msg: SubscribeOrder, _ctx: &mut Self::Context) -> Self::Result {
        msg.0.do_send(CurrentOrderChanged {
            current: self.current.clone(),
            last_finished: self.last_finished.clone(),
            revision: self.revision,
        });
        self.subscribers.push(msg.0);
    }
}

impl Handler<SetAuthListener> for OrderLifecycle {
    type Result = ();

    fn handle(&mut self, msg: SetAuthListener, _ctx: &mut Self::Context) -> Self::Result {
        self.auth_listener = Some(msg.0);
    }
}
