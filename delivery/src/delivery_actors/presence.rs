use crate::delivery_actors::location_reporter::LocationReporter;
use crate::delivery_actors::with_deadline;
use crate::messages::internal_messages::{
    AuthRejected, GetOnlineStats, GetPresence, PresenceChanged, SetAuthListener, StartReporting,
    StopReporting, SubscribePresence, TogglePresence,
};
use actix::prelude::*;
use chrono::Utc;
use colored::Color;
use common::backend::{AuthProvider, TrackingBackend};
use common::config::DispatchConfig;
use common::errors::DispatchError;
use common::logger::Logger;
use common::types::dtos::OnlineStats;
use common::types::presence_state::PresenceState;
use std::sync::Arc;
use std::time::Duration;

type ToggleResponse = ResponseActFuture<PresenceController, Result<PresenceState, DispatchError>>;

/// The `PresenceController` actor owns the online flag.
///
/// ## Responsibilities
/// - Runs the online/offline transitions against the backend.
/// - Starts and stops the `LocationReporter` together with the transition.
/// - Notifies subscribers (catalog, stats, coordinator) on every change.
/// - Accumulates online time.
///
/// A toggle always settles (or rolls back) before its response is sent, so
/// callers never observe a transitioning state as the outcome of a toggle.
pub struct PresenceController {
    pub state: PresenceState,
    pub reporter: Addr<LocationReporter>,
    pub tracking: Arc<dyn TrackingBackend>,
    pub auth: Arc<dyn AuthProvider>,
    pub subscribers: Vec<Recipient<PresenceChanged>>,
    pub auth_listener: Option<Recipient<AuthRejected>>,
    pub stats: OnlineStats,
    pub timeout: Duration,
    pub logger: Logger,
}

impl PresenceController {
    pub fn new(
        reporter: Addr<LocationReporter>,
        tracking: Arc<dyn TrackingBackend>,
        auth: Arc<dyn AuthProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            state: PresenceState::Offline,
            reporter,
            tracking,
            auth,
            subscribers: Vec::new(),
            auth_listener: None,
            stats: OnlineStats::default(),
            timeout: config.transition_timeout(),
            logger: Logger::new("Presence", Color::Green).with_verbose(config.verbose_logging),
        }
    }

    fn set_state(&mut self, state: PresenceState) {
        if self.state == state {
            return;
        }
        self.logger
            .info(format!("Presence {} -> {}", self.state, state));
        self.state = state;
        let changed = PresenceChanged {
            state,
            stats: self.stats,
        };
        for subscriber in &self.subscribers {
            subscriber.do_send(changed.clone());
        }
    }

    fn close_online_session(&mut self) {
        if let Some(since) = self.stats.online_since.take() {
            self.stats.accumulated_secs += (Utc::now() - since).num_seconds().max(0);
        }
    }

    fn report_auth_failure(&self, err: &DispatchError) {
        if !err.is_auth() {
            return;
        }
        if let Some(listener) = &self.auth_listener {
            listener.do_send(AuthRejected {
                component: "presence",
                error: err.clone(),
            });
        }
    }

    fn go_online(&mut self) -> ToggleResponse {
        let Some(credential) = self.auth.current_credential() else {
            self.logger.warn("Cannot go online without a credential");
            return Box::pin(actix::fut::ready(Err(DispatchError::unauthenticated())));
        };
        self.set_state(PresenceState::TransitioningOnline);
        self.reporter.do_send(StartReporting);

        let tracking = self.tracking.clone();
        let deadline = self.timeout;
        Box::pin(
            async move {
                with_deadline(deadline, "go online", tracking.go_online(&credential)).await
            }
            .into_actor(self)
            .map(|res, act, _ctx| match res {
                Ok(()) => {
                    act.stats.online_since = Some(Utc::now());
                    act.set_state(PresenceState::Online);
                    Ok(PresenceState::Online)
                }
                Err(err) => {
                    act.logger
                        .warn(format!("Going online failed, rolling back: {}", err));
                    act.reporter.do_send(StopReporting);
                    act.set_state(PresenceState::Offline);
                    act.report_auth_failure(&err);
                    Err(err)
                }
            }),
        )
    }

    /// Offline is always reachable locally, whatever the backend answers.
    fn go_offline(&mut self) -> ToggleResponse {
        self.set_state(PresenceState::TransitioningOffline);
        self.reporter.do_send(StopReporting);

        let credential = self.auth.current_credential();
        let tracking = self.tracking.clone();
        let deadline = self.timeout;
        Box::pin(
            async move {
                match credential {
                    Some(credential) => {
                        with_deadline(deadline, "go offline", tracking.go_offline(&credential))
                            .await
                    }
                    None => Err(DispatchError::unauthenticated()),
                }
            }
            .into_actor(self)
            .map(|res, act, _ctx| {
                if let Err(err) = &res {
                    act.logger.warn(format!(
                        "Backend did not acknowledge going offline ({}), settling offline anyway",
                        err
                    ));
                    act.report_auth_failure(err);
                }
                act.close_online_session();
                act.set_state(PresenceState::Offline);
                Ok(PresenceState::Offline)
            }),
        )
    }
}

impl Actor for PresenceController {
    type Context = Context<Self>;
}

impl Handler<TogglePresence> for PresenceController {
    type Result = ResponseActFuture<Self, Result<PresenceState, DispatchError>>;

    fn handle(&mut self, _msg: TogglePresence, _ctx: &mut Self::Context) -> Self::Result {
        match self.state {
            PresenceState::Offline => self.go_online(),
            PresenceState::Online => self.go_offline(),
            transitioning => Box::pin(actix::fut::ready(Err(DispatchError::busy(format!(
                "presence is {}",
                transitioning
            ))))),
        }
    }
}

impl Handler<GetPresence> for PresenceController {
    type Result = MessageResult<GetPresence>;

    fn handle(&mut self, _msg: GetPresence, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.state)
    }
}

impl Handler<GetOnlineStats> for PresenceController {
    type Result = MessageResult<GetOnlineStats>;

    fn handle(&mut self, _msg: GetOnlineStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.stats)
    }
}

/// New subscribers immediately receive the current state.
impl Handler<SubscribePresence> for PresenceController {
    type Result = ();

    fn handle(&mut self, msg: SubscribePresence, _ctx: &mut Self::Context) -> Self::Result {
        msg.0.do_send(PresenceChanged {
            state: self.state,
            stats: self.stats,
        });
        self.subscribers.push(msg.0);
    }
}

impl Handler<SetAuthListener> for PresenceController {
    type Result = ();

    fn handle(&mut self, msg: SetAuthListener, _ctx: &mut Self::Context) -> Self::Result {
        self.auth_listener = Some(msg.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::internal_messages::GetReporterStatus;
    use crate::simulation::{BackendOp, InMemoryBackend, ManualLocationSource, Recorder, StaticAuth};
    use common::errors::ErrorKind;

    struct Harness {
        presence: Addr<PresenceController>,
        reporter: Addr<LocationReporter>,
        backend: Arc<InMemoryBackend>,
        auth: Arc<StaticAuth>,
    }

    fn harness() -> Harness {
        let config = DispatchConfig::default();
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        let auth = Arc::new(StaticAuth::signed_in("token"));
        let source = Arc::new(ManualLocationSource::new());
        let reporter =
            LocationReporter::new(source, backend.clone(), auth.clone(), &config).start();
        let presence =
            PresenceController::new(reporter.clone(), backend.clone(), auth.clone(), &config)
                .start();
        Harness {
            presence,
            reporter,
            backend,
            auth,
        }
    }

    async fn reporting(h: &Harness) -> bool {
        h.reporter.send(GetReporterStatus).await.unwrap().active
    }

    #[actix_rt::test]
    async fn toggling_drives_location_reporting() {
        let h = harness();
        assert_eq!(
            h.presence.send(TogglePresence).await.unwrap(),
            Ok(PresenceState::Online)
        );
        assert!(h.backend.is_online());
        assert!(reporting(&h).await);

        assert_eq!(
            h.presence.send(TogglePresence).await.unwrap(),
            Ok(PresenceState::Offline)
        );
        assert!(!h.backend.is_online());
        assert!(!reporting(&h).await);
    }

    #[actix_rt::test]
    async fn failed_online_rolls_back() {
        let h = harness();
        h.backend
            .fail_next(BackendOp::GoOnline, DispatchError::network("no signal"));

        let err = h
            .presence
            .send(TogglePresence)
            .await
            .unwrap()
            .expect_err("backend failure");
        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(
            h.presence.send(GetPresence).await.unwrap(),
            PresenceState::Offline
        );
        assert!(!reporting(&h).await);
    }

    #[actix_rt::test]
    async fn toggle_during_transition_is_busy() {
        let h = harness();
        let release = h.backend.hold_next(BackendOp::GoOnline);

        let first = h.presence.send(TogglePresence);
        let second = h.presence.send(TogglePresence).await.unwrap();
        assert_eq!(second.expect_err("mid transition").kind, ErrorKind::Busy);
        assert_eq!(
            h.presence.send(GetPresence).await.unwrap(),
            PresenceState::TransitioningOnline
        );
        assert!(reporting(&h).await);

        release.send(()).unwrap();
        assert_eq!(first.await.unwrap(), Ok(PresenceState::Online));
    }

    #[actix_rt::test]
    async fn offline_settles_even_when_backend_fails() {
        let h = harness();
        h.presence.send(TogglePresence).await.unwrap().unwrap();
        h.backend
            .fail_next(BackendOp::GoOffline, DispatchError::timeout("slow network"));

        assert_eq!(
            h.presence.send(TogglePresence).await.unwrap(),
            Ok(PresenceState::Offline)
        );
        assert!(!reporting(&h).await);
    }

    #[actix_rt::test]
    async fn going_online_requires_a_credential() {
        let h = harness();
        h.auth.set(None);

        let err = h
            .presence
            .send(TogglePresence)
            .await
            .unwrap()
            .expect_err("signed out");
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert_eq!(h.backend.call_count(BackendOp::GoOnline), 0);
        assert!(!reporting(&h).await);
    }

    #[actix_rt::test]
    async fn subscribers_see_every_transition() {
        let h = harness();
        let (recorder, log) = Recorder::<PresenceChanged>::new();
        h.presence
            .send(SubscribePresence(recorder.start().recipient()))
            .await
            .unwrap();

        h.presence.send(TogglePresence).await.unwrap().unwrap();
        h.presence.send(TogglePresence).await.unwrap().unwrap();
        actix_rt::time::sleep(Duration::from_millis(20)).await;

        let states: Vec<PresenceState> = log.snapshot().iter().map(|c| c.state).collect();
        assert_eq!(
            states,
            vec![
                PresenceState::Offline,
                PresenceState::TransitioningOnline,
                PresenceState::Online,
                PresenceState::TransitioningOffline,
                PresenceState::Offline,
            ]
        );
        let stats = h.presence.send(GetOnlineStats).await.unwrap();
        assert!(stats.online_since.is_none());
        assert!(stats.accumulated_secs >= 0);
    }
}
