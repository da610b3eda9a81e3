use crate::delivery_actors::with_deadline;
use crate::messages::internal_messages::{
    AuthRejected, GetStatistics, PauseForAuth, PollStatistics, PresenceChanged,
    ResumeAfterAuth, SetAuthListener, StatsUpdated, SubscribeStats,
};
use actix::prelude::*;
use actix_async_handler::async_handler;
use chrono::Utc;
use colored::Color;
use common::backend::{AuthProvider, Credential, StatsBackend};
use common::config::DispatchConfig;
use common::errors::DispatchError;
use common::logger::Logger;
use common::types::dtos::{DailyStatistics, StatsRange};
use common::types::presence_state::PresenceState;
use std::sync::Arc;
use std::time::Duration;

/// Polls today's statistics while the agent is online. Read-only: a failed
/// poll is logged and simply retried on the next tick.
pub struct StatsPoller {
    pub backend: Arc<dyn StatsBackend>,
    pub auth: Arc<dyn AuthProvider>,
    pub online: bool,
    pub paused: bool,
    pub poll_handle: Option<SpawnHandle>,
    pub interval: Duration,
    pub timeout: Duration,
    pub latest: Option<StatsUpdated>,
    pub subscribers: Vec<Recipient<StatsUpdated>>,
    pub auth_listener: Option<Recipient<AuthRejected>>,
    pub logger: Logger,
}

impl StatsPoller {
    pub fn new(
        backend: Arc<dyn StatsBackend>,
        auth: Arc<dyn AuthProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            backend,
            auth,
            online: false,
            paused: false,
            poll_handle: None,
            interval: config.stats_poll_interval(),
            timeout: config.transition_timeout(),
            latest: None,
            subscribers: Vec::new(),
            auth_listener: None,
            logger: Logger::new("Stats", Color::Yellow).with_verbose(config.verbose_logging),
        }
    }

    fn request(&self) -> Option<(Arc<dyn StatsBackend>, Credential)> {
        if !self.online || self.paused {
            return None;
        }
        match self.auth.current_credential() {
            Some(credential) => Some((self.backend.clone(), credential)),
            None => {
                self.logger.debug("Skipping statistics poll: not authenticated");
                None
            }
        }
    }

    fn apply(&mut self, fetched: Option<Result<DailyStatistics, DispatchError>>) {
        match fetched {
            Some(Ok(stats)) => {
                self.logger.debug(format!(
                    "Today: {} deliveries, {} earned",
                    stats.completed_count, stats.earnings
                ));
                let update = StatsUpdated {
                    stats,
                    fetched_at: Utc::now(),
                };
                for subscriber in &self.subscribers {
                    subscriber.do_send(update.clone());
                }
                self.latest = Some(update);
            }
            Some(Err(err)) => {
                self.logger
                    .warn(format!("Statistics poll failed: {}", err));
                if err.is_auth() {
                    if let Some(listener) = &self.auth_listener {
                        listener.do_send(AuthRejected {
                            component: "stats",
                            error: err,
                        });
                    }
                }
            }
            None => {}
        }
    }
}

impl Actor for StatsPoller {
    type Context = Context<Self>;
}

#[async_handler]
impl Handler<PollStatistics> for StatsPoller {
    type Result = ();

    async fn handle(&mut self, _msg: PollStatistics, _ctx: &mut Self::Context) -> Self::Result {
        let request = self.request();
        let deadline = self.timeout;

        let fetched = async move {
            match request {
                Some((backend, credential)) => Some(
                    with_deadline(
                        deadline,
                        "daily statistics",
                        backend.daily_statistics(&credential, StatsRange::today()),
                    )
                    .await,
                ),
                None => None,
            }
        }
        .await;

        self.apply(fetched);
    }
}

impl Handler<PresenceChanged> for StatsPoller {
    type Result = ();

    fn handle(&mut self, msg: PresenceChanged, ctx: &mut Self::Context) -> Self::Result {
        match msg.state {
            PresenceState::Online => {
                self.online = true;
                if self.poll_handle.is_none() {
                    ctx.notify(PollStatistics);
                    let handle = ctx.run_interval(self.interval, |_act, ctx| {
                        ctx.notify(PollStatistics);
                    });
                    self.poll_handle = Some(handle);
                }
            }
            PresenceState::TransitioningOffline | PresenceState::Offline => {
                self.online = false;
                if let Some(handle) = self.poll_handle.take() {
                    ctx.cancel_future(handle);
                }
            }
            PresenceState::TransitioningOnline => {}
        }
    }
}

impl Handler<PauseForAuth> for StatsPoller {
    type Result = ();

    fn handle(&mut self, _msg: PauseForAuth, _ctx: &mut Self::Context) -> Self::Result {
        self.paused = true;
    }
}

impl Handler<ResumeAfterAuth> for StatsPoller {
    type Result = ();

    fn handle(&mut self, _msg: ResumeAfterAuth, ctx: &mut Self::Context) -> Self::Result {
        if !self.paused {
            return;
        }
        self.paused = false;
        if self.online {
            ctx.notify(PollStatistics);
        }
    }
}

impl Handler<GetStatistics> for StatsPoller {
    type Result = MessageResult<GetStatistics>;

    fn handle(&mut self, _msg: GetStatistics, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.latest.clone())
    }
}

impl Handler<SubscribeStats> for StatsPoller {
    type Result = ();

    fn handle(&mut self, msg: SubscribeStats, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(latest) = &self.latest {
            msg.0.do_send(latest.clone());
        }
        self.subscribers.push(msg.0);
    }
}

impl Handler<SetAuthListener> for StatsPoller {
    type Result = ();

    fn handle(&mut self, msg: SetAuthListener, _ctx: &mut Self::Context) -> Self::Result {
        self.auth_listener = Some(msg.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{BackendOp, InMemoryBackend, StaticAuth, sample_order};
    use common::backend::{OrderBackend, StatsBackend};
    use common::types::dtos::{Coordinate, DeliveryProof, OnlineStats};

    fn presence(state: PresenceState) -> PresenceChanged {
        PresenceChanged {
            state,
            stats: OnlineStats::default(),
        }
    }

    async fn settle() {
        actix_rt::time::sleep(Duration::from_millis(20)).await;
    }

    async fn deliver(backend: &InMemoryBackend, order_id: &str) {
        let here = Coordinate {
            lat: 37.5665,
            lon: 126.9780,
        };
        let credential = Credential::bearer("token");
        backend.insert_order(sample_order(order_id, here, here, 4_500));
        backend.accept(&credential, order_id).await.unwrap();
        backend.start_pickup(&credential, order_id).await.unwrap();
        backend.complete_pickup(&credential, order_id).await.unwrap();
        backend.start_delivery(&credential, order_id).await.unwrap();
        backend
            .complete(&credential, order_id, &DeliveryProof::default())
            .await
            .unwrap();
    }

    fn poller(backend: &Arc<InMemoryBackend>) -> Addr<StatsPoller> {
        let auth = Arc::new(StaticAuth::signed_in("token"));
        StatsPoller::new(backend.clone(), auth, &DispatchConfig::default()).start()
    }

    #[actix_rt::test]
    async fn polls_as_soon_as_online() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        deliver(&backend, "o1").await;
        let stats = poller(&backend);

        stats.do_send(presence(PresenceState::Online));
        settle().await;

        let latest = stats.send(GetStatistics).await.unwrap().expect("polled");
        assert_eq!(latest.stats.completed_count, 1);
        assert_eq!(latest.stats.earnings, 4_500);
    }

    #[actix_rt::test]
    async fn never_polls_while_offline() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        let stats = poller(&backend);

        stats.do_send(PollStatistics);
        settle().await;
        assert_eq!(backend.call_count(BackendOp::DailyStatistics), 0);
        assert!(stats.send(GetStatistics).await.unwrap().is_none());
    }

    #[actix_rt::test]
    async fn paused_poller_stays_quiet_until_resumed() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        let stats = poller(&backend);
        stats.do_send(presence(PresenceState::Online));
        settle().await;
        assert_eq!(backend.call_count(BackendOp::DailyStatistics), 1);

        stats.do_send(PauseForAuth);
        stats.do_send(PollStatistics);
        stats.do_send(PollStatistics);
        settle().await;
        assert_eq!(backend.call_count(BackendOp::DailyStatistics), 1);

        stats.do_send(ResumeAfterAuth);
        settle().await;
        assert_eq!(backend.call_count(BackendOp::DailyStatistics), 2);
    }

    #[actix_rt::test]
    async fn failed_poll_keeps_the_last_value() {
        let backend = Arc::new(InMemoryBackend::new("agent-1"));
        let stats = poller(&backend);
        stats.do_send(presence(PresenceState::Online));
        settle().await;
        let first = stats.send(GetStatistics).await.unwrap().expect("polled");

        backend.fail_next(
            BackendOp::DailyStatistics,
            DispatchError::network("no signal"),
        );
        stats.do_send(PollStatistics);
        settle().await;

        assert_eq!(backend.call_count(BackendOp::DailyStatistics), 2);
        assert_eq!(stats.send(GetStatistics).await.unwrap(), Some(first));
        let direct = backend
            .daily_statistics(&Credential::bearer("token"), StatsRange::today())
            .await
            .unwrap();
        assert_eq!(direct.completed_count, 0);
    }
}
