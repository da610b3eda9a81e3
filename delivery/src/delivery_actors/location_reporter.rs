use crate::delivery_actors::with_deadline;
use crate::messages::internal_messages::{
    AuthRejected, GetReporterStatus, LocationUpdated, PauseForAuth, ReporterStatus,
    ResumeAfterAuth, SetAuthListener, StartReporting, StopReporting, SubscribeLocation,
};
use actix::prelude::*;
use chrono::{DateTime, Utc};
use colored::Color;
use common::backend::{AuthProvider, LocationSource, TrackingBackend};
use common::config::DispatchConfig;
use common::errors::DispatchError;
use common::logger::Logger;
use common::types::dtos::LocationSample;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

/// Sample tagged with the tracking session that produced it.
pub struct LocationTick {
    session: u64,
    sample: LocationSample,
}

/// The `LocationReporter` actor consumes the device location sequence while
/// tracking is on, uploads throttled samples and fans them out as catalog
/// refresh triggers.
///
/// Started and stopped exclusively by the `PresenceController`.
pub struct LocationReporter {
    pub source: Arc<dyn LocationSource>,
    pub tracking: Arc<dyn TrackingBackend>,
    pub auth: Arc<dyn AuthProvider>,
    /// Minimum gap between two uploads, on the samples' own clock.
    pub report_interval: chrono::Duration,
    /// Minimum gap between two catalog refresh triggers.
    pub refresh_interval: chrono::Duration,
    pub timeout: Duration,
    pub active: bool,
    /// Uploads are skipped while the credential is rejected.
    pub paused: bool,
    /// Bumped on every start so late samples of a stopped session are ignored.
    pub session: u64,
    pub stream_handle: Option<SpawnHandle>,
    /// Uploads still in flight, cancelled on stop.
    pub pending_uploads: HashMap<u64, SpawnHandle>,
    pub next_upload_id: u64,
    pub last_uploaded_at: Option<DateTime<Utc>>,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub subscribers: Vec<Recipient<LocationUpdated>>,
    pub auth_listener: Option<Recipient<AuthRejected>>,
    pub status: ReporterStatus,
    pub logger: Logger,
}

fn interval_elapsed(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min: chrono::Duration,
) -> bool {
    last.is_none_or(|previous| now - previous >= min)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

impl LocationReporter {
    pub fn new(
        source: Arc<dyn LocationSource>,
        tracking: Arc<dyn TrackingBackend>,
        auth: Arc<dyn AuthProvider>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            source,
            tracking,
            auth,
            report_interval: to_chrono(config.location_report_interval()),
            refresh_interval: to_chrono(config.catalog_refresh_min_interval()),
            timeout: config.transition_timeout(),
            active: false,
            paused: false,
            session: 0,
            stream_handle: None,
            pending_uploads: HashMap::new(),
            next_upload_id: 0,
            last_uploaded_at: None,
            last_refresh_at: None,
            subscribers: Vec::new(),
            auth_listener: None,
            status: ReporterStatus::default(),
            logger: Logger::new("Location", Color::Cyan).with_verbose(config.verbose_logging),
        }
    }

    fn on_sample(&mut self, sample: LocationSample, ctx: &mut Context<Self>) {
        if let Err(err) = sample.coordinate.validate() {
            self.status.samples_dropped += 1;
            self.logger.warn(format!("Dropping sample: {}", err));
            return;
        }
        let now = sample.captured_at;
        if !self.paused && interval_elapsed(self.last_uploaded_at, now, self.report_interval) {
            self.last_uploaded_at = Some(now);
            self.upload(sample.clone(), ctx);
        }
        if interval_elapsed(self.last_refresh_at, now, self.refresh_interval) {
            self.last_refresh_at = Some(now);
            for subscriber in &self.subscribers {
                subscriber.do_send(LocationUpdated {
                    sample: sample.clone(),
                });
            }
        }
        self.status.last_sample = Some(sample);
    }

    /// Uploads one sample. Failures are dropped, not retried: the next
    /// accepted sample replaces them anyway.
    fn upload(&mut self, sample: LocationSample, ctx: &mut Context<Self>) {
        let Some(credential) = self.auth.current_credential() else {
            self.logger.warn("No credential, skipping location upload");
            return;
        };
        self.next_upload_id += 1;
        let upload_id = self.next_upload_id;
        let tracking = self.tracking.clone();
        let deadline = self.timeout;
        let handle = ctx.spawn(
            async move {
                with_deadline(
                    deadline,
                    "location upload",
                    tracking.report_location(&credential, &sample),
                )
                .await
            }
            .into_actor(self)
            .map(move |res, act, _ctx| {
                act.pending_uploads.remove(&upload_id);
                match res {
                    Ok(()) => {
                        act.status.uploads_succeeded += 1;
                        act.logger.debug("Location uploaded");
                    }
                    Err(err) => {
                        act.status.uploads_failed += 1;
                        act.logger.warn(format!("Location upload failed: {}", err));
                        act.report_auth_failure(err);
                    }
                }
            }),
        );
        self.pending_uploads.insert(upload_id, handle);
    }

    fn report_auth_failure(&self, err: DispatchError) {
        if !err.is_auth() {
            return;
        }
        if let Some(listener) = &self.auth_listener {
            listener.do_send(AuthRejected {
                component: "location",
                error: err,
            });
        }
    }
}

impl Actor for LocationReporter {
    type Context = Context<Self>;
}

impl StreamHandler<LocationTick> for LocationReporter {
    fn handle(&mut self, tick: LocationTick, ctx: &mut Self::Context) {
        if !self.active || tick.session != self.session {
            return;
        }
        self.on_sample(tick.sample, ctx);
    }

    // The source is restartable: the end of one sequence must not stop us.
    fn finished(&mut self, _ctx: &mut Self::Context) {
        self.logger.debug("Location sequence ended");
    }
}

impl Handler<StartReporting> for LocationReporter {
    type Result = ();

    fn handle(&mut self, _msg: StartReporting, ctx: &mut Self::Context) -> Self::Result {
        if self.active {
            self.logger.debug("Already reporting");
            return;
        }
        self.active = true;
        self.session += 1;
        let session = self.session;
        let stream = self
            .source
            .start()
            .map(move |sample| LocationTick { session, sample });
        self.stream_handle = Some(ctx.add_stream(stream));
        self.logger.info("Location reporting started");
    }
}

impl Handler<StopReporting> for LocationReporter {
    type Result = ();

    fn handle(&mut self, _msg: StopReporting, ctx: &mut Self::Context) -> Self::Result {
        for (_, handle) in self.pending_uploads.drain() {
            ctx.cancel_future(handle);
        }
        self.last_uploaded_at = None;
        self.last_refresh_at = None;
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(handle) = self.stream_handle.take() {
            ctx.cancel_future(handle);
        }
        self.source.stop();
        self.logger.info("Location reporting stopped");
    }
}

impl Handler<PauseForAuth> for LocationReporter {
    type Result = ();

    fn handle(&mut self, _msg: PauseForAuth, ctx: &mut Self::Context) -> Self::Result {
        if self.paused {
            return;
        }
        self.paused = true;
        for (_, handle) in self.pending_uploads.drain() {
            ctx.cancel_future(handle);
        }
        self.logger.warn("Uploads paused until a valid credential is available");
    }
}

impl Handler<ResumeAfterAuth> for LocationReporter {
    type Result = ();

    fn handle(&mut self, _msg: ResumeAfterAuth, _ctx: &mut Self::Context) -> Self::Result {
        if !self.paused {
            return;
        }
        self.paused = false;
        self.logger.info("Uploads resumed");
    }
}

impl Handler<SubscribeLocation> for LocationReporter {
    type Result = ();

    fn handle(&mut self, msg: SubscribeLocation, _ctx: &mut Self::Context) -> Self::Result {
        self.subscribers.push(msg.0);
    }
}

impl Handler<SetAuthListener> for LocationReporter {
    type Result = ();

    fn handle(&mut self, msg: SetAuthListener, _ctx: &mut Self::Context) -> Self::Result {
        self.auth_listener = Some(msg.0);
    }
}

impl Handler<GetReporterStatus> for LocationReporter {
    type Result = MessageResult<GetReporterStatus>;

    fn handle(&mut self, _msg: GetReporterStatus, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(ReporterStatus {
            active: self.active,
            ..self.status.clone()
        })
    }
}
