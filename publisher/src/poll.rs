use crate::aio::AioClient;
use crate::config::ResolvedConfig;
use crate::errors::Result;
use crate::feeds::FeedStore;
use crate::geo::GeoServices;
use crate::location;
use crate::metrics::{CYCLE_DURATION_SECONDS, SENSOR_ERRORS_TOTAL};
use crate::model::round_to;
use crate::sensors::Sensor;
use crate::shutdown::{Shutdown, StopCause};
use crate::telemetry::{PublishOutcome, TelemetryPublisher};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    Running,
    Stopping(StopCause),
}

/// What happened during one pass over the sensors.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub read: usize,
    pub published: usize,
    pub dropped: usize,
    pub sensor_errors: usize,
    pub abandoned: bool,
}

pub struct PollLoop {
    sensors: Vec<Box<dyn Sensor>>,
    publisher: TelemetryPublisher,
    period: Duration,
    precision: u32,
    state: LoopState,
}

impl PollLoop {
    /// Resolve the location and the remote feeds once. Any failure here is
    /// fatal to startup.
    pub async fn init(config: &ResolvedConfig, sensors: Vec<Box<dyn Sensor>>) -> Result<Self> {
        let geo = GeoServices::from_config(config)?;
        let metadata = location::resolve(config, &geo).await?;
        if let Some(meta) = &metadata {
            info!(
                "Readings will be tagged with {}, {} at {} m (resolved {})",
                meta.latitude, meta.longitude, meta.elevation, meta.captured_at
            );
        }

        let feeds = FeedStore::new(AioClient::from_config(config)?);
        let mut publisher = TelemetryPublisher::connect(feeds, &config.feed_group, metadata).await?;
        for sensor in &sensors {
            publisher.prepare(sensor.metric()).await?;
        }
        info!("Feeds ready for {} sensors", sensors.len());

        Ok(Self {
            sensors,
            publisher,
            period: config.poll_interval,
            precision: config.precision,
            state: LoopState::Init,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Poll on a fixed period until `shutdown` fires. An overrunning cycle
    /// pushes the next tick back instead of queueing catch-up ticks.
    pub async fn run(&mut self, shutdown: &Shutdown) -> StopCause {
        self.state = LoopState::Running;
        info!("Polling every {:?}", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cause = loop {
            tokio::select! {
                biased;
                cause = shutdown.triggered() => break cause,
                _ = ticker.tick() => {
                    let report = self.run_cycle(shutdown).await;
                    debug!("Cycle finished: {:?}", report);
                }
            }
        };

        self.state = LoopState::Stopping(cause);
        info!("Poll loop stopped ({})", cause);
        cause
    }

    /// Read every sensor once and publish what could be read. Remaining
    /// sensors are skipped once `shutdown` has fired; a publish already in
    /// flight is allowed to finish.
    pub async fn run_cycle(&mut self, shutdown: &Shutdown) -> CycleReport {
        let timer = CYCLE_DURATION_SECONDS.start_timer();
        let mut report = CycleReport::default();

        for sensor in self.sensors.iter_mut() {
            if shutdown.cause().is_some() {
                report.abandoned = true;
                break;
            }

            let raw = match sensor.read() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("{} - skipped this cycle", e);
                    SENSOR_ERRORS_TOTAL.inc();
                    report.sensor_errors += 1;
                    continue;
                }
            };
            report.read += 1;

            let value = round_to(raw, self.precision);
            match self.publisher.publish(sensor.metric(), value).await {
                PublishOutcome::Delivered => report.published += 1,
                PublishOutcome::Dropped => report.dropped += 1,
            }
        }

        timer.observe_duration();

        if report.abandoned {
            info!("Stop requested, abandoning the rest of this cycle");
        } else if report.read == 0 {
            warn!("No sensor produced a reading this cycle");
        }
        report
    }
}
