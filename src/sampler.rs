//! Sampling loop.
//!
//! One loop owns every provider and all estimation state. Each tick it
//! polls whichever metrics are due, runs classification and FPS fusion at
//! their own cadences, and publishes a fully-formed `MonitorEvent` through a
//! watch channel at the publish cadence. Consumers only ever see complete
//! copies.

use crate::cache::{Cached, Cadence, TelemetryCache};
use crate::classifier::{Classifier, ClassifierInput, Decision};
use crate::config::{seconds, Settings};
use crate::error::MonitorError;
use crate::fps::{Aggregator, EstimateContext, Profile, Smoother};
use crate::inspector::Inspector;
use crate::platform::{
    CpuSource, DisplaySource, ForegroundSource, GpuSource, NetworkSource, Platform, ProcessSample,
    ProcessSource,
};
use crate::registry::Registry;
use crate::telemetry::{MonitorEvent, NetworkMeter};
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

/// How long a process list may be reused when enumeration fails.
const PROCESS_LIST_TTL: Duration = Duration::from_secs(5);

/// Cached GPU and network values expire after this many missed polls.
const STALE_AFTER_POLLS: u32 = 3;

struct Cadences {
    gpu: Cadence,
    network: Cadence,
    classify: Cadence,
    fps: Cadence,
    publish: Cadence,
    fps_gaming: Duration,
    fps_idle: Duration,
    gpu_max_age: Duration,
    network_max_age: Duration,
}

pub struct Sampler {
    settings: Settings,
    registry: Registry,
    cpu: Box<dyn CpuSource>,
    gpu: Box<dyn GpuSource>,
    network: Box<dyn NetworkSource>,
    processes: Box<dyn ProcessSource>,
    foreground: Box<dyn ForegroundSource>,
    display: Box<dyn DisplaySource>,
    inspector: Inspector,
    classifier: Classifier,
    aggregator: Aggregator,
    smoother: Smoother,
    cache: TelemetryCache,
    meter: NetworkMeter,
    running: Cached<Vec<ProcessSample>>,
    cadences: Cadences,
    profile: Profile,
}

impl Sampler {
    /// Build a sampler over the given providers. Fails only on invalid
    /// settings.
    pub fn new(settings: Settings, platform: Platform) -> Result<Self, MonitorError> {
        settings.validate()?;

        let Platform {
            cpu,
            gpu,
            network,
            processes,
            foreground,
            display,
            frames,
            counters,
        } = platform;

        let c = &settings.cadences;
        let cadences = Cadences {
            gpu: Cadence::from_secs(c.gpu),
            network: Cadence::from_secs(c.network),
            classify: Cadence::from_secs(c.classify),
            fps: Cadence::from_secs(c.fps_idle),
            publish: Cadence::new(settings.publish_interval()),
            fps_gaming: seconds(c.fps_gaming),
            fps_idle: seconds(c.fps_idle),
            gpu_max_age: seconds(c.gpu).saturating_mul(STALE_AFTER_POLLS),
            network_max_age: seconds(c.network).saturating_mul(STALE_AFTER_POLLS),
        };

        Ok(Self {
            registry: Registry::from_settings(&settings),
            inspector: Inspector::new(
                seconds(c.foreground),
                settings.classifier.fullscreen_tolerance,
            ),
            classifier: Classifier::new(settings.classifier.clone()),
            aggregator: Aggregator::standard(frames, counters, settings.fusion.clone()),
            smoother: Smoother::new(settings.smoothing.clone()),
            cache: TelemetryCache::new(),
            meter: NetworkMeter::new(),
            running: Cached::new(),
            cadences,
            profile: Profile::General,
            cpu,
            gpu,
            network,
            processes,
            foreground,
            display,
            settings,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_gaming(&self) -> bool {
        self.classifier.is_gaming()
    }

    /// Verdict of the most recent classification, with the rule that fired.
    pub fn last_decision(&self) -> Option<Decision> {
        self.classifier.last_decision()
    }

    /// Estimation profile chosen by the last FPS cycle.
    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Current outbound event built from the latest cached values.
    pub fn event(&self, now: Instant) -> MonitorEvent {
        MonitorEvent::new(
            &self.cache.snapshot(now),
            self.classifier.is_gaming(),
            self.smoother.smoothed(),
            &self.settings,
        )
    }

    /// Run one loop iteration. Returns an event when the publish cadence
    /// is due.
    pub fn tick(&mut self, now: Instant) -> Option<MonitorEvent> {
        self.sample_cpu(now);

        if self.cadences.gpu.poll(now) {
            self.sample_gpu(now);
        }
        if self.cadences.network.poll(now) {
            self.sample_network(now);
        }
        self.cache
            .expire(now, self.cadences.gpu_max_age, self.cadences.network_max_age);

        self.inspector
            .refresh(self.foreground.as_mut(), self.display.as_mut(), now);

        if self.cadences.classify.poll(now) {
            self.classify(now);
        }

        let fps_interval = if self.classifier.is_gaming() {
            self.cadences.fps_gaming
        } else {
            self.cadences.fps_idle
        };
        self.cadences.fps.set_interval(fps_interval);
        if self.cadences.fps.poll(now) {
            self.estimate_fps(now);
        }

        if self.cadences.publish.poll(now) {
            Some(self.event(now))
        } else {
            None
        }
    }

    fn sample_cpu(&mut self, now: Instant) {
        match self.cpu.cpu_usage() {
            Ok(usage) => {
                if !self.cache.record_cpu(usage, now) {
                    debug!("Discarding implausible CPU usage {}", usage);
                }
            }
            Err(e) => trace!("CPU read failed: {}", e),
        }
    }

    fn sample_gpu(&mut self, now: Instant) {
        match self.gpu.read() {
            Ok(reading) => {
                if !self.cache.record_gpu(&reading, now) {
                    debug!("Discarding implausible GPU reading {:?}", reading);
                }
            }
            Err(e) => debug!("GPU read failed: {}", e),
        }
    }

    fn sample_network(&mut self, now: Instant) {
        match self.network.counters() {
            Ok(counters) => {
                if let Some((down, up)) = self.meter.update(counters, now) {
                    self.cache.record_network(down, up, now);
                }
            }
            Err(e) => debug!("Network counters failed: {}", e),
        }
    }

    fn refresh_processes(&mut self, now: Instant) {
        match self.processes.processes() {
            Ok(list) => self.running.update(list, now),
            Err(e) => debug!("Process enumeration failed: {}", e),
        }
    }

    /// The last process list, unless it is older than `PROCESS_LIST_TTL`.
    fn fresh_processes(running: &Cached<Vec<ProcessSample>>, now: Instant) -> Option<&[ProcessSample]> {
        if running.is_fresh(now, PROCESS_LIST_TTL) {
            running.get().map(Vec::as_slice)
        } else {
            None
        }
    }

    fn classify(&mut self, now: Instant) {
        self.refresh_processes(now);
        let snapshot = self.cache.snapshot(now);

        let input = ClassifierInput {
            context: self.inspector.context(),
            gpu_load: snapshot.gpu_load,
            gpu_memory: snapshot.gpu_mem_percent(),
            processes: Self::fresh_processes(&self.running, now),
            strict_non_game_fullscreen: self.settings.strict_non_game_fullscreen,
        };

        let decision = self
            .classifier
            .classify_with_time(&input, &self.registry, now);
        debug!(is_gaming = decision.is_gaming, reason = ?decision.reason, "Classified foreground");
    }

    fn estimate_fps(&mut self, now: Instant) {
        let refresh_hz = self.inspector.refresh_rate(self.display.as_mut(), now);
        let snapshot = self.cache.snapshot(now);
        let is_gaming = self.classifier.is_gaming();

        let profile = if is_gaming
            && self
                .registry
                .is_fast_shooter(self.inspector.context(), Self::fresh_processes(&self.running, now))
        {
            Profile::FastShooter
        } else {
            Profile::General
        };
        if profile != self.profile {
            info!(?profile, "FPS profile changed");
            self.profile = profile;
        }

        let ctx = EstimateContext {
            foreground: self.inspector.context(),
            telemetry: &snapshot,
            refresh_hz,
            is_gaming,
            deadline: Instant::now() + self.aggregator.budget(),
        };
        let fused = self.aggregator.fuse(&ctx, profile);
        let displayed = self.smoother.smooth(&fused);

        debug!(
            raw = fused.raw,
            displayed,
            authoritative = fused.authoritative,
            sources = ?fused.sources,
            "FPS cycle"
        );
    }

    /// Blocking loop body. Returns when `stop` becomes true; the providers
    /// (and any shared-memory mapping) are released when `self` drops.
    pub fn run_blocking(mut self, events: watch::Sender<MonitorEvent>, stop: watch::Receiver<bool>) {
        let tick = self.settings.tick();
        info!("Sampling loop started with {:?} tick", tick);

        loop {
            if *stop.borrow() {
                break;
            }

            let started = Instant::now();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.tick(started)));
            match result {
                Ok(Some(event)) => {
                    events.send_replace(event);
                }
                Ok(None) => {}
                Err(_) => error!("Panic during sampling tick, continuing operation"),
            }

            if let Some(rest) = tick.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }

        info!("Sampling loop stopped");
    }

    /// Start the loop on the runtime's blocking pool.
    pub fn start(self) -> Result<SamplerHandle, MonitorError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MonitorError::Startup(e.to_string()))?;

        let initial = self.event(Instant::now());
        let (event_tx, event_rx) = watch::channel(initial);
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = runtime.spawn_blocking(move || self.run_blocking(event_tx, stop_rx));

        Ok(SamplerHandle {
            events: event_rx,
            stop: stop_tx,
            task,
        })
    }
}

/// Handle to a running sampling loop.
pub struct SamplerHandle {
    events: watch::Receiver<MonitorEvent>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Receiver that is notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<MonitorEvent> {
        self.events.clone()
    }

    pub fn latest(&self) -> MonitorEvent {
        *self.events.borrow()
    }

    /// Ask the loop to stop; it exits after at most one tick.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), MonitorError> {
        self.stop();
        match tokio::time::timeout(timeout, self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MonitorError::Shutdown(e.to_string())),
            Err(_) => Err(MonitorError::Shutdown(format!(
                "loop still running after {:?}",
                timeout
            ))),
        }
    }
}
