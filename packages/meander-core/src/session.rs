//! Session controller.
//!
//! Owns the fingerprint, the pump, the output sink, the event channel, and
//! every recovery timer. One session means at most one pump, one sink, and
//! one event subscription at any instant; failure handling escalates along
//! the ladder: heartbeat rebroadcast, session rebind, new session, process
//! reload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::{refresh_stage, ControlPlane, HttpControlPlane, RefreshRequest};
use crate::context::EndpointContext;
use crate::events::{ChannelEvent, EventChannel, ServerMessage};
use crate::health::{InstabilityKind, InstabilityWindows, PlaybackWatchdog, StallCause};
use crate::hooks::PresentationHooks;
use crate::output::{build_sink, OutputSink, PlaybackClock, SinkEvent};
use crate::proxy::PlaybackHandle;
use crate::reconcile::{Reconciler, ReconcilerRequest};
use crate::state::{Config, HealthIndicator, PlayerState};
use crate::stream::{spawn_pump, PumpEvent, PumpHandle};

/// One streaming session. Cheap to clone; all clones share the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// The merged event queue consumed by the session driver.
enum SessionEvent {
    Sink(SinkEvent),
    Pump(PumpEvent),
    Channel(ChannelEvent),
    Reconcile(ReconcilerRequest),
}

struct Pipeline {
    pump: PumpHandle,
    sink: Arc<dyn OutputSink>,
}

/// Exponential backoff window suppressing restart attempts.
struct Quarantine {
    until: Option<Instant>,
    next_secs: f64,
}

impl Quarantine {
    fn new(base_secs: f64) -> Self {
        Self {
            until: None,
            next_secs: base_secs,
        }
    }

    /// Enters (or re-enters) quarantine, growing the next duration.
    fn enter(&mut self, now: Instant, factor: f64, cap_secs: f64) -> Duration {
        let duration = Duration::from_secs_f64(self.next_secs);
        self.until = Some(now + duration);
        self.next_secs = (self.next_secs * factor).min(cap_secs);
        duration
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.until
            .filter(|&until| until > now)
            .map(|until| until - now)
    }

    /// Healthy playback resets the backoff to its base.
    fn reset(&mut self, base_secs: f64) {
        self.until = None;
        self.next_secs = base_secs;
    }
}

struct SessionInner {
    config: Config,
    ctx: EndpointContext,
    client: reqwest::Client,
    state: Arc<PlayerState>,
    hooks: Arc<dyn PresentationHooks>,
    api: Arc<dyn ControlPlane>,
    clock: Arc<PlaybackClock>,
    reconciler: Arc<Reconciler>,
    windows: InstabilityWindows,
    watchdog: PlaybackWatchdog,
    pipeline: Mutex<Option<Pipeline>>,
    channel: Mutex<Option<EventChannel>>,
    quarantine: Mutex<Quarantine>,
    /// Startup grace deadline; `None` once cleared.
    grace_until: Mutex<Option<Instant>>,
    /// Whether `ready` has fired at least once this process.
    ready_seen: AtomicBool,
    /// Re-entrancy guard for the dead-session ladder.
    recovering: AtomicBool,
    prefer_device: bool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
}

impl Session {
    /// Creates a session against the given endpoints with the HTTP control
    /// plane. Must be called within a tokio runtime.
    #[must_use]
    pub fn new(
        ctx: EndpointContext,
        config: Config,
        hooks: Arc<dyn PresentationHooks>,
        prefer_device: bool,
    ) -> Self {
        let client = reqwest::Client::new();
        let api: Arc<dyn ControlPlane> =
            Arc::new(HttpControlPlane::new(client.clone(), ctx.clone()));
        Self::with_control_plane(ctx, config, hooks, api, prefer_device)
    }

    /// Creates a session with an injected control plane (used by tests and
    /// alternative transports).
    #[must_use]
    pub fn with_control_plane(
        ctx: EndpointContext,
        config: Config,
        hooks: Arc<dyn PresentationHooks>,
        api: Arc<dyn ControlPlane>,
        prefer_device: bool,
    ) -> Self {
        let client = reqwest::Client::new();
        let state = Arc::new(PlayerState::new());
        let clock = Arc::new(PlaybackClock::new());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (reconcile_tx, mut reconcile_rx) = mpsc::unbounded_channel();

        let reconciler = Arc::new(Reconciler::new(
            config.reconcile.clone(),
            Arc::clone(&hooks),
            Arc::clone(&api),
            Arc::clone(&clock),
            Arc::clone(&state),
            reconcile_tx,
        ));

        let quarantine_base = config.recovery.quarantine_base_secs;
        let inner = Arc::new(SessionInner {
            windows: InstabilityWindows::new(&config.recovery),
            watchdog: PlaybackWatchdog::new(Instant::now()),
            config,
            ctx,
            client,
            state,
            hooks,
            api,
            clock,
            reconciler,
            pipeline: Mutex::new(None),
            channel: Mutex::new(None),
            quarantine: Mutex::new(Quarantine::new(quarantine_base)),
            grace_until: Mutex::new(None),
            ready_seen: AtomicBool::new(false),
            recovering: AtomicBool::new(false),
            prefer_device,
            events_tx: events_tx.clone(),
            cancel: CancellationToken::new(),
        });

        // Reconciler requests merge into the session queue.
        {
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                while let Some(request) = reconcile_rx.recv().await {
                    if events_tx.send(SessionEvent::Reconcile(request)).is_err() {
                        break;
                    }
                }
            });
        }

        tokio::spawn(drive(Arc::clone(&inner), events_rx));

        Self { inner }
    }

    /// Connects the event channel and starts the audio pipeline.
    pub fn start(&self) {
        let inner = &self.inner;
        log::info!("[Session] Starting");
        *inner.grace_until.lock() = Some(
            Instant::now() + Duration::from_secs(inner.config.recovery.startup_grace_secs),
        );
        inner.connect_event_channel();
        inner.build_pipeline();
    }

    /// The typed playback proxy for the presentation layer.
    #[must_use]
    pub fn playback(&self) -> PlaybackHandle {
        PlaybackHandle::new(self.clone())
    }

    /// Current playback position in seconds.
    #[must_use]
    pub fn position_secs(&self) -> f64 {
        self.inner.clock.position_secs()
    }

    /// Whether rendering is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner
            .pipeline
            .lock()
            .as_ref()
            .map(|p| p.sink.is_paused())
            .unwrap_or(true)
    }

    /// Pauses rendering without discarding buffered audio.
    pub fn pause(&self) {
        if let Some(pipeline) = self.inner.pipeline.lock().as_ref() {
            pipeline.sink.set_paused(true);
        }
        self.inner.watchdog.set_paused(true, Instant::now());
        log::info!("[Session] Paused");
    }

    /// Resumes playback, retrying on failure. Exhaustion records a `dead`
    /// instability event and enters the recovery ladder.
    pub async fn resume(&self) -> bool {
        let inner = &self.inner;
        let attempts = inner.config.recovery.play_retry_attempts.max(1);
        let delay = Duration::from_millis(inner.config.recovery.play_retry_delay_ms);

        for attempt in 1..=attempts {
            let verified = {
                if inner.pipeline.lock().is_none() {
                    inner.build_pipeline();
                }
                let pipeline = inner.pipeline.lock();
                match pipeline.as_ref() {
                    Some(p) => {
                        p.sink.set_paused(false);
                        p.sink.verify_running()
                    }
                    None => Err(crate::error::SinkError::Start("no pipeline".into())),
                }
            };
            match verified {
                Ok(()) => {
                    inner.watchdog.set_paused(false, Instant::now());
                    log::info!("[Session] Resumed");
                    return true;
                }
                Err(err) => {
                    log::warn!(
                        "[Session] Resume attempt {}/{} failed: {}",
                        attempt,
                        attempts,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        log::error!("[Session] Play retries exhausted");
        inner
            .windows
            .record(InstabilityKind::Dead, Instant::now());
        inner.start_dead_ladder("play-retry exhausted");
        false
    }

    /// Volume in [0, 1].
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.inner.state.volume()
    }

    /// Sets the volume; preserved across pipeline rebuilds.
    pub fn set_volume(&self, volume: f32) {
        self.inner.state.set_volume(volume);
        if let Some(pipeline) = self.inner.pipeline.lock().as_ref() {
            pipeline.sink.set_volume(volume);
        }
    }

    /// Submits a manual next-track override.
    pub fn select_next_track(&self, track_md5: String, direction: Option<String>) {
        self.inner.reconciler.select_manual(track_md5, direction);
    }

    /// Verifies session health and enters the recovery ladder when dead.
    pub fn verify_or_restart(&self, reason: &str) {
        let inner = &self.inner;
        let healthy = inner.state.audio_online()
            && inner
                .watchdog
                .check(
                    inner.buffer_delay(),
                    &inner.config.recovery,
                    Instant::now(),
                )
                .is_none();
        if healthy {
            log::debug!("[Session] Verify ok ({reason})");
        } else {
            log::warn!("[Session] Verify failed ({reason}); recovering");
            inner.start_dead_ladder(reason);
        }
    }

    /// Abandons the fingerprint and starts a fresh session.
    pub fn new_session(&self, reason: &str) {
        let inner = Arc::clone(&self.inner);
        let reason = reason.to_string();
        tokio::spawn(async move {
            inner.start_new_session(&reason).await;
        });
    }

    /// Clears the fingerprint binding (session reset).
    pub fn clear_fingerprint(&self, reason: &str) {
        self.inner.state.clear_fingerprint(reason);
    }

    /// Re-aligns the presentation with the server from scratch.
    pub fn full_resync(&self, reason: &str) {
        self.inner.full_resync(reason);
    }

    /// Serializes session state for diagnostics output.
    #[must_use]
    pub fn diagnostics(&self) -> serde_json::Value {
        let inner = &self.inner;
        let now = Instant::now();
        let (fill, delay) = inner
            .pipeline
            .lock()
            .as_ref()
            .map(|p| (p.sink.fill_fraction(), p.sink.buffer_delay_secs()))
            .unwrap_or((0.0, 0.0));
        json!({
            "state": inner.state.to_json(),
            "positionSecs": inner.clock.position_secs(),
            "bufferDelaySecs": delay,
            "fillFraction": fill,
            "stallEvents": inner.windows.count(InstabilityKind::Stall, now),
            "deadEvents": inner.windows.count(InstabilityKind::Dead, now),
            "quarantined": inner.quarantine.lock().remaining(Instant::now()).is_some(),
        })
    }

    /// Tears everything down: fetch, sink queue, event channel, timers,
    /// clock. Idempotent.
    pub async fn shutdown(&self) {
        log::info!("[Session] Shutting down");
        self.inner.cancel.cancel();
        self.inner.teardown_pipeline().await;
        let channel = self.inner.channel.lock().take();
        if let Some(channel) = channel {
            channel.shutdown().await;
        }
        self.inner.reconciler.cancel_timers();
    }
}

/// The session driver: one queue, FIFO, plus a one-second health tick.
async fn drive(inner: Arc<SessionInner>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => inner.handle_event(event),
                None => break,
            },
            _ = tick.tick() => inner.health_tick(),
        }
    }
}

impl SessionInner {
    fn buffer_delay(&self) -> f64 {
        self.pipeline
            .lock()
            .as_ref()
            .map(|p| p.sink.buffer_delay_secs())
            .unwrap_or(0.0)
    }

    fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Sink(event) => self.handle_sink_event(event),
            SessionEvent::Pump(event) => self.handle_pump_event(event),
            SessionEvent::Channel(event) => self.handle_channel_event(event),
            SessionEvent::Reconcile(ReconcilerRequest::FullResync { reason }) => {
                self.full_resync(&reason);
            }
        }
    }

    fn handle_sink_event(self: &Arc<Self>, event: SinkEvent) {
        match event {
            SinkEvent::Rate { sample_rate } => {
                log::debug!("[Session] Output rate {sample_rate} Hz");
            }
            SinkEvent::Ready => {
                log::info!("[Session] Output ready");
                self.ready_seen.store(true, Ordering::Relaxed);
                *self.grace_until.lock() = None;
                self.state.set_audio_online(true);
                self.quarantine
                    .lock()
                    .reset(self.config.recovery.quarantine_base_secs);
                if self.state.set_health(HealthIndicator::Ok) {
                    self.hooks.set_health(HealthIndicator::Ok, None);
                }
            }
            SinkEvent::Position { .. } => {
                self.watchdog
                    .note_report(self.clock.position_secs(), Instant::now());
            }
            SinkEvent::Underrun => {
                // Noted for health; playback continues on its own.
                log::warn!("[Session] Output underrun after ready");
            }
        }
    }

    fn handle_pump_event(self: &Arc<Self>, event: PumpEvent) {
        match event {
            PumpEvent::Sentinel {
                kind,
                buffer_delay_secs,
            } => {
                self.reconciler.on_sentinel(kind, buffer_delay_secs);
            }
            PumpEvent::StreamError(err) => {
                log::error!("[Session] Stream failed: {err}");
                self.state.set_audio_online(false);
                self.reconciler.surface_error(HealthIndicator::Error, &err);
                self.start_dead_ladder("stream error");
            }
        }
    }

    fn handle_channel_event(self: &Arc<Self>, event: ChannelEvent) {
        match event {
            ChannelEvent::Message(message) => self.dispatch_message(message),
            ChannelEvent::Stuck { has_fingerprint } => {
                if has_fingerprint {
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let request = RefreshRequest {
                            fingerprint: this.state.fingerprint(),
                            session_id: this.state.session_id(),
                            stage: Some(refresh_stage::REBROADCAST.to_string()),
                        };
                        match this.api.refresh(request).await {
                            Ok(response) if response.ok => {
                                log::info!("[Session] Rebroadcast requested");
                            }
                            Ok(response) => {
                                log::warn!(
                                    "[Session] Rebroadcast declined: {}",
                                    response.reason.as_deref().unwrap_or("unknown")
                                );
                                this.force_channel_reconnect();
                            }
                            Err(err) => {
                                log::warn!("[Session] Rebroadcast request failed: {err}");
                                this.force_channel_reconnect();
                            }
                        }
                    });
                } else {
                    // Nothing to rebroadcast to; reconnect from scratch.
                    self.force_channel_reconnect();
                }
            }
            ChannelEvent::Down(err) => {
                if self.state.audio_online() {
                    log::debug!("[Session] Event channel down (audio healthy): {err}");
                } else {
                    self.reconciler
                        .surface_error(HealthIndicator::Degraded, &err);
                }
            }
        }
    }

    fn dispatch_message(self: &Arc<Self>, message: ServerMessage) {
        match message {
            ServerMessage::Connected(connected) => {
                if let Some(session_id) = connected.session_id.as_deref() {
                    self.state.set_session_id(session_id);
                }
                if let Some(fingerprint) = connected.fingerprint.as_deref() {
                    if self.state.bind_fingerprint(fingerprint) {
                        log::info!("[Session] Fingerprint bound: {fingerprint}");
                    }
                }
            }
            ServerMessage::Heartbeat(heartbeat) => {
                // A heartbeat addressed to another fingerprint is not ours.
                let ours = self.state.fingerprint();
                if let (Some(ours), Some(theirs)) = (ours.as_deref(), heartbeat.fingerprint.as_deref())
                {
                    if ours != theirs {
                        log::debug!("[Session] Ignoring heartbeat for foreign fingerprint");
                        return;
                    }
                }
                self.reconciler.on_heartbeat(heartbeat);
            }
            ServerMessage::SelectionAck(msg) => self.reconciler.on_selection_ack(msg),
            ServerMessage::SelectionReady(msg) => self.reconciler.on_selection_ready(msg),
            ServerMessage::SelectionFailed(msg) => self.reconciler.on_selection_failed(msg),
            ServerMessage::Error(error) => {
                if error.is_fingerprint_not_found() {
                    log::warn!("[Session] Server lost our fingerprint");
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.handle_fingerprint_lost().await;
                    });
                } else if self.state.audio_online() {
                    log::warn!(
                        "[Session] Server channel error (audio healthy); reconnecting: {}",
                        error.message.as_deref().unwrap_or("unknown")
                    );
                    self.force_channel_reconnect();
                } else {
                    self.start_dead_ladder("server channel error with dead audio");
                }
            }
            ServerMessage::ExplorerSnapshot(_) => {
                log::debug!("[Session] Ignoring deprecated inline explorer snapshot");
            }
        }
    }

    /// Fingerprint mismatch: refresh first, then give up on the session.
    async fn handle_fingerprint_lost(self: &Arc<Self>) {
        let request = RefreshRequest {
            fingerprint: self.state.fingerprint(),
            session_id: self.state.session_id(),
            stage: Some(refresh_stage::REBIND.to_string()),
        };
        match self.api.refresh(request).await {
            Ok(response) if response.ok => {
                log::info!("[Session] Refresh restored the fingerprint binding");
            }
            _ => self.start_new_session("fingerprint not found").await,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Health
    // ─────────────────────────────────────────────────────────────────────

    fn health_tick(self: &Arc<Self>) {
        if self.pipeline.lock().is_none() {
            return;
        }
        let now = Instant::now();
        let Some(cause) = self
            .watchdog
            .check(self.buffer_delay(), &self.config.recovery, now)
        else {
            return;
        };
        // Re-anchor so one stall is handled once.
        self.watchdog.reset(now);
        log::warn!("[Session] Playback stalled: {cause}");

        match cause {
            StallCause::NoPositionReport => {
                // The render path is gone; this is dead audio.
                self.start_dead_ladder("no position report");
            }
            StallCause::NoProgress => {
                if self.state.set_health(HealthIndicator::Degraded) {
                    self.hooks.set_health(HealthIndicator::Degraded, None);
                }
                if self.windows.record(InstabilityKind::Stall, now) {
                    log::warn!("[Session] Stall window threshold reached; rebuilding pipeline");
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        this.rebuild_pipeline("stall window").await;
                    });
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pipeline lifecycle
    // ─────────────────────────────────────────────────────────────────────

    fn connect_event_channel(self: &Arc<Self>) {
        let mut slot = self.channel.lock();
        if slot.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        {
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if events_tx.send(SessionEvent::Channel(event)).is_err() {
                        break;
                    }
                }
            });
        }
        *slot = Some(EventChannel::spawn(
            self.client.clone(),
            self.ctx.clone(),
            Arc::clone(&self.state),
            self.config.channel.clone(),
            tx,
        ));
    }

    fn force_channel_reconnect(&self) {
        if let Some(channel) = self.channel.lock().as_ref() {
            channel.force_reconnect();
        }
    }

    /// Builds the sink and pump. No-op when a pipeline already exists.
    fn build_pipeline(self: &Arc<Self>) {
        let mut slot = self.pipeline.lock();
        if slot.is_some() {
            return;
        }

        let (sink_tx, mut sink_rx) = mpsc::unbounded_channel();
        let sink = build_sink(
            self.prefer_device,
            &self.config.output,
            Arc::clone(&self.clock),
            sink_tx,
        );
        sink.set_volume(self.state.volume());
        {
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = sink_rx.recv().await {
                    if events_tx.send(SessionEvent::Sink(event)).is_err() {
                        break;
                    }
                }
            });
        }

        let (pump_tx, mut pump_rx) = mpsc::unbounded_channel();
        {
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = pump_rx.recv().await {
                    if events_tx.send(SessionEvent::Pump(event)).is_err() {
                        break;
                    }
                }
            });
        }

        let url = self.ctx.stream_url(self.state.fingerprint().as_deref());
        let pump = spawn_pump(
            self.client.clone(),
            url,
            Arc::clone(&sink),
            self.config.pump.clone(),
            pump_tx,
        );

        self.reconciler.set_sink(Some(Arc::clone(&sink)));
        self.watchdog.reset(Instant::now());
        self.state.set_audio_online(true);
        *slot = Some(Pipeline { pump, sink });
        log::info!("[Session] Pipeline built");
    }

    /// Aborts the fetch, discards the sink queue, clears reconciler
    /// timers, zeroes the clock. Idempotent.
    async fn teardown_pipeline(&self) {
        let pipeline = self.pipeline.lock().take();
        let Some(Pipeline { pump, sink }) = pipeline else {
            self.clock.reset();
            return;
        };
        log::info!("[Session] Tearing down pipeline");
        pump.shutdown().await;
        sink.shutdown();
        self.reconciler.set_sink(None);
        self.reconciler.cancel_timers();
        self.clock.reset();
        self.watchdog.reset(Instant::now());
        self.state.set_audio_online(false);
    }

    /// Full rebuild preserving volume and fingerprint.
    async fn rebuild_pipeline(self: &Arc<Self>, reason: &str) {
        log::warn!("[Session] Rebuilding pipeline: {reason}");
        self.teardown_pipeline().await;
        self.windows.clear();
        self.build_pipeline();
    }

    fn full_resync(self: &Arc<Self>, reason: &str) {
        log::warn!("[Session] Full resync: {reason}");
        self.reconciler.reset_presentation(reason);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let request = RefreshRequest {
                fingerprint: this.state.fingerprint(),
                session_id: this.state.session_id(),
                stage: Some(refresh_stage::REBROADCAST.to_string()),
            };
            if let Err(err) = this.api.refresh(request).await {
                log::warn!("[Session] Resync rebroadcast failed: {err}");
            }
        });
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recovery ladder
    // ─────────────────────────────────────────────────────────────────────

    fn start_dead_ladder(self: &Arc<Self>, reason: &str) {
        if self.recovering.swap(true, Ordering::SeqCst) {
            log::debug!("[Session] Recovery already running; ignoring: {reason}");
            return;
        }
        if self.state.set_health(HealthIndicator::Error) {
            self.hooks.set_health(HealthIndicator::Error, None);
        }
        let this = Arc::clone(self);
        let reason = reason.to_string();
        tokio::spawn(async move {
            this.run_dead_ladder(&reason).await;
            this.recovering.store(false, Ordering::SeqCst);
        });
    }

    async fn run_dead_ladder(self: &Arc<Self>, reason: &str) {
        log::warn!("[Session] Dead audio ({reason}); entering recovery ladder");

        // Steps 1-3: defer while grace, quarantine, or a full outage
        // suppresses restarts.
        loop {
            let now = Instant::now();

            if !self.ready_seen.load(Ordering::Relaxed) {
                let grace_until = *self.grace_until.lock();
                if let Some(until) = grace_until {
                    if until > now {
                        let wait = until - now;
                        log::info!(
                            "[Session] Startup grace active; deferring recovery {:.0}s",
                            wait.as_secs_f64()
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                }
            }

            let quarantine_remaining = self.quarantine.lock().remaining(now);
            if let Some(remaining) = quarantine_remaining {
                log::info!(
                    "[Session] Quarantined; deferring recovery {:.0}s",
                    remaining.as_secs_f64()
                );
                tokio::time::sleep(remaining).await;
                continue;
            }

            if !self.state.channel_online() && !self.state.audio_online() {
                let duration = {
                    let mut quarantine = self.quarantine.lock();
                    quarantine.enter(
                        now,
                        self.config.recovery.quarantine_factor,
                        self.config.recovery.quarantine_max_secs,
                    )
                };
                log::warn!(
                    "[Session] Server and audio both offline; quarantining {:.0}s",
                    duration.as_secs_f64()
                );
                tokio::time::sleep(duration).await;
                continue;
            }

            break;
        }

        // Playback may have recovered while we were deferring.
        if self
            .watchdog
            .check(
                self.buffer_delay(),
                &self.config.recovery,
                Instant::now(),
            )
            .is_none()
            && self.state.audio_online()
            && self.ready_seen.load(Ordering::Relaxed)
        {
            log::info!("[Session] Playback recovered during deferral; ladder aborted");
            return;
        }

        // Step 4: record the death and tear the pipeline down.
        self.windows
            .record(InstabilityKind::Dead, Instant::now());
        self.teardown_pipeline().await;

        // Step 5: session rebind (server rebroadcasts to our fingerprint).
        if self.state.fingerprint().is_some() {
            let request = RefreshRequest {
                fingerprint: self.state.fingerprint(),
                session_id: self.state.session_id(),
                stage: Some(refresh_stage::REBIND.to_string()),
            };
            match self.api.refresh(request).await {
                Ok(response) if response.ok => {
                    log::info!("[Session] Rebind succeeded; rebuilding pipeline");
                    self.build_pipeline();
                    return;
                }
                Ok(response) => {
                    log::warn!(
                        "[Session] Rebind declined: {}",
                        response.reason.as_deref().unwrap_or("unknown")
                    );
                }
                Err(err) => {
                    log::warn!("[Session] Rebind failed: {err}");
                }
            }
        }

        // Step 6: abandon the fingerprint and start fresh.
        if self.try_new_session("recovery ladder").await {
            return;
        }

        // Step 7: nothing left but a full reload.
        self.hooks.request_reload(reason);
    }

    async fn start_new_session(self: &Arc<Self>, reason: &str) {
        self.teardown_pipeline().await;
        if !self.try_new_session(reason).await {
            self.hooks.request_reload(reason);
        }
    }

    /// Starts a fresh stream without a fingerprint and waits for the
    /// server to mint one. Returns whether a fingerprint was acquired.
    async fn try_new_session(self: &Arc<Self>, reason: &str) -> bool {
        log::warn!("[Session] Starting new session: {reason}");
        self.state.clear_fingerprint(reason);
        self.reconciler.reset_presentation(reason);
        self.build_pipeline();
        self.connect_event_channel();
        self.force_channel_reconnect();

        let deadline = Instant::now()
            + Duration::from_secs(self.config.recovery.new_session_fingerprint_timeout_secs);
        while Instant::now() < deadline {
            if self.state.fingerprint().is_some() {
                log::info!("[Session] New session acquired a fingerprint");
                return true;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        log::error!("[Session] New session failed to acquire a fingerprint");
        false
    }
}
