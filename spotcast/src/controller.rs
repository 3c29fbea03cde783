//! Broadcast controller
//!
//! A single actor task owns the pipeline and is the only code that rewires
//! it. Commands reach it through a queue and are answered on a oneshot;
//! stage exhaustion events arrive on a second channel. Events from a stage
//! that is no longer current are ignored.
//!
//! ```text
//!            start                  insert effect
//!   Idle ───────────▶ Playing ─────────────────────▶ PlayingWithEffect
//!    ▲                 │  ▲                                  │
//!    │  stop / song    │  └──────── effect exhausted ────────┤
//!    └──── ended ──────┘                                     │
//!    ▲                                                       │
//!    └──────────────────────────── stop ─────────────────────┘
//! ```
//!
//! `stop` bumps a generation counter before queueing, so a start or splice
//! already in flight discards its result and reports [`Error::Cancelled`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::catalog::{FsCatalog, MediaCatalog};
use crate::command::Command;
use crate::config_ext::EngineSettings;
use crate::error::{Error, Result};
use crate::mixer::AudioMixer;
use crate::probe::BitrateProbe;
use crate::process::ProcessRunner;
use crate::registry::{ClientRegistry, ListenerId, ListenerStream};
use crate::splicer::{FxSplicer, SpliceOperation, splice_window};
use crate::stage::{StageEvent, StageId, ThrottleStage};
use crate::throttle::ThrottledSource;

/// Probe answers in bits, the throttle counts bytes
const BITS_PER_BYTE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    PlayingWithEffect,
}

/// What is on air
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct PlaybackSession {
    pub source_id: String,
    pub bitrate_bytes_per_sec: u64,
    pub active: bool,
    /// Effect currently mixed over the song
    pub effect_id: Option<String>,
}

/// Snapshot published on every transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub struct BroadcastStatus {
    pub state: PlaybackState,
    pub session: Option<PlaybackSession>,
}

impl BroadcastStatus {
    fn idle() -> Self {
        Self {
            state: PlaybackState::Idle,
            session: None,
        }
    }
}

type Reply = oneshot::Sender<Result<()>>;

enum Request {
    Start(Reply),
    Stop(Reply),
    InsertEffect(String, Reply),
}

/// Handle on the controller task
///
/// Cheap to clone. The task ends, stopping playback, once every handle is
/// dropped.
#[derive(Clone)]
pub struct BroadcastController {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<BroadcastStatus>,
    generation: Arc<AtomicU64>,
    registry: ClientRegistry,
}

impl BroadcastController {
    /// Controller over the songs and effects directories of `settings`
    pub fn spawn(settings: EngineSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        let catalog = Arc::new(FsCatalog::new(
            settings.songs_dir.clone(),
            settings.fx_dir.clone(),
        ));
        Self::with_catalog(settings, catalog, runner)
    }

    pub fn with_catalog(
        settings: EngineSettings,
        catalog: Arc<dyn MediaCatalog>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let registry = ClientRegistry::new(settings.listener_buffer_chunks);
        let generation = Arc::new(AtomicU64::new(0));
        let (requests_tx, requests_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(BroadcastStatus::idle());

        let probe = BitrateProbe::new(
            runner.clone(),
            settings.mixer.program.clone(),
            settings.fallback_bitrate,
            settings.probe_timeout,
        );
        let mixer = AudioMixer::new(runner, settings.mixer.clone());
        let splicer = FxSplicer::new(mixer, registry.clone(), events_tx.clone());

        let actor = Actor {
            catalog,
            probe,
            splicer,
            registry: registry.clone(),
            events: events_tx,
            generation: generation.clone(),
            current_song: settings.current_song,
            next_stage: 0,
            pipeline: None,
            status: status_tx,
        };
        tokio::spawn(actor.run(requests_rx, events_rx));

        Self {
            requests: requests_tx,
            status: status_rx,
            generation,
            registry,
        }
    }

    async fn call(&self, request: impl FnOnce(Reply) -> Request) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(request(tx))
            .await
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)?
    }

    pub async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::Start => self.start().await,
            Command::Stop => self.stop().await,
            Command::InsertEffect(name) => self.insert_effect(name).await,
        }
    }

    /// Starts the configured song; no-op while playing
    pub async fn start(&self) -> Result<()> {
        self.call(Request::Start).await
    }

    /// Stops playback; no-op while idle
    pub async fn stop(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.call(Request::Stop).await
    }

    /// Mixes the effect matching `name` into the live song
    pub async fn insert_effect(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.call(|reply| Request::InsertEffect(name, reply)).await
    }

    pub fn status(&self) -> BroadcastStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.status.borrow().state
    }

    /// Follows every state transition
    pub fn subscribe(&self) -> watch::Receiver<BroadcastStatus> {
        self.status.clone()
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// New listener; audio flows whenever something plays
    pub fn connect_listener(&self) -> ListenerStream {
        self.registry.add()
    }

    pub fn disconnect_listener(&self, id: ListenerId) -> bool {
        self.registry.remove(id)
    }
}

struct Pipeline {
    session: PlaybackSession,
    stage: ThrottleStage,
    splice: Option<SpliceOperation>,
}

struct Actor {
    catalog: Arc<dyn MediaCatalog>,
    probe: BitrateProbe,
    splicer: FxSplicer,
    registry: ClientRegistry,
    events: mpsc::UnboundedSender<StageEvent>,
    generation: Arc<AtomicU64>,
    current_song: String,
    next_stage: u64,
    pipeline: Option<Pipeline>,
    status: watch::Sender<BroadcastStatus>,
}

impl Actor {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut events: mpsc::UnboundedReceiver<StageEvent>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Start(reply)) => {
                        let _ = reply.send(self.start().await);
                    }
                    Some(Request::Stop(reply)) => {
                        self.stop().await;
                        let _ = reply.send(Ok(()));
                    }
                    Some(Request::InsertEffect(name, reply)) => {
                        let _ = reply.send(self.insert_effect(&name).await);
                    }
                    None => break,
                },
                Some(event) = events.recv() => self.on_stage_event(event).await,
            }
        }

        self.stop().await;
        debug!("Broadcast controller terminated");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn next_stage_id(&mut self) -> StageId {
        self.next_stage += 1;
        StageId(self.next_stage)
    }

    fn publish(&self) {
        let status = match &self.pipeline {
            None => BroadcastStatus::idle(),
            Some(pipeline) => BroadcastStatus {
                state: if pipeline.splice.is_some() {
                    PlaybackState::PlayingWithEffect
                } else {
                    PlaybackState::Playing
                },
                session: Some(pipeline.session.clone()),
            },
        };
        self.status.send_replace(status);
    }

    async fn start(&mut self) -> Result<()> {
        if self.pipeline.is_some() {
            debug!("Start ignored, already playing");
            return Ok(());
        }
        let generation = self.generation.load(Ordering::SeqCst);

        let song = self.catalog.song(&self.current_song).await?;
        let bits_per_sec = self.probe.probe(&song.path).await;
        let bytes_per_sec = (bits_per_sec / BITS_PER_BYTE).max(1);
        let throttle = ThrottledSource::open(self.catalog.as_ref(), &song, bytes_per_sec).await?;

        if !self.is_current(generation) {
            info!(song = %song.id, "Start cancelled by stop");
            return Err(Error::Cancelled);
        }

        let stage = ThrottleStage::spawn(
            self.next_stage_id(),
            throttle,
            self.registry.clone(),
            self.events.clone(),
        );
        info!(
            song = %song.id,
            bytes_per_sec,
            listeners = self.registry.len(),
            "🎵 Broadcast started"
        );

        self.pipeline = Some(Pipeline {
            session: PlaybackSession {
                source_id: song.id,
                bitrate_bytes_per_sec: bytes_per_sec,
                active: true,
                effect_id: None,
            },
            stage,
            splice: None,
        });
        self.publish();
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(pipeline) = self.pipeline.take() else {
            debug!("Stop ignored, nothing playing");
            return;
        };

        // dropping the feeder cancels it
        drop(pipeline.splice);
        pipeline.stage.stop().await;

        info!(song = %pipeline.session.source_id, "⏹️ Broadcast stopped");
        self.publish();
    }

    async fn insert_effect(&mut self, name: &str) -> Result<()> {
        let bytes_per_sec = match &self.pipeline {
            None => return Err(Error::NotPlaying),
            Some(pipeline) if pipeline.splice.is_some() => return Err(Error::SpliceInProgress),
            Some(pipeline) => pipeline.session.bitrate_bytes_per_sec,
        };
        let generation = self.generation.load(Ordering::SeqCst);

        let effect = self.catalog.find_effect(name).await?;
        let effect_bits = self.probe.probe(&effect.path).await;
        let window = splice_window(effect.len, bytes_per_sec, effect_bits);

        if !self.is_current(generation) {
            return Err(Error::Cancelled);
        }
        let Some(mut pipeline) = self.pipeline.take() else {
            return Err(Error::NotPlaying);
        };

        let next_id = self.next_stage_id();
        let counter = self.generation.clone();
        let (stage, result) = self
            .splicer
            .splice(pipeline.stage, next_id, bytes_per_sec, &effect, window, move || {
                counter.load(Ordering::SeqCst) != generation
            })
            .await;
        pipeline.stage = stage;

        let outcome = match result {
            Ok(operation) => {
                info!(effect = %operation.effect_id, window_bytes = operation.window, "🔊 Effect on air");
                pipeline.session.effect_id = Some(operation.effect_id.clone());
                pipeline.splice = Some(operation);
                Ok(())
            }
            Err(e) => {
                warn!(effect = %effect.id, "Effect not inserted: {}", e);
                Err(e)
            }
        };

        self.pipeline = Some(pipeline);
        self.publish();
        outcome
    }

    async fn on_stage_event(&mut self, event: StageEvent) {
        let StageEvent::Exhausted { stage } = event;

        let Some(pipeline) = self.pipeline.as_mut() else {
            return;
        };
        if pipeline.stage.id() != stage {
            debug!(stage = %stage, "Ignoring event from a retired stage");
            return;
        }

        let resumed = match pipeline.splice.take() {
            Some(operation) => {
                let attached = match operation.feeder.finish().await {
                    Some(base) => pipeline.stage.attach(base).await,
                    None => false,
                };
                if attached {
                    pipeline.session.effect_id = None;
                    info!(effect = %operation.effect_id, "Effect finished, song resumed");
                }
                attached
            }
            None => {
                info!(song = %pipeline.session.source_id, "Song finished");
                false
            }
        };

        if resumed {
            self.publish();
        } else {
            self.stop().await;
        }
    }
}
