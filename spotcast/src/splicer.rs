//! Live effect splicing
//!
//! Rewires the pipeline without dropping listeners:
//!
//! 1. a fresh stage is spawned at the current rate, wired to the broadcast;
//! 2. the playing stage is paused and
//! 3. its song is taken back, position intact;
//! 4. the mixer starts on the song and the effect;
//! 5. the mix goes to the fresh stage and the old one is stopped.
//!
//! If the mixer fails (or a stop arrives meanwhile) the fresh stage is
//! dropped and the song goes back to the old stage, every byte included.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::catalog::MediaRef;
use crate::error::{Error, Result};
use crate::mixer::{AudioMixer, Feeder, MixFailure, MixSession};
use crate::process::BoxedReader;
use crate::registry::ClientRegistry;
use crate::stage::{StageEvent, StageId, ThrottleStage};
use crate::throttle::ThrottledSource;

/// Song bytes covering the effect's playing time
///
/// `effect_len` bytes at `effect_bits_per_sec` last
/// `effect_len * 8 / effect_bits_per_sec` seconds.
pub fn splice_window(effect_len: u64, base_bytes_per_sec: u64, effect_bits_per_sec: u64) -> u64 {
    let bits = effect_bits_per_sec.max(1) as u128;
    let window = effect_len as u128 * 8 * base_bytes_per_sec as u128 / bits;
    window.min(u64::MAX as u128) as u64
}

/// An effect currently audible
pub struct SpliceOperation {
    pub effect_id: String,
    pub window: u64,
    /// Returns the song once the mix ends
    pub feeder: Feeder,
}

pub struct FxSplicer {
    mixer: AudioMixer,
    registry: ClientRegistry,
    events: mpsc::UnboundedSender<StageEvent>,
}

impl FxSplicer {
    pub fn new(
        mixer: AudioMixer,
        registry: ClientRegistry,
        events: mpsc::UnboundedSender<StageEvent>,
    ) -> Self {
        Self {
            mixer,
            registry,
            events,
        }
    }

    pub fn mixer(&self) -> &AudioMixer {
        &self.mixer
    }

    /// Splices `effect` into the song played by `active`
    ///
    /// Returns the stage feeding listeners afterwards: the new one on
    /// success, `active` otherwise. `cancelled` is checked once the mixer
    /// has answered.
    pub async fn splice(
        &self,
        active: ThrottleStage,
        next_id: StageId,
        bytes_per_sec: u64,
        effect: &MediaRef,
        window: u64,
        cancelled: impl Fn() -> bool,
    ) -> (ThrottleStage, Result<SpliceOperation>) {
        let throttle = match ThrottledSource::detached(bytes_per_sec) {
            Ok(throttle) => throttle,
            Err(e) => return (active, Err(e)),
        };
        let next = ThrottleStage::spawn(next_id, throttle, self.registry.clone(), self.events.clone());

        let Some(base) = active.detach().await else {
            // the song already ended, its stage reports exhaustion
            next.stop().await;
            return (active, Err(Error::NotPlaying));
        };

        match self.mixer.mix(base, window, &effect.path).await {
            Ok(session) if cancelled() => {
                let base = session.abort().await;
                next.stop().await;
                Self::resume(&active, base).await;
                (active, Err(Error::Cancelled))
            }
            Ok(MixSession { merged, feeder }) => {
                next.attach(merged).await;
                let old = active.id();
                active.stop().await;
                info!(effect = %effect.id, from = %old, to = %next.id(), "Effect spliced");
                (
                    next,
                    Ok(SpliceOperation {
                        effect_id: effect.id.clone(),
                        window,
                        feeder,
                    }),
                )
            }
            Err(MixFailure { error, base }) => {
                warn!(effect = %effect.id, "Splice rolled back: {}", error);
                next.stop().await;
                Self::resume(&active, base).await;
                let error = if cancelled() { Error::Cancelled } else { error };
                (active, Err(error))
            }
        }
    }

    /// Gives the song back to `stage`; a lost song ends playback
    async fn resume(stage: &ThrottleStage, base: Option<BoxedReader>) {
        let base = base.unwrap_or_else(|| Box::pin(tokio::io::empty()));
        stage.attach(base).await;
    }
}
