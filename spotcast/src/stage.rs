//! Pump task draining a [`ThrottledSource`] into the registry

use std::fmt;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::process::BoxedReader;
use crate::registry::ClientRegistry;
use crate::throttle::ThrottledSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(pub u64);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage-{}", self.0)
    }
}

/// Notifications sent by stages to their owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// The attached input reached EOF; the stage waits for a new one
    Exhausted { stage: StageId },
}

enum StageControl {
    Detach(oneshot::Sender<Option<BoxedReader>>),
    Attach(BoxedReader),
    Stop,
}

/// Handle on a running pump
///
/// While an input is attached, the task reads paced chunks and broadcasts
/// them. Detached, it sits idle until a new input arrives. Dropping the
/// handle ends the task.
pub struct ThrottleStage {
    id: StageId,
    control: mpsc::Sender<StageControl>,
    task: JoinHandle<()>,
}

impl ThrottleStage {
    pub fn spawn(
        id: StageId,
        throttle: ThrottledSource,
        registry: ClientRegistry,
        events: mpsc::UnboundedSender<StageEvent>,
    ) -> Self {
        let (control, rx) = mpsc::channel(4);
        let task = tokio::spawn(pump(id, throttle, registry, rx, events));
        Self { id, control, task }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    /// Pauses the pump and takes its input back
    ///
    /// `None` when the input already ended or the task is gone.
    pub async fn detach(&self) -> Option<BoxedReader> {
        let (tx, rx) = oneshot::channel();
        self.control.send(StageControl::Detach(tx)).await.ok()?;
        rx.await.ok().flatten()
    }

    /// Resumes the pump on `source`; false if the task is gone
    pub async fn attach(&self, source: BoxedReader) -> bool {
        self.control
            .send(StageControl::Attach(source))
            .await
            .is_ok()
    }

    /// Stops the pump and waits for the task to end
    pub async fn stop(self) {
        let _ = self.control.send(StageControl::Stop).await;
        if let Err(e) = self.task.await {
            warn!(stage = %self.id, "Stage task ended abnormally: {}", e);
        }
    }
}

async fn pump(
    id: StageId,
    mut throttle: ThrottledSource,
    registry: ClientRegistry,
    mut control: mpsc::Receiver<StageControl>,
    events: mpsc::UnboundedSender<StageEvent>,
) {
    debug!(stage = %id, bytes_per_sec = throttle.bytes_per_sec(), "Stage started");
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let attached = throttle.is_attached();
        tokio::select! {
            biased;

            ctl = control.recv() => match ctl {
                Some(StageControl::Detach(reply)) => {
                    let _ = reply.send(throttle.detach());
                }
                Some(StageControl::Attach(source)) => throttle.attach(source),
                Some(StageControl::Stop) | None => {
                    throttle.stop();
                    break;
                }
            },

            read = throttle.read(&mut buf), if attached => match read {
                Ok(0) => {
                    debug!(stage = %id, "Stage input exhausted");
                    throttle.stop();
                    let _ = events.send(StageEvent::Exhausted { stage: id });
                }
                Ok(n) => {
                    registry.broadcast(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    warn!(stage = %id, "Stage input failed: {}", e);
                    throttle.stop();
                    let _ = events.send(StageEvent::Exhausted { stage: id });
                }
            },
        }
    }

    debug!(stage = %id, "Stage stopped");
}
