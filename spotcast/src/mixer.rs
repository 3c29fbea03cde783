//! Mixing an effect over the live song with the audio tool
//!
//! The song is streamed to the tool's stdin by a feeder task while the effect
//! is read from disk:
//!
//! ```text
//! sox -t mp3 -v 0.99 -m - -t mp3 -v 0.1 <effect> -t mp3 -
//! ```
//!
//! The feeder only forwards a window of the song matching the effect's
//! length, then closes stdin so the tool finishes and the song can resume.
//! Every byte it takes from the song is journaled, so a failed or cancelled
//! mix can put the song back exactly where it was.

use std::io::{self, Cursor};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, ReadBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::process::{BoxedReader, BoxedWriter, ProcessRunner, ToolExit, ToolProcess, ToolSpec};

/// Tool invocation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct MixerSettings {
    pub program: String,
    /// Container type passed to `-t`
    pub media_type: String,
    pub song_volume: String,
    pub fx_volume: String,
    /// Delay allowed for the first mixed bytes
    pub startup_timeout: Duration,
}

impl Default for MixerSettings {
    fn default() -> Self {
        Self {
            program: "sox".to_string(),
            media_type: "mp3".to_string(),
            song_volume: "0.99".to_string(),
            fx_volume: "0.1".to_string(),
            startup_timeout: Duration::from_secs(2),
        }
    }
}

/// A mix that produced audio
pub struct MixSession {
    /// Mixed stream, starting with the first bytes seen at startup
    pub merged: BoxedReader,
    pub feeder: Feeder,
}

impl MixSession {
    /// Kills the mixer and returns the song rewound to the splice point
    pub async fn abort(self) -> Option<BoxedReader> {
        drop(self.merged);
        self.feeder.rollback().await
    }
}

/// A mix that never started
pub struct MixFailure {
    pub error: Error,
    /// The song with every consumed byte replayed first, if it survived
    pub base: Option<BoxedReader>,
}

struct FeedOutcome {
    base: BoxedReader,
    journal: Vec<u8>,
    /// Tail of the journal the mixer never accepted
    unsent: usize,
}

/// Handle on the task feeding the song into the mixer
///
/// Dropping it cancels the feed.
pub struct Feeder {
    cancel: CancellationToken,
    _guard: DropGuard,
    task: JoinHandle<FeedOutcome>,
}

impl Feeder {
    /// Song advanced past the mixed window
    ///
    /// Bytes taken from the song but refused by the mixer come first.
    pub async fn finish(self) -> Option<BoxedReader> {
        self.cancel.cancel();
        match self.task.await {
            Ok(FeedOutcome {
                base,
                journal,
                unsent,
            }) => {
                let mixed = journal.len() - unsent;
                debug!(mixed_bytes = mixed, unsent, "Feeder finished");
                if unsent == 0 {
                    Some(base)
                } else {
                    let tail = journal[mixed..].to_vec();
                    Some(Box::pin(Cursor::new(tail).chain(base)))
                }
            }
            Err(e) => {
                warn!("Feeder task failed: {}", e);
                None
            }
        }
    }

    /// Song rewound to where the feeder started
    pub async fn rollback(self) -> Option<BoxedReader> {
        self.cancel.cancel();
        match self.task.await {
            Ok(FeedOutcome { base, journal, .. }) if journal.is_empty() => Some(base),
            Ok(FeedOutcome { base, journal, .. }) => {
                debug!(replayed = journal.len(), "Replaying bytes taken by the mixer");
                Some(Box::pin(Cursor::new(journal).chain(base)))
            }
            Err(e) => {
                warn!("Feeder task failed, song position lost: {}", e);
                None
            }
        }
    }
}

/// Mixer output that keeps the tool alive while it is read
struct MixerOutput {
    reader: BoxedReader,
    _exit: BoxFuture<'static, io::Result<ToolExit>>,
}

impl AsyncRead for MixerOutput {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.reader.as_mut().poll_read(cx, buf)
    }
}

/// Runs the audio tool to overlay effects on the song
pub struct AudioMixer {
    runner: Arc<dyn ProcessRunner>,
    settings: MixerSettings,
}

impl AudioMixer {
    pub fn new(runner: Arc<dyn ProcessRunner>, settings: MixerSettings) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &MixerSettings {
        &self.settings
    }

    /// Tool arguments: song on stdin, effect from `effect`, mix on stdout
    pub fn args(&self, effect: &Path) -> Vec<String> {
        let s = &self.settings;
        vec![
            "-t".to_string(),
            s.media_type.clone(),
            "-v".to_string(),
            s.song_volume.clone(),
            "-m".to_string(),
            "-".to_string(),
            "-t".to_string(),
            s.media_type.clone(),
            "-v".to_string(),
            s.fx_volume.clone(),
            effect.display().to_string(),
            "-t".to_string(),
            s.media_type.clone(),
            "-".to_string(),
        ]
    }

    /// Starts mixing `effect` over `window` bytes of `base`
    ///
    /// Succeeds once the tool has produced its first bytes. On failure the
    /// tool is killed and the song comes back untouched.
    pub async fn mix(
        &self,
        base: BoxedReader,
        window: u64,
        effect: &Path,
    ) -> Result<MixSession, MixFailure> {
        let spec = ToolSpec::new(self.settings.program.as_str(), self.args(effect)).with_stdin();

        let ToolProcess {
            stdin,
            mut stdout,
            stderr,
            exit,
        } = match self.runner.spawn(spec).await {
            Ok(process) => process,
            Err(e) => {
                return Err(MixFailure {
                    error: Error::mixer(format!("spawn failed: {}", e)),
                    base: Some(base),
                });
            }
        };
        let Some(stdin) = stdin else {
            return Err(MixFailure {
                error: Error::mixer("mixer has no stdin pipe"),
                base: Some(base),
            });
        };

        tokio::spawn(drain_stderr(stderr));

        let cancel = CancellationToken::new();
        let feeder = Feeder {
            cancel: cancel.clone(),
            _guard: cancel.clone().drop_guard(),
            task: tokio::spawn(feed(base, stdin, window, cancel)),
        };

        let timeout = self.settings.startup_timeout;
        let mut first = vec![0u8; 16 * 1024];
        let startup = tokio::time::timeout(timeout, stdout.read(&mut first)).await;
        let reason = match startup {
            Ok(Ok(n)) if n > 0 => {
                first.truncate(n);
                info!(
                    effect = %effect.display(),
                    window_bytes = window,
                    "Mixer started"
                );
                let merged = MixerOutput {
                    reader: Box::pin(Cursor::new(first).chain(stdout)),
                    _exit: exit,
                };
                return Ok(MixSession {
                    merged: Box::pin(merged),
                    feeder,
                });
            }
            Ok(Ok(_)) => "mixer closed its output without audio".to_string(),
            Ok(Err(e)) => format!("reading mixer output: {}", e),
            Err(_) => format!("no mixer output within {:?}", timeout),
        };

        // kills the tool
        drop(stdout);
        drop(exit);

        let base = feeder.rollback().await;
        Err(MixFailure {
            error: Error::MixerFailure(reason),
            base,
        })
    }
}

async fn feed(
    mut base: BoxedReader,
    mut stdin: BoxedWriter,
    window: u64,
    cancel: CancellationToken,
) -> FeedOutcome {
    let mut journal = Vec::new();
    let mut buf = vec![0u8; 16 * 1024];
    let mut fed = 0u64;
    let mut unsent = 0;

    while fed < window {
        let want = (window - fed).min(buf.len() as u64) as usize;
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = base.read(&mut buf[..want]) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Reading song for the mixer failed: {}", e);
                    break;
                }
            },
        };
        journal.extend_from_slice(&buf[..n]);
        fed += n as u64;

        let written = tokio::select! {
            _ = cancel.cancelled() => {
                unsent = n;
                break;
            }
            written = stdin.write_all(&buf[..n]) => written,
        };
        if let Err(e) = written {
            debug!("Mixer stopped accepting input: {}", e);
            unsent = n;
            break;
        }
    }

    // closing stdin lets the tool finish the mix
    drop(stdin);
    FeedOutcome {
        base,
        journal,
        unsent,
    }
}

async fn drain_stderr(stderr: BoxedReader) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "spotcast::mixer::tool", "{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_feeder(base: &[u8], stdin: BoxedWriter, window: u64) -> Feeder {
        let cancel = CancellationToken::new();
        let base: BoxedReader = Box::pin(Cursor::new(base.to_vec()));
        Feeder {
            cancel: cancel.clone(),
            _guard: cancel.clone().drop_guard(),
            task: tokio::spawn(feed(base, stdin, window, cancel)),
        }
    }

    #[tokio::test]
    async fn test_refused_bytes_are_played_after_the_mix() {
        // the mixer side is gone, every write fails
        let (stdin, mixer_side) = tokio::io::duplex(64);
        drop(mixer_side);

        let feeder = spawn_feeder(b"0123456789", Box::pin(stdin), 4);
        let mut rest = Vec::new();
        feeder
            .finish()
            .await
            .unwrap()
            .read_to_end(&mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"0123456789");
    }

    #[tokio::test]
    async fn test_finish_skips_the_mixed_window() {
        let (stdin, mut mixer_side) = tokio::io::duplex(64);
        let feeder = spawn_feeder(b"0123456789", Box::pin(stdin), 4);

        let mut mixed = Vec::new();
        mixer_side.read_to_end(&mut mixed).await.unwrap();
        assert_eq!(mixed, b"0123");

        let mut rest = Vec::new();
        feeder
            .finish()
            .await
            .unwrap()
            .read_to_end(&mut rest)
            .await
            .unwrap();
        assert_eq!(rest, b"456789");
    }

    #[tokio::test]
    async fn test_rollback_replays_the_window() {
        let (stdin, mut mixer_side) = tokio::io::duplex(64);
        let feeder = spawn_feeder(b"0123456789", Box::pin(stdin), 4);

        let mut mixed = Vec::new();
        mixer_side.read_to_end(&mut mixed).await.unwrap();

        let mut all = Vec::new();
        feeder
            .rollback()
            .await
            .unwrap()
            .read_to_end(&mut all)
            .await
            .unwrap();
        assert_eq!(all, b"0123456789");
    }

    #[test]
    fn test_args_follow_tool_layout() {
        let mixer = AudioMixer::new(
            Arc::new(crate::process::SystemRunner),
            MixerSettings::default(),
        );
        let args = mixer.args(Path::new("/fx/applause.mp3"));
        assert_eq!(
            args.join(" "),
            "-t mp3 -v 0.99 -m - -t mp3 -v 0.1 /fx/applause.mp3 -t mp3 -"
        );
    }
}
