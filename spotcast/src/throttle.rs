//! Real-time pacing
//!
//! Songs are read from disk far faster than they play. [`ThrottledSource`]
//! holds each read back until the listener would have reached that byte at
//! the probed bitrate.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::io::{AsyncRead, ReadBuf};
use tokio::time::{Instant, Sleep};

use crate::catalog::{MediaCatalog, MediaRef};
use crate::error::{Error, Result};
use crate::process::BoxedReader;

/// Reads per second once the rate is reached
const READS_PER_SEC: u64 = 10;

/// AsyncRead adapter pacing an inner source to `bytes_per_sec`.
///
/// Byte `n` of the current input is never handed out before
/// `anchor + n / bytes_per_sec`. Each read returns at most a tenth of a
/// second of audio. The anchor is reset whenever a new input is attached,
/// so a paused source does not burst when it resumes.
///
/// Without an input the reader is at EOF.
pub struct ThrottledSource {
    inner: Option<BoxedReader>,
    bytes_per_sec: u64,
    anchor: Instant,
    delivered: u64,
    scratch: Vec<u8>,
    sleep: Pin<Box<Sleep>>,
}

impl ThrottledSource {
    /// Paces `source` to `bytes_per_sec`, which must be positive
    pub fn new(source: BoxedReader, bytes_per_sec: u64) -> Result<Self> {
        let mut throttle = Self::detached(bytes_per_sec)?;
        throttle.attach(source);
        Ok(throttle)
    }

    /// A throttle with no input yet
    pub fn detached(bytes_per_sec: u64) -> Result<Self> {
        if bytes_per_sec == 0 {
            return Err(Error::InvalidBitrate(bytes_per_sec));
        }
        let chunk = (bytes_per_sec / READS_PER_SEC).max(1) as usize;
        let now = Instant::now();
        Ok(Self {
            inner: None,
            bytes_per_sec,
            anchor: now,
            delivered: 0,
            scratch: vec![0; chunk],
            sleep: Box::pin(tokio::time::sleep_until(now)),
        })
    }

    /// Opens `media` from the catalog and paces it
    pub async fn open(
        catalog: &dyn MediaCatalog,
        media: &MediaRef,
        bytes_per_sec: u64,
    ) -> Result<Self> {
        if bytes_per_sec == 0 {
            return Err(Error::InvalidBitrate(bytes_per_sec));
        }
        let source = catalog.open(media).await?;
        Self::new(source, bytes_per_sec)
    }

    pub fn bytes_per_sec(&self) -> u64 {
        self.bytes_per_sec
    }

    /// Bytes handed out since the current input was attached
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    /// Ends the stream and drops the input
    pub fn stop(&mut self) {
        self.inner = None;
    }

    /// Removes the input, keeping its read position
    pub fn detach(&mut self) -> Option<BoxedReader> {
        self.inner.take()
    }

    /// Resumes pacing on `source` from now
    pub fn attach(&mut self, source: BoxedReader) {
        self.inner = Some(source);
        self.anchor = Instant::now();
        self.delivered = 0;
    }

    fn due(&self) -> Instant {
        let secs = self.delivered as f64 / self.bytes_per_sec as f64;
        self.anchor + Duration::from_secs_f64(secs)
    }
}

impl AsyncRead for ThrottledSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.inner.is_none() || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let due = this.due();
        if Instant::now() < due {
            if this.sleep.deadline() != due {
                this.sleep.as_mut().reset(due);
            }
            ready!(this.sleep.as_mut().poll(cx));
        }

        let limit = this.scratch.len().min(buf.remaining());
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(Ok(()));
        };
        let mut chunk = ReadBuf::new(&mut this.scratch[..limit]);
        ready!(inner.as_mut().poll_read(cx, &mut chunk))?;

        let filled = chunk.filled();
        if filled.is_empty() {
            // EOF of the input ends the stream
            this.inner = None;
        } else {
            this.delivered += filled.len() as u64;
            buf.put_slice(filled);
        }
        Poll::Ready(Ok(()))
    }
}
