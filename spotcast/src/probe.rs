//! Encoded bitrate detection
//!
//! The probe asks the audio tool for a file's bitrate (`sox --i -B <file>`).
//! It never fails: any problem yields the configured fallback.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::process::{ProcessRunner, ToolProcess, ToolSpec};

/// Bitrate used when the probe cannot answer
pub const DEFAULT_FALLBACK_BITRATE: u64 = 128_000;

/// Queries the audio tool for a file's bitrate in bits per second
pub struct BitrateProbe {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    fallback_bps: u64,
    timeout: Duration,
}

impl BitrateProbe {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        program: impl Into<String>,
        fallback_bps: u64,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            fallback_bps: if fallback_bps == 0 {
                DEFAULT_FALLBACK_BITRATE
            } else {
                fallback_bps
            },
            timeout,
        }
    }

    pub fn fallback(&self) -> u64 {
        self.fallback_bps
    }

    /// Bitrate of `path` in bits per second, or the fallback
    pub async fn probe(&self, path: &Path) -> u64 {
        match tokio::time::timeout(self.timeout, self.query(path)).await {
            Ok(Ok(bps)) => {
                debug!(file = %path.display(), bitrate = bps, "Bitrate probed");
                bps
            }
            Ok(Err(reason)) => {
                warn!(
                    file = %path.display(),
                    fallback = self.fallback_bps,
                    "Bitrate probe failed: {}", reason
                );
                self.fallback_bps
            }
            Err(_) => {
                warn!(
                    file = %path.display(),
                    fallback = self.fallback_bps,
                    "Bitrate probe timed out after {:?}", self.timeout
                );
                self.fallback_bps
            }
        }
    }

    async fn query(&self, path: &Path) -> std::result::Result<u64, String> {
        let spec = ToolSpec::new(
            self.program.as_str(),
            ["--i".to_string(), "-B".to_string(), path.display().to_string()],
        );
        let ToolProcess {
            mut stdout,
            mut stderr,
            exit,
            ..
        } = self
            .runner
            .spawn(spec)
            .await
            .map_err(|e| format!("spawn failed: {}", e))?;

        // Both pipes must be drained before waiting, or a chatty tool blocks
        let mut out = String::new();
        let mut err = String::new();
        let (out_res, err_res) = tokio::join!(
            stdout.read_to_string(&mut out),
            stderr.read_to_string(&mut err)
        );
        out_res.map_err(|e| format!("reading stdout: {}", e))?;
        err_res.map_err(|e| format!("reading stderr: {}", e))?;

        let status = exit.await.map_err(|e| format!("waiting for exit: {}", e))?;

        if out.trim().is_empty() && !err.trim().is_empty() {
            return Err(format!("tool reported: {}", err.trim()));
        }
        if !status.success {
            return Err(format!("tool exited with code {:?}", status.code));
        }

        parse_bitrate(&out).ok_or_else(|| format!("unparsable output {:?}", out.trim()))
    }
}

/// Parses the tool's bitrate notation
///
/// `"128k"` is 128000, `"1.5M"` is 1500000, plain integers are taken as is.
/// Zero and anything else yield `None`.
pub fn parse_bitrate(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Ok(n) = text.parse::<u64>() {
        return (n > 0).then_some(n);
    }

    let (number, factor) = match text.char_indices().last()? {
        (i, 'k') | (i, 'K') => (&text[..i], 1_000f64),
        (i, 'M') => (&text[..i], 1_000_000f64),
        _ => return None,
    };

    let value = number.trim().parse::<f64>().ok()? * factor;
    if value.is_finite() && value >= 1.0 {
        Some(value.round() as u64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kilo_shorthand() {
        assert_eq!(parse_bitrate("128k"), Some(128_000));
        assert_eq!(parse_bitrate("  1k  "), Some(1_000));
        assert_eq!(parse_bitrate("192k\n"), Some(192_000));
        assert_eq!(parse_bitrate("44.1k"), Some(44_100));
    }

    #[test]
    fn test_parse_mega_and_plain() {
        assert_eq!(parse_bitrate("1.5M"), Some(1_500_000));
        assert_eq!(parse_bitrate("320000"), Some(320_000));
    }

    #[test]
    fn test_parse_rejects_garbage_and_zero() {
        assert_eq!(parse_bitrate(""), None);
        assert_eq!(parse_bitrate("0"), None);
        assert_eq!(parse_bitrate("0k"), None);
        assert_eq!(parse_bitrate("fast"), None);
        assert_eq!(parse_bitrate("k"), None);
        assert_eq!(parse_bitrate("-3k"), None);
    }
}
