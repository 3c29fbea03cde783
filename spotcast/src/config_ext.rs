//! Extension pour intégrer SpotCast dans spotconfig
//!
//! Ce module fournit le trait `SpotcastConfigExt` qui ajoute à
//! `spotconfig::Config` les réglages du moteur de diffusion, et
//! [`EngineSettings::from_config`] qui les rassemble.
//!
//! # Auto-persist des valeurs par défaut
//!
//! Les getters enregistrent la valeur par défaut dans la configuration si
//! elle n'existe pas encore.
//!
//! # Exemple
//!
//! ```no_run
//! use spotconfig::get_config;
//! use spotcast::SpotcastConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! println!("Now playing {}", config.get_spotcast_current_song()?);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde_yaml::{Number, Value};
use spotconfig::Config;

use crate::mixer::MixerSettings;
use crate::probe::DEFAULT_FALLBACK_BITRATE;
use crate::registry::DEFAULT_LISTENER_BUFFER;

pub const DEFAULT_SONGS_DIR: &str = "audio/songs";
pub const DEFAULT_FX_DIR: &str = "audio/fx";
pub const DEFAULT_CURRENT_SONG: &str = "conversation.mp3";
pub const DEFAULT_MEDIA_TYPE: &str = "mp3";
pub const DEFAULT_TOOL_PROGRAM: &str = "sox";
pub const DEFAULT_SONG_VOLUME: &str = "0.99";
pub const DEFAULT_FX_VOLUME: &str = "0.1";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_MIXER_STARTUP_TIMEOUT_MS: u64 = 2_000;

const SONGS_DIR: &[&str] = &["spotcast", "audio", "songs_directory"];
const FX_DIR: &[&str] = &["spotcast", "audio", "fx_directory"];
const CURRENT_SONG: &[&str] = &["spotcast", "audio", "current_song"];
const MEDIA_TYPE: &[&str] = &["spotcast", "audio", "media_type"];
const FALLBACK_BITRATE: &[&str] = &["spotcast", "stream", "fallback_bitrate"];
const LISTENER_BUFFER: &[&str] = &["spotcast", "stream", "listener_buffer_chunks"];
const PROBE_TIMEOUT: &[&str] = &["spotcast", "probe", "timeout_ms"];
const TOOL_PROGRAM: &[&str] = &["spotcast", "mixer", "program"];
const SONG_VOLUME: &[&str] = &["spotcast", "mixer", "song_volume"];
const FX_VOLUME: &[&str] = &["spotcast", "mixer", "fx_volume"];
const MIXER_STARTUP_TIMEOUT: &[&str] = &["spotcast", "mixer", "startup_timeout_ms"];

/// Trait d'extension pour les réglages SpotCast
pub trait SpotcastConfigExt {
    /// Répertoire des chansons (créé si besoin)
    fn get_spotcast_songs_dir(&self) -> Result<String>;

    /// Répertoire des effets sonores (créé si besoin)
    fn get_spotcast_fx_dir(&self) -> Result<String>;

    /// Nom du fichier diffusé au démarrage
    fn get_spotcast_current_song(&self) -> Result<String>;
    fn set_spotcast_current_song(&self, song: &str) -> Result<()>;

    /// Type passé à l'outil audio avec `-t`
    fn get_spotcast_media_type(&self) -> Result<String>;

    /// Débit (bits/s) utilisé quand la sonde échoue
    fn get_spotcast_fallback_bitrate(&self) -> Result<u64>;

    /// Nombre de blocs en attente par auditeur
    fn get_spotcast_listener_buffer(&self) -> Result<usize>;

    fn get_spotcast_probe_timeout(&self) -> Result<Duration>;

    /// Programme de l'outil audio (`sox`)
    fn get_spotcast_tool_program(&self) -> Result<String>;

    fn get_spotcast_song_volume(&self) -> Result<String>;
    fn get_spotcast_fx_volume(&self) -> Result<String>;

    fn get_spotcast_mixer_startup_timeout(&self) -> Result<Duration>;
}

fn string_or_default(config: &Config, path: &[&str], default: &str) -> Result<String> {
    match config.get_value(path) {
        Ok(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        // un volume écrit 0.5 en YAML arrive comme un nombre
        Ok(Value::Number(n)) => Ok(n.to_string()),
        _ => {
            config.set_value(path, Value::String(default.to_string()))?;
            Ok(default.to_string())
        }
    }
}

fn u64_or_default(config: &Config, path: &[&str], default: u64) -> Result<u64> {
    if let Ok(Value::Number(n)) = config.get_value(path) {
        if let Some(v) = n.as_u64().filter(|v| *v > 0) {
            return Ok(v);
        }
    }
    config.set_value(path, Value::Number(Number::from(default)))?;
    Ok(default)
}

impl SpotcastConfigExt for Config {
    fn get_spotcast_songs_dir(&self) -> Result<String> {
        self.get_managed_dir(SONGS_DIR, DEFAULT_SONGS_DIR)
    }

    fn get_spotcast_fx_dir(&self) -> Result<String> {
        self.get_managed_dir(FX_DIR, DEFAULT_FX_DIR)
    }

    fn get_spotcast_current_song(&self) -> Result<String> {
        string_or_default(self, CURRENT_SONG, DEFAULT_CURRENT_SONG)
    }

    fn set_spotcast_current_song(&self, song: &str) -> Result<()> {
        self.set_value(CURRENT_SONG, Value::String(song.to_string()))
    }

    fn get_spotcast_media_type(&self) -> Result<String> {
        string_or_default(self, MEDIA_TYPE, DEFAULT_MEDIA_TYPE)
    }

    fn get_spotcast_fallback_bitrate(&self) -> Result<u64> {
        u64_or_default(self, FALLBACK_BITRATE, DEFAULT_FALLBACK_BITRATE)
    }

    fn get_spotcast_listener_buffer(&self) -> Result<usize> {
        u64_or_default(self, LISTENER_BUFFER, DEFAULT_LISTENER_BUFFER as u64).map(|v| v as usize)
    }

    fn get_spotcast_probe_timeout(&self) -> Result<Duration> {
        u64_or_default(self, PROBE_TIMEOUT, DEFAULT_PROBE_TIMEOUT_MS).map(Duration::from_millis)
    }

    fn get_spotcast_tool_program(&self) -> Result<String> {
        string_or_default(self, TOOL_PROGRAM, DEFAULT_TOOL_PROGRAM)
    }

    fn get_spotcast_song_volume(&self) -> Result<String> {
        string_or_default(self, SONG_VOLUME, DEFAULT_SONG_VOLUME)
    }

    fn get_spotcast_fx_volume(&self) -> Result<String> {
        string_or_default(self, FX_VOLUME, DEFAULT_FX_VOLUME)
    }

    fn get_spotcast_mixer_startup_timeout(&self) -> Result<Duration> {
        u64_or_default(self, MIXER_STARTUP_TIMEOUT, DEFAULT_MIXER_STARTUP_TIMEOUT_MS)
            .map(Duration::from_millis)
    }
}

/// Everything the broadcast engine needs to run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub songs_dir: PathBuf,
    pub fx_dir: PathBuf,
    pub current_song: String,
    /// Bits per second assumed when probing fails
    pub fallback_bitrate: u64,
    pub listener_buffer_chunks: usize,
    pub probe_timeout: Duration,
    pub mixer: MixerSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            songs_dir: PathBuf::from(DEFAULT_SONGS_DIR),
            fx_dir: PathBuf::from(DEFAULT_FX_DIR),
            current_song: DEFAULT_CURRENT_SONG.to_string(),
            fallback_bitrate: DEFAULT_FALLBACK_BITRATE,
            listener_buffer_chunks: DEFAULT_LISTENER_BUFFER,
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            mixer: MixerSettings::default(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            songs_dir: PathBuf::from(config.get_spotcast_songs_dir()?),
            fx_dir: PathBuf::from(config.get_spotcast_fx_dir()?),
            current_song: config.get_spotcast_current_song()?,
            fallback_bitrate: config.get_spotcast_fallback_bitrate()?,
            listener_buffer_chunks: config.get_spotcast_listener_buffer()?,
            probe_timeout: config.get_spotcast_probe_timeout()?,
            mixer: MixerSettings {
                program: config.get_spotcast_tool_program()?,
                media_type: config.get_spotcast_media_type()?,
                song_volume: config.get_spotcast_song_volume()?,
                fx_volume: config.get_spotcast_fx_volume()?,
                startup_timeout: config.get_spotcast_mixer_startup_timeout()?,
            },
        })
    }
}
