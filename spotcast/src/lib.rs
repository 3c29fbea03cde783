//! # spotcast - Live audio broadcast with effect splicing
//!
//! One song is paced to its real playback speed and fanned out to every
//! connected listener. An operator can start and stop the broadcast and
//! overlay short sound effects on the live stream without disconnecting
//! anyone.
//!
//! ## Architecture
//!
//! ```text
//! BitrateProbe ─▶ ThrottledSource ─▶ ThrottleStage ─▶ ClientRegistry ─▶ listeners
//!                        │                 ▲
//!                        └──▶ AudioMixer ──┘   (while an effect plays)
//! ```
//!
//! - [`registry`] : listeners and non-blocking fan-out
//! - [`probe`] : bitrate detection through the audio tool
//! - [`throttle`] : paced reader
//! - [`stage`] : pump task feeding the registry
//! - [`mixer`], [`splicer`] : live effect overlay and rollback
//! - [`controller`] : actor owning the pipeline
//! - [`api`], [`server_ext`] : HTTP routes (feature `server`)
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use spotcast::{BroadcastController, EngineSettings, SystemRunner};
//!
//! #[tokio::main]
//! async fn main() -> spotcast::Result<()> {
//!     let controller = BroadcastController::spawn(EngineSettings::default(), Arc::new(SystemRunner));
//!     let _listener = controller.connect_listener();
//!
//!     controller.start().await?;
//!     controller.insert_effect("applause").await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod command;
pub mod config_ext;
pub mod controller;
pub mod error;
pub mod mixer;
pub mod probe;
pub mod process;
pub mod registry;
pub mod splicer;
pub mod stage;
pub mod throttle;

#[cfg(feature = "server")]
pub mod api;
#[cfg(feature = "server")]
pub mod server_ext;

pub use catalog::{FsCatalog, MediaCatalog, MediaRef};
pub use command::Command;
pub use config_ext::{EngineSettings, SpotcastConfigExt};
pub use controller::{BroadcastController, BroadcastStatus, PlaybackSession, PlaybackState};
pub use error::{Error, Result};
pub use mixer::{AudioMixer, MixerSettings};
pub use probe::BitrateProbe;
pub use process::{BoxedReader, ProcessRunner, SystemRunner, ToolExit, ToolProcess, ToolSpec};
pub use registry::{ClientRegistry, ListenerId, ListenerInfo, ListenerStream};
pub use throttle::ThrottledSource;

#[cfg(feature = "server")]
pub use api::{SpotcastState, create_api_router, create_router};
#[cfg(feature = "server")]
pub use server_ext::SpotcastExt;
