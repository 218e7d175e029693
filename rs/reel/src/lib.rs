//! An HLS (HTTP Live Streaming) manifest parser and live-playlist updater.
//!
//! `reel` ingests an M3U8 master playlist, discovers the renditions it
//! describes, lazily loads each referenced media playlist, and produces a
//! normalized presentation model: a timeline, variants (audio and video
//! pairings), text and image streams, and per-stream segment indexes. For
//! live content it keeps refreshing media playlists, merging new segment
//! references, evicting expired ones, and demoting the presentation to VOD
//! when the end-of-list marker appears.
//!
//! Playback, decryption, rendering, and adaptation live in the embedding
//! player. The embedder supplies networking through [fetch::Fetch] and
//! receives callbacks through [player::PlayerInterface].

mod config;
mod error;
mod master;
mod mime;
mod model;
mod parser;
mod sync;
mod update;

pub mod drm;
pub mod fetch;
pub mod media;
pub mod player;
pub mod playlist;
pub mod steering;

pub use config::*;
pub use error::*;
pub use master::{MasterOutcome, MasterPlaylistBuilder, StreamSetup, MUXED_AUDIO_SCHEME};
pub use model::*;
pub use parser::*;
pub use player::{ManifestEvent, MetadataFrame, NullPlayer, PlayerInterface};
pub use sync::{StreamSynchronizer, SyncTarget};
pub use update::{blocking_reload_uri, Ewma, UpdatePacer};
