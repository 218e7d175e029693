//! Callbacks from the parser into the embedding player.

use crate::{Error, Manifest, Severity};

/// An event surfaced to the application, outside the normal data flow.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEvent {
	/// An `EXT-X-SESSION-DATA` entry from the master playlist.
	SessionData {
		id: String,
		value: Option<String>,
		language: Option<String>,
		uri: Option<String>,
	},
}

/// One timed-metadata payload entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataFrame {
	pub key: String,
	pub value: String,
}

/// The operations the parser needs from its embedder.
///
/// All methods have no-op defaults so tests and tools only override what
/// they observe.
pub trait PlayerInterface: Send + Sync {
	fn on_event(&self, _event: ManifestEvent) {}

	/// Recoverable errors happen during live refreshes; the presentation
	/// keeps playing from what is already indexed. Abort errors are never
	/// reported here.
	fn on_error(&self, _severity: Severity, _error: &Error) {}

	/// The manifest structure changed: new references, a duration change,
	/// or a demotion to VOD.
	fn on_manifest_updated(&self) {}

	fn update_duration(&self, _duration: f64) {}

	/// A stream failed to refresh or ran out of references and was dropped
	/// from the active set.
	fn disable_stream(&self, _stream_id: u32) {}

	/// Closed-caption channels were discovered on the video streams;
	/// the player may materialize text tracks for them.
	fn make_text_streams_for_closed_captions(&self, _manifest: &Manifest) {}

	/// DRM info appeared on a stream after the initial parse.
	fn new_drm_info(&self, _stream_id: u32) {}

	/// Timed metadata (date ranges) anchored to the presentation timeline.
	fn on_metadata(&self, _kind: &str, _start_time: f64, _end_time: Option<f64>, _frames: &[MetadataFrame]) {}

	/// Whether the player wants partial segments indexed.
	fn is_low_latency_mode(&self) -> bool {
		false
	}
}

/// A player that ignores everything. Useful for tools and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPlayer;

impl PlayerInterface for NullPlayer {}
