use std::time::Duration;

/// Tuning knobs for the parser and the live update loop.
///
/// Everything has a sensible default; construct with `Config::default()` and
/// override the fields you care about.
#[derive(Debug, Clone)]
pub struct Config {
	/// How often live media playlists are refreshed, before EWMA pacing.
	/// When `None`, the playlist target duration (or half of it in
	/// low-latency mode) is used.
	pub update_period: Option<Duration>,

	/// Presentation delay to use when the playlist carries no HOLD-BACK or
	/// PART-HOLD-BACK hint. When `None`, three target durations are used.
	pub default_presentation_delay: Option<f64>,

	/// Ignore EXT-X-PROGRAM-DATE-TIME on these stream types when deciding
	/// how to synchronize streams.
	pub ignore_program_date_time_for: Vec<crate::StreamType>,

	/// Don't guess codecs for streams whose master tag omits CODECS;
	/// probe the media instead, and fail if that doesn't resolve them.
	pub disable_codec_guessing: bool,

	/// Escalate failures during a live refresh to fatal instead of
	/// reporting them as recoverable and retrying.
	pub raise_fatal_on_update_failure: bool,

	/// Parse EXT-X-PART and EXT-X-PRELOAD-HINT tags. Without this, partial
	/// segments are ignored and only whole segments are indexed.
	pub allow_low_latency: bool,

	/// Reject live presentations outright. Embedders without a live
	/// pipeline can turn live content into a fatal error.
	pub allow_live: bool,

	/// Number of trailing segments the live edge stays behind when
	/// computing the default presentation delay.
	pub live_segments_delay: usize,

	/// Codec assumed for audio-only renditions with no CODECS attribute.
	pub default_audio_codec: String,

	/// Codec assumed for video renditions with no CODECS attribute.
	pub default_video_codec: String,

	/// Override the seekable window for live streams, in seconds.
	/// When `None`, the playlist duration is used.
	pub availability_window_override: Option<f64>,

	/// How long a failed update waits before the next attempt.
	pub update_retry_delay: Duration,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			update_period: None,
			default_presentation_delay: None,
			ignore_program_date_time_for: Vec::new(),
			disable_codec_guessing: false,
			raise_fatal_on_update_failure: false,
			allow_low_latency: true,
			allow_live: true,
			live_segments_delay: 3,
			default_audio_codec: "mp4a.40.2".to_string(),
			default_video_codec: "avc1.42E01E".to_string(),
			availability_window_override: None,
			update_retry_delay: Duration::from_millis(100),
		}
	}
}
