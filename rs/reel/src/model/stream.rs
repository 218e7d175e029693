use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crate::drm::DrmInfo;

use super::SegmentIndex;

/// The four kinds of renditions a presentation can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
	Audio,
	Video,
	Text,
	Image,
}

impl StreamType {
	pub fn as_str(&self) -> &'static str {
		match self {
			StreamType::Audio => "audio",
			StreamType::Video => "video",
			StreamType::Text => "text",
			StreamType::Image => "image",
		}
	}
}

/// A normalized rendition descriptor.
///
/// Emitted skeletal by the master-playlist builder; the media-playlist load
/// fills in the derived attributes and the segment index.
#[derive(Debug, Clone, Default)]
pub struct Stream {
	pub id: u32,
	pub ty: Option<StreamType>,
	pub mime_type: String,
	pub codecs: String,
	pub language: String,
	pub label: Option<String>,
	pub primary: bool,
	pub bandwidth: Option<u64>,
	pub width: Option<u32>,
	pub height: Option<u32>,
	pub frame_rate: Option<f64>,
	/// Transfer characteristics: `PQ` or `HLG` when the rendition is HDR.
	pub hdr: Option<String>,
	pub color_gamut: Option<String>,
	/// `REQ-VIDEO-LAYOUT`, e.g. `CH-STEREO`.
	pub video_layout: Option<String>,
	pub channels_count: Option<u32>,
	pub audio_sampling_rate: Option<u32>,
	pub spatial_audio: bool,
	pub roles: Vec<String>,
	pub forced: bool,
	/// Closed-caption channel to language, e.g. `CC1 -> en`.
	pub closed_captions: BTreeMap<String, String>,
	/// Thumbnail grid layout for image streams, e.g. `5x4`.
	pub tiles_layout: Option<String>,
	pub drm_infos: Vec<DrmInfo>,
	/// Hex-encoded key ids gathered from key tags and init segments.
	pub key_ids: BTreeSet<String>,
	pub group_id: Option<String>,
	/// True for I-frame trick-play renditions.
	pub trick_play: bool,
	/// The I-frame rendition paired with this full-rate video stream.
	pub trick_mode_video: Option<SharedStream>,
	/// `None` until the stream is lazily loaded, and again after
	/// `close_segment_index`.
	pub segment_index: Option<SegmentIndex>,
}

impl Stream {
	pub fn new(id: u32, ty: StreamType) -> Self {
		Self {
			id,
			ty: Some(ty),
			..Default::default()
		}
	}

	pub fn is_audio(&self) -> bool {
		self.ty == Some(StreamType::Audio)
	}

	pub fn is_video(&self) -> bool {
		self.ty == Some(StreamType::Video)
	}

	/// Release the segment references owned by this stream.
	pub fn close_segment_index(&mut self) {
		self.segment_index = None;
	}
}

/// A stream shared between the manifest handed to the embedder and the
/// parser that keeps refreshing it.
pub type SharedStream = Arc<Mutex<Stream>>;

pub fn shared(stream: Stream) -> SharedStream {
	Arc::new(Mutex::new(stream))
}

/// A playable pairing of at most one audio and one video rendition.
#[derive(Debug, Clone, Default)]
pub struct Variant {
	pub id: u32,
	pub language: String,
	pub primary: bool,
	pub audio: Option<SharedStream>,
	pub video: Option<SharedStream>,
	/// Peak bandwidth of the pairing, in bits per second.
	pub bandwidth: u64,
	pub drm_infos: Vec<DrmInfo>,
	pub allowed_by_application: bool,
	pub allowed_by_key_system: bool,
}

impl Variant {
	pub fn new(id: u32) -> Self {
		Self {
			id,
			allowed_by_application: true,
			allowed_by_key_system: true,
			..Default::default()
		}
	}
}
