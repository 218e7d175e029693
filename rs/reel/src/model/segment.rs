use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use url::Url;

use crate::fetch::{Request, RequestContext, RequestKind, RequestManager};
use crate::{Error, Result};

/// Whether the media behind a reference is expected to exist.
///
/// `EXT-X-GAP` marks holes the server knows about; the reference stays in the
/// index so timing holds up, but nothing should be fetched for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentStatus {
	#[default]
	Available,
	Missing,
}

/// AES block cipher modes used by HLS key tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCipherMode {
	Cbc,
	Ctr,
}

/// Response cache for fetched AES keys, shared across one parser instance.
pub type KeyCache = Arc<tokio::sync::Mutex<HashMap<String, Bytes>>>;

/// Key material descriptor for an AES-encrypted segment or init segment.
///
/// The key itself is fetched on first use and cached; every clone of this
/// descriptor shares the same cache.
#[derive(Debug, Clone)]
pub struct AesKey {
	/// Cipher strength: 128 or 256.
	pub bits: u32,
	pub mode: BlockCipherMode,
	/// Explicit IV from the tag. When absent, the IV is the 16-byte
	/// big-endian media sequence number.
	pub iv: Option<[u8; 16]>,
	/// The media sequence number of the first segment this key applies to.
	pub first_media_sequence: u64,
	key_uri: Url,
	cache: KeyCache,
}

impl AesKey {
	pub fn new(bits: u32, mode: BlockCipherMode, key_uri: Url, cache: KeyCache) -> Self {
		Self {
			bits,
			mode,
			iv: None,
			first_media_sequence: 0,
			key_uri,
			cache,
		}
	}

	pub fn key_uri(&self) -> &Url {
		&self.key_uri
	}

	/// The IV for a given media sequence number.
	pub fn iv_for(&self, media_sequence: u64) -> [u8; 16] {
		match self.iv {
			Some(iv) => iv,
			None => {
				let mut iv = [0u8; 16];
				iv[8..].copy_from_slice(&media_sequence.to_be_bytes());
				iv
			}
		}
	}

	/// Fetch the key bytes, hitting the cache first.
	pub async fn fetch_key(&self, net: &RequestManager) -> Result<Bytes> {
		let cache_key = self.key_uri.to_string();

		let mut cache = self.cache.lock().await;
		if let Some(key) = cache.get(&cache_key) {
			return Ok(key.clone());
		}

		let request = Request::new(RequestKind::Key, RequestContext::MediaSegment, self.key_uri.clone());
		let response = net.fetch(request).await?;

		let expected = (self.bits / 8) as usize;
		if response.body.len() != expected {
			return Err(Error::AesInvalidKeyLength(response.body.len()));
		}

		cache.insert(cache_key, response.body.clone());
		Ok(response.body)
	}
}

impl PartialEq for AesKey {
	fn eq(&self, other: &Self) -> bool {
		self.bits == other.bits
			&& self.mode == other.mode
			&& self.iv == other.iv
			&& self.first_media_sequence == other.first_media_sequence
			&& self.key_uri == other.key_uri
	}
}

/// Codec and bandwidth metadata recorded against an init segment, so the
/// media pipeline can associate appended segments with a quality level.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaQuality {
	pub bandwidth: Option<u64>,
	pub codecs: String,
	pub mime_type: String,
}

/// A reference to an `EXT-X-MAP` init segment.
///
/// Shared (via `Arc`) by every segment that uses the same map; the cache in
/// [crate::media::InitSegmentCache] guarantees at most one instance per
/// `(uri, byte range)` pair.
#[derive(Debug)]
pub struct InitSegmentReference {
	uris: Vec<Url>,
	pub start_byte: u64,
	/// `None` means the init section extends to the end of the resource.
	pub end_byte: Option<u64>,
	pub aes_key: Option<AesKey>,
	pub encrypted: bool,
	media_quality: Mutex<Option<MediaQuality>>,
	/// Presentation time at which this init segment stops applying,
	/// closed when a discontinuity follows it.
	boundary_end: Mutex<Option<f64>>,
	/// Default key id probed from the init segment body, cached per
	/// reference. The outer `Option` distinguishes "never probed" from
	/// "probed, nothing found".
	default_kid: Mutex<Option<Option<String>>>,
}

impl InitSegmentReference {
	pub fn new(uris: Vec<Url>, start_byte: u64, end_byte: Option<u64>) -> Self {
		Self {
			uris,
			start_byte,
			end_byte,
			aes_key: None,
			encrypted: false,
			media_quality: Mutex::new(None),
			boundary_end: Mutex::new(None),
			default_kid: Mutex::new(None),
		}
	}

	pub fn uris(&self) -> &[Url] {
		&self.uris
	}

	pub fn boundary_end(&self) -> Option<f64> {
		*self.boundary_end.lock().unwrap()
	}

	/// Close the logical boundary of this init segment at `time`.
	pub fn close_boundary(&self, time: f64) {
		*self.boundary_end.lock().unwrap() = Some(time);
	}

	pub fn media_quality(&self) -> Option<MediaQuality> {
		self.media_quality.lock().unwrap().clone()
	}

	pub fn set_media_quality(&self, quality: MediaQuality) {
		*self.media_quality.lock().unwrap() = Some(quality);
	}

	pub fn cached_default_kid(&self) -> Option<Option<String>> {
		self.default_kid.lock().unwrap().clone()
	}

	pub fn set_default_kid(&self, kid: Option<String>) {
		*self.default_kid.lock().unwrap() = Some(kid);
	}
}

impl PartialEq for InitSegmentReference {
	fn eq(&self, other: &Self) -> bool {
		self.uris == other.uris && self.start_byte == other.start_byte && self.end_byte == other.end_byte
	}
}

/// A reference to one media segment, or to one partial segment when nested
/// inside another reference's `partial` list.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentReference {
	/// Presentation time the segment starts at, in seconds.
	pub start_time: f64,
	/// Presentation time the segment ends at. Always >= `start_time`.
	pub end_time: f64,
	uris: Vec<Url>,
	pub start_byte: u64,
	/// `None` means the segment extends to the end of the resource.
	pub end_byte: Option<u64>,
	pub init_segment: Option<Arc<InitSegmentReference>>,
	pub timestamp_offset: f64,
	pub append_window_start: f64,
	pub append_window_end: f64,
	/// Partial segments making up this segment, in order.
	pub partial: Vec<SegmentReference>,
	/// `LAYOUT` of a tiled thumbnail grid, e.g. `5x4`.
	pub tiles_layout: Option<String>,
	/// Duration of a single tile within the grid.
	pub tile_duration: Option<f64>,
	/// Absolute wall-clock anchor (seconds since the epoch) from
	/// `EXT-X-PROGRAM-DATE-TIME`.
	pub sync_time: Option<f64>,
	pub status: SegmentStatus,
	pub aes_key: Option<AesKey>,
	/// True when the segment is made entirely of partials, with no closing
	/// EXTINF yet.
	pub all_partial_segments: bool,
	/// Set when the whole-segment reference stands in for its partials
	/// (the byte-range optimization) and the partial list was cleared.
	pub byterange_optimized: bool,
	pub mime_type: Option<String>,
	/// Timestamp-base association; bumped by `EXT-X-DISCONTINUITY`.
	pub discontinuity_sequence: i64,
	/// The media sequence number, used to align references across live
	/// refreshes of the same playlist.
	pub media_sequence: u64,
}

impl SegmentReference {
	pub fn new(uris: Vec<Url>, start_time: f64, end_time: f64) -> Self {
		Self {
			start_time,
			end_time,
			uris,
			start_byte: 0,
			end_byte: None,
			init_segment: None,
			timestamp_offset: 0.0,
			append_window_start: 0.0,
			append_window_end: f64::INFINITY,
			partial: Vec::new(),
			tiles_layout: None,
			tile_duration: None,
			sync_time: None,
			status: SegmentStatus::Available,
			aes_key: None,
			all_partial_segments: false,
			byterange_optimized: false,
			mime_type: None,
			discontinuity_sequence: 0,
			media_sequence: 0,
		}
	}

	pub fn uris(&self) -> &[Url] {
		&self.uris
	}

	pub fn duration(&self) -> f64 {
		self.end_time - self.start_time
	}

	/// Shift this reference (and its partials) by `delta` seconds.
	/// Wall-clock sync times are absolute and stay put.
	pub fn offset(&mut self, delta: f64) {
		self.start_time += delta;
		self.end_time += delta;
		self.timestamp_offset += delta;
		for partial in &mut self.partial {
			partial.offset(delta);
		}
	}
}
