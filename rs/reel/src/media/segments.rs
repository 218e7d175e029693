//! Turns lexed segment records into [SegmentReference]s.
//!
//! The walker carries the ambient state that flows through a media playlist
//! in source order: the init segment in effect, the AES key context, the
//! discontinuity counter, and the running byte position for range
//! continuation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::DateTime;
use tracing::warn;
use url::Url;

use crate::model::{
	AesKey, BlockCipherMode, InitSegmentReference, KeyCache, SegmentReference, SegmentStatus, StreamType,
};
use crate::playlist::{parse_byterange, ParsedSegment, Tag, VariableRegistry};
use crate::{drm, mime, Error, Result};

use super::InitSegmentCache;

/// State threaded through one walk of a media playlist's segments.
pub struct SegmentWalker<'a> {
	pub base: &'a Url,
	pub vars: &'a VariableRegistry,
	pub stream_type: StreamType,
	/// Partial segments are only indexed in low-latency mode.
	pub low_latency: bool,
	/// Timing assumed for preload-hinted parts, from EXT-X-PART-INF.
	pub part_target: Option<f64>,
	pub init_cache: &'a mut InitSegmentCache,
	pub key_cache: &'a KeyCache,

	/// Sequence number to assign to the next segment.
	pub media_sequence: u64,
	pub discontinuity_sequence: i64,
	/// Start times memoized from earlier loads of the same playlist,
	/// keyed by media sequence number.
	pub sequence_to_start: &'a HashMap<u64, f64>,

	current_init: Option<Arc<InitSegmentReference>>,
	current_aes: Option<AesKey>,
	current_bitrate: Option<u64>,
	previous: Option<SegmentReference>,

	/// Whether any EXT-X-PROGRAM-DATE-TIME was seen.
	pub saw_program_date_time: bool,
	pub gap_count: u32,
	/// Duration-weighted EXT-X-BITRATE accumulation.
	weighted_bitrate: f64,
	weighted_duration: f64,
}

impl<'a> SegmentWalker<'a> {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		base: &'a Url,
		vars: &'a VariableRegistry,
		stream_type: StreamType,
		low_latency: bool,
		part_target: Option<f64>,
		init_cache: &'a mut InitSegmentCache,
		key_cache: &'a KeyCache,
		media_sequence: u64,
		discontinuity_sequence: i64,
		sequence_to_start: &'a HashMap<u64, f64>,
	) -> Self {
		Self {
			base,
			vars,
			stream_type,
			low_latency,
			part_target,
			init_cache,
			key_cache,
			media_sequence,
			discontinuity_sequence,
			sequence_to_start,
			current_init: None,
			current_aes: None,
			current_bitrate: None,
			previous: None,
			saw_program_date_time: false,
			gap_count: 0,
			weighted_bitrate: 0.0,
			weighted_duration: 0.0,
		}
	}

	/// The duration-weighted average of EXT-X-BITRATE tags, in bits per
	/// second, when any were present.
	pub fn average_bandwidth(&self) -> Option<u64> {
		if self.weighted_duration > 0.0 && self.weighted_bitrate > 0.0 {
			Some((self.weighted_bitrate / self.weighted_duration) as u64)
		} else {
			None
		}
	}

	/// Whether any segment carried an AES key.
	pub fn aes_encrypted(&self) -> bool {
		self.current_aes.is_some()
	}

	/// The init segment in effect at the current walk position.
	pub fn current_init(&self) -> Option<&Arc<InitSegmentReference>> {
		self.current_init.as_ref()
	}

	/// Process one segment record. Returns `None` when the record cannot
	/// produce a reference (no duration and no partials).
	pub fn walk(&mut self, segment: &ParsedSegment) -> Result<Option<SegmentReference>> {
		let sequence = self.media_sequence;

		let mut extinf_duration = None;
		let mut byterange: Option<&str> = None;
		let mut byterange_tag_id = 0;
		let mut sync_time = None;
		let mut gap = false;
		let mut tiles_layout = None;
		let mut tile_duration = None;

		for tag in &segment.tags {
			match tag.name.as_str() {
				"EXTINF" => {
					// The value is "duration,optional title".
					let raw = tag.value.as_deref().unwrap_or("");
					let duration = raw.split(',').next().and_then(|d| d.trim().parse::<f64>().ok());
					match duration {
						Some(d) => extinf_duration = Some(d),
						None => warn!(value = raw, "unparsable EXTINF duration"),
					}
				}
				"EXT-X-BYTERANGE" => {
					byterange = tag.value.as_deref();
					byterange_tag_id = tag.id;
				}
				"EXT-X-PROGRAM-DATE-TIME" => {
					let raw = tag.value.as_deref().unwrap_or("");
					match DateTime::parse_from_rfc3339(raw) {
						Ok(date) => {
							sync_time = Some(date.timestamp_millis() as f64 / 1000.0);
							self.saw_program_date_time = true;
						}
						Err(_) => warn!(value = raw, "unparsable EXT-X-PROGRAM-DATE-TIME"),
					}
				}
				"EXT-X-GAP" => gap = true,
				"EXT-X-DISCONTINUITY" => {
					self.discontinuity_sequence += 1;

					// The outgoing init segment stops applying at the
					// discontinuity boundary.
					if let Some(init) = &self.current_init {
						let boundary = self.previous.as_ref().map(|p| p.end_time).unwrap_or(0.0);
						init.close_boundary(boundary);
					}
				}
				"EXT-X-BITRATE" => {
					// Kilobits per second, applying to this segment and
					// every following one until overridden.
					self.current_bitrate = tag.u64_value().map(|kbps| kbps * 1000);
				}
				"EXT-X-KEY" => self.apply_key_tag(tag, sequence)?,
				"EXT-X-MAP" => {
					if segment.tags.iter().filter(|t| t.name == "EXT-X-MAP").count() > 1 {
						return Err(Error::MultipleMediaInitSections);
					}

					// A BYTERANGE tag written before the map applies to it.
					let inherited = byterange.filter(|_| byterange_tag_id < tag.id);
					let reference =
						self.init_cache
							.get_or_create(tag, self.base, self.vars, inherited, self.current_aes.as_ref())?;
					self.current_init = Some(reference);
				}
				"EXT-X-TILES" => {
					tiles_layout = tag.attr("LAYOUT").map(str::to_string);
					tile_duration = tag.f64_attr("DURATION");
				}
				// Collected by the playlist loader, not per segment.
				"EXT-X-DATERANGE" => {}
				other => warn!(tag = other, "unrecognized media segment tag"),
			}
		}

		let start_time = self
			.sequence_to_start
			.get(&sequence)
			.copied()
			.or_else(|| self.previous.as_ref().map(|p| p.end_time))
			.unwrap_or(0.0);

		let partial = if self.low_latency {
			self.walk_partials(&segment.partial_tags, start_time, sequence)?
		} else {
			Vec::new()
		};

		// Derive the duration: EXTINF, else the partial total, else skip.
		let (end_time, all_partial) = match extinf_duration {
			Some(duration) => (start_time + duration, false),
			None if !partial.is_empty() => (partial.last().unwrap().end_time, true),
			None => {
				if segment.uri.is_some() {
					warn!(sequence, "segment has neither EXTINF nor partials, skipping");
				}
				return Ok(None);
			}
		};

		let uris = match &segment.uri {
			Some(uri) => vec![self.base.join(&self.vars.substitute(uri))?],
			// A preload-only segment borrows its first partial's location.
			None => partial.first().map(|p| p.uris().to_vec()).unwrap_or_default(),
		};

		let mut reference = SegmentReference::new(uris, start_time, end_time);
		reference.media_sequence = sequence;
		reference.discontinuity_sequence = self.discontinuity_sequence;
		reference.sync_time = sync_time;
		reference.tiles_layout = tiles_layout;
		reference.tile_duration = tile_duration;
		reference.partial = partial;
		reference.all_partial_segments = all_partial;

		if gap {
			reference.status = SegmentStatus::Missing;
			self.gap_count += 1;
		}

		// Byte range, continuing from the previous reference when the
		// offset is left out.
		if let Some(raw) = byterange {
			let raw = self.vars.substitute(raw);
			let (length, offset) = parse_byterange(&raw)?;
			let start = match offset {
				Some(offset) => offset,
				None => match &self.previous {
					Some(prev) => prev.end_byte.map(|e| e + 1).unwrap_or(0),
					None => 0,
				},
			};
			reference.start_byte = start;
			reference.end_byte = Some(start + length - 1);
		}

		// MIME type from the URI extension; raw formats and MPEG-2 TS need
		// no init segment.
		let mime_type = reference
			.uris()
			.first()
			.and_then(mime::extension)
			.and_then(|e| mime::for_extension(self.stream_type, e))
			.map(str::to_string);
		reference.mime_type = mime_type;

		let needs_init = !reference
			.mime_type
			.as_deref()
			.map(mime::no_init_segment_needed)
			.unwrap_or(false);
		if needs_init {
			reference.init_segment = self.current_init.clone();
		}

		if let Some(key) = &self.current_aes {
			reference.aes_key = Some(key.clone());
		}

		// When every partial is a whole-resource fetch with no gaps and an
		// init segment exists, the parent reference stands in for them all.
		if !reference.partial.is_empty()
			&& reference.init_segment.is_some()
			&& reference
				.partial
				.iter()
				.all(|p| p.start_byte == 0 && p.status == SegmentStatus::Available)
		{
			reference.partial.clear();
			reference.byterange_optimized = true;
		}

		if let Some(bitrate) = self.current_bitrate {
			let duration = reference.duration();
			self.weighted_bitrate += bitrate as f64 * duration;
			self.weighted_duration += duration;
		}

		self.media_sequence += 1;
		self.previous = Some(reference.clone());
		Ok(Some(reference))
	}

	/// Update the AES context from a KEY tag. SAMPLE-AES family methods are
	/// DRM and are handled by the playlist loader; they don't change the
	/// whole-segment cipher state.
	fn apply_key_tag(&mut self, tag: &Tag, sequence: u64) -> Result<()> {
		let method = tag.required_attr("METHOD")?;
		if !drm::is_valid_method(method) {
			return Err(Error::UnsupportedCipherMode(method.to_string()));
		}

		if method == "NONE" {
			self.current_aes = None;
			return Ok(());
		}

		if !drm::is_aes_method(method) {
			return Ok(());
		}

		let (bits, mode) = match method {
			"AES-128" => (128, BlockCipherMode::Cbc),
			"AES-256" => (256, BlockCipherMode::Cbc),
			"AES-256-CTR" => (256, BlockCipherMode::Ctr),
			_ => unreachable!("method validated above"),
		};

		let uri = self.vars.substitute(tag.required_attr("URI")?);
		let key_uri = self.base.join(&uri)?;

		let mut key = AesKey::new(bits, mode, key_uri, self.key_cache.clone());
		key.first_media_sequence = sequence;

		if let Some(raw) = tag.attr("IV") {
			let bytes = crate::playlist::parse_hex(&self.vars.substitute(raw))?;
			let iv: [u8; 16] = bytes
				.as_slice()
				.try_into()
				.map_err(|_| Error::AesInvalidIvLength(bytes.len()))?;
			key.iv = Some(iv);
		}

		self.current_aes = Some(key);
		Ok(())
	}

	fn walk_partials(&mut self, tags: &[Tag], segment_start: f64, sequence: u64) -> Result<Vec<SegmentReference>> {
		let mut partials: Vec<SegmentReference> = Vec::new();
		let mut time = segment_start;

		for tag in tags {
			match tag.name.as_str() {
				"EXT-X-PART" => {
					let uri = self.vars.substitute(tag.required_attr("URI")?);
					let uri = self.base.join(&uri)?;

					let duration = tag
						.f64_attr("DURATION")
						.or(self.part_target)
						.ok_or_else(|| Error::RequiredAttributeMissing("EXT-X-PART:DURATION".to_string()))?;

					let mut partial = SegmentReference::new(vec![uri], time, time + duration);
					partial.media_sequence = sequence;
					partial.discontinuity_sequence = self.discontinuity_sequence;

					if let Some(raw) = tag.attr("BYTERANGE") {
						let raw = self.vars.substitute(raw);
						let (length, offset) = parse_byterange(&raw)?;
						let start = match offset {
							Some(offset) => offset,
							None => partials.last().and_then(|p| p.end_byte).map(|e| e + 1).unwrap_or(0),
						};
						partial.start_byte = start;
						partial.end_byte = Some(start + length - 1);
					}

					if tag.bool_attr("GAP") {
						partial.status = SegmentStatus::Missing;
					}

					if let Some(key) = &self.current_aes {
						partial.aes_key = Some(key.clone());
					}
					partial.init_segment = self.current_init.clone();

					time = partial.end_time;
					partials.push(partial);
				}
				"EXT-X-PRELOAD-HINT" => match tag.attr("TYPE") {
					Some("PART") => {
						let uri = self.vars.substitute(tag.required_attr("URI")?);
						let uri = self.base.join(&uri)?;

						let duration = self.part_target.unwrap_or(0.0);
						let mut partial = SegmentReference::new(vec![uri], time, time + duration);
						partial.media_sequence = sequence;
						partial.discontinuity_sequence = self.discontinuity_sequence;

						let start = tag.u64_attr("BYTERANGE-START").unwrap_or(0);
						partial.start_byte = start;
						// Without a length the hint is open ended.
						partial.end_byte = tag.u64_attr("BYTERANGE-LENGTH").map(|l| start + l - 1);

						if let Some(key) = &self.current_aes {
							partial.aes_key = Some(key.clone());
						}
						partial.init_segment = self.current_init.clone();

						time = partial.end_time;
						partials.push(partial);
					}
					Some("MAP") => {
						let reference = self.init_cache.get_or_create(
							tag,
							self.base,
							self.vars,
							None,
							self.current_aes.as_ref(),
						)?;
						self.current_init = Some(reference);
					}
					other => warn!(hint = ?other, "unrecognized EXT-X-PRELOAD-HINT type"),
				},
				_ => {}
			}
		}

		Ok(partials)
	}
}
