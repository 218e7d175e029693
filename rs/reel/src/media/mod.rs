//! Media playlist loading.
//!
//! On demand, fetches a media playlist, lexes it, walks its segments into
//! references, and derives the stream attributes that the master playlist
//! didn't spell out.

mod init;
pub mod probe;
mod segments;

pub use init::*;
pub use segments::*;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::drm::{self, DrmInfo};
use crate::fetch::{Request, RequestContext, RequestKind, RequestManager, Response};
use crate::model::{
	DateRange, InitSegmentReference, KeyCache, PresentationType, SegmentReference, SegmentStatus, StreamType,
};
use crate::playlist::{lex, Playlist, PlaylistKind, Tag, VariableRegistry};
use crate::{mime, Error, Result};

/// `EXT-X-SERVER-CONTROL` hints.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServerControl {
	/// Seconds of history the server can elide with EXT-X-SKIP.
	pub can_skip_until: Option<f64>,
	pub can_skip_dateranges: bool,
	pub can_block_reload: bool,
	pub hold_back: Option<f64>,
	pub part_hold_back: Option<f64>,
}

impl ServerControl {
	fn from_tag(tag: &Tag) -> Self {
		Self {
			can_skip_until: tag.f64_attr("CAN-SKIP-UNTIL"),
			can_skip_dateranges: tag.bool_attr("CAN-SKIP-DATERANGES"),
			can_block_reload: tag.bool_attr("CAN-BLOCK-RELOAD"),
			hold_back: tag.f64_attr("HOLD-BACK"),
			part_hold_back: tag.f64_attr("PART-HOLD-BACK"),
		}
	}
}

/// Stream attributes derived while loading a media playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedAttributes {
	pub mime_type: String,
	pub codecs: Option<String>,
	pub width: Option<u32>,
	pub height: Option<u32>,
	pub channels: Option<u32>,
	pub sample_rate: Option<u32>,
	pub bandwidth: Option<u64>,
}

/// Everything one load of a media playlist produced.
#[derive(Debug)]
pub struct LoadedMediaPlaylist {
	/// The playlist URI after redirects.
	pub final_uri: Url,
	pub presentation_type: PresentationType,
	pub has_end_list: bool,
	pub target_duration: f64,
	pub part_target: Option<f64>,
	pub server_control: ServerControl,
	/// First media sequence number covered, including skipped segments.
	pub media_sequence: u64,
	/// Segments elided by EXT-X-SKIP.
	pub skipped_segments: u64,
	pub references: Vec<SegmentReference>,
	pub attributes: DerivedAttributes,
	pub drm_infos: Vec<DrmInfo>,
	pub key_ids: BTreeSet<String>,
	pub aes_encrypted: bool,
	pub date_ranges: Vec<DateRange>,
	pub gap_count: u32,
	pub saw_program_date_time: bool,
	pub next_media_sequence: u64,
	/// Index of the next pending partial segment, when the tail is still
	/// growing.
	pub next_part: Option<u64>,
	/// `EXT-X-START` offset declared in the media playlist.
	pub start_time_offset: Option<f64>,
}

impl LoadedMediaPlaylist {
	pub fn first_start_time(&self) -> f64 {
		self.references.first().map(|r| r.start_time).unwrap_or(0.0)
	}

	pub fn last_end_time(&self) -> f64 {
		self.references.last().map(|r| r.end_time).unwrap_or(0.0)
	}

	/// The duration of the trailing window used for the default live delay.
	pub fn tail_duration(&self, segments: usize) -> f64 {
		let from = self.references.len().saturating_sub(segments);
		self.references[from..].iter().map(|r| r.duration()).sum()
	}
}

/// Loads one media playlist and everything derivable from it.
pub struct MediaPlaylistLoader<'a> {
	pub net: &'a RequestManager,
	pub config: &'a Config,
	pub init_cache: &'a mut InitSegmentCache,
	pub key_cache: &'a KeyCache,
	pub master_vars: &'a VariableRegistry,
	pub low_latency: bool,
}

impl MediaPlaylistLoader<'_> {
	/// Fetch and parse one media playlist.
	///
	/// `uris` is the steering-ordered candidate list; the first location
	/// that responds wins. `sequence_to_start` memoizes start times from
	/// earlier loads of the same playlist so refreshes line up.
	pub async fn load(
		&mut self,
		uris: &[Url],
		stream_type: StreamType,
		codecs_hint: Option<&str>,
		sequence_to_start: &HashMap<u64, f64>,
	) -> Result<LoadedMediaPlaylist> {
		let response = self.fetch_playlist(uris).await?;
		let final_uri = response.final_uri.clone();

		let text = String::from_utf8_lossy(&response.body);
		let playlist = lex(&text)?;
		if playlist.kind != PlaylistKind::Media {
			return Err(Error::InvalidPlaylistHierarchy);
		}

		let vars = VariableRegistry::from_playlist(&playlist, &final_uri, Some(self.master_vars));

		let (presentation_type, has_end_list) = presentation_type(&playlist);
		if presentation_type.is_live() && !self.config.allow_live {
			return Err(Error::LiveContentNotSupported);
		}

		let target_duration = playlist
			.tag("EXT-X-TARGETDURATION")
			.and_then(Tag::f64_value)
			.ok_or_else(|| Error::RequiredTagMissing("EXT-X-TARGETDURATION".to_string()))?;

		let part_target = playlist.tag("EXT-X-PART-INF").and_then(|t| t.f64_attr("PART-TARGET"));
		let server_control = playlist
			.tag("EXT-X-SERVER-CONTROL")
			.map(ServerControl::from_tag)
			.unwrap_or_default();

		let base_sequence = playlist.tag("EXT-X-MEDIA-SEQUENCE").and_then(Tag::u64_value).unwrap_or(0);
		let skipped_segments = playlist
			.tag("EXT-X-SKIP")
			.and_then(|t| t.u64_attr("SKIPPED-SEGMENTS"))
			.unwrap_or(0);
		let media_sequence = base_sequence + skipped_segments;

		let discontinuity_base = playlist
			.tag("EXT-X-DISCONTINUITY-SEQUENCE")
			.and_then(Tag::u64_value)
			.unwrap_or(0) as i64;

		let start_time_offset = playlist.tag("EXT-X-START").and_then(|t| t.f64_attr("TIME-OFFSET"));

		// Walk the segments, collecting key tags with the init segment in
		// effect at their position.
		let mut walker = SegmentWalker::new(
			&final_uri,
			&vars,
			stream_type,
			self.low_latency,
			part_target,
			self.init_cache,
			self.key_cache,
			media_sequence,
			discontinuity_base,
			sequence_to_start,
		);

		let mut references = Vec::new();
		let mut key_tags: Vec<(Tag, Option<Arc<InitSegmentReference>>)> = Vec::new();
		let mut date_ranges = Vec::new();

		for segment in &playlist.segments {
			if let Some(reference) = walker.walk(segment)? {
				references.push(reference);
			}

			for tag in &segment.tags {
				match tag.name.as_str() {
					"EXT-X-KEY" => {
						let method = tag.attr("METHOD").unwrap_or("NONE");
						if method != "NONE" && !drm::is_aes_method(method) {
							key_tags.push((tag.clone(), walker.current_init().cloned()));
						}
					}
					"EXT-X-DATERANGE" => match DateRange::from_tag(tag) {
						Ok(range) => date_ranges.push(range),
						Err(err) => warn!(%err, "ignoring bad EXT-X-DATERANGE"),
					},
					_ => {}
				}
			}
		}

		let gap_count = walker.gap_count;
		let saw_program_date_time = walker.saw_program_date_time;
		let aes_encrypted = walker.aes_encrypted();
		let playlist_bandwidth = walker.average_bandwidth();

		if references.is_empty() || references.iter().all(|r| r.status == SegmentStatus::Missing) {
			return Err(Error::EmptyMediaPlaylist(final_uri.to_string()));
		}

		let mut attributes = self
			.derive_attributes(&references, stream_type, codecs_hint, presentation_type)
			.await?;
		attributes.bandwidth = playlist_bandwidth;

		// DRM comes from the non-AES key tags, resolved against the init
		// segment that preceded each of them.
		let (drm_infos, key_ids) = self.collect_drm(&key_tags, &attributes.mime_type).await?;

		let (next_media_sequence, next_part) = next_positions(&references);

		debug!(
			uri = %final_uri,
			references = references.len(),
			live = presentation_type.is_live(),
			"loaded media playlist"
		);

		Ok(LoadedMediaPlaylist {
			final_uri,
			presentation_type,
			has_end_list,
			target_duration,
			part_target,
			server_control,
			media_sequence,
			skipped_segments,
			references,
			attributes,
			drm_infos,
			key_ids,
			aes_encrypted,
			date_ranges,
			gap_count,
			saw_program_date_time,
			next_media_sequence,
			next_part,
			start_time_offset,
		})
	}

	async fn fetch_playlist(&self, uris: &[Url]) -> Result<Response> {
		let mut last_error = Error::EmptyMediaPlaylist("no playlist uri".to_string());

		for uri in uris {
			let request = Request::new(RequestKind::Manifest, RequestContext::MediaPlaylist, uri.clone());
			match self.net.fetch(request).await {
				Ok(response) => return Ok(response),
				Err(err) if err.is_abort() => return Err(err),
				Err(err) => {
					warn!(%uri, %err, "media playlist location failed, trying next");
					last_error = err;
				}
			}
		}

		Err(last_error)
	}

	/// Work out the MIME type, codecs, and media dimensions for the stream.
	async fn derive_attributes(
		&self,
		references: &[SegmentReference],
		stream_type: StreamType,
		codecs_hint: Option<&str>,
		presentation_type: PresentationType,
	) -> Result<DerivedAttributes> {
		let mut attributes = DerivedAttributes {
			codecs: codecs_hint.map(str::to_string),
			..Default::default()
		};

		// First choice: the extension table.
		let first_available = references
			.iter()
			.find(|r| r.status == SegmentStatus::Available)
			.expect("checked non-empty above");
		let extension = first_available.uris().first().and_then(mime::extension);
		let mut mime_type = extension
			.and_then(|e| mime::for_extension(stream_type, e))
			.map(str::to_string);

		// A text rendition guessed as boxed mp4 without an init segment is
		// far more likely to be plain WebVTT.
		if stream_type == StreamType::Text
			&& mime_type.as_deref() == Some("application/mp4")
			&& attributes.codecs.is_none()
			&& first_available.init_segment.is_none()
		{
			mime_type = Some("text/vtt".to_string());
		}

		// Last resort: ask the server.
		let mime_type = match mime_type {
			Some(mime_type) => mime_type,
			None => self.head_content_type(first_available).await?,
		};

		// Optionally probe the init segment instead of trusting the master
		// playlist's codec claims.
		let probe_wanted = self.config.disable_codec_guessing || attributes.codecs.is_none();
		if probe_wanted && mime_type.ends_with("/mp4") {
			let candidate = if presentation_type.is_live() {
				&references[references.len() / 2]
			} else {
				first_available
			};

			if let Some(init) = &candidate.init_segment {
				if let Some(info) = self.probe_init(init).await {
					if let Some(codec) = info.codec {
						attributes.codecs.get_or_insert(codec);
					}
					attributes.width = info.width.filter(|&w| w > 0);
					attributes.height = info.height.filter(|&h| h > 0);
					attributes.channels = info.channels.filter(|&c| c > 0);
					attributes.sample_rate = info.sample_rate.filter(|&s| s > 0);
				}
			}
		}

		// Fall back to the configured codec defaults when nothing else
		// resolved them.
		if attributes.codecs.is_none() && !self.config.disable_codec_guessing {
			let default = match stream_type {
				StreamType::Audio => Some(self.config.default_audio_codec.clone()),
				StreamType::Video => Some(self.config.default_video_codec.clone()),
				StreamType::Text | StreamType::Image => None,
			};
			attributes.codecs = default;
		}

		let needs_codecs = matches!(stream_type, StreamType::Audio | StreamType::Video);
		if attributes.codecs.is_none() && self.config.disable_codec_guessing && needs_codecs {
			return Err(Error::CouldNotGuessCodecs);
		}

		attributes.mime_type = mime_type;
		Ok(attributes)
	}

	async fn head_content_type(&self, reference: &SegmentReference) -> Result<String> {
		let Some(uri) = reference.uris().first() else {
			return Err(Error::CouldNotGuessMimeType("segment has no uri".to_string()));
		};

		let request = Request::new(RequestKind::Segment, RequestContext::MediaSegment, uri.clone()).head();
		let response = self.net.fetch(request).await?;

		match response.content_type {
			Some(content_type) if !content_type.is_empty() => Ok(content_type),
			_ => Err(Error::CouldNotGuessMimeType(uri.to_string())),
		}
	}

	/// Fetch and inspect an init segment, caching the result on the
	/// reference so repeated loads stay cheap.
	async fn probe_init(&self, init: &Arc<InitSegmentReference>) -> Option<probe::Mp4Info> {
		let uri = init.uris().first()?.clone();

		let mut request = Request::new(RequestKind::Segment, RequestContext::InitSegment, uri);
		if init.start_byte != 0 || init.end_byte.is_some() {
			request = request.with_range(init.start_byte, init.end_byte);
		}

		match self.net.fetch(request).await {
			Ok(response) => {
				let info = probe::probe(&response.body);
				init.set_default_kid(info.default_kid.clone());
				Some(info)
			}
			Err(err) => {
				if !err.is_abort() {
					warn!(%err, "init segment probe failed");
				}
				None
			}
		}
	}

	async fn collect_drm(
		&self,
		key_tags: &[(Tag, Option<Arc<InitSegmentReference>>)],
		mime_type: &str,
	) -> Result<(Vec<DrmInfo>, BTreeSet<String>)> {
		let mut drm_infos: Vec<DrmInfo> = Vec::new();
		let mut key_ids = BTreeSet::new();

		for (tag, init) in key_tags {
			// The identity and FairPlay extractors want the default KID
			// from the init segment when the tag has no explicit key id.
			let keyformat = tag.attr("KEYFORMAT").unwrap_or(crate::drm::KEYFORMAT_IDENTITY);
			let wants_kid = matches!(keyformat, crate::drm::KEYFORMAT_IDENTITY | crate::drm::KEYFORMAT_FAIRPLAY);

			let mut default_kid = None;
			if wants_kid && tag.attr("KEYID").is_none() {
				if let Some(init) = init {
					default_kid = match init.cached_default_kid() {
						Some(cached) => cached,
						None => self.probe_init(init).await.and_then(|info| info.default_kid),
					};
				}
			}

			match drm::extract(tag, mime_type, default_kid.as_deref())? {
				Some(info) => {
					key_ids.extend(info.key_ids.iter().cloned());
					if !drm_infos.contains(&info) {
						drm_infos.push(info);
					}
				}
				None => {}
			}
		}

		// A key tag demanded DRM but nothing usable came out of any of them.
		if drm_infos.is_empty() && !key_tags.is_empty() {
			return Err(Error::KeyformatsNotSupported(
				key_tags
					.iter()
					.filter_map(|(t, _)| t.attr("KEYFORMAT"))
					.collect::<Vec<_>>()
					.join(","),
			));
		}

		Ok((drm_infos, key_ids))
	}
}

/// VOD, EVENT, or LIVE, plus whether an end-of-list marker was present.
fn presentation_type(playlist: &Playlist) -> (PresentationType, bool) {
	let has_end_list = playlist.has_tag("EXT-X-ENDLIST");
	if has_end_list {
		return (PresentationType::Vod, true);
	}

	match playlist.tag("EXT-X-PLAYLIST-TYPE").and_then(|t| t.value.as_deref()) {
		Some("VOD") => (PresentationType::Vod, false),
		Some("EVENT") => (PresentationType::Event, false),
		_ => (PresentationType::Live, false),
	}
}

/// The media sequence and part number the next refresh should ask for.
fn next_positions(references: &[SegmentReference]) -> (u64, Option<u64>) {
	match references.last() {
		Some(last) if last.all_partial_segments => (last.media_sequence, Some(last.partial.len() as u64)),
		Some(last) => (last.media_sequence + 1, None),
		None => (0, None),
	}
}
