//! Master playlist parsing.
//!
//! Turns the master playlist's tag groups into skeletal streams and
//! variants. Media playlists are not touched here; every emitted stream
//! carries the candidate URIs for a later lazy load.

use std::collections::HashMap;

use tracing::warn;
use url::Url;

use crate::config::Config;
use crate::drm::{self, DrmInfo};
use crate::model::{shared, SharedStream, Stream, StreamType, Variant};
use crate::player::ManifestEvent;
use crate::playlist::{parse_resolution, Playlist, Tag, VariableRegistry};
use crate::steering::{PathwayUri, SteeringSelector};
use crate::{Error, Result};

/// Sentinel scheme for audio that is muxed into the video rendition and has
/// no playlist of its own.
pub const MUXED_AUDIO_SCHEME: &str = "reel://hls-muxed";

/// A skeletal stream plus everything needed to lazily load its playlist.
#[derive(Debug, Clone)]
pub struct StreamSetup {
	pub stream: SharedStream,
	pub kind: StreamType,
	/// Candidate playlist locations, steering-aware. Empty for muxed
	/// placeholder streams, which have nothing to load.
	pub candidates: Vec<PathwayUri>,
	/// CODECS carried over from the master tag, if any.
	pub codecs_hint: Option<String>,
	pub placeholder: bool,
}

/// Everything the master playlist produced.
pub struct MasterOutcome {
	pub setups: Vec<StreamSetup>,
	pub variants: Vec<Variant>,
	pub text_streams: Vec<SharedStream>,
	pub image_streams: Vec<SharedStream>,
	pub session_events: Vec<ManifestEvent>,
	/// DRM info from EXT-X-SESSION-KEY, applied to every variant.
	pub session_drm: Vec<DrmInfo>,
	pub steering: Option<SteeringSelector>,
	/// EXT-X-START offset; negative values are relative to the live edge.
	pub start_time: Option<f64>,
	pub vars: VariableRegistry,
	pub has_closed_captions: bool,
}

/// Builds the presentation skeleton out of a master playlist.
pub struct MasterPlaylistBuilder<'a> {
	pub config: &'a Config,
	next_stream_id: u32,
	next_variant_id: u32,
	/// Muxed-audio placeholders, shared across variants with the same
	/// audio codec.
	muxed_placeholders: HashMap<String, SharedStream>,
}

impl<'a> MasterPlaylistBuilder<'a> {
	pub fn new(config: &'a Config) -> Self {
		Self {
			config,
			next_stream_id: 0,
			next_variant_id: 0,
			muxed_placeholders: HashMap::new(),
		}
	}

	fn stream_id(&mut self) -> u32 {
		let id = self.next_stream_id;
		self.next_stream_id += 1;
		id
	}

	/// Wrap a bare media playlist URI in a single-variant skeleton, for
	/// presentations served without a master playlist.
	pub fn synthesize(&mut self, uri: &Url) -> MasterOutcome {
		let mut stream = Stream::new(self.stream_id(), StreamType::Video);
		stream.mime_type = "video/mp2t".to_string();
		let stream = shared(stream);

		let setup = StreamSetup {
			stream: stream.clone(),
			kind: StreamType::Video,
			candidates: vec![PathwayUri {
				pathway: None,
				uri: uri.clone(),
				stable_variant_id: None,
			}],
			codecs_hint: None,
			placeholder: false,
		};

		let mut variant = Variant::new(0);
		variant.video = Some(stream);

		MasterOutcome {
			setups: vec![setup],
			variants: vec![variant],
			text_streams: Vec::new(),
			image_streams: Vec::new(),
			session_events: Vec::new(),
			session_drm: Vec::new(),
			steering: None,
			start_time: None,
			vars: VariableRegistry::default(),
			has_closed_captions: false,
		}
	}

	pub fn build(&mut self, playlist: &Playlist, base: &Url) -> Result<MasterOutcome> {
		let vars = VariableRegistry::from_playlist(playlist, base, None);

		let steering = match playlist.tag("EXT-X-CONTENT-STEERING") {
			Some(tag) => Some(SteeringSelector::from_tag(tag, base)?),
			None => None,
		};

		let start_time = playlist.tag("EXT-X-START").and_then(|t| t.f64_attr("TIME-OFFSET"));

		let session_events = playlist
			.tags_named("EXT-X-SESSION-DATA")
			.filter_map(|tag| session_data_event(tag, &vars))
			.collect();

		let mut session_drm = Vec::new();
		for tag in playlist.tags_named("EXT-X-SESSION-KEY") {
			match drm::extract(tag, "video/mp4", None) {
				Ok(Some(info)) => session_drm.push(info),
				Ok(None) => {}
				Err(err) => warn!(%err, "ignoring bad EXT-X-SESSION-KEY"),
			}
		}

		// Closed captions register a channel to language map, not a stream.
		let closed_captions = closed_caption_map(playlist);

		let mut setups: Vec<StreamSetup> = Vec::new();
		let mut text_streams = Vec::new();
		let mut image_streams = Vec::new();

		// Alternate renditions, grouped so that identical
		// (TYPE, GROUP-ID, NAME, LANGUAGE) tags merge their URI lists.
		let mut audio_groups: HashMap<String, Vec<usize>> = HashMap::new();
		let mut video_groups: HashMap<String, Vec<usize>> = HashMap::new();
		let mut muxed_count = 0u32;

		for tag in playlist.tags_named("EXT-X-MEDIA") {
			let Some(kind) = media_tag_type(tag) else {
				continue;
			};
			if kind == StreamType::Text {
				if let Some(setup) = self.text_rendition(tag, base, &vars)? {
					text_streams.push(setup.stream.clone());
					setups.push(setup);
				}
				continue;
			}

			let group_id = tag.required_attr("GROUP-ID")?.to_string();
			let key = media_group_key(tag);

			// Merge into an existing rendition of the same identity.
			let group = match kind {
				StreamType::Audio => audio_groups.entry(group_id.clone()).or_default(),
				_ => video_groups.entry(group_id.clone()).or_default(),
			};

			let existing = group.iter().copied().find(|&i| media_group_key_of(&setups[i]) == key);
			if let Some(index) = existing {
				if let Some(candidate) = rendition_candidate(tag, base, &vars)? {
					setups[index].candidates.push(candidate);
				}
				continue;
			}

			let setup = self.media_rendition(tag, kind, base, &vars, &mut muxed_count)?;
			group.push(setups.len());
			setups.push(setup);
		}

		// Variant tags, with SUPPLEMENTAL-CODECS fan-out applied.
		let variant_tags = expand_supplemental_codecs(playlist.tags_named("EXT-X-STREAM-INF"));

		let mut video_by_uri: HashMap<String, usize> = HashMap::new();
		let mut variants: Vec<Variant> = Vec::new();

		for tag in &variant_tags {
			self.build_variant(
				tag,
				base,
				&vars,
				&mut setups,
				&audio_groups,
				&video_groups,
				&mut video_by_uri,
				&mut variants,
				&closed_captions,
			)?;
		}

		// Trick play and thumbnail tracks, with the same supplemental-codec
		// fan-out as variants.
		for tag in &expand_supplemental_codecs(playlist.tags_named("EXT-X-I-FRAME-STREAM-INF")) {
			self.iframe_stream(tag, base, &vars, &mut setups, &mut image_streams)?;
		}
		for tag in playlist.tags_named("EXT-X-IMAGE-STREAM-INF") {
			self.image_stream(tag, base, &vars, &mut setups, &mut image_streams)?;
		}

		dedup_variants(&mut variants);

		if variants.is_empty() {
			return Err(Error::MasterPlaylistNotProvided);
		}

		Ok(MasterOutcome {
			setups,
			variants,
			text_streams,
			image_streams,
			session_events,
			session_drm,
			steering,
			start_time,
			vars,
			has_closed_captions: !closed_captions.is_empty(),
		})
	}

	#[allow(clippy::too_many_arguments)]
	fn build_variant(
		&mut self,
		tag: &Tag,
		base: &Url,
		vars: &VariableRegistry,
		setups: &mut Vec<StreamSetup>,
		audio_groups: &HashMap<String, Vec<usize>>,
		video_groups: &HashMap<String, Vec<usize>>,
		video_by_uri: &mut HashMap<String, usize>,
		variants: &mut Vec<Variant>,
		closed_captions: &HashMap<String, HashMap<String, String>>,
	) -> Result<()> {
		let uri = vars.substitute(tag.required_attr("URI")?);
		let resolved = base.join(&uri)?;

		let bandwidth = tag
			.u64_attr("BANDWIDTH")
			.ok_or_else(|| Error::RequiredAttributeMissing("EXT-X-STREAM-INF:BANDWIDTH".to_string()))?;

		let codecs: Vec<String> = tag
			.attr("CODECS")
			.map(|c| vars.substitute(c))
			.unwrap_or_default()
			.split(',')
			.map(|c| c.trim().to_string())
			.filter(|c| !c.is_empty())
			.collect();
		let video_codecs: Vec<&String> = codecs.iter().filter(|c| is_video_codec(c)).collect();
		let audio_codecs: Vec<&String> = codecs.iter().filter(|c| is_audio_codec(c)).collect();

		let resolution = tag.attr("RESOLUTION").and_then(parse_resolution);
		let frame_rate = tag.f64_attr("FRAME-RATE");
		let hdr = match tag.attr("VIDEO-RANGE") {
			Some("PQ") => Some("PQ".to_string()),
			Some("HLG") => Some("HLG".to_string()),
			_ => None,
		};
		let video_layout = tag.attr("REQ-VIDEO-LAYOUT").map(str::to_string);

		let audio_group = tag.attr("AUDIO").map(|g| vars.substitute(g));
		let video_group = tag.attr("VIDEO").map(|g| vars.substitute(g));

		let audio_renditions: &[usize] = audio_group
			.as_deref()
			.and_then(|g| audio_groups.get(g))
			.map(Vec::as_slice)
			.unwrap_or(&[]);
		let video_renditions: &[usize] = video_group
			.as_deref()
			.and_then(|g| video_groups.get(g))
			.map(Vec::as_slice)
			.unwrap_or(&[]);

		// A workaround for some Microsoft encoders: the variant URI may
		// point straight at one of its own audio renditions. The variant
		// then collapses into the audio group.
		let folds_into_audio = !audio_renditions.is_empty()
			&& audio_renditions
				.iter()
				.filter(|&&i| setups[i].candidates.iter().any(|c| c.uri == resolved))
				.count() == 1;

		// Decide what the variant URI itself carries.
		let uri_is_audio = !folds_into_audio
			&& video_renditions.is_empty()
			&& audio_renditions.is_empty()
			&& resolution.is_none()
			&& frame_rate.is_none()
			&& video_codecs.is_empty()
			&& codecs.len() == 1;

		let pathway = tag.attr("PATHWAY-ID").map(str::to_string);
		let stable_id = tag.attr("STABLE-VARIANT-ID").map(str::to_string);
		let candidate = PathwayUri {
			pathway,
			uri: resolved.clone(),
			stable_variant_id: stable_id,
		};

		let language = tag.attr("LANGUAGE").map(normalize_language).unwrap_or_default();

		if folds_into_audio {
			// The standalone form is discarded; renditions carry the audio.
			for &index in audio_renditions {
				let mut variant = Variant::new(self.variant_id());
				variant.bandwidth = bandwidth;
				variant.audio = Some(setups[index].stream.clone());
				variant.language = setups[index].stream.lock().unwrap().language.clone();
				variants.push(variant);
			}
			return Ok(());
		}

		if uri_is_audio {
			let stream_id = self.stream_id();
			let mut stream = Stream::new(stream_id, StreamType::Audio);
			stream.bandwidth = Some(bandwidth);
			stream.codecs = codecs.join(",");
			stream.language = language.clone();
			let stream = shared(stream);

			setups.push(StreamSetup {
				stream: stream.clone(),
				kind: StreamType::Audio,
				candidates: vec![candidate],
				codecs_hint: (!codecs.is_empty()).then(|| codecs.join(",")),
				placeholder: false,
			});

			let mut variant = Variant::new(self.variant_id());
			variant.bandwidth = bandwidth;
			variant.language = language;
			variant.audio = Some(stream);

			// An alternate video group can still pair with an audio variant.
			if let Some(&video_index) = video_renditions.first() {
				variant.video = Some(setups[video_index].stream.clone());
			}

			variants.push(variant);
			return Ok(());
		}

		// The variant URI carries video (possibly with muxed audio).
		// Variants sharing a URI and codec string collapse onto the same
		// video stream; a SUPPLEMENTAL-CODECS duplicate keeps its own.
		let uri_key = format!("{resolved}|{}", codecs.join(","));
		let video_index = match video_by_uri.get(&uri_key) {
			Some(&index) => index,
			None => {
				let stream_id = self.stream_id();
				let mut stream = Stream::new(stream_id, StreamType::Video);
				stream.bandwidth = Some(bandwidth);
				stream.width = resolution.map(|(w, _)| w);
				stream.height = resolution.map(|(_, h)| h);
				stream.frame_rate = frame_rate;
				stream.hdr = hdr.clone();
				stream.video_layout = video_layout.clone();

				// With an audio group the audio codecs belong to the
				// renditions; muxed variants keep the full list.
				stream.codecs = if audio_renditions.is_empty() {
					codecs.join(",")
				} else {
					video_codecs.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",")
				};

				// Closed captions referenced by this variant attach to the
				// video stream.
				if let Some(group) = tag.attr("CLOSED-CAPTIONS").filter(|&g| g != "NONE") {
					if let Some(map) = closed_captions.get(group) {
						stream.closed_captions = map.clone().into_iter().collect();
					}
				}

				let codecs_hint = (!stream.codecs.is_empty()).then(|| stream.codecs.clone());
				let stream = shared(stream);
				setups.push(StreamSetup {
					stream,
					kind: StreamType::Video,
					candidates: Vec::new(),
					codecs_hint,
					placeholder: false,
				});
				video_by_uri.insert(uri_key, setups.len() - 1);
				setups.len() - 1
			}
		};

		if !setups[video_index].candidates.iter().any(|c| c.uri == candidate.uri) {
			setups[video_index].candidates.push(candidate);
		}
		let video_stream = setups[video_index].stream.clone();

		if audio_renditions.is_empty() {
			// No alternates: muxed audio, or silent video.
			let mut variant = Variant::new(self.variant_id());
			variant.bandwidth = bandwidth;
			variant.language = language;

			if !audio_codecs.is_empty() {
				// Muxed audio gets a placeholder stream with nothing to
				// load, shared across variants with the same codec.
				let codec_key = audio_codecs.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",");
				let audio = match self.muxed_placeholders.get(&codec_key) {
					Some(existing) => existing.clone(),
					None => {
						let placeholder_id = self.stream_id();
						let mut audio = Stream::new(placeholder_id, StreamType::Audio);
						audio.mime_type = "video/mp2t".to_string();
						audio.codecs = codec_key.clone();
						muxed_placeholder_uri(&mut audio, placeholder_id);
						let audio = shared(audio);

						setups.push(StreamSetup {
							stream: audio.clone(),
							kind: StreamType::Audio,
							candidates: Vec::new(),
							codecs_hint: None,
							placeholder: true,
						});
						self.muxed_placeholders.insert(codec_key, audio.clone());
						audio
					}
				};
				variant.audio = Some(audio);
			}

			variant.video = Some(video_stream);
			variants.push(variant);
		} else {
			// One variant per audio rendition in the referenced group.
			for &index in audio_renditions {
				let audio = setups[index].stream.clone();
				let mut variant = Variant::new(self.variant_id());
				variant.bandwidth = bandwidth;
				variant.language = audio.lock().unwrap().language.clone();
				variant.primary = audio.lock().unwrap().primary;
				variant.audio = Some(audio);
				variant.video = Some(video_stream.clone());
				variants.push(variant);
			}
		}

		Ok(())
	}

	fn variant_id(&mut self) -> u32 {
		let id = self.next_variant_id;
		self.next_variant_id += 1;
		id
	}

	fn media_rendition(
		&mut self,
		tag: &Tag,
		kind: StreamType,
		base: &Url,
		vars: &VariableRegistry,
		muxed_count: &mut u32,
	) -> Result<StreamSetup> {
		let stream_id = self.stream_id();
		let mut stream = Stream::new(stream_id, kind);
		stream.group_id = tag.attr("GROUP-ID").map(str::to_string);
		stream.label = tag.attr("NAME").map(str::to_string);
		stream.language = tag.attr("LANGUAGE").map(normalize_language).unwrap_or_default();
		stream.primary = tag.bool_attr("DEFAULT");
		stream.forced = tag.bool_attr("FORCED");

		if let Some(characteristics) = tag.attr("CHARACTERISTICS") {
			stream.roles = characteristics.split(',').map(|r| r.trim().to_string()).collect();
		}

		if let Some(channels) = tag.attr("CHANNELS") {
			// "6" or "16/JOC" for spatial audio.
			let mut parts = channels.split('/');
			stream.channels_count = parts.next().and_then(|c| c.parse().ok());
			stream.spatial_audio = parts.any(|p| p == "JOC");
		}

		let candidate = rendition_candidate(tag, base, vars)?;
		let placeholder = kind == StreamType::Audio && candidate.is_none();
		if placeholder {
			// Muxed into the video rendition; nothing to load.
			*muxed_count += 1;
			stream.mime_type = "video/mp2t".to_string();
			muxed_placeholder_uri(&mut stream, *muxed_count);
		}

		Ok(StreamSetup {
			stream: shared(stream),
			kind,
			candidates: candidate.into_iter().collect(),
			codecs_hint: None,
			placeholder,
		})
	}

	fn text_rendition(&mut self, tag: &Tag, base: &Url, vars: &VariableRegistry) -> Result<Option<StreamSetup>> {
		let Some(candidate) = rendition_candidate(tag, base, vars)? else {
			warn!("subtitle rendition without URI, skipping");
			return Ok(None);
		};

		let stream_id = self.stream_id();
		let mut stream = Stream::new(stream_id, StreamType::Text);
		stream.group_id = tag.attr("GROUP-ID").map(str::to_string);
		stream.label = tag.attr("NAME").map(str::to_string);
		stream.language = tag.attr("LANGUAGE").map(normalize_language).unwrap_or_default();
		stream.primary = tag.bool_attr("DEFAULT");
		stream.forced = tag.bool_attr("FORCED");

		if let Some(characteristics) = tag.attr("CHARACTERISTICS") {
			stream.roles = characteristics.split(',').map(|r| r.trim().to_string()).collect();
		}

		Ok(Some(StreamSetup {
			stream: shared(stream),
			kind: StreamType::Text,
			candidates: vec![candidate],
			codecs_hint: None,
			placeholder: false,
		}))
	}

	/// I-frame playlists: `mjpg` means a thumbnail track; anything else is
	/// a trick-play video rendition attached to the full-rate streams.
	fn iframe_stream(
		&mut self,
		tag: &Tag,
		base: &Url,
		vars: &VariableRegistry,
		setups: &mut Vec<StreamSetup>,
		image_streams: &mut Vec<SharedStream>,
	) -> Result<()> {
		let Some(candidate) = rendition_candidate(tag, base, vars)? else {
			warn!("EXT-X-I-FRAME-STREAM-INF without URI, skipping");
			return Ok(());
		};

		let codecs = tag.attr("CODECS").unwrap_or_default().to_string();
		if codecs == "mjpg" {
			return self.image_stream(tag, base, vars, setups, image_streams);
		}

		let stream_id = self.stream_id();
		let mut stream = Stream::new(stream_id, StreamType::Video);
		stream.codecs = codecs.clone();
		stream.bandwidth = tag.u64_attr("BANDWIDTH");
		stream.trick_play = true;
		if let Some((w, h)) = tag.attr("RESOLUTION").and_then(parse_resolution) {
			stream.width = Some(w);
			stream.height = Some(h);
		}
		let stream = shared(stream);

		// Pair the trick-play rendition with full-rate video streams that
		// don't have one yet.
		for setup in setups.iter() {
			if setup.kind == StreamType::Video && !setup.placeholder {
				let mut full_rate = setup.stream.lock().unwrap();
				if !full_rate.trick_play && full_rate.trick_mode_video.is_none() {
					full_rate.trick_mode_video = Some(stream.clone());
				}
			}
		}

		setups.push(StreamSetup {
			stream,
			kind: StreamType::Video,
			candidates: vec![candidate],
			codecs_hint: (!codecs.is_empty()).then_some(codecs),
			placeholder: false,
		});

		Ok(())
	}

	fn image_stream(
		&mut self,
		tag: &Tag,
		base: &Url,
		vars: &VariableRegistry,
		setups: &mut Vec<StreamSetup>,
		image_streams: &mut Vec<SharedStream>,
	) -> Result<()> {
		let Some(candidate) = rendition_candidate(tag, base, vars)? else {
			warn!("image stream without URI, skipping");
			return Ok(());
		};

		let stream_id = self.stream_id();
		let mut stream = Stream::new(stream_id, StreamType::Image);
		stream.bandwidth = tag.u64_attr("BANDWIDTH");
		if let Some((w, h)) = tag.attr("RESOLUTION").and_then(parse_resolution) {
			stream.width = Some(w);
			stream.height = Some(h);
		}
		// A LAYOUT attribute on the stream tag seeds the grid; EXT-X-TILES
		// in the media playlist refines it per reference.
		stream.tiles_layout = tag.attr("LAYOUT").map(str::to_string);

		let stream = shared(stream);
		image_streams.push(stream.clone());
		setups.push(StreamSetup {
			stream,
			kind: StreamType::Image,
			candidates: vec![candidate],
			codecs_hint: None,
			placeholder: false,
		});

		Ok(())
	}
}

/// Whether two streams can share a variant, DRM-wise: compatible when
/// either has no DRM yet, or they agree on at least one key system.
pub fn drm_compatible(a: &[DrmInfo], b: &[DrmInfo]) -> bool {
	if a.is_empty() || b.is_empty() {
		return true;
	}
	a.iter().any(|ia| b.iter().any(|ib| ia.key_system == ib.key_system))
}

fn media_tag_type(tag: &Tag) -> Option<StreamType> {
	match tag.attr("TYPE") {
		Some("AUDIO") => Some(StreamType::Audio),
		Some("VIDEO") => Some(StreamType::Video),
		Some("SUBTITLES") => Some(StreamType::Text),
		// Registered separately as a channel map, not a stream.
		Some("CLOSED-CAPTIONS") => None,
		other => {
			warn!(kind = ?other, "unrecognized EXT-X-MEDIA type");
			None
		}
	}
}

fn media_group_key(tag: &Tag) -> (String, String, String) {
	(
		tag.attr("GROUP-ID").unwrap_or_default().to_string(),
		tag.attr("NAME").unwrap_or_default().to_string(),
		tag.attr("LANGUAGE").map(normalize_language).unwrap_or_default(),
	)
}

fn media_group_key_of(setup: &StreamSetup) -> (String, String, String) {
	let stream = setup.stream.lock().unwrap();
	(
		stream.group_id.clone().unwrap_or_default(),
		stream.label.clone().unwrap_or_default(),
		stream.language.clone(),
	)
}

fn rendition_candidate(tag: &Tag, base: &Url, vars: &VariableRegistry) -> Result<Option<PathwayUri>> {
	let Some(uri) = tag.attr("URI") else {
		return Ok(None);
	};

	let resolved = base.join(&vars.substitute(uri))?;
	Ok(Some(PathwayUri {
		pathway: tag.attr("PATHWAY-ID").map(str::to_string),
		uri: resolved,
		stable_variant_id: tag
			.attr("STABLE-RENDITION-ID")
			.or(tag.attr("STABLE-VARIANT-ID"))
			.map(str::to_string),
	}))
}

/// `CC1..CC4` stay as-is; `SERVICEn` becomes `svcn`.
fn closed_caption_map(playlist: &Playlist) -> HashMap<String, HashMap<String, String>> {
	let mut groups: HashMap<String, HashMap<String, String>> = HashMap::new();

	for tag in playlist.tags_named("EXT-X-MEDIA") {
		if tag.attr("TYPE") != Some("CLOSED-CAPTIONS") {
			continue;
		}
		let (Some(group), Some(instream)) = (tag.attr("GROUP-ID"), tag.attr("INSTREAM-ID")) else {
			continue;
		};

		let channel = match instream.strip_prefix("SERVICE") {
			Some(number) => format!("svc{number}"),
			None => instream.to_string(),
		};
		let language = tag.attr("LANGUAGE").map(normalize_language).unwrap_or_default();

		groups.entry(group.to_string()).or_default().insert(channel, language);
	}

	groups
}

/// Duplicate variant tags carrying SUPPLEMENTAL-CODECS, replacing the video
/// codec with the supplemental one while keeping any audio codec.
fn expand_supplemental_codecs<'a>(tags: impl Iterator<Item = &'a Tag>) -> Vec<Tag> {
	let mut out = Vec::new();

	for tag in tags {
		out.push(tag.clone());

		let Some(supplemental) = tag.attr("SUPPLEMENTAL-CODECS") else {
			continue;
		};

		// Compatibility brands ride after a slash.
		let supplemental: Vec<&str> = supplemental
			.split(',')
			.map(|c| c.split('/').next().unwrap_or("").trim())
			.filter(|c| !c.is_empty())
			.collect();
		if supplemental.is_empty() {
			continue;
		}

		let audio: Vec<String> = tag
			.attr("CODECS")
			.unwrap_or_default()
			.split(',')
			.map(str::trim)
			.filter(|c| is_audio_codec(c))
			.map(str::to_string)
			.collect();

		let mut codecs: Vec<String> = supplemental.iter().map(|s| s.to_string()).collect();
		codecs.extend(audio);

		let mut duplicate = tag.clone();
		for attr in &mut duplicate.attrs {
			if attr.name == "CODECS" {
				attr.value = codecs.join(",");
			}
		}
		duplicate.attrs.retain(|a| a.name != "SUPPLEMENTAL-CODECS");
		out.push(duplicate);
	}

	out
}

/// Dedup by (video uri, audio uri, codecs): variants that differ only in
/// text track collapse.
fn dedup_variants(variants: &mut Vec<Variant>) {
	let mut seen = std::collections::HashSet::new();

	variants.retain(|variant| {
		let video = variant
			.video
			.as_ref()
			.map(|s| {
				let s = s.lock().unwrap();
				format!("{}:{}", s.id, s.codecs)
			})
			.unwrap_or_default();
		let audio = variant
			.audio
			.as_ref()
			.map(|s| {
				let s = s.lock().unwrap();
				format!("{}:{}", s.id, s.codecs)
			})
			.unwrap_or_default();

		seen.insert(format!("{video}|{audio}|{}", variant.bandwidth))
	});
}

fn muxed_placeholder_uri(stream: &mut Stream, number: u32) {
	stream.label.get_or_insert_with(|| format!("{MUXED_AUDIO_SCHEME}#{number}"));
}

fn normalize_language(raw: &str) -> String {
	raw.trim().to_ascii_lowercase()
}

pub fn is_video_codec(codec: &str) -> bool {
	["avc1", "avc3", "hvc1", "hev1", "dvh1", "dvhe", "vp09", "vp8", "vp9", "av01", "mp4v"]
		.iter()
		.any(|p| codec.starts_with(p))
}

pub fn is_audio_codec(codec: &str) -> bool {
	["mp4a", "ac-3", "ec-3", "ac-4", "opus", "flac", "alac", "mhm1", "mhm2"]
		.iter()
		.any(|p| codec.starts_with(p))
}

fn session_data_event(tag: &Tag, vars: &VariableRegistry) -> Option<ManifestEvent> {
	let id = tag.attr("DATA-ID")?.to_string();
	Some(ManifestEvent::SessionData {
		id,
		value: tag.attr("VALUE").map(|v| vars.substitute(v)),
		language: tag.attr("LANGUAGE").map(str::to_string),
		uri: tag.attr("URI").map(|v| vars.substitute(v)),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::playlist::lex;

	fn build(text: &str) -> MasterOutcome {
		let playlist = lex(text).unwrap();
		let base = Url::parse("https://example.com/main.m3u8").unwrap();
		let config = Config::default();
		MasterPlaylistBuilder::new(&config).build(&playlist, &base).unwrap()
	}

	#[test]
	fn single_variant() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"\n",
			"v.m3u8\n",
		));

		assert_eq!(outcome.variants.len(), 1);
		let variant = &outcome.variants[0];
		assert_eq!(variant.bandwidth, 1_280_000);

		let video = variant.video.as_ref().unwrap().lock().unwrap();
		assert_eq!(video.width, Some(1280));
		// No audio group: the muxed codec list stays on the video stream.
		assert_eq!(video.codecs, "avc1.4d401f,mp4a.40.2");

		// Muxed audio is represented by a placeholder.
		let audio = variant.audio.as_ref().unwrap().lock().unwrap();
		assert_eq!(audio.mime_type, "video/mp2t");
	}

	#[test]
	fn audio_group_fanout() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",DEFAULT=YES,URI=\"en.m3u8\"\n",
			"#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"French\",LANGUAGE=\"fr\",URI=\"fr.m3u8\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1920x1080,CODECS=\"avc1.64001f,mp4a.40.2\",AUDIO=\"aud\"\n",
			"v.m3u8\n",
		));

		// One variant per audio rendition.
		assert_eq!(outcome.variants.len(), 2);
		let languages: Vec<String> = outcome.variants.iter().map(|v| v.language.clone()).collect();
		assert!(languages.contains(&"en".to_string()));
		assert!(languages.contains(&"fr".to_string()));

		// The video stream sheds the audio codec.
		let video = outcome.variants[0].video.as_ref().unwrap().lock().unwrap();
		assert_eq!(video.codecs, "avc1.64001f");

		let en = outcome.variants.iter().find(|v| v.language == "en").unwrap();
		assert!(en.primary);
	}

	#[test]
	fn identical_media_tags_merge_uris() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",URI=\"en-a.m3u8\"\n",
			"#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",URI=\"en-b.m3u8\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360,AUDIO=\"aud\"\n",
			"v.m3u8\n",
		));

		let audio_setup = outcome
			.setups
			.iter()
			.find(|s| s.kind == StreamType::Audio && !s.placeholder)
			.unwrap();
		assert_eq!(audio_setup.candidates.len(), 2);
		assert_eq!(outcome.variants.len(), 1);
	}

	#[test]
	fn variants_sharing_uri_collapse() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360\n",
			"v.m3u8\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360\n",
			"v.m3u8\n",
		));

		assert_eq!(outcome.variants.len(), 1);
	}

	#[test]
	fn audio_only_variant_detection() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=96000,CODECS=\"mp4a.40.2\"\n",
			"audio.m3u8\n",
		));

		let variant = &outcome.variants[0];
		assert!(variant.video.is_none());
		assert!(variant.audio.is_some());
	}

	#[test]
	fn supplemental_codecs_duplicate_variant() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=3840x2160,",
			"CODECS=\"hvc1.2.4.L153.B0,mp4a.40.2\",SUPPLEMENTAL-CODECS=\"dvh1.08.07/db4h\",VIDEO-RANGE=PQ\n",
			"uhd.m3u8\n",
		));

		assert_eq!(outcome.variants.len(), 2);

		let codec_lists: Vec<String> = outcome
			.variants
			.iter()
			.map(|v| v.video.as_ref().unwrap().lock().unwrap().codecs.clone())
			.collect();
		assert!(codec_lists.contains(&"hvc1.2.4.L153.B0,mp4a.40.2".to_string()));
		// The supplemental duplicate keeps the audio codec.
		assert!(codec_lists.contains(&"dvh1.08.07,mp4a.40.2".to_string()));
	}

	#[test]
	fn subtitles_become_text_streams() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"German\",LANGUAGE=\"de\",URI=\"de.m3u8\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360,SUBTITLES=\"subs\"\n",
			"v.m3u8\n",
		));

		assert_eq!(outcome.text_streams.len(), 1);
		let text = outcome.text_streams[0].lock().unwrap();
		assert_eq!(text.language, "de");
		assert_eq!(text.ty, Some(StreamType::Text));
	}

	#[test]
	fn closed_captions_register_channel_map() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS,GROUP-ID=\"cc\",NAME=\"English\",LANGUAGE=\"en\",INSTREAM-ID=\"CC1\"\n",
			"#EXT-X-MEDIA:TYPE=CLOSED-CAPTIONS,GROUP-ID=\"cc\",NAME=\"Spanish\",LANGUAGE=\"es\",INSTREAM-ID=\"SERVICE3\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360,CLOSED-CAPTIONS=\"cc\"\n",
			"v.m3u8\n",
		));

		assert!(outcome.has_closed_captions);
		let video = outcome.variants[0].video.as_ref().unwrap().lock().unwrap();
		assert_eq!(video.closed_captions.get("CC1").map(String::as_str), Some("en"));
		assert_eq!(video.closed_captions.get("svc3").map(String::as_str), Some("es"));

		// No text stream is materialized for closed captions.
		assert!(outcome.text_streams.is_empty());
	}

	#[test]
	fn microsoft_audio_fold() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",URI=\"audio.m3u8\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=96000,CODECS=\"mp4a.40.2\",AUDIO=\"aud\"\n",
			"audio.m3u8\n",
		));

		// The standalone audio variant folds into the rendition.
		assert_eq!(outcome.variants.len(), 1);
		let variant = &outcome.variants[0];
		assert!(variant.video.is_none());
		assert_eq!(variant.language, "en");
	}

	#[test]
	fn image_streams_and_iframe_mjpg() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360\n",
			"v.m3u8\n",
			"#EXT-X-IMAGE-STREAM-INF:BANDWIDTH=10000,RESOLUTION=320x180,URI=\"thumbs.m3u8\"\n",
			"#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=200000,CODECS=\"avc1.4d401f\",URI=\"iframe.m3u8\"\n",
		));

		assert_eq!(outcome.image_streams.len(), 1);

		// The avc1 I-frame playlist became a trick-play rendition.
		let video = outcome.variants[0].video.as_ref().unwrap().lock().unwrap();
		let trick = video.trick_mode_video.as_ref().unwrap().lock().unwrap();
		assert!(trick.trick_play);
	}

	#[test]
	fn session_data_and_start() {
		let outcome = build(concat!(
			"#EXTM3U\n",
			"#EXT-X-SESSION-DATA:DATA-ID=\"com.example.title\",VALUE=\"Movie\"\n",
			"#EXT-X-START:TIME-OFFSET=-12.0\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360\n",
			"v.m3u8\n",
		));

		assert_eq!(outcome.start_time, Some(-12.0));
		assert_eq!(outcome.session_events.len(), 1);
		match &outcome.session_events[0] {
			ManifestEvent::SessionData { id, value, .. } => {
				assert_eq!(id, "com.example.title");
				assert_eq!(value.as_deref(), Some("Movie"));
			}
		}
	}

	#[test]
	fn empty_master_is_rejected() {
		let playlist = lex("#EXTM3U\n#EXT-X-VERSION:7\n").unwrap();
		let base = Url::parse("https://example.com/main.m3u8").unwrap();
		let config = Config::default();
		let result = MasterPlaylistBuilder::new(&config).build(&playlist, &base);
		assert!(matches!(result, Err(Error::MasterPlaylistNotProvided)));
	}

	#[test]
	fn drm_compatibility() {
		let widevine = DrmInfo {
			key_system: "com.widevine.alpha".to_string(),
			..Default::default()
		};
		let fairplay = DrmInfo {
			key_system: "com.apple.fps".to_string(),
			..Default::default()
		};

		assert!(drm_compatible(&[], &[widevine.clone()]));
		assert!(drm_compatible(&[widevine.clone()], &[widevine.clone()]));
		assert!(!drm_compatible(&[widevine], &[fairplay]));
	}
}
