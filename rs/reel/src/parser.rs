//! The parser facade: initial parse, lazy segment-index loading, and the
//! live update loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::fetch::{Fetch, Request, RequestContext, RequestKind, RequestManager};
use crate::master::{drm_compatible, MasterOutcome, MasterPlaylistBuilder, StreamSetup};
use crate::media::{InitSegmentCache, LoadedMediaPlaylist, MediaPlaylistLoader};
use crate::model::{
	DateRange, KeyCache, Manifest, MediaQuality, PresentationType, SegmentIndex, SharedTimeline, StreamType, Variant,
};
use crate::player::{MetadataFrame, PlayerInterface};
use crate::playlist::{lex, PlaylistKind, VariableRegistry};
use crate::steering::SteeringSelector;
use crate::sync::{StreamSynchronizer, SyncTarget};
use crate::update::{blocking_reload_uri, UpdatePacer};
use crate::{Error, Result, Severity};

/// Where a stream is in its lazy-load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
	NotLoaded,
	Loaded,
	Closed,
}

/// Per-playlist bookkeeping that survives across live refreshes.
#[derive(Debug, Default)]
struct StreamBookkeeping {
	redirect_uris: Vec<String>,
	/// Memoized start time per media sequence number, so refreshed
	/// references land exactly where their predecessors did.
	sequence_to_start: HashMap<u64, f64>,
	first_sequence_number: u64,
	next_media_sequence: u64,
	next_part: Option<u64>,
	can_skip: bool,
	can_block_reload: bool,
	has_end_list: bool,
	target_duration: f64,
	part_target: Option<f64>,
	hold_back: Option<f64>,
	part_hold_back: Option<f64>,
	final_uri: Option<Url>,
	min_timestamp: f64,
	max_timestamp: f64,
}

struct ActiveStream {
	setup: StreamSetup,
	state: LoadState,
	book: StreamBookkeeping,
}

/// Parses an HLS presentation and keeps it fresh while it is live.
///
/// One instance serves one presentation. All methods take `&mut self`; the
/// embedder drives the parser from a single task and shares the resulting
/// [Manifest] handles elsewhere.
pub struct HlsParser {
	config: Config,
	player: Arc<dyn PlayerInterface>,
	net: RequestManager,
	stop: watch::Sender<bool>,

	vars: VariableRegistry,
	init_cache: InitSegmentCache,
	key_cache: KeyCache,
	steering: Option<SteeringSelector>,

	streams: Vec<ActiveStream>,
	timeline: SharedTimeline,
	synchronizer: StreamSynchronizer,
	manifest: Option<Manifest>,

	presentation_type: PresentationType,
	low_latency: bool,
	max_target_duration: f64,
	gap_count: u32,
	start_time: Option<f64>,

	pacer: UpdatePacer,
	recoverable_failure: bool,
	pending_date_ranges: Vec<DateRange>,
	delivered_date_ranges: HashSet<String>,
	finalized: bool,
}

impl HlsParser {
	pub fn new(config: Config, fetch: Arc<dyn Fetch>, player: Arc<dyn PlayerInterface>) -> Self {
		let (stop, stopped) = watch::channel(false);
		let net = RequestManager::new(fetch, stopped);

		Self {
			config,
			player,
			net,
			stop,
			vars: VariableRegistry::default(),
			init_cache: InitSegmentCache::default(),
			key_cache: KeyCache::default(),
			steering: None,
			streams: Vec::new(),
			timeline: SharedTimeline::default(),
			synchronizer: StreamSynchronizer::default(),
			manifest: None,
			presentation_type: PresentationType::Vod,
			low_latency: false,
			max_target_duration: 0.0,
			gap_count: 0,
			start_time: None,
			pacer: UpdatePacer::default(),
			recoverable_failure: false,
			pending_date_ranges: Vec::new(),
			delivered_date_ranges: HashSet::new(),
			finalized: false,
		}
	}

	/// Fetch and parse the entry playlist, eagerly loading just enough
	/// media playlists to pin down the timeline. Errors here are fatal.
	pub async fn parse(&mut self, uri: Url) -> Result<Manifest> {
		let request = Request::new(RequestKind::Manifest, RequestContext::MasterPlaylist, uri.clone());
		let response = self.net.fetch(request).await?;
		let final_uri = response.final_uri.clone();

		let text = String::from_utf8_lossy(&response.body);
		let playlist = lex(&text)?;

		self.low_latency = self.config.allow_low_latency && self.player.is_low_latency_mode();

		let mut builder = MasterPlaylistBuilder::new(&self.config);
		let outcome = match playlist.kind {
			PlaylistKind::Master => builder.build(&playlist, &final_uri)?,
			// A bare media playlist gets a synthesized single-variant
			// wrapper.
			PlaylistKind::Media => builder.synthesize(&final_uri),
		};

		let MasterOutcome {
			setups,
			mut variants,
			text_streams,
			image_streams,
			session_events,
			session_drm,
			steering,
			start_time,
			vars,
			has_closed_captions,
		} = outcome;

		self.vars = vars;
		self.steering = steering;
		self.start_time = start_time;

		if let Some(steering) = &mut self.steering {
			steering.poll(&self.net).await;
		}

		for event in session_events {
			self.player.on_event(event);
		}

		self.streams = setups
			.into_iter()
			.map(|setup| ActiveStream {
				setup,
				state: LoadState::NotLoaded,
				book: StreamBookkeeping::default(),
			})
			.collect();

		// Session-level keys apply to every stream before variants compute
		// their DRM union.
		for info in session_drm {
			for active in &mut self.streams {
				let mut stream = active.setup.stream.lock().unwrap();
				if !stream.drm_infos.contains(&info) {
					stream.drm_infos.push(info.clone());
				}
			}
		}

		// Load the first variant's streams up front; everything else stays
		// lazy until the player asks for it.
		let eager: Vec<u32> = variants
			.first()
			.into_iter()
			.flat_map(|v| [v.audio.clone(), v.video.clone()])
			.flatten()
			.map(|s| s.lock().unwrap().id)
			.collect();

		for stream_id in eager {
			self.create_segment_index(stream_id).await?;
		}

		self.finalize_streams(&mut variants);

		let is_low_latency = self.low_latency && self.streams.iter().any(|s| s.book.part_target.is_some());
		let sequence_mode = self.synchronizer.lowest_sync_time().is_none();

		let manifest = Manifest {
			timeline: self.timeline.clone(),
			variants,
			text_streams,
			image_streams,
			sequence_mode,
			is_low_latency,
			gap_count: self.gap_count,
			period_count: 1,
			start_time: self.start_time,
			service_description: None,
		};

		if has_closed_captions {
			self.player.make_text_streams_for_closed_captions(&manifest);
		}

		self.flush_date_ranges();
		self.manifest = Some(manifest.clone());

		info!(
			variants = manifest.variants.len(),
			text = manifest.text_streams.len(),
			images = manifest.image_streams.len(),
			live = self.is_live(),
			"presentation parsed"
		);

		Ok(manifest)
	}

	/// Lazily load a stream's media playlist and build its segment index.
	/// Safe to call repeatedly; only the first call does work.
	pub async fn create_segment_index(&mut self, stream_id: u32) -> Result<()> {
		if *self.stop.borrow() {
			return Err(Error::Aborted);
		}

		let Some(index) = self.position_of(stream_id) else {
			warn!(stream_id, "create_segment_index on unknown stream");
			return Ok(());
		};

		match self.streams[index].state {
			LoadState::Loaded => return Ok(()),
			LoadState::NotLoaded | LoadState::Closed => {}
		}

		if self.streams[index].setup.placeholder {
			// Muxed-in audio has no playlist of its own.
			self.streams[index].state = LoadState::Loaded;
			return Ok(());
		}

		self.load_stream(index, false).await?;

		// Streams loaded after the initial sync are aligned against the
		// memoized anchors.
		if self.finalized {
			self.sync_one(index);
		}

		Ok(())
	}

	/// Drop a stream's segment references. A later `create_segment_index`
	/// starts over from the network.
	pub fn close_segment_index(&mut self, stream_id: u32) {
		if let Some(index) = self.position_of(stream_id) {
			let active = &mut self.streams[index];
			active.setup.stream.lock().unwrap().close_segment_index();
			active.state = LoadState::Closed;
			active.book = StreamBookkeeping::default();
		}
	}

	/// One refresh tick over every loaded live stream.
	pub async fn update(&mut self) -> Result<()> {
		if *self.stop.borrow() {
			return Err(Error::Aborted);
		}

		let started = tokio::time::Instant::now();
		self.recoverable_failure = false;

		if let Some(steering) = &mut self.steering {
			steering.poll(&self.net).await;
		}

		let candidates: Vec<usize> = self
			.streams
			.iter()
			.enumerate()
			.filter(|(_, s)| s.state == LoadState::Loaded && !s.setup.placeholder && !s.book.has_end_list)
			.map(|(i, _)| i)
			.collect();

		for index in candidates {
			match self.load_stream(index, true).await {
				Ok(()) => {}
				Err(err) if err.is_abort() => return Err(err),
				Err(err) => {
					let stream_id = self.streams[index].setup.stream.lock().unwrap().id;
					warn!(stream_id, %err, "stream refresh failed");
					self.player.disable_stream(stream_id);

					if self.config.raise_fatal_on_update_failure {
						self.player.on_error(Severity::Fatal, &err);
						return Err(err);
					}

					self.player.on_error(Severity::Recoverable, &err);
					self.recoverable_failure = true;
				}
			}
		}

		// End of list everywhere demotes the presentation to VOD.
		let all_ended = {
			let mut loaded = self.loaded_streams().peekable();
			loaded.peek().is_some() && loaded.all(|s| s.book.has_end_list)
		};
		if all_ended && self.presentation_type.is_live() {
			self.convert_to_vod();
		}

		self.flush_date_ranges();
		if let Some(manifest) = &mut self.manifest {
			manifest.gap_count = self.gap_count;
		}

		self.pacer.record(started.elapsed());
		self.player.on_manifest_updated();
		Ok(())
	}

	/// Run the update loop until the presentation ends or [Self::stop] is
	/// called.
	pub async fn service(&mut self) -> Result<()> {
		let mut stopped = self.stop.subscribe();

		loop {
			if !self.is_live() || *stopped.borrow() {
				return Ok(());
			}

			match self.update().await {
				Ok(()) => {}
				Err(err) if err.is_abort() => return Ok(()),
				Err(err) => return Err(err),
			}

			let delay = if self.recoverable_failure {
				self.config.update_retry_delay
			} else {
				self.pacer.delay(self.update_period())
			};

			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = stopped.wait_for(|s| *s) => return Ok(()),
			}
		}
	}

	/// Halt updates and abort all in-flight requests. Further calls observe
	/// the canceled state.
	pub fn stop(&mut self) {
		debug!("stopping hls parser");
		let _ = self.stop.send(true);

		for active in &mut self.streams {
			active.setup.stream.lock().unwrap().close_segment_index();
			active.book = StreamBookkeeping::default();
			active.state = LoadState::Closed;
		}
		self.init_cache.clear();
		self.pending_date_ranges.clear();
	}

	pub fn manifest(&self) -> Option<&Manifest> {
		self.manifest.as_ref()
	}

	pub fn is_live(&self) -> bool {
		self.presentation_type.is_live()
	}

	fn update_period(&self) -> Duration {
		if let Some(period) = self.config.update_period {
			return period;
		}

		// Half a part target keeps low-latency streams fresh; otherwise the
		// playlist target duration is the natural cadence.
		let part_target = self
			.streams
			.iter()
			.filter_map(|s| s.book.part_target)
			.min_by(f64::total_cmp);
		let seconds = match part_target {
			Some(part) if self.low_latency => (part / 2.0).max(0.1),
			_ => self.max_target_duration.max(0.5),
		};

		Duration::from_secs_f64(seconds)
	}

	fn position_of(&self, stream_id: u32) -> Option<usize> {
		self.streams
			.iter()
			.position(|s| s.setup.stream.lock().unwrap().id == stream_id)
	}

	/// Fetch one stream's playlist and apply it, either as the initial
	/// index or as a merge into the existing one.
	async fn load_stream(&mut self, index: usize, merge: bool) -> Result<()> {
		let uris = request_uris(&self.streams[index], self.steering.as_ref(), merge);
		if uris.is_empty() {
			return Err(Error::EmptyMediaPlaylist("stream has no playlist uri".to_string()));
		}

		let kind = self.streams[index].setup.kind;
		let codecs_hint = self.streams[index].setup.codecs_hint.clone();
		let sequence_to_start = self.streams[index].book.sequence_to_start.clone();

		let mut loader = MediaPlaylistLoader {
			net: &self.net,
			config: &self.config,
			init_cache: &mut self.init_cache,
			key_cache: &self.key_cache,
			master_vars: &self.vars,
			low_latency: self.low_latency,
		};

		let loaded = loader
			.load(&uris, kind, codecs_hint.as_deref(), &sequence_to_start)
			.await?;

		// The first loaded stream pins the presentation type; later loads
		// can only end the presentation, which update() handles.
		if !merge && !self.finalized {
			self.presentation_type = loaded.presentation_type;
		}

		self.max_target_duration = self.max_target_duration.max(loaded.target_duration);
		self.gap_count += loaded.gap_count;
		if self.start_time.is_none() {
			self.start_time = loaded.start_time_offset;
		}

		let availability_start = self.timeline.lock().unwrap().segment_availability_start();
		let (new_drm, date_ranges) = apply_load(&mut self.streams[index], loaded, merge, availability_start);
		self.pending_date_ranges.extend(date_ranges);

		{
			let stream = self.streams[index].setup.stream.lock().unwrap();
			if let Some(segment_index) = &stream.segment_index {
				let refs: Vec<_> = segment_index.iter().cloned().collect();
				self.timeline.lock().unwrap().notify_segments(&refs);
			}
		}

		if new_drm && self.finalized {
			let stream_id = self.streams[index].setup.stream.lock().unwrap().id;
			self.player.new_drm_info(stream_id);
		}

		Ok(())
	}

	/// Align the loaded streams, pin the timeline, and drop variants whose
	/// halves can't share a key system. Runs once.
	fn finalize_streams(&mut self, variants: &mut Vec<Variant>) {
		debug_assert!(!self.finalized);

		let ignore_pdt = &self.config.ignore_program_date_time_for;
		let is_live = self.presentation_type.is_live();

		{
			let mut guards = Vec::new();
			for active in &self.streams {
				if active.state != LoadState::Loaded || active.setup.placeholder {
					continue;
				}
				let guard = active.setup.stream.lock().unwrap();
				if guard.segment_index.is_none() {
					continue;
				}
				guards.push((active.setup.kind, guard, active.book.first_sequence_number));
			}

			let mut targets: Vec<SyncTarget> = guards
				.iter_mut()
				.map(|(ty, guard, first)| SyncTarget {
					ty: *ty,
					index: guard.segment_index.as_mut().unwrap(),
					first_sequence_number: *first,
				})
				.collect();

			// The eager set covers the timeline-pinning variant, so for VOD
			// every relevant stream type is already loaded here.
			let pdt_allowed = targets.iter().all(|t| !ignore_pdt.contains(&t.ty));
			if pdt_allowed && StreamSynchronizer::can_use_program_date_time(&targets, is_live, true) {
				self.synchronizer.sync_by_program_date_time(&mut targets);
			} else {
				self.synchronizer.sync_by_sequence_number(&mut targets);
			}
		}

		// Synchronization moved timestamps; rebuild the bookkeeping that
		// depends on them.
		for active in &mut self.streams {
			rebuild_sequence_map(active);
		}

		self.configure_timeline();

		// Variants whose audio and video demand different key systems
		// can't play; drop them now that DRM info is known.
		variants.retain(|variant| {
			let audio_drm = variant
				.audio
				.as_ref()
				.map(|s| s.lock().unwrap().drm_infos.clone())
				.unwrap_or_default();
			let video_drm = variant
				.video
				.as_ref()
				.map(|s| s.lock().unwrap().drm_infos.clone())
				.unwrap_or_default();

			let compatible = drm_compatible(&audio_drm, &video_drm);
			if !compatible {
				warn!(variant = variant.id, "audio and video drm are incompatible, dropping variant");
			}
			compatible
		});

		for variant in variants.iter_mut() {
			let mut infos = Vec::new();
			for stream in [&variant.audio, &variant.video].into_iter().flatten() {
				for info in &stream.lock().unwrap().drm_infos {
					if !infos.contains(info) {
						infos.push(info.clone());
					}
				}
			}
			variant.drm_infos = infos;
		}

		self.finalized = true;
	}

	/// Align one late-loaded stream against the memoized anchors.
	fn sync_one(&mut self, index: usize) {
		{
			let active = &self.streams[index];
			let first = active.book.first_sequence_number;
			let ty = active.setup.kind;

			let mut stream = active.setup.stream.lock().unwrap();
			let Some(segment_index) = stream.segment_index.as_mut() else {
				return;
			};

			let mut targets = vec![SyncTarget {
				ty,
				index: segment_index,
				first_sequence_number: first,
			}];

			if self.synchronizer.lowest_sync_time().is_some() {
				self.synchronizer.sync_by_program_date_time(&mut targets);
			} else {
				self.synchronizer.sync_by_sequence_number(&mut targets);
			}
		}

		rebuild_sequence_map(&mut self.streams[index]);
	}

	fn configure_timeline(&mut self) {
		// Track extents post-sync before pinning anything.
		{
			let mut timeline = self.timeline.lock().unwrap();
			for active in &self.streams {
				let stream = active.setup.stream.lock().unwrap();
				if let Some(index) = &stream.segment_index {
					let refs: Vec<_> = index.iter().cloned().collect();
					timeline.notify_segments(&refs);
				}
			}

			if let Some(lowest) = self.synchronizer.lowest_sync_time() {
				timeline.set_initial_program_date_time(lowest);
			}
		}

		match self.presentation_type {
			PresentationType::Vod => {
				let duration = self.vod_duration();
				let mut timeline = self.timeline.lock().unwrap();
				timeline.set_static(true);
				if let Some(duration) = duration {
					timeline.set_duration(duration);
				}
			}
			PresentationType::Event | PresentationType::Live => {
				let window = self.config.availability_window_override.unwrap_or_else(|| {
					self.loaded_streams()
						.filter_map(|active| {
							let stream = active.setup.stream.lock().unwrap();
							let index = stream.segment_index.as_ref()?;
							Some(index.last()?.end_time - index.earliest()?.start_time)
						})
						.max_by(f64::total_cmp)
						.unwrap_or(f64::INFINITY)
				});
				let delay = self.presentation_delay();

				let mut timeline = self.timeline.lock().unwrap();
				timeline.set_segment_availability_duration(window);
				timeline.set_delay(delay);
			}
		}

		self.timeline.lock().unwrap().lock_start_time();
	}

	/// HOLD-BACK and PART-HOLD-BACK win; then the configured default; then
	/// the trailing-segment window, bounded by three target durations.
	fn presentation_delay(&self) -> f64 {
		let hold_back = self
			.streams
			.iter()
			.filter_map(|s| {
				if self.low_latency {
					s.book.part_hold_back.or(s.book.hold_back)
				} else {
					s.book.hold_back
				}
			})
			.max_by(f64::total_cmp);

		if let Some(hold_back) = hold_back {
			return hold_back;
		}

		if let Some(delay) = self.config.default_presentation_delay {
			return delay;
		}

		let tail = self
			.loaded_streams()
			.filter_map(|active| {
				let stream = active.setup.stream.lock().unwrap();
				let index = stream.segment_index.as_ref()?;
				let from = index.len().saturating_sub(self.config.live_segments_delay);
				Some(index.iter().skip(from).map(|r| r.duration()).sum::<f64>())
			})
			.max_by(f64::total_cmp)
			.unwrap_or(0.0);

		let bound = 3.0 * self.max_target_duration;
		if tail > 0.0 {
			tail.min(bound)
		} else {
			bound
		}
	}

	fn vod_duration(&self) -> Option<f64> {
		self.loaded_streams()
			.filter(|a| a.setup.kind != StreamType::Text && a.setup.kind != StreamType::Image)
			.filter_map(|active| {
				let stream = active.setup.stream.lock().unwrap();
				Some(stream.segment_index.as_ref()?.last()?.end_time)
			})
			.min_by(f64::total_cmp)
	}

	fn loaded_streams(&self) -> impl Iterator<Item = &ActiveStream> {
		self.streams
			.iter()
			.filter(|s| s.state == LoadState::Loaded && !s.setup.placeholder)
	}

	fn convert_to_vod(&mut self) {
		info!("all playlists ended, converting presentation to VOD");
		self.presentation_type = PresentationType::Vod;

		let duration = self.vod_duration();
		{
			let mut timeline = self.timeline.lock().unwrap();
			timeline.set_static(true);
			if let Some(duration) = duration {
				timeline.set_duration(duration);
			}
		}
		if let Some(duration) = duration {
			self.player.update_duration(duration);
		}
	}

	/// Convert pending date ranges into timed metadata, once each, anchored
	/// to the wall-clock base when one exists.
	fn flush_date_ranges(&mut self) {
		let anchor = self
			.synchronizer
			.lowest_sync_time()
			.or_else(|| self.timeline.lock().unwrap().initial_program_date_time());
		let Some(anchor) = anchor else {
			// Without a wall-clock anchor there is nothing to place the
			// ranges against.
			self.pending_date_ranges.clear();
			return;
		};

		for range in std::mem::take(&mut self.pending_date_ranges) {
			if !self.delivered_date_ranges.insert(range.id.clone()) {
				continue;
			}

			let start = range.start_seconds() - anchor;
			let end = range.end_seconds().map(|e| e - anchor);
			let frames: Vec<MetadataFrame> = range
				.client_attributes
				.iter()
				.map(|(key, value)| MetadataFrame {
					key: key.clone(),
					value: value.clone(),
				})
				.collect();

			let kind = range.class.as_deref().unwrap_or("com.apple.quicktime.HLS").to_string();
			self.player.on_metadata(&kind, start, end, &frames);
		}
	}
}

/// The locations to fetch for a stream, in order of preference.
fn request_uris(active: &ActiveStream, steering: Option<&SteeringSelector>, merge: bool) -> Vec<Url> {
	let mut uris = match steering {
		Some(steering) => steering.select(&active.setup.candidates),
		None => active.setup.candidates.iter().map(|c| c.uri.clone()).collect(),
	};

	// Refreshes go to the redirected location we actually loaded from.
	if merge {
		if let Some(final_uri) = &active.book.final_uri {
			uris.retain(|u| u != final_uri);
			uris.insert(0, final_uri.clone());
		}
	}

	// Blocking reload and delta-update parameters apply to every candidate.
	if merge && active.book.can_block_reload {
		uris = uris
			.iter()
			.map(|uri| {
				blocking_reload_uri(
					uri,
					active.book.next_media_sequence,
					active.book.next_part,
					active.book.can_skip,
				)
			})
			.collect();
	} else if merge && active.book.can_skip {
		uris = uris
			.iter()
			.map(|uri| {
				let mut uri = uri.clone();
				uri.query_pairs_mut().append_pair("_HLS_skip", "YES");
				uri
			})
			.collect();
	}

	uris
}

/// Apply one loaded playlist to the stream and its bookkeeping. Returns
/// whether new DRM info appeared, plus the date ranges to deliver.
fn apply_load(
	active: &mut ActiveStream,
	loaded: LoadedMediaPlaylist,
	merge: bool,
	availability_start: f64,
) -> (bool, Vec<DateRange>) {
	let book = &mut active.book;

	book.final_uri = Some(loaded.final_uri.clone());
	let final_uri = loaded.final_uri.to_string();
	if !book.redirect_uris.contains(&final_uri) {
		book.redirect_uris.push(final_uri);
	}

	book.has_end_list = loaded.has_end_list;
	book.target_duration = loaded.target_duration;
	book.part_target = loaded.part_target;
	book.can_skip = loaded.server_control.can_skip_until.is_some();
	book.can_block_reload = loaded.server_control.can_block_reload;
	book.hold_back = loaded.server_control.hold_back;
	book.part_hold_back = loaded.server_control.part_hold_back;
	book.next_media_sequence = loaded.next_media_sequence;
	book.next_part = loaded.next_part;

	for reference in &loaded.references {
		book.sequence_to_start.insert(reference.media_sequence, reference.start_time);
	}

	let mut stream = active.setup.stream.lock().unwrap();

	let mut new_drm = false;
	for info in loaded.drm_infos {
		if !stream.drm_infos.contains(&info) {
			stream.drm_infos.push(info);
			new_drm = true;
		}
	}
	stream.key_ids.extend(loaded.key_ids);

	// Attributes derived from the media playlist fill whatever the master
	// tag left blank.
	let attributes = loaded.attributes;
	stream.mime_type = attributes.mime_type;
	if stream.codecs.is_empty() {
		stream.codecs = attributes.codecs.unwrap_or_default();
	}
	if stream.width.is_none() {
		stream.width = attributes.width;
		stream.height = attributes.height;
	}
	if stream.channels_count.is_none() {
		stream.channels_count = attributes.channels;
	}
	if stream.audio_sampling_rate.is_none() {
		stream.audio_sampling_rate = attributes.sample_rate;
	}
	if let Some(bandwidth) = attributes.bandwidth {
		stream.bandwidth = Some(bandwidth);
	}
	if stream.tiles_layout.is_none() {
		stream.tiles_layout = loaded.references.iter().find_map(|r| r.tiles_layout.clone());
	}

	// Per-segment quality metadata rides on the init segment references.
	let quality = MediaQuality {
		bandwidth: stream.bandwidth,
		codecs: stream.codecs.clone(),
		mime_type: stream.mime_type.clone(),
	};
	for reference in &loaded.references {
		if let Some(init) = &reference.init_segment {
			init.set_media_quality(quality.clone());
		}
	}

	match (&mut stream.segment_index, merge) {
		(Some(index), true) => {
			index.merge_and_evict(loaded.references, availability_start);
		}
		(slot, _) => {
			*slot = Some(SegmentIndex::new(loaded.references));
		}
	}

	if let Some(index) = &stream.segment_index {
		book.first_sequence_number = index.earliest().map(|r| r.media_sequence).unwrap_or(loaded.media_sequence);
		book.min_timestamp = index.earliest().map(|r| r.start_time).unwrap_or(0.0);
		book.max_timestamp = index.last().map(|r| r.end_time).unwrap_or(0.0);
	}

	drop(stream);
	active.state = LoadState::Loaded;

	(new_drm, loaded.date_ranges)
}

/// Start times moved; rebuild the per-sequence memo from the index.
fn rebuild_sequence_map(active: &mut ActiveStream) {
	let stream = active.setup.stream.lock().unwrap();
	let Some(index) = &stream.segment_index else {
		return;
	};

	active.book.sequence_to_start.clear();
	for reference in index.iter() {
		active.book.sequence_to_start.insert(reference.media_sequence, reference.start_time);
	}
	active.book.first_sequence_number = index.earliest().map(|r| r.media_sequence).unwrap_or(0);
	active.book.min_timestamp = index.earliest().map(|r| r.start_time).unwrap_or(0.0);
	active.book.max_timestamp = index.last().map(|r| r.end_time).unwrap_or(0.0);
}
