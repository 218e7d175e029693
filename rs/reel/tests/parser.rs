//! End-to-end parser scenarios against canned playlists.

mod common;

use std::sync::Arc;

use common::MemoryFetch;
use reel::{Config, HlsParser, Manifest, NullPlayer, PlayerInterface, SegmentStatus};
use url::Url;

const MASTER_URI: &str = "https://example.com/main.m3u8";

fn master_uri() -> Url {
	Url::parse(MASTER_URI).unwrap()
}

fn parser_with(fetch: Arc<MemoryFetch>) -> HlsParser {
	HlsParser::new(Config::default(), fetch, Arc::new(NullPlayer))
}

async fn parse(fetch: Arc<MemoryFetch>) -> (HlsParser, Manifest) {
	let mut parser = parser_with(fetch);
	let manifest = parser.parse(master_uri()).await.expect("parse failed");
	(parser, manifest)
}

fn video_segment_starts(manifest: &Manifest) -> Vec<(f64, f64)> {
	let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();
	video
		.segment_index
		.as_ref()
		.unwrap()
		.iter()
		.map(|r| (r.start_time, r.end_time))
		.collect()
}

#[tokio::test]
async fn vod_basic_sequencing() {
	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"\n",
			"video.m3u8\n",
		),
	);
	fetch.insert(
		"https://example.com/video.m3u8",
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:10\n",
			"#EXTINF:10,\n",
			"s1.ts\n",
			"#EXTINF:10,\n",
			"s2.ts\n",
			"#EXT-X-ENDLIST\n",
		),
	);

	let (parser, manifest) = parse(fetch).await;

	assert_eq!(manifest.variants.len(), 1);
	assert!(!parser.is_live());

	let timeline = manifest.timeline.lock().unwrap();
	assert!(!timeline.is_live());
	assert_eq!(timeline.duration(), 20.0);
	drop(timeline);

	assert_eq!(video_segment_starts(&manifest), vec![(0.0, 10.0), (10.0, 20.0)]);
}

#[tokio::test]
async fn live_hold_back_and_blocking_reload() {
	let segments: String = (0..6).map(|i| format!("#EXTINF:5,\nseg{}.ts\n", 100 + i)).collect();
	let initial = format!(
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:5\n",
			"#EXT-X-MEDIA-SEQUENCE:100\n",
			"#EXT-X-SERVER-CONTROL:HOLD-BACK=15,CAN-BLOCK-RELOAD=YES\n",
			"{}",
		),
		segments
	);
	let updated = format!("{}#EXTINF:5,\nseg106.ts\n", initial);

	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(MASTER_URI, initial.clone());
	fetch.push(MASTER_URI, updated.clone());
	// The parser is handed the media playlist directly; refreshes go back
	// to the same location with blocking-reload parameters appended.

	let (mut parser, manifest) = parse(fetch.clone()).await;
	assert!(parser.is_live());
	assert_eq!(manifest.timeline.lock().unwrap().delay(), 15.0);
	assert_eq!(video_segment_starts(&manifest).len(), 6);

	parser.update().await.expect("update failed");

	// The refresh asked the server to hold for the next media sequence.
	let update_request = fetch
		.requests()
		.iter()
		.find(|r| r.contains("_HLS_msn"))
		.cloned()
		.expect("no blocking reload request");
	assert!(update_request.contains("_HLS_msn=106"));

	// One new segment arrived.
	{
		let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();
		let index = video.segment_index.as_ref().unwrap();
		assert_eq!(index.len(), 7);
		assert_eq!(index.last().unwrap().media_sequence, 106);
	}

	// The next refresh evicts what slid out of the availability window.
	parser.update().await.expect("update failed");
	let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();
	let index = video.segment_index.as_ref().unwrap();
	assert_eq!(index.earliest().unwrap().media_sequence, 101);
	assert_eq!(index.last().unwrap().media_sequence, 106);
	assert_eq!(index.len(), 6);
}

#[tokio::test]
async fn discontinuity_and_byterange_continuation() {
	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-MAP:URI=\"init0.mp4\"\n",
			"#EXT-X-BYTERANGE:100@0\n",
			"#EXTINF:4,\n",
			"a.mp4\n",
			"#EXT-X-BYTERANGE:200\n",
			"#EXTINF:4,\n",
			"a.mp4\n",
			"#EXT-X-BYTERANGE:50\n",
			"#EXTINF:4,\n",
			"a.mp4\n",
			"#EXT-X-DISCONTINUITY\n",
			"#EXT-X-MAP:URI=\"init1.mp4\"\n",
			"#EXT-X-BYTERANGE:100@0\n",
			"#EXTINF:4,\n",
			"b.mp4\n",
			"#EXT-X-ENDLIST\n",
		),
	);

	let (_parser, manifest) = parse(fetch).await;

	let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();
	let index = video.segment_index.as_ref().unwrap();
	let refs: Vec<_> = index.iter().collect();

	assert_eq!((refs[0].start_byte, refs[0].end_byte), (0, Some(99)));
	assert_eq!((refs[1].start_byte, refs[1].end_byte), (100, Some(299)));
	assert_eq!((refs[2].start_byte, refs[2].end_byte), (300, Some(349)));

	assert_eq!(refs[2].discontinuity_sequence, 0);
	assert_eq!(refs[3].discontinuity_sequence, 1);

	// The outgoing init segment closes at the discontinuity boundary.
	let old_init = refs[0].init_segment.as_ref().unwrap();
	assert_eq!(old_init.boundary_end(), Some(12.0));
	assert!(refs[3].init_segment.as_ref().unwrap().boundary_end().is_none());
}

#[tokio::test]
async fn program_date_time_synchronization() {
	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"English\",LANGUAGE=\"en\",DEFAULT=YES,URI=\"audio.m3u8\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\",AUDIO=\"aud\"\n",
			"video.m3u8\n",
		),
	);
	fetch.insert(
		"https://example.com/video.m3u8",
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:00Z\n",
			"#EXTINF:4,\n",
			"v1.ts\n",
			"#EXTINF:4,\n",
			"v2.ts\n",
		),
	);
	fetch.insert(
		"https://example.com/audio.m3u8",
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-PROGRAM-DATE-TIME:2024-01-01T00:00:01.500Z\n",
			"#EXTINF:4,\n",
			"a1.aac\n",
			"#EXTINF:4,\n",
			"a2.aac\n",
		),
	);

	let (_parser, manifest) = parse(fetch).await;

	// Wall-clock sync: not sequence mode.
	assert!(!manifest.sequence_mode);

	let variant = &manifest.variants[0];
	let video = variant.video.as_ref().unwrap().lock().unwrap();
	let audio = variant.audio.as_ref().unwrap().lock().unwrap();

	assert_eq!(video.segment_index.as_ref().unwrap().earliest().unwrap().start_time, 0.0);
	assert_eq!(audio.segment_index.as_ref().unwrap().earliest().unwrap().start_time, 1.5);

	let timeline = manifest.timeline.lock().unwrap();
	assert_eq!(timeline.initial_program_date_time(), Some(1_704_067_200.0));
}

#[tokio::test]
async fn delta_update_with_skip() {
	let initial: String = format!(
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-MEDIA-SEQUENCE:50\n",
			"#EXT-X-SERVER-CONTROL:CAN-SKIP-UNTIL=24\n",
			"{}",
		),
		(0..10).map(|i| format!("#EXTINF:4,\nseg{}.ts\n", 50 + i)).collect::<String>()
	);

	// The delta response elides the first five records.
	let updated: String = format!(
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-MEDIA-SEQUENCE:50\n",
			"#EXT-X-SERVER-CONTROL:CAN-SKIP-UNTIL=24\n",
			"#EXT-X-SKIP:SKIPPED-SEGMENTS=5\n",
			"{}",
		),
		(0..7).map(|i| format!("#EXTINF:4,\nseg{}.ts\n", 55 + i)).collect::<String>()
	);

	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(MASTER_URI, initial);
	fetch.push(MASTER_URI, updated);

	let (mut parser, manifest) = parse(fetch.clone()).await;
	parser.update().await.expect("update failed");

	// The refresh asked for a delta.
	assert!(fetch.requests().iter().any(|r| r.contains("_HLS_skip=YES")));

	let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();
	let index = video.segment_index.as_ref().unwrap();

	// Skipped records kept their place; new ones extended the tail.
	assert_eq!(index.earliest().unwrap().media_sequence, 50);
	assert_eq!(index.last().unwrap().media_sequence, 61);
	assert_eq!(index.len(), 12);

	// Replayed sequences kept their timestamps.
	let seq55 = index.iter().find(|r| r.media_sequence == 55).unwrap();
	assert_eq!(seq55.start_time, 20.0);
}

#[tokio::test]
async fn update_is_idempotent_on_unchanged_playlist() {
	let playlist: String = format!(
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-MEDIA-SEQUENCE:10\n",
			"{}",
		),
		(0..4).map(|i| format!("#EXTINF:4,\nseg{}.ts\n", 10 + i)).collect::<String>()
	);

	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(MASTER_URI, playlist);

	let (mut parser, manifest) = parse(fetch).await;

	let before = video_segment_starts(&manifest);
	parser.update().await.expect("update failed");
	parser.update().await.expect("update failed");
	let after = video_segment_starts(&manifest);

	assert_eq!(before, after);
	let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();
	assert_eq!(video.segment_index.as_ref().unwrap().len(), 4);
}

#[tokio::test]
async fn keyformats_fallback_to_identity() {
	let kid = [
		0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b,
	];

	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-MAP:URI=\"init.mp4\"\n",
			"#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"skd://nope\",KEYFORMAT=\"com.example.proprietary\"\n",
			"#EXT-X-KEY:METHOD=SAMPLE-AES,URI=\"https://keys.example.com/k1\",KEYFORMAT=\"identity\"\n",
			"#EXTINF:4,\n",
			"s1.mp4\n",
			"#EXT-X-ENDLIST\n",
		),
	);
	fetch.insert("https://example.com/init.mp4", common::init_segment_with_kid(&kid));

	let (_parser, manifest) = parse(fetch).await;

	let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();

	// The unsupported keyformat was skipped; identity won.
	assert_eq!(video.drm_infos.len(), 1);
	let info = &video.drm_infos[0];
	assert_eq!(info.key_system, "org.w3.clearkey");
	assert!(info.key_ids.contains("deadbeef000102030405060708090a0b"));
	assert!(video.key_ids.contains("deadbeef000102030405060708090a0b"));
}

#[tokio::test]
async fn event_playlist_converts_to_vod_on_end_list() {
	let initial = concat!(
		"#EXTM3U\n",
		"#EXT-X-TARGETDURATION:4\n",
		"#EXT-X-PLAYLIST-TYPE:EVENT\n",
		"#EXTINF:4,\n",
		"s1.ts\n",
	);
	let ended = concat!(
		"#EXTM3U\n",
		"#EXT-X-TARGETDURATION:4\n",
		"#EXT-X-PLAYLIST-TYPE:EVENT\n",
		"#EXTINF:4,\n",
		"s1.ts\n",
		"#EXTINF:4,\n",
		"s2.ts\n",
		"#EXT-X-ENDLIST\n",
	);

	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(MASTER_URI, initial);
	fetch.push(MASTER_URI, ended);

	let (mut parser, manifest) = parse(fetch).await;
	assert!(parser.is_live());

	parser.update().await.expect("update failed");

	assert!(!parser.is_live());
	let timeline = manifest.timeline.lock().unwrap();
	assert!(!timeline.is_live());
	assert_eq!(timeline.duration(), 8.0);
}

#[tokio::test]
async fn lazy_text_stream_loads_on_demand() {
	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-MEDIA:TYPE=SUBTITLES,GROUP-ID=\"subs\",NAME=\"German\",LANGUAGE=\"de\",URI=\"subs.m3u8\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,CODECS=\"avc1.4d401f\",RESOLUTION=640x360,SUBTITLES=\"subs\"\n",
			"video.m3u8\n",
		),
	);
	fetch.insert(
		"https://example.com/video.m3u8",
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:10\n",
			"#EXTINF:10,\n",
			"s1.ts\n",
			"#EXT-X-ENDLIST\n",
		),
	);
	fetch.insert(
		"https://example.com/subs.m3u8",
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:10\n",
			"#EXTINF:10,\n",
			"s1.vtt\n",
			"#EXT-X-ENDLIST\n",
		),
	);

	let (mut parser, manifest) = parse(fetch).await;

	let text_id = {
		let text = manifest.text_streams[0].lock().unwrap();
		assert!(text.segment_index.is_none(), "text must stay lazy");
		text.id
	};

	parser.create_segment_index(text_id).await.expect("lazy load failed");

	let text = manifest.text_streams[0].lock().unwrap();
	assert_eq!(text.mime_type, "text/vtt");
	assert_eq!(text.segment_index.as_ref().unwrap().len(), 1);

	drop(text);
	parser.close_segment_index(text_id);
	assert!(manifest.text_streams[0].lock().unwrap().segment_index.is_none());
}

#[tokio::test]
async fn gap_segments_count_and_stay_missing() {
	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXTINF:4,\n",
			"s1.ts\n",
			"#EXT-X-GAP\n",
			"#EXTINF:4,\n",
			"s2.ts\n",
			"#EXTINF:4,\n",
			"s3.ts\n",
			"#EXT-X-ENDLIST\n",
		),
	);

	let (_parser, manifest) = parse(fetch).await;
	assert_eq!(manifest.gap_count, 1);

	let video = manifest.variants[0].video.as_ref().unwrap().lock().unwrap();
	let index = video.segment_index.as_ref().unwrap();
	assert_eq!(index.get(1).unwrap().status, SegmentStatus::Missing);

	// Timing stays contiguous across the gap.
	assert_eq!(index.get(1).unwrap().start_time, 4.0);
	assert_eq!(index.get(2).unwrap().start_time, 8.0);
}

#[tokio::test]
async fn stop_aborts_further_work() {
	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXTINF:4,\n",
			"s1.ts\n",
		),
	);

	let (mut parser, manifest) = parse(fetch).await;
	parser.stop();

	assert!(parser.update().await.is_err());
	assert!(manifest.variants[0]
		.video
		.as_ref()
		.unwrap()
		.lock()
		.unwrap()
		.segment_index
		.is_none());
}

/// A player that records which streams were disabled.
#[derive(Default)]
struct RecordingPlayer {
	disabled: std::sync::Mutex<Vec<u32>>,
}

impl PlayerInterface for RecordingPlayer {
	fn disable_stream(&self, stream_id: u32) {
		self.disabled.lock().unwrap().push(stream_id);
	}
}

#[tokio::test]
async fn failed_refresh_disables_stream_but_keeps_going() {
	let fetch = Arc::new(MemoryFetch::new());
	fetch.insert(
		MASTER_URI,
		concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXT-X-MEDIA-SEQUENCE:5\n",
			"#EXTINF:4,\n",
			"s5.ts\n",
		),
	);

	let player = Arc::new(RecordingPlayer::default());
	let mut parser = HlsParser::new(Config::default(), fetch.clone(), player.clone());
	parser.parse(master_uri()).await.expect("parse failed");

	// The next refresh returns garbage (no target duration).
	fetch.insert(MASTER_URI, "#EXTM3U\n#EXTINF:4,\ns6.ts\n");

	parser.update().await.expect("update should swallow recoverable errors");
	assert_eq!(player.disabled.lock().unwrap().len(), 1);
}
