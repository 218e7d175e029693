use crate::{Error, Result};

use super::{parse_attributes, ParsedSegment, Playlist, PlaylistKind, Tag};

/// Tags that attach to the media segment they precede rather than to the
/// playlist as a whole.
const SEGMENT_TAGS: &[&str] = &[
	"EXTINF",
	"EXT-X-BYTERANGE",
	"EXT-X-DISCONTINUITY",
	"EXT-X-PROGRAM-DATE-TIME",
	"EXT-X-KEY",
	"EXT-X-MAP",
	"EXT-X-GAP",
	"EXT-X-TILES",
	"EXT-X-DATERANGE",
	"EXT-X-BITRATE",
];

/// Tags that describe partial segments of the segment they precede.
const PARTIAL_TAGS: &[&str] = &["EXT-X-PART", "EXT-X-PRELOAD-HINT"];

/// Lex M3U8 text into a [Playlist].
///
/// Line oriented: each non-empty line is the `#EXTM3U` header, a tag, a URI,
/// or a comment. The first line must be `#EXTM3U`.
pub fn lex(text: &str) -> Result<Playlist> {
	// Some encoders prepend a BOM.
	let text = text.trim_start_matches('\u{feff}');

	let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

	match lines.next() {
		Some("#EXTM3U") => {}
		_ => return Err(Error::RequiredTagMissing("EXTM3U".to_string())),
	}

	let mut next_id = 0u64;
	let mut tags = Vec::new();
	let mut segments = Vec::new();
	let mut segment_tags = Vec::new();
	let mut partial_tags = Vec::new();
	let mut saw_stream_inf = false;

	for line in lines {
		if let Some(rest) = line.strip_prefix("#EXT") {
			let (name, value) = match rest.split_once(':') {
				Some((name, value)) => (format!("EXT{name}"), Some(value)),
				None => (format!("EXT{rest}"), None),
			};

			let tag = make_tag(&mut next_id, name, value);

			if tag.name == "EXT-X-STREAM-INF" {
				saw_stream_inf = true;
				tags.push(tag);
			} else if PARTIAL_TAGS.contains(&tag.name.as_str()) {
				partial_tags.push(tag);
			} else if SEGMENT_TAGS.contains(&tag.name.as_str()) {
				segment_tags.push(tag);
			} else {
				tags.push(tag);
			}
		} else if line.starts_with('#') {
			// Comment; discarded.
		} else if saw_stream_inf {
			// In a master playlist the URI line belongs to the variant tag
			// right before it.
			if let Some(tag) = tags
				.iter_mut()
				.rev()
				.find(|t| t.name == "EXT-X-STREAM-INF" && !t.has_attr("URI"))
			{
				tag.attrs.push(super::Attribute {
					name: "URI".to_string(),
					value: line.to_string(),
					quoted: false,
				});
			} else {
				return Err(Error::InvalidPlaylist(format!("unexpected uri line: {line}")));
			}
		} else {
			// A URI line closes the current media segment.
			segments.push(ParsedSegment {
				tags: std::mem::take(&mut segment_tags),
				partial_tags: std::mem::take(&mut partial_tags),
				uri: Some(line.to_string()),
			});
		}
	}

	// A trailing segment with no URI is only meaningful when the server
	// hinted at upcoming material.
	if partial_tags.iter().any(|t| t.name == "EXT-X-PRELOAD-HINT") {
		segments.push(ParsedSegment {
			tags: segment_tags,
			partial_tags,
			uri: None,
		});
	}

	let kind = if saw_stream_inf {
		PlaylistKind::Master
	} else {
		PlaylistKind::Media
	};

	Ok(Playlist { kind, tags, segments })
}

fn make_tag(next_id: &mut u64, name: String, value: Option<&str>) -> Tag {
	let id = *next_id;
	*next_id += 1;

	// A value containing '=' is an attribute list; anything else stays raw.
	let (value, attrs) = match value {
		Some(v) if v.contains('=') => (None, parse_attributes(v)),
		Some(v) => (Some(v.to_string()), Vec::new()),
		None => (None, Vec::new()),
	};

	Tag { id, name, value, attrs }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_missing_header() {
		assert!(matches!(lex("#EXTINF:5,\nx.ts\n"), Err(Error::RequiredTagMissing(_))));
	}

	#[test]
	fn media_playlist() {
		let playlist = lex(concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:10\n",
			"#EXT-X-MEDIA-SEQUENCE:3\n",
			"# just a comment\n",
			"#EXTINF:9.9,\n",
			"first.ts\n",
			"#EXT-X-BYTERANGE:100@0\n",
			"#EXTINF:10,\n",
			"second.ts\n",
			"#EXT-X-ENDLIST\n",
		))
		.unwrap();

		assert_eq!(playlist.kind, PlaylistKind::Media);
		assert_eq!(playlist.segments.len(), 2);
		assert_eq!(playlist.segments[0].uri.as_deref(), Some("first.ts"));
		assert!(playlist.segments[1].has_tag("EXT-X-BYTERANGE"));
		assert!(playlist.has_tag("EXT-X-ENDLIST"));
		assert_eq!(playlist.tag("EXT-X-MEDIA-SEQUENCE").unwrap().u64_value(), Some(3));
	}

	#[test]
	fn master_playlist_attaches_uris() {
		let playlist = lex(concat!(
			"#EXTM3U\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1000000,RESOLUTION=1280x720\n",
			"hi.m3u8\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=300000\n",
			"lo.m3u8\n",
		))
		.unwrap();

		assert_eq!(playlist.kind, PlaylistKind::Master);
		let variants: Vec<_> = playlist.tags_named("EXT-X-STREAM-INF").collect();
		assert_eq!(variants.len(), 2);
		assert_eq!(variants[0].attr("URI"), Some("hi.m3u8"));
		assert_eq!(variants[1].attr("URI"), Some("lo.m3u8"));
	}

	#[test]
	fn tag_ids_are_monotonic() {
		let playlist = lex(concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:6\n",
			"#EXT-X-KEY:METHOD=AES-128,URI=\"k\"\n",
			"#EXT-X-MAP:URI=\"init.mp4\"\n",
			"#EXTINF:6,\n",
			"a.mp4\n",
		))
		.unwrap();

		let seg = &playlist.segments[0];
		let key = seg.tag("EXT-X-KEY").unwrap();
		let map = seg.tag("EXT-X-MAP").unwrap();
		assert!(key.id < map.id, "key must precede map");
	}

	#[test]
	fn trailing_preload_hint_segment() {
		let playlist = lex(concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXTINF:4,\n",
			"a.mp4\n",
			"#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"b.1.mp4\"\n",
		))
		.unwrap();

		assert_eq!(playlist.segments.len(), 2);
		assert!(playlist.segments[1].uri.is_none());

		// Without the hint the dangling tags are dropped.
		let playlist = lex(concat!(
			"#EXTM3U\n",
			"#EXT-X-TARGETDURATION:4\n",
			"#EXTINF:4,\n",
			"a.mp4\n",
			"#EXTINF:4,\n",
		))
		.unwrap();
		assert_eq!(playlist.segments.len(), 1);
	}

	#[test]
	fn extinf_value_keeps_title_comma() {
		let playlist = lex("#EXTM3U\n#EXTINF:9.9,some title\nx.ts\n").unwrap();
		let inf = playlist.segments[0].tag("EXTINF").unwrap();
		assert_eq!(inf.value.as_deref(), Some("9.9,some title"));
	}
}
