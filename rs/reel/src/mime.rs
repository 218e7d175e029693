//! Default MIME type inference from segment URI extensions.

use crate::StreamType;

/// Look up the default MIME type for an extension, per stream type.
pub fn for_extension(ty: StreamType, extension: &str) -> Option<&'static str> {
	let ext = extension.to_ascii_lowercase();
	match ty {
		StreamType::Audio => match ext.as_str() {
			"mp4" | "mp4a" | "m4s" | "m4i" | "m4a" | "m4f" | "cmfa" => Some("audio/mp4"),
			"ts" | "tsa" => Some("video/mp2t"),
			"aac" => Some("audio/aac"),
			"ac3" => Some("audio/ac3"),
			"ec3" => Some("audio/ec3"),
			"mp3" => Some("audio/mpeg"),
			_ => None,
		},
		StreamType::Video => match ext.as_str() {
			"mp4" | "mp4v" | "m4s" | "m4i" | "m4v" | "m4f" | "cmfv" => Some("video/mp4"),
			"ts" | "tsv" => Some("video/mp2t"),
			_ => None,
		},
		StreamType::Text => match ext.as_str() {
			"mp4" | "m4s" | "m4i" | "m4f" | "cmft" => Some("application/mp4"),
			"vtt" | "webvtt" => Some("text/vtt"),
			"ttml" => Some("application/ttml+xml"),
			_ => None,
		},
		StreamType::Image => match ext.as_str() {
			"jpg" | "jpeg" => Some("image/jpeg"),
			"png" => Some("image/png"),
			"svg" => Some("image/svg+xml"),
			"webp" => Some("image/webp"),
			"avif" => Some("image/avif"),
			_ => None,
		},
	}
}

/// The extension of the last path component, if any.
pub fn extension(uri: &url::Url) -> Option<&str> {
	let path = uri.path();
	let name = path.rsplit('/').next()?;
	let (stem, ext) = name.rsplit_once('.')?;
	if stem.is_empty() {
		return None;
	}
	Some(ext)
}

/// Raw formats and MPEG-2 TS carry their own framing; no init segment applies.
pub fn no_init_segment_needed(mime: &str) -> bool {
	matches!(mime, "video/mp2t" | "audio/aac" | "audio/ac3" | "audio/ec3" | "audio/mpeg")
}

/// The fallback when nothing else resolves a stream's MIME type.
pub fn default_for(ty: StreamType) -> &'static str {
	match ty {
		StreamType::Audio => "audio/mp4",
		StreamType::Video => "video/mp4",
		StreamType::Text => "text/vtt",
		StreamType::Image => "image/jpeg",
	}
}
