//! Minimal fMP4 inspection.
//!
//! Just enough of an ISO-BMFF box walk to pull the sample-entry codec,
//! dimensions, audio layout, and the `tenc` default key id out of an init
//! segment. Full container parsing belongs to the media pipeline, not here.

/// What a probe of an init segment could determine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mp4Info {
	/// Sample entry fourcc, unwrapped through `frma` for encrypted tracks.
	pub codec: Option<String>,
	pub width: Option<u32>,
	pub height: Option<u32>,
	pub channels: Option<u32>,
	pub sample_rate: Option<u32>,
	/// Hex-encoded default KID from the `tenc` box.
	pub default_kid: Option<String>,
	/// True when a `tenc` (or `encv`/`enca` entry) was found.
	pub encrypted: bool,
}

/// Whether the payload looks like MPEG-2 TS.
pub fn is_mp2t(data: &[u8]) -> bool {
	// TS packets are 188 bytes and start with a sync byte.
	data.len() >= 188 * 2 && data[0] == 0x47 && data[188] == 0x47
}

/// Whether the payload looks like an ISO-BMFF file.
pub fn is_mp4(data: &[u8]) -> bool {
	if data.len() < 8 {
		return false;
	}
	let kind = &data[4..8];
	kind == b"ftyp" || kind == b"styp" || kind == b"moov" || kind == b"moof" || kind == b"sidx"
}

/// Walk the box tree of an init segment.
pub fn probe(data: &[u8]) -> Mp4Info {
	let mut info = Mp4Info::default();
	walk(data, &mut info);
	info
}

/// Only the default KID, if any.
pub fn default_kid(data: &[u8]) -> Option<String> {
	probe(data).default_kid
}

const CONTAINERS: &[&[u8; 4]] = &[b"moov", b"trak", b"mdia", b"minf", b"stbl", b"sinf", b"schi"];

const VISUAL_ENTRIES: &[&[u8; 4]] = &[b"encv", b"avc1", b"avc3", b"hvc1", b"hev1", b"vp09", b"av01"];
const AUDIO_ENTRIES: &[&[u8; 4]] = &[b"enca", b"mp4a", b"ac-3", b"ec-3", b"opus", b"fLaC"];

fn walk(mut data: &[u8], info: &mut Mp4Info) {
	while data.len() >= 8 {
		let size = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
		let kind: [u8; 4] = data[4..8].try_into().unwrap();

		// size 0 means "to end of file"; size 1 would carry a 64-bit
		// largesize, which never fits an init segment we care about.
		let size = match size {
			0 => data.len(),
			1 => return,
			s if s < 8 || s > data.len() => return,
			s => s,
		};

		let payload = &data[8..size];

		if CONTAINERS.contains(&&kind) {
			walk(payload, info);
		} else if &kind == b"stsd" && payload.len() > 8 {
			// FullBox header plus entry count.
			walk(&payload[8..], info);
		} else if VISUAL_ENTRIES.contains(&&kind) {
			visual_entry(&kind, payload, info);
		} else if AUDIO_ENTRIES.contains(&&kind) {
			audio_entry(&kind, payload, info);
		} else if &kind == b"frma" && payload.len() >= 4 {
			if let Ok(fourcc) = std::str::from_utf8(&payload[..4]) {
				info.codec = Some(fourcc.trim().to_string());
			}
		} else if &kind == b"tenc" && payload.len() >= 24 {
			info.encrypted = true;
			info.default_kid = Some(hex::encode(&payload[8..24]));
		}

		data = &data[size..];
	}
}

fn visual_entry(kind: &[u8; 4], payload: &[u8], info: &mut Mp4Info) {
	if info.codec.is_none() {
		info.codec = std::str::from_utf8(kind).ok().map(|s| s.trim().to_string());
	}
	if kind == b"encv" {
		info.encrypted = true;
	}

	// SampleEntry fields (8), then the VisualSampleEntry pre_defined and
	// reserved block (16) before width and height.
	if payload.len() >= 28 {
		info.width = Some(u16::from_be_bytes([payload[24], payload[25]]) as u32);
		info.height = Some(u16::from_be_bytes([payload[26], payload[27]]) as u32);
	}

	// Child boxes (sinf for encrypted entries) follow the 78-byte fixed part.
	if payload.len() > 78 {
		walk(&payload[78..], info);
	}
}

fn audio_entry(kind: &[u8; 4], payload: &[u8], info: &mut Mp4Info) {
	if info.codec.is_none() {
		info.codec = std::str::from_utf8(kind).ok().map(|s| s.trim().to_string());
	}
	if kind == b"enca" {
		info.encrypted = true;
	}

	if payload.len() >= 28 {
		info.channels = Some(u16::from_be_bytes([payload[16], payload[17]]) as u32);
		// 16.16 fixed point.
		info.sample_rate = Some(u16::from_be_bytes([payload[24], payload[25]]) as u32);
	}

	if payload.len() > 28 {
		walk(&payload[28..], info);
	}
}
