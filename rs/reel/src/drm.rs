//! DRM metadata extraction from `EXT-X-KEY` and `EXT-X-SESSION-KEY` tags.
//!
//! The parser only extracts key metadata: key system, license URI, init
//! data, and key ids. License acquisition is the embedder's job.

use std::collections::BTreeSet;

use base64::Engine;
use bytes::Bytes;
use tracing::warn;

use crate::playlist::Tag;
use crate::{Error, Result};

pub const KEYFORMAT_IDENTITY: &str = "identity";
pub const KEYFORMAT_WIDEVINE: &str = "urn:uuid:edef8ba9-79d6-4ace-a3c8-27dcd51d21ed";
pub const KEYFORMAT_PLAYREADY: &str = "com.microsoft.playready";
pub const KEYFORMAT_FAIRPLAY: &str = "com.apple.streamingkeydelivery";
pub const KEYFORMAT_WISEPLAY: &str = "urn:uuid:3d5e6d35-9b9a-41e8-b843-dd3c6e72c42c";

const WIDEVINE_SYSTEM_ID: [u8; 16] = [
	0xed, 0xef, 0x8b, 0xa9, 0x79, 0xd6, 0x4a, 0xce, 0xa3, 0xc8, 0x27, 0xdc, 0xd5, 0x1d, 0x21, 0xed,
];
const PLAYREADY_SYSTEM_ID: [u8; 16] = [
	0x9a, 0x04, 0xf0, 0x79, 0x98, 0x40, 0x42, 0x86, 0xab, 0x92, 0xe6, 0x5b, 0xe0, 0x88, 0x5f, 0x95,
];
const WISEPLAY_SYSTEM_ID: [u8; 16] = [
	0x3d, 0x5e, 0x6d, 0x35, 0x9b, 0x9a, 0x41, 0xe8, 0xb8, 0x43, 0xdd, 0x3c, 0x6e, 0x72, 0xc4, 0x2c,
];

/// One blob of initialization data for a key system.
#[derive(Debug, Clone, PartialEq)]
pub struct InitData {
	/// `cenc`, `sinf`, or `keyids`.
	pub init_data_type: &'static str,
	pub data: Bytes,
}

/// Everything the parser learned about one content protection scheme.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DrmInfo {
	pub key_system: String,
	pub license_server_uri: Option<String>,
	pub init_data: Vec<InitData>,
	/// Hex-encoded, lowercase.
	pub key_ids: BTreeSet<String>,
	/// `cenc` or `cbcs`.
	pub encryption_scheme: Option<&'static str>,
	pub key_format_versions: Option<String>,
}

/// The encryption methods a KEY tag may declare.
pub fn is_valid_method(method: &str) -> bool {
	matches!(
		method,
		"SAMPLE-AES" | "SAMPLE-AES-CTR" | "AES-128" | "AES-256" | "AES-256-CTR" | "NONE"
	)
}

/// Whether the method is whole-segment AES rather than a DRM scheme.
pub fn is_aes_method(method: &str) -> bool {
	matches!(method, "AES-128" | "AES-256" | "AES-256-CTR")
}

fn encryption_scheme(method: &str) -> Option<&'static str> {
	match method {
		"SAMPLE-AES-CTR" => Some("cenc"),
		"SAMPLE-AES" => Some("cbcs"),
		_ => None,
	}
}

/// Extract DRM info from a KEY tag with a SAMPLE-AES family method.
///
/// `default_kid` is the hex key id probed from the init segment that was in
/// effect at the tag's position, when one was available. Returns `None` for
/// keyformats the parser does not understand.
pub fn extract(tag: &Tag, mime_type: &str, default_kid: Option<&str>) -> Result<Option<DrmInfo>> {
	let method = tag.required_attr("METHOD")?;
	if !is_valid_method(method) {
		return Err(Error::UnsupportedCipherMode(method.to_string()));
	}
	if method == "NONE" {
		return Ok(None);
	}

	let keyformat = tag.attr("KEYFORMAT").unwrap_or(KEYFORMAT_IDENTITY);
	let scheme = encryption_scheme(method);

	// The media pipeline cannot decrypt raw transport streams.
	if mime_type == "video/mp2t" {
		if keyformat == KEYFORMAT_FAIRPLAY {
			return Err(Error::EncryptedLegacyAppleMediaKeys);
		}
		return Err(Error::EncryptedMp2tNotSupported);
	}

	let mut info = match keyformat {
		KEYFORMAT_IDENTITY => identity_info(tag, default_kid)?,
		KEYFORMAT_WIDEVINE => widevine_info(tag, WIDEVINE_SYSTEM_ID, "com.widevine.alpha")?,
		KEYFORMAT_WISEPLAY => widevine_info(tag, WISEPLAY_SYSTEM_ID, "com.huawei.wiseplay")?,
		KEYFORMAT_PLAYREADY => playready_info(tag)?,
		KEYFORMAT_FAIRPLAY => fairplay_info(tag, default_kid)?,
		other => {
			warn!(keyformat = other, "unsupported keyformat, skipping key tag");
			return Ok(None);
		}
	};

	if let Some(info) = info.as_mut() {
		info.encryption_scheme = scheme;
		info.key_format_versions = tag.attr("KEYFORMATVERSIONS").map(str::to_string);
	}

	Ok(info)
}

/// ClearKey. The key URI doubles as the license server; the key id comes
/// from the tag or from the init segment's `tenc` box.
fn identity_info(tag: &Tag, default_kid: Option<&str>) -> Result<Option<DrmInfo>> {
	let uri = tag.required_attr("URI")?;

	let mut key_ids = BTreeSet::new();
	let explicit = tag.attr("KEYID").map(normalize_key_id);
	if let Some(kid) = explicit.or_else(|| default_kid.map(str::to_string)) {
		key_ids.insert(kid);
	}

	let init_data = key_ids
		.iter()
		.next()
		.map(|kid| InitData {
			init_data_type: "keyids",
			data: Bytes::from(format!("{{\"kids\":[\"{kid}\"]}}")),
		})
		.into_iter()
		.collect();

	Ok(Some(DrmInfo {
		key_system: "org.w3.clearkey".to_string(),
		license_server_uri: Some(uri.to_string()),
		init_data,
		key_ids,
		..Default::default()
	}))
}

/// Widevine-shaped keyformats: the data URI carries a complete PSSH box.
fn widevine_info(tag: &Tag, system_id: [u8; 16], key_system: &str) -> Result<Option<DrmInfo>> {
	let uri = tag.required_attr("URI")?;
	let Some(pssh) = data_uri_bytes(uri) else {
		warn!(key_system, "key tag URI is not a data: URI, skipping");
		return Ok(None);
	};

	// Some packagers ship bare init data rather than a full box; rewrap it.
	let pssh = if pssh.len() >= 8 && &pssh[4..8] == b"pssh" {
		Bytes::from(pssh)
	} else {
		make_pssh(system_id, &pssh)
	};

	let mut key_ids = BTreeSet::new();
	if let Some(keyid) = tag.attr("KEYID") {
		key_ids.insert(normalize_key_id(keyid));
	}

	Ok(Some(DrmInfo {
		key_system: key_system.to_string(),
		init_data: vec![InitData {
			init_data_type: "cenc",
			data: pssh,
		}],
		key_ids,
		..Default::default()
	}))
}

/// PlayReady: the data URI carries a PlayReady Object; wrap it into a PSSH
/// and pull the license server out of the embedded XML header.
fn playready_info(tag: &Tag) -> Result<Option<DrmInfo>> {
	let uri = tag.required_attr("URI")?;
	let Some(pro) = data_uri_bytes(uri) else {
		warn!("PlayReady key tag URI is not a data: URI, skipping");
		return Ok(None);
	};

	let license_server_uri = playready_license_url(&pro);
	let pssh = make_pssh(PLAYREADY_SYSTEM_ID, &pro);

	Ok(Some(DrmInfo {
		key_system: "com.microsoft.playready".to_string(),
		license_server_uri,
		init_data: vec![InitData {
			init_data_type: "cenc",
			data: pssh,
		}],
		..Default::default()
	}))
}

/// FairPlay: a zero-length `sinf` carrier; the skd: URI is the license server.
fn fairplay_info(tag: &Tag, default_kid: Option<&str>) -> Result<Option<DrmInfo>> {
	let uri = tag.required_attr("URI")?;

	let mut key_ids = BTreeSet::new();
	if let Some(kid) = default_kid {
		key_ids.insert(kid.to_string());
	}

	Ok(Some(DrmInfo {
		key_system: "com.apple.fps".to_string(),
		license_server_uri: Some(uri.to_string()),
		init_data: vec![InitData {
			init_data_type: "sinf",
			data: Bytes::new(),
		}],
		key_ids,
		..Default::default()
	}))
}

/// Lowercase hex without the 0x prefix.
fn normalize_key_id(raw: &str) -> String {
	raw.trim_start_matches("0x").trim_start_matches("0X").to_ascii_lowercase()
}

/// Decode the payload of a base64 `data:` URI.
fn data_uri_bytes(uri: &str) -> Option<Vec<u8>> {
	let rest = uri.strip_prefix("data:")?;
	let (header, payload) = rest.split_once(',')?;

	if header.ends_with(";base64") {
		base64::engine::general_purpose::STANDARD.decode(payload).ok()
	} else {
		Some(payload.as_bytes().to_vec())
	}
}

/// Build a version 0 PSSH box around raw init data.
fn make_pssh(system_id: [u8; 16], data: &[u8]) -> Bytes {
	let size = 4 + 4 + 4 + 16 + 4 + data.len();
	let mut out = Vec::with_capacity(size);
	out.extend_from_slice(&(size as u32).to_be_bytes());
	out.extend_from_slice(b"pssh");
	out.extend_from_slice(&0u32.to_be_bytes());
	out.extend_from_slice(&system_id);
	out.extend_from_slice(&(data.len() as u32).to_be_bytes());
	out.extend_from_slice(data);
	Bytes::from(out)
}

/// Find the `<LA_URL>` inside a PlayReady Object's UTF-16LE XML header.
fn playready_license_url(pro: &[u8]) -> Option<String> {
	// PRO: length(4) + record count(2) + per record: type(2) + length(2) + data.
	if pro.len() < 10 {
		return None;
	}

	let mut offset = 6;
	let count = u16::from_le_bytes([pro[4], pro[5]]);

	for _ in 0..count {
		if pro.len() < offset + 4 {
			return None;
		}
		let record_type = u16::from_le_bytes([pro[offset], pro[offset + 1]]);
		let record_len = u16::from_le_bytes([pro[offset + 2], pro[offset + 3]]) as usize;
		offset += 4;

		if pro.len() < offset + record_len {
			return None;
		}

		// Record type 1 is the rights management header.
		if record_type == 1 {
			let xml = utf16le_to_string(&pro[offset..offset + record_len]);
			let start = xml.find("<LA_URL>")? + "<LA_URL>".len();
			let end = xml[start..].find("</LA_URL>")? + start;
			return Some(xml[start..end].to_string());
		}

		offset += record_len;
	}

	None
}

fn utf16le_to_string(data: &[u8]) -> String {
	let units: Vec<u16> = data.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
	String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::playlist::lex;

	fn key_tag(attrs: &str) -> Tag {
		let text = format!("#EXTM3U\n#EXT-X-KEY:{attrs}\n#EXTINF:4,\ns.mp4\n");
		let playlist = lex(&text).unwrap();
		playlist.segments[0].tag("EXT-X-KEY").unwrap().clone()
	}

	#[test]
	fn rejects_unknown_method() {
		let tag = key_tag("METHOD=ROT13,URI=\"k\"");
		assert!(matches!(
			extract(&tag, "video/mp4", None),
			Err(Error::UnsupportedCipherMode(_))
		));
	}

	#[test]
	fn unknown_keyformat_is_skipped() {
		let tag = key_tag("METHOD=SAMPLE-AES,URI=\"k\",KEYFORMAT=\"com.example.custom\"");
		assert_eq!(extract(&tag, "video/mp4", None).unwrap(), None);
	}

	#[test]
	fn identity_uses_default_kid() {
		let tag = key_tag("METHOD=SAMPLE-AES,URI=\"https://keys.example.com/k1\"");
		let info = extract(&tag, "video/mp4", Some("deadbeef00000000000000000000cafe"))
			.unwrap()
			.unwrap();

		assert_eq!(info.key_system, "org.w3.clearkey");
		assert!(info.key_ids.contains("deadbeef00000000000000000000cafe"));
		assert_eq!(info.encryption_scheme, Some("cbcs"));
		assert_eq!(info.license_server_uri.as_deref(), Some("https://keys.example.com/k1"));
	}

	#[test]
	fn widevine_pssh_passthrough() {
		let pssh = make_pssh(WIDEVINE_SYSTEM_ID, b"widevine-data");
		let data_uri = format!(
			"data:text/plain;base64,{}",
			base64::engine::general_purpose::STANDARD.encode(&pssh)
		);
		let tag = key_tag(&format!(
			"METHOD=SAMPLE-AES-CTR,URI=\"{data_uri}\",KEYFORMAT=\"{KEYFORMAT_WIDEVINE}\",KEYID=0xDEADBEEF"
		));

		let info = extract(&tag, "video/mp4", None).unwrap().unwrap();
		assert_eq!(info.key_system, "com.widevine.alpha");
		assert_eq!(info.encryption_scheme, Some("cenc"));
		assert_eq!(info.init_data[0].data, pssh);
		assert!(info.key_ids.contains("deadbeef"));
	}

	#[test]
	fn playready_license_url_from_pro() {
		let xml = "<WRMHEADER><DATA><LA_URL>https://pr.example.com/rightsmanager.asmx</LA_URL></DATA></WRMHEADER>";
		let xml_utf16: Vec<u8> = xml.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();

		let mut pro = Vec::new();
		pro.extend_from_slice(&((10 + xml_utf16.len()) as u32).to_le_bytes());
		pro.extend_from_slice(&1u16.to_le_bytes());
		pro.extend_from_slice(&1u16.to_le_bytes());
		pro.extend_from_slice(&(xml_utf16.len() as u16).to_le_bytes());
		pro.extend_from_slice(&xml_utf16);

		let data_uri = format!(
			"data:text/plain;base64,{}",
			base64::engine::general_purpose::STANDARD.encode(&pro)
		);
		let tag = key_tag(&format!(
			"METHOD=SAMPLE-AES,URI=\"{data_uri}\",KEYFORMAT=\"{KEYFORMAT_PLAYREADY}\""
		));

		let info = extract(&tag, "video/mp4", None).unwrap().unwrap();
		assert_eq!(
			info.license_server_uri.as_deref(),
			Some("https://pr.example.com/rightsmanager.asmx")
		);
		assert_eq!(&info.init_data[0].data[4..8], b"pssh");
	}

	#[test]
	fn fairplay_emits_sinf_carrier() {
		let tag = key_tag(&format!(
			"METHOD=SAMPLE-AES,URI=\"skd://key-id\",KEYFORMAT=\"{KEYFORMAT_FAIRPLAY}\""
		));

		let info = extract(&tag, "video/mp4", None).unwrap().unwrap();
		assert_eq!(info.key_system, "com.apple.fps");
		assert_eq!(info.init_data[0].init_data_type, "sinf");
		assert!(info.init_data[0].data.is_empty());
		assert_eq!(info.license_server_uri.as_deref(), Some("skd://key-id"));
	}

	#[test]
	fn encrypted_mp2t_is_rejected() {
		let tag = key_tag("METHOD=SAMPLE-AES,URI=\"k\"");
		assert!(matches!(
			extract(&tag, "video/mp2t", None),
			Err(Error::EncryptedMp2tNotSupported)
		));

		let tag = key_tag(&format!("METHOD=SAMPLE-AES,URI=\"skd://k\",KEYFORMAT=\"{KEYFORMAT_FAIRPLAY}\""));
		assert!(matches!(
			extract(&tag, "video/mp2t", None),
			Err(Error::EncryptedLegacyAppleMediaKeys)
		));
	}
}
