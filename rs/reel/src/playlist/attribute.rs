use crate::{Error, Result};

use super::Attribute;

/// Split an attribute list into ordered `NAME=value` pairs.
///
/// Commas inside quoted strings do not split; the quotes themselves are
/// stripped from the stored value.
pub fn parse_attributes(input: &str) -> Vec<Attribute> {
	let mut attrs = Vec::new();

	for part in split_outside_quotes(input, ',') {
		let Some((name, raw)) = part.split_once('=') else {
			// A bare token without '=' is not an attribute; skip it.
			continue;
		};

		let name = name.trim().to_string();
		let raw = raw.trim();
		let quoted = raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"');
		let value = if quoted {
			raw[1..raw.len() - 1].to_string()
		} else {
			raw.to_string()
		};

		attrs.push(Attribute { name, value, quoted });
	}

	attrs
}

/// Split on `sep`, honoring double quotes.
fn split_outside_quotes(input: &str, sep: char) -> Vec<&str> {
	let mut parts = Vec::new();
	let mut in_quotes = false;
	let mut start = 0;

	for (i, c) in input.char_indices() {
		match c {
			'"' => in_quotes = !in_quotes,
			c if c == sep && !in_quotes => {
				parts.push(&input[start..i]);
				start = i + sep.len_utf8();
			}
			_ => {}
		}
	}

	parts.push(&input[start..]);
	parts
}

/// Parse a `WIDTHxHEIGHT` resolution token.
pub fn parse_resolution(value: &str) -> Option<(u32, u32)> {
	let (w, h) = value.split_once(['x', 'X'])?;
	Some((w.parse().ok()?, h.parse().ok()?))
}

/// Parse an `EXT-X-BYTERANGE` style value: a length with an optional
/// `@offset`.
pub fn parse_byterange(value: &str) -> Result<(u64, Option<u64>)> {
	let mut parts = value.splitn(2, '@');

	let length = parts
		.next()
		.and_then(|p| p.trim().parse().ok())
		.ok_or_else(|| Error::InvalidPlaylist(format!("bad byte range: {value}")))?;

	let offset = match parts.next() {
		Some(p) => Some(
			p.trim()
				.parse()
				.map_err(|_| Error::InvalidPlaylist(format!("bad byte range offset: {value}")))?,
		),
		None => None,
	};

	Ok((length, offset))
}

/// Parse a `0x`/`0X` prefixed hex attribute into bytes.
pub fn parse_hex(value: &str) -> Result<Vec<u8>> {
	let digits = value
		.strip_prefix("0x")
		.or_else(|| value.strip_prefix("0X"))
		.unwrap_or(value);

	// An odd number of digits means a dropped leading zero.
	let padded;
	let digits = if digits.len() % 2 == 1 {
		padded = format!("0{digits}");
		&padded
	} else {
		digits
	};

	hex::decode(digits).map_err(|_| Error::InvalidPlaylist(format!("bad hex value: {value}")))
}
