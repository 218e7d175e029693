use chrono::{DateTime, FixedOffset};

use crate::playlist::Tag;
use crate::{Error, Result};

use super::{SharedStream, SharedTimeline, Variant};

/// How a media playlist presents itself, and whether it can still change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationType {
	Vod,
	Event,
	Live,
}

impl PresentationType {
	pub fn is_live(&self) -> bool {
		!matches!(self, PresentationType::Vod)
	}
}

/// The normalized presentation model produced by the parser.
///
/// The timeline and the streams inside variants are shared with the parser,
/// which keeps refreshing them for live content; scalar fields are a snapshot
/// from the most recent parse. `on_manifest_updated` signals when to re-read.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
	pub timeline: SharedTimeline,
	pub variants: Vec<Variant>,
	pub text_streams: Vec<SharedStream>,
	pub image_streams: Vec<SharedStream>,
	/// Segments are appended in playlist order rather than placed by
	/// timestamp; set unless wall-clock sync anchored the streams.
	pub sequence_mode: bool,
	pub is_low_latency: bool,
	/// Number of `EXT-X-GAP` references seen across all loaded playlists.
	pub gap_count: u32,
	pub period_count: u32,
	/// Preferred start position from `EXT-X-START`; negative values are
	/// relative to the live edge.
	pub start_time: Option<f64>,
	pub service_description: Option<String>,
}

impl Manifest {
	/// The manifest format this parser produces.
	pub const FORMAT: &'static str = "hls";
}

/// A parsed `EXT-X-DATERANGE` tag.
///
/// Client attributes (`X-` prefixed) are preserved verbatim in a side list
/// so they can be passed through as timed metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DateRange {
	pub id: String,
	pub class: Option<String>,
	pub start_date: DateTime<FixedOffset>,
	pub end_date: Option<DateTime<FixedOffset>>,
	pub duration: Option<f64>,
	pub planned_duration: Option<f64>,
	pub end_on_next: bool,
	pub client_attributes: Vec<(String, String)>,
}

impl DateRange {
	pub fn from_tag(tag: &Tag) -> Result<Self> {
		let id = tag.required_attr("ID")?.to_string();

		let start_date = tag.required_attr("START-DATE")?;
		let start_date = DateTime::parse_from_rfc3339(start_date)
			.map_err(|_| Error::InvalidPlaylist(format!("bad START-DATE: {start_date}")))?;

		let end_date = match tag.attr("END-DATE") {
			Some(raw) => Some(
				DateTime::parse_from_rfc3339(raw)
					.map_err(|_| Error::InvalidPlaylist(format!("bad END-DATE: {raw}")))?,
			),
			None => None,
		};

		let client_attributes = tag
			.attrs
			.iter()
			.filter(|a| a.name.starts_with("X-"))
			.map(|a| (a.name.clone(), a.value.clone()))
			.collect();

		Ok(Self {
			id,
			class: tag.attr("CLASS").map(str::to_string),
			start_date,
			end_date,
			duration: tag.f64_attr("DURATION"),
			planned_duration: tag.f64_attr("PLANNED-DURATION"),
			end_on_next: tag.bool_attr("END-ON-NEXT"),
			client_attributes,
		})
	}

	/// Absolute start in seconds since the epoch.
	pub fn start_seconds(&self) -> f64 {
		self.start_date.timestamp_millis() as f64 / 1000.0
	}

	/// Absolute end, from END-DATE, DURATION, or PLANNED-DURATION.
	pub fn end_seconds(&self) -> Option<f64> {
		if let Some(end) = self.end_date {
			return Some(end.timestamp_millis() as f64 / 1000.0);
		}
		self.duration
			.or(self.planned_duration)
			.map(|d| self.start_seconds() + d)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::playlist::lex;

	fn daterange(attrs: &str) -> Result<DateRange> {
		let text = format!("#EXTM3U\n#EXT-X-DATERANGE:{attrs}\n#EXTINF:4,\ns.ts\n");
		let playlist = lex(&text).unwrap();
		DateRange::from_tag(playlist.segments[0].tag("EXT-X-DATERANGE").unwrap())
	}

	#[test]
	fn parses_dates_and_client_attributes() {
		let range = daterange(concat!(
			"ID=\"ad-1\",CLASS=\"com.example.ad\",START-DATE=\"2024-01-01T00:00:10Z\",",
			"DURATION=30.5,X-AD-ID=\"abc\"",
		))
		.unwrap();

		assert_eq!(range.id, "ad-1");
		assert_eq!(range.duration, Some(30.5));
		assert_eq!(range.client_attributes, vec![("X-AD-ID".to_string(), "abc".to_string())]);

		let start = range.start_seconds();
		assert_eq!(range.end_seconds(), Some(start + 30.5));
	}

	#[test]
	fn requires_id_and_start() {
		assert!(daterange("START-DATE=\"2024-01-01T00:00:10Z\"").is_err());
		assert!(daterange("ID=\"x\"").is_err());
		assert!(daterange("ID=\"x\",START-DATE=\"yesterday\"").is_err());
	}
}
