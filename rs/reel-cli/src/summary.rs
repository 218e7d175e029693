use reel::{Manifest, SharedStream};
use serde::Serialize;

/// A printable snapshot of the parsed model.
#[derive(Debug, Serialize)]
pub struct Summary {
	pub live: bool,
	pub duration: Option<f64>,
	pub presentation_delay: f64,
	pub low_latency: bool,
	pub gap_count: u32,
	pub start_time: Option<f64>,
	pub variants: Vec<VariantSummary>,
	pub text_streams: Vec<StreamSummary>,
	pub image_streams: Vec<StreamSummary>,
}

#[derive(Debug, Serialize)]
pub struct VariantSummary {
	pub id: u32,
	pub bandwidth: u64,
	pub language: String,
	pub audio: Option<StreamSummary>,
	pub video: Option<StreamSummary>,
	pub key_systems: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StreamSummary {
	pub id: u32,
	pub mime_type: String,
	pub codecs: String,
	pub language: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resolution: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub channels: Option<u32>,
	pub segments: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub first_segment_start: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub last_segment_end: Option<f64>,
}

impl Summary {
	pub fn of(manifest: &Manifest) -> Self {
		let timeline = manifest.timeline.lock().unwrap();

		Self {
			live: timeline.is_live(),
			duration: timeline.duration().is_finite().then(|| timeline.duration()),
			presentation_delay: timeline.delay(),
			low_latency: manifest.is_low_latency,
			gap_count: manifest.gap_count,
			start_time: manifest.start_time,
			variants: manifest
				.variants
				.iter()
				.map(|v| VariantSummary {
					id: v.id,
					bandwidth: v.bandwidth,
					language: v.language.clone(),
					audio: v.audio.as_ref().map(stream_summary),
					video: v.video.as_ref().map(stream_summary),
					key_systems: v.drm_infos.iter().map(|d| d.key_system.clone()).collect(),
				})
				.collect(),
			text_streams: manifest.text_streams.iter().map(stream_summary).collect(),
			image_streams: manifest.image_streams.iter().map(stream_summary).collect(),
		}
	}

	pub fn print(&self) {
		if self.live {
			println!("live presentation, delay {:.1}s", self.presentation_delay);
		} else {
			println!("VOD presentation, duration {:.1}s", self.duration.unwrap_or(0.0));
		}
		if self.low_latency {
			println!("low latency: partial segments indexed");
		}
		if self.gap_count > 0 {
			println!("gaps: {}", self.gap_count);
		}

		for variant in &self.variants {
			println!("variant #{} @ {} bps", variant.id, variant.bandwidth);
			if let Some(video) = &variant.video {
				print_stream("  video", video);
			}
			if let Some(audio) = &variant.audio {
				print_stream("  audio", audio);
			}
			if !variant.key_systems.is_empty() {
				println!("  drm: {}", variant.key_systems.join(", "));
			}
		}

		for text in &self.text_streams {
			print_stream("text ", text);
		}
		for image in &self.image_streams {
			print_stream("image", image);
		}
	}
}

fn stream_summary(stream: &SharedStream) -> StreamSummary {
	let stream = stream.lock().unwrap();

	StreamSummary {
		id: stream.id,
		mime_type: stream.mime_type.clone(),
		codecs: stream.codecs.clone(),
		language: stream.language.clone(),
		resolution: match (stream.width, stream.height) {
			(Some(w), Some(h)) => Some(format!("{w}x{h}")),
			_ => None,
		},
		channels: stream.channels_count,
		segments: stream.segment_index.as_ref().map(|i| i.len()).unwrap_or(0),
		first_segment_start: stream.segment_index.as_ref().and_then(|i| i.earliest()).map(|r| r.start_time),
		last_segment_end: stream.segment_index.as_ref().and_then(|i| i.last()).map(|r| r.end_time),
	}
}

fn print_stream(label: &str, stream: &StreamSummary) {
	let mut details = vec![stream.mime_type.clone()];
	if !stream.codecs.is_empty() {
		details.push(stream.codecs.clone());
	}
	if !stream.language.is_empty() {
		details.push(stream.language.clone());
	}
	if let Some(resolution) = &stream.resolution {
		details.push(resolution.clone());
	}
	if let Some(channels) = stream.channels {
		details.push(format!("{channels}ch"));
	}

	println!("{label} #{}: {} ({} segments)", stream.id, details.join(" "), stream.segments);
}
