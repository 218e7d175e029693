use std::sync::{Arc, Mutex};

use super::SegmentReference;

/// Liveness, duration, and the availability window of a presentation.
///
/// Shared between the manifest and the parser; the update scheduler keeps it
/// current as live playlists slide.
#[derive(Debug)]
pub struct PresentationTimeline {
	/// True for VOD, and for live presentations after the end-of-list
	/// marker demotes them.
	is_static: bool,
	/// Total duration in seconds; infinite while live.
	duration: f64,
	presentation_start_time: f64,
	/// Width of the seekable window behind the live edge.
	segment_availability_duration: f64,
	/// How far behind the live edge playback should start.
	delay: f64,
	/// Earliest and latest media times observed across all streams.
	min_start: f64,
	max_end: f64,
	max_segment_duration: f64,
	/// Wall-clock time (seconds since the epoch) of media time zero, when
	/// the presentation is PDT-anchored.
	initial_program_date_time: Option<f64>,
	locked: bool,
}

impl Default for PresentationTimeline {
	fn default() -> Self {
		Self {
			is_static: false,
			duration: f64::INFINITY,
			presentation_start_time: 0.0,
			segment_availability_duration: f64::INFINITY,
			delay: 0.0,
			min_start: 0.0,
			max_end: 0.0,
			max_segment_duration: 1.0,
			initial_program_date_time: None,
			locked: false,
		}
	}
}

impl PresentationTimeline {
	pub fn is_live(&self) -> bool {
		!self.is_static
	}

	pub fn set_static(&mut self, is_static: bool) {
		self.is_static = is_static;
	}

	pub fn duration(&self) -> f64 {
		self.duration
	}

	pub fn set_duration(&mut self, duration: f64) {
		self.duration = duration;
	}

	pub fn delay(&self) -> f64 {
		self.delay
	}

	pub fn set_delay(&mut self, delay: f64) {
		self.delay = delay;
	}

	pub fn presentation_start_time(&self) -> f64 {
		self.presentation_start_time
	}

	pub fn segment_availability_duration(&self) -> f64 {
		self.segment_availability_duration
	}

	pub fn set_segment_availability_duration(&mut self, duration: f64) {
		self.segment_availability_duration = duration;
	}

	pub fn max_segment_duration(&self) -> f64 {
		self.max_segment_duration
	}

	pub fn initial_program_date_time(&self) -> Option<f64> {
		self.initial_program_date_time
	}

	pub fn set_initial_program_date_time(&mut self, pdt: f64) {
		self.initial_program_date_time = Some(pdt);
	}

	/// Where the availability window starts: references ending at or before
	/// this time have slid out and must be evicted.
	pub fn segment_availability_start(&self) -> f64 {
		if self.is_static {
			return self.min_start;
		}

		let start = self.max_end - self.segment_availability_duration;
		start.max(self.min_start)
	}

	/// The latest position new segments have reached.
	pub fn segment_availability_end(&self) -> f64 {
		if self.is_static {
			return self.duration;
		}
		self.max_end
	}

	/// Track the extent of freshly indexed references.
	pub fn notify_segments(&mut self, references: &[SegmentReference]) {
		for reference in references {
			self.min_start = self.min_start.min(reference.start_time);
			self.max_end = self.max_end.max(reference.end_time);
			self.max_segment_duration = self.max_segment_duration.max(reference.duration());
		}
	}

	pub fn is_locked(&self) -> bool {
		self.locked
	}

	/// Pin the start of the timeline. Called exactly once, before the first
	/// segment index is exposed.
	pub fn lock_start_time(&mut self) {
		debug_assert!(!self.locked, "start time locked twice");
		self.locked = true;
	}
}

/// Handle shared between the manifest and the parser.
pub type SharedTimeline = Arc<Mutex<PresentationTimeline>>;

#[cfg(test)]
mod tests {
	use super::*;
	use url::Url;

	fn reference(start: f64, end: f64) -> SegmentReference {
		SegmentReference::new(vec![Url::parse("https://e.com/s.ts").unwrap()], start, end)
	}

	#[test]
	fn live_availability_window() {
		let mut timeline = PresentationTimeline::default();
		timeline.set_segment_availability_duration(30.0);
		timeline.notify_segments(&[reference(0.0, 10.0), reference(10.0, 50.0)]);

		assert!(timeline.is_live());
		assert_eq!(timeline.segment_availability_start(), 20.0);
		assert_eq!(timeline.segment_availability_end(), 50.0);
	}

	#[test]
	fn static_window_spans_duration() {
		let mut timeline = PresentationTimeline::default();
		timeline.set_static(true);
		timeline.set_duration(20.0);
		timeline.notify_segments(&[reference(0.0, 20.0)]);

		assert_eq!(timeline.segment_availability_start(), 0.0);
		assert_eq!(timeline.segment_availability_end(), 20.0);
	}

	#[test]
	fn window_never_precedes_earliest_segment() {
		let mut timeline = PresentationTimeline::default();
		timeline.set_segment_availability_duration(1000.0);
		timeline.notify_segments(&[reference(0.0, 10.0)]);

		assert_eq!(timeline.segment_availability_start(), 0.0);
	}
}
