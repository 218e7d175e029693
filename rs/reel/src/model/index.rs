use super::SegmentReference;

/// An ordered list of segment references for one stream.
///
/// References are kept monotonically non-decreasing in start time. During a
/// live refresh, [SegmentIndex::merge_and_evict] replaces the overlapping
/// suffix with the refreshed references and drops everything that has slid
/// out of the availability window, in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentIndex {
	references: Vec<SegmentReference>,
}

impl SegmentIndex {
	pub fn new(references: Vec<SegmentReference>) -> Self {
		debug_assert!(
			references.windows(2).all(|w| w[0].start_time <= w[1].start_time),
			"references must be sorted by start time"
		);
		Self { references }
	}

	pub fn len(&self) -> usize {
		self.references.len()
	}

	pub fn is_empty(&self) -> bool {
		self.references.is_empty()
	}

	pub fn get(&self, position: usize) -> Option<&SegmentReference> {
		self.references.get(position)
	}

	pub fn iter(&self) -> impl Iterator<Item = &SegmentReference> {
		self.references.iter()
	}

	pub fn earliest(&self) -> Option<&SegmentReference> {
		self.references.first()
	}

	pub fn last(&self) -> Option<&SegmentReference> {
		self.references.last()
	}

	/// The position of the reference containing `time`, or of the last
	/// reference when `time` is past the end.
	pub fn find(&self, time: f64) -> Option<usize> {
		if self.references.is_empty() {
			return None;
		}

		match self.references.iter().position(|r| time < r.end_time) {
			Some(i) => Some(i),
			None => Some(self.references.len() - 1),
		}
	}

	/// Merge refreshed references in and drop everything that ended before
	/// `availability_start`.
	///
	/// References are aligned by media sequence number: sequences we already
	/// hold are replaced in place (their recomputed timestamps are identical
	/// for an unchanged playlist, which makes the merge idempotent), and
	/// strictly newer sequences are appended.
	pub fn merge_and_evict(&mut self, references: Vec<SegmentReference>, availability_start: f64) {
		if let Some(first) = references.first() {
			let first_sequence = first.media_sequence;
			self.references.retain(|r| r.media_sequence < first_sequence);
			self.references.extend(references);
		}

		self.evict(availability_start);

		debug_assert!(
			self.references.windows(2).all(|w| w[0].start_time <= w[1].start_time),
			"merge broke start time ordering"
		);
	}

	/// Drop references that ended at or before `availability_start`.
	pub fn evict(&mut self, availability_start: f64) {
		self.references.retain(|r| r.end_time > availability_start);
	}

	/// Drop the first `count` references.
	pub fn drop_first_n(&mut self, count: usize) {
		self.references.drain(..count.min(self.references.len()));
	}

	/// Shift every reference by `delta` seconds.
	pub fn offset(&mut self, delta: f64) {
		for reference in &mut self.references {
			reference.offset(delta);
		}
	}

	/// Visit every top-level reference, ignoring partials.
	pub fn for_each_top_level(&self, mut f: impl FnMut(&SegmentReference)) {
		for reference in &self.references {
			f(reference);
		}
	}

	pub fn references_mut(&mut self) -> &mut [SegmentReference] {
		&mut self.references
	}
}
