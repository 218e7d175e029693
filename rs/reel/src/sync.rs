//! Cross-stream alignment.
//!
//! Concurrent playlists don't agree on time zero. When every active stream
//! carries `EXT-X-PROGRAM-DATE-TIME` the wall clock aligns them; otherwise
//! media sequence numbers do. Either way the earliest reference across the
//! active non-text streams lands at t=0.

use tracing::debug;

use crate::model::{SegmentIndex, StreamType};

/// One stream's index under synchronization.
pub struct SyncTarget<'a> {
	pub ty: StreamType,
	pub index: &'a mut SegmentIndex,
	/// Media sequence number of the stream's first reference.
	pub first_sequence_number: u64,
}

/// Aligns streams once enough of them are loaded, then keeps later
/// lazy-loaded streams consistent with the memoized anchors.
#[derive(Debug, Default)]
pub struct StreamSynchronizer {
	lowest_sync_time: Option<f64>,
	min_sequence_number: Option<u64>,
}

impl StreamSynchronizer {
	/// Whether wall-clock sync applies: every target's earliest reference
	/// has a sync time, and the presentation is live or a fully loaded VOD.
	pub fn can_use_program_date_time(targets: &[SyncTarget], is_live: bool, vod_all_types_loaded: bool) -> bool {
		if !is_live && !vod_all_types_loaded {
			return false;
		}

		!targets.is_empty()
			&& targets
				.iter()
				.all(|t| t.index.earliest().map(|r| r.sync_time.is_some()).unwrap_or(false))
	}

	pub fn lowest_sync_time(&self) -> Option<f64> {
		self.lowest_sync_time
	}

	/// Wall-clock alignment. Every stream shifts so its first reference
	/// sits at `sync_time - lowest_sync_time`, then later references are
	/// re-anchored at their own sync times to absorb accumulated drift.
	pub fn sync_by_program_date_time(&mut self, targets: &mut [SyncTarget]) {
		let lowest = match self.lowest_sync_time {
			Some(lowest) => lowest,
			None => {
				let Some(lowest) = targets
					.iter()
					.filter_map(|t| t.index.earliest().and_then(|r| r.sync_time))
					.min_by(f64::total_cmp)
				else {
					return;
				};
				self.lowest_sync_time = Some(lowest);
				lowest
			}
		};

		for target in targets {
			let Some(earliest) = target.index.earliest() else {
				continue;
			};
			let Some(first_sync) = earliest.sync_time else {
				continue;
			};

			let delta = (first_sync - lowest) - earliest.start_time;
			if delta != 0.0 {
				target.index.offset(delta);
			}

			// Drift correction: each dated reference goes exactly where its
			// wall clock says, dragging the previous end along.
			let references = target.index.references_mut();
			for i in 0..references.len() {
				let Some(sync) = references[i].sync_time else {
					continue;
				};
				let shift = (sync - lowest) - references[i].start_time;
				if shift.abs() > 1e-9 {
					references[i].offset(shift);
					if i > 0 {
						references[i - 1].end_time = references[i].start_time;
					}
				}
			}

			debug!(ty = target.ty.as_str(), delta, "stream aligned by program date time");
		}
	}

	/// Sequence alignment: streams drop references older than the highest
	/// shared starting sequence, then shift so each starts at zero.
	pub fn sync_by_sequence_number(&mut self, targets: &mut [SyncTarget]) {
		let min_sequence = match self.min_sequence_number {
			Some(min) => min,
			None => {
				let Some(min) = targets.iter().map(|t| t.first_sequence_number).max() else {
					return;
				};
				self.min_sequence_number = Some(min);
				min
			}
		};

		for target in targets {
			let drop = min_sequence.saturating_sub(target.first_sequence_number) as usize;
			if drop > 0 {
				target.index.drop_first_n(drop);
			}

			if let Some(earliest) = target.index.earliest() {
				let start = earliest.start_time;
				if start != 0.0 {
					target.index.offset(-start);
				}
			}

			debug!(ty = target.ty.as_str(), dropped = drop, "stream aligned by sequence number");
		}
	}
}
