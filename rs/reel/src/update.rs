//! Live refresh pacing and blocking-reload request shaping.

use std::time::Duration;

use url::Url;

/// Exponentially weighted moving average over roughly the last N samples.
#[derive(Debug, Clone)]
pub struct Ewma {
	window: f64,
	estimate: Option<f64>,
}

impl Ewma {
	pub fn new(window: usize) -> Self {
		Self {
			window: window as f64,
			estimate: None,
		}
	}

	pub fn sample(&mut self, value: f64) {
		self.estimate = Some(match self.estimate {
			Some(estimate) => estimate + (value - estimate) / self.window,
			None => value,
		});
	}

	pub fn estimate(&self) -> f64 {
		self.estimate.unwrap_or(0.0)
	}
}

/// Paces update ticks so that fetch latency doesn't stretch the effective
/// refresh interval.
#[derive(Debug)]
pub struct UpdatePacer {
	latency: Ewma,
}

impl Default for UpdatePacer {
	fn default() -> Self {
		Self { latency: Ewma::new(5) }
	}
}

impl UpdatePacer {
	pub fn record(&mut self, update_duration: Duration) {
		self.latency.sample(update_duration.as_secs_f64());
	}

	/// How long to sleep before the next tick.
	pub fn delay(&self, period: Duration) -> Duration {
		let remaining = period.as_secs_f64() - self.latency.estimate();
		Duration::from_secs_f64(remaining.max(0.0))
	}
}

/// Append the low-latency blocking-reload query parameters.
///
/// `_HLS_msn` names the media sequence the server should hold the response
/// for, `_HLS_part` the pending partial, and `_HLS_skip=YES` requests a
/// delta update.
pub fn blocking_reload_uri(base: &Url, media_sequence: u64, part: Option<u64>, skip: bool) -> Url {
	let mut uri = base.clone();
	{
		let mut pairs = uri.query_pairs_mut();
		pairs.append_pair("_HLS_msn", &media_sequence.to_string());
		if let Some(part) = part {
			pairs.append_pair("_HLS_part", &part.to_string());
		}
		if skip {
			pairs.append_pair("_HLS_skip", "YES");
		}
	}
	uri
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ewma_converges() {
		let mut ewma = Ewma::new(5);
		ewma.sample(10.0);
		assert_eq!(ewma.estimate(), 10.0);

		for _ in 0..50 {
			ewma.sample(2.0);
		}
		assert!((ewma.estimate() - 2.0).abs() < 0.01);
	}

	#[test]
	fn pacer_subtracts_average_latency() {
		let mut pacer = UpdatePacer::default();
		pacer.record(Duration::from_secs(2));

		let delay = pacer.delay(Duration::from_secs(6));
		assert_eq!(delay, Duration::from_secs(4));

		// Latency above the period clamps to an immediate tick.
		pacer.record(Duration::from_secs(60));
		assert_eq!(pacer.delay(Duration::from_secs(6)), Duration::ZERO);
	}

	#[test]
	fn blocking_reload_query() {
		let base = Url::parse("https://example.com/live.m3u8?token=abc").unwrap();

		let uri = blocking_reload_uri(&base, 106, None, false);
		assert_eq!(uri.query(), Some("token=abc&_HLS_msn=106"));

		let uri = blocking_reload_uri(&base, 106, Some(2), true);
		assert_eq!(uri.query(), Some("token=abc&_HLS_msn=106&_HLS_part=2&_HLS_skip=YES"));
	}
}
