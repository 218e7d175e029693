//! Test fixtures: an in-memory fetcher serving canned playlists.

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use reel::fetch::{Fetch, Request, Response};
use reel::{Error, Result};
use url::Url;

#[derive(Default)]
pub struct MemoryFetch {
	/// Response queue per URI; the last entry repeats once drained.
	resources: Mutex<HashMap<String, Vec<Bytes>>>,
	requests: Mutex<Vec<String>>,
}

impl MemoryFetch {
	pub fn new() -> Self {
		Self::default()
	}

	/// Serve `body` for every request of `uri`.
	pub fn insert(&self, uri: &str, body: impl Into<Bytes>) {
		self.resources.lock().unwrap().insert(uri.to_string(), vec![body.into()]);
	}

	/// Queue one more response for `uri`; successive fetches progress
	/// through the queue and stick on the last entry.
	pub fn push(&self, uri: &str, body: impl Into<Bytes>) {
		self.resources
			.lock()
			.unwrap()
			.entry(uri.to_string())
			.or_default()
			.push(body.into());
	}

	/// Every URI requested so far, in order.
	pub fn requests(&self) -> Vec<String> {
		self.requests.lock().unwrap().clone()
	}

	fn lookup(&self, uri: &Url) -> Option<Bytes> {
		let mut resources = self.resources.lock().unwrap();

		// Exact match first; then ignore query parameters, so blocking
		// reload requests hit the same canned playlist.
		let key = if resources.contains_key(uri.as_str()) {
			uri.as_str().to_string()
		} else {
			let mut stripped = uri.clone();
			stripped.set_query(None);
			stripped.as_str().to_string()
		};

		let queue = resources.get_mut(&key)?;
		if queue.len() > 1 {
			Some(queue.remove(0))
		} else {
			queue.first().cloned()
		}
	}
}

impl Fetch for MemoryFetch {
	fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
		async move {
			self.requests.lock().unwrap().push(request.uri.to_string());

			match self.lookup(&request.uri) {
				Some(body) => Ok(Response {
					final_uri: request.uri.clone(),
					body,
					content_type: None,
				}),
				None => Err(Error::Fetch(format!("no fixture for {}", request.uri))),
			}
		}
		.boxed()
	}
}

/// Build one MP4 box.
pub fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
	let mut out = Vec::new();
	out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
	out.extend_from_slice(kind);
	out.extend_from_slice(payload);
	out
}

/// A minimal init segment whose `tenc` box carries the given default KID.
pub fn init_segment_with_kid(kid: &[u8; 16]) -> Vec<u8> {
	let mut tenc_payload = vec![0u8; 8];
	tenc_payload[6] = 1; // default_isProtected
	tenc_payload[7] = 8; // default_Per_Sample_IV_Size
	tenc_payload.extend_from_slice(kid);
	let tenc = mp4_box(b"tenc", &tenc_payload);

	let schi = mp4_box(b"schi", &tenc);
	let sinf = mp4_box(b"sinf", &schi);

	let mut entry = vec![0u8; 78];
	entry[24..26].copy_from_slice(&1280u16.to_be_bytes());
	entry[26..28].copy_from_slice(&720u16.to_be_bytes());
	entry.extend_from_slice(&sinf);
	let encv = mp4_box(b"encv", &entry);

	let mut stsd_payload = vec![0u8; 8];
	stsd_payload.extend_from_slice(&encv);
	let stsd = mp4_box(b"stsd", &stsd_payload);

	mp4_box(
		b"moov",
		&mp4_box(b"trak", &mp4_box(b"mdia", &mp4_box(b"minf", &mp4_box(b"stbl", &stsd)))),
	)
}
