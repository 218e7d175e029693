//! The request interface between the parser and the embedder.
//!
//! The parser never talks to the network directly: it builds [Request]s and
//! hands them to a [Fetch] implementation. The embedder owns retries,
//! authentication, and bandwidth accounting. [HttpFetch] is a plain reqwest
//! client for embedders that don't need any of that.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use url::Url;

use crate::{Error, Result};

/// Coarse classification used for bandwidth accounting and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
	Manifest,
	Segment,
	Key,
}

/// What the requested resource is, more precisely than [RequestKind].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestContext {
	MasterPlaylist,
	MediaPlaylist,
	MediaSegment,
	InitSegment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
	Get,
	Head,
}

/// One request the parser wants the embedder to perform.
#[derive(Debug, Clone)]
pub struct Request {
	pub uri: Url,
	pub kind: RequestKind,
	pub context: RequestContext,
	pub method: Method,
	/// Inclusive byte range; an open end means "to end of resource".
	pub range: Option<(u64, Option<u64>)>,
	/// Set when the fetch is speculative (e.g. a preload hint).
	pub is_preload: bool,
}

impl Request {
	pub fn new(kind: RequestKind, context: RequestContext, uri: Url) -> Self {
		Self {
			uri,
			kind,
			context,
			method: Method::Get,
			range: None,
			is_preload: false,
		}
	}

	pub fn head(mut self) -> Self {
		self.method = Method::Head;
		self
	}

	pub fn with_range(mut self, start: u64, end: Option<u64>) -> Self {
		self.range = Some((start, end));
		self
	}
}

/// What came back.
#[derive(Debug, Clone)]
pub struct Response {
	/// The URI after redirects.
	pub final_uri: Url,
	pub body: Bytes,
	pub content_type: Option<String>,
}

/// Asynchronous fetcher provided by the embedder.
///
/// Implementations must be cheap to call concurrently. Cancellation is
/// cooperative: the parser drops the future when it stops.
pub trait Fetch: Send + Sync {
	fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>>;
}

/// Default fetcher backed by a reqwest client.
#[derive(Clone)]
pub struct HttpFetch {
	client: reqwest::Client,
}

impl HttpFetch {
	pub fn new() -> Self {
		Self {
			client: reqwest::Client::new(),
		}
	}

	pub fn with_client(client: reqwest::Client) -> Self {
		Self { client }
	}
}

impl Default for HttpFetch {
	fn default() -> Self {
		Self::new()
	}
}

impl Fetch for HttpFetch {
	fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
		async move {
			let mut builder = match request.method {
				Method::Get => self.client.get(request.uri.clone()),
				Method::Head => self.client.head(request.uri.clone()),
			};

			if let Some((start, end)) = request.range {
				let header = match end {
					Some(end) => format!("bytes={start}-{end}"),
					None => format!("bytes={start}-"),
				};
				builder = builder.header(reqwest::header::RANGE, header);
			}

			let response = builder
				.send()
				.await
				.map_err(|err| Error::Fetch(format!("request for {} failed: {err}", request.uri)))?;

			let response = response
				.error_for_status()
				.map_err(|err| Error::Fetch(format!("request for {} failed: {err}", request.uri)))?;

			let final_uri = response.url().clone();
			let content_type = response
				.headers()
				.get(reqwest::header::CONTENT_TYPE)
				.and_then(|v| v.to_str().ok())
				.map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

			let body = match request.method {
				Method::Head => Bytes::new(),
				Method::Get => response
					.bytes()
					.await
					.map_err(|err| Error::Fetch(format!("failed to read body from {}: {err}", request.uri)))?,
			};

			Ok(Response {
				final_uri,
				body,
				content_type,
			})
		}
		.boxed()
	}
}

/// Tracks outstanding requests against the parser's stop flag.
///
/// Every fetch races the flag, so `stop()` aborts all in-flight work without
/// bookkeeping per request.
#[derive(Clone)]
pub struct RequestManager {
	fetch: Arc<dyn Fetch>,
	stopped: watch::Receiver<bool>,
}

impl RequestManager {
	pub fn new(fetch: Arc<dyn Fetch>, stopped: watch::Receiver<bool>) -> Self {
		Self { fetch, stopped }
	}

	pub fn is_stopped(&self) -> bool {
		*self.stopped.borrow()
	}

	pub async fn fetch(&self, request: Request) -> Result<Response> {
		if self.is_stopped() {
			return Err(Error::Aborted);
		}

		let mut stopped = self.stopped.clone();
		tokio::select! {
			response = self.fetch.fetch(request) => response,
			_ = stopped.wait_for(|s| *s) => Err(Error::Aborted),
		}
	}
}
