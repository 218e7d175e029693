//! Content steering: `EXT-X-CONTENT-STEERING` plus the JSON steering
//! manifest that orders pathways and clones them.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::fetch::{Request, RequestContext, RequestKind, RequestManager};
use crate::playlist::Tag;
use crate::{Error, Result};

/// The steering manifest document, as served by the steering server.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SteeringManifest {
	#[serde(rename = "VERSION")]
	pub version: u32,

	/// Seconds the client must wait before reloading the manifest.
	#[serde(rename = "TTL")]
	pub ttl_seconds: f64,

	/// URI to use the next time the manifest is reloaded.
	#[serde(rename = "RELOAD-URI", default)]
	pub reload_uri: Option<String>,

	/// Pathway ids, most preferred first.
	#[serde(rename = "PATHWAY-PRIORITY", default)]
	pub pathway_priority: Vec<String>,

	#[serde(rename = "PATHWAY-CLONES", default)]
	pub pathway_clones: Vec<PathwayClone>,
}

/// A novel pathway made by cloning an existing one.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PathwayClone {
	#[serde(rename = "BASE-ID")]
	pub base_id: String,

	#[serde(rename = "ID")]
	pub id: String,

	#[serde(rename = "URI-REPLACEMENT")]
	pub uri_replacement: UriReplacement,
}

/// URI rewriting rules applied to a cloned pathway.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct UriReplacement {
	#[serde(rename = "HOST", default)]
	pub host: Option<String>,

	#[serde(rename = "PARAMS", default)]
	pub query_parameters: Option<HashMap<String, String>>,

	#[serde(rename = "PER-VARIANT-URIS", default)]
	pub per_variant_uris: Option<HashMap<String, String>>,

	#[serde(rename = "PER-RENDITION-URIS", default)]
	pub per_rendition_uris: Option<HashMap<String, String>>,
}

impl SteeringManifest {
	pub fn parse(body: &[u8]) -> Result<Self> {
		serde_json::from_slice(body).map_err(|err| Error::Steering(err.to_string()))
	}
}

/// One candidate location for a rendition, tagged with its pathway.
#[derive(Debug, Clone, PartialEq)]
pub struct PathwayUri {
	pub pathway: Option<String>,
	pub uri: Url,
	pub stable_variant_id: Option<String>,
}

/// Orders candidate URIs by the steering server's pathway priority.
#[derive(Debug)]
pub struct SteeringSelector {
	server_uri: Url,
	default_pathway: Option<String>,
	manifest: Option<SteeringManifest>,
	next_poll: Option<Instant>,
}

impl SteeringSelector {
	pub fn from_tag(tag: &Tag, base: &Url) -> Result<Self> {
		let server = tag.required_attr("SERVER-URI")?;
		let server_uri = base.join(server)?;

		Ok(Self {
			server_uri,
			default_pathway: tag.attr("PATHWAY-ID").map(str::to_string),
			manifest: None,
			next_poll: None,
		})
	}

	/// Fetch the steering manifest when due. Failures keep the previous
	/// ordering; steering is an optimization, not a dependency.
	pub async fn poll(&mut self, net: &RequestManager) {
		if let Some(next) = self.next_poll {
			if Instant::now() < next {
				return;
			}
		}

		let request = Request::new(RequestKind::Manifest, RequestContext::MasterPlaylist, self.server_uri.clone());
		match net.fetch(request).await {
			Ok(response) => match SteeringManifest::parse(&response.body) {
				Ok(manifest) => {
					if let Some(reload) = &manifest.reload_uri {
						match self.server_uri.join(reload) {
							Ok(uri) => self.server_uri = uri,
							Err(err) => warn!(%err, "bad steering RELOAD-URI"),
						}
					}
					self.next_poll = Some(Instant::now() + Duration::from_secs_f64(manifest.ttl_seconds.max(1.0)));
					debug!(pathways = ?manifest.pathway_priority, "steering manifest refreshed");
					self.manifest = Some(manifest);
				}
				Err(err) => warn!(%err, "ignoring unparsable steering manifest"),
			},
			Err(err) if err.is_abort() => {}
			Err(err) => warn!(%err, "steering manifest fetch failed"),
		}
	}

	/// All locations to try for a rendition, most preferred first.
	pub fn select(&self, candidates: &[PathwayUri]) -> Vec<Url> {
		let Some(manifest) = &self.manifest else {
			return self.default_order(candidates);
		};

		let mut out = Vec::new();

		for pathway in &manifest.pathway_priority {
			// A direct pathway match wins.
			if let Some(candidate) = candidates.iter().find(|c| c.pathway.as_deref() == Some(pathway)) {
				out.push(candidate.uri.clone());
				continue;
			}

			// A clone borrows the base pathway's URI and rewrites it.
			let Some(clone) = manifest.pathway_clones.iter().find(|c| &c.id == pathway) else {
				continue;
			};
			let Some(base) = candidates.iter().find(|c| c.pathway.as_deref() == Some(&clone.base_id)) else {
				continue;
			};
			if let Some(uri) = apply_replacement(base, &clone.uri_replacement) {
				out.push(uri);
			}
		}

		// Keep unmentioned candidates as a fallback tail.
		for candidate in candidates {
			if !out.contains(&candidate.uri) {
				out.push(candidate.uri.clone());
			}
		}

		out
	}

	fn default_order(&self, candidates: &[PathwayUri]) -> Vec<Url> {
		let mut out: Vec<Url> = Vec::new();

		// Without a steering manifest the tag's own pathway goes first.
		if let Some(default) = &self.default_pathway {
			for candidate in candidates.iter().filter(|c| c.pathway.as_deref() == Some(default)) {
				out.push(candidate.uri.clone());
			}
		}
		for candidate in candidates {
			if !out.contains(&candidate.uri) {
				out.push(candidate.uri.clone());
			}
		}

		out
	}
}

fn apply_replacement(base: &PathwayUri, replacement: &UriReplacement) -> Option<Url> {
	// A per-variant or per-rendition override replaces the URI outright.
	if let Some(stable_id) = &base.stable_variant_id {
		let overridden = [&replacement.per_variant_uris, &replacement.per_rendition_uris]
			.into_iter()
			.flatten()
			.find_map(|m| m.get(stable_id));

		if let Some(uri) = overridden {
			match Url::parse(uri) {
				Ok(uri) => return Some(uri),
				Err(err) => warn!(%err, "bad steering uri override"),
			}
		}
	}

	let mut uri = base.uri.clone();

	if let Some(host) = &replacement.host {
		if uri.set_host(Some(host)).is_err() {
			warn!(host, "bad steering HOST replacement");
			return None;
		}
	}

	if let Some(params) = &replacement.query_parameters {
		let mut pairs = uri.query_pairs_mut();
		for (name, value) in params {
			pairs.append_pair(name, value);
		}
		drop(pairs);
	}

	Some(uri)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::playlist::lex;

	fn selector(with_manifest: Option<&str>) -> SteeringSelector {
		let playlist = lex(concat!(
			"#EXTM3U\n",
			"#EXT-X-CONTENT-STEERING:SERVER-URI=\"https://steer.example.com/m.json\",PATHWAY-ID=\"CDN-A\"\n",
			"#EXT-X-STREAM-INF:BANDWIDTH=1\nv.m3u8\n",
		))
		.unwrap();
		let tag = playlist.tag("EXT-X-CONTENT-STEERING").unwrap();
		let base = Url::parse("https://example.com/main.m3u8").unwrap();

		let mut selector = SteeringSelector::from_tag(tag, &base).unwrap();
		if let Some(json) = with_manifest {
			selector.manifest = Some(SteeringManifest::parse(json.as_bytes()).unwrap());
		}
		selector
	}

	fn candidates() -> Vec<PathwayUri> {
		vec![
			PathwayUri {
				pathway: Some("CDN-A".to_string()),
				uri: Url::parse("https://a.example.com/v.m3u8").unwrap(),
				stable_variant_id: Some("v1".to_string()),
			},
			PathwayUri {
				pathway: Some("CDN-B".to_string()),
				uri: Url::parse("https://b.example.com/v.m3u8").unwrap(),
				stable_variant_id: None,
			},
		]
	}

	#[test]
	fn default_pathway_first_without_manifest() {
		let ordered = selector(None).select(&candidates());
		assert_eq!(ordered[0].host_str(), Some("a.example.com"));
		assert_eq!(ordered.len(), 2);
	}

	#[test]
	fn priority_reorders() {
		let json = r#"{"VERSION":1,"TTL":300,"PATHWAY-PRIORITY":["CDN-B","CDN-A"]}"#;
		let ordered = selector(Some(json)).select(&candidates());
		assert_eq!(ordered[0].host_str(), Some("b.example.com"));
		assert_eq!(ordered[1].host_str(), Some("a.example.com"));
	}

	#[test]
	fn clone_rewrites_host_and_params() {
		let json = r#"{
			"VERSION": 1,
			"TTL": 300,
			"PATHWAY-PRIORITY": ["CDN-C", "CDN-A"],
			"PATHWAY-CLONES": [{
				"BASE-ID": "CDN-A",
				"ID": "CDN-C",
				"URI-REPLACEMENT": {"HOST": "c.example.com", "PARAMS": {"token": "t1"}}
			}]
		}"#;

		let ordered = selector(Some(json)).select(&candidates());
		assert_eq!(ordered[0].host_str(), Some("c.example.com"));
		assert!(ordered[0].query().unwrap().contains("token=t1"));
	}

	#[test]
	fn per_variant_override_wins() {
		let json = r#"{
			"VERSION": 1,
			"TTL": 300,
			"PATHWAY-PRIORITY": ["CDN-C"],
			"PATHWAY-CLONES": [{
				"BASE-ID": "CDN-A",
				"ID": "CDN-C",
				"URI-REPLACEMENT": {"PER-VARIANT-URIS": {"v1": "https://override.example.com/v.m3u8"}}
			}]
		}"#;

		let ordered = selector(Some(json)).select(&candidates());
		assert_eq!(ordered[0].host_str(), Some("override.example.com"));
	}
}
