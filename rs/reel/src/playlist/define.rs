use std::collections::HashMap;

use tracing::warn;
use url::Url;

use super::Playlist;

/// Variables declared by `EXT-X-DEFINE`, scoped to one playlist.
///
/// Three forms are recognized: an inline NAME/VALUE pair, a QUERYPARAM read
/// from the playlist URI, and an IMPORT from the enclosing master scope.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
	vars: HashMap<String, String>,
}

impl VariableRegistry {
	/// Collect `EXT-X-DEFINE` declarations in source order.
	///
	/// `parent` is the master-scope registry when this playlist is a media
	/// playlist; IMPORT reads from it.
	pub fn from_playlist(playlist: &Playlist, uri: &Url, parent: Option<&VariableRegistry>) -> Self {
		let mut vars = HashMap::new();

		for tag in playlist.tags_named("EXT-X-DEFINE") {
			if let (Some(name), Some(value)) = (tag.attr("NAME"), tag.attr("VALUE")) {
				vars.insert(name.to_string(), value.to_string());
			} else if let Some(param) = tag.attr("QUERYPARAM") {
				match uri.query_pairs().find(|(k, _)| k == param) {
					Some((_, value)) => {
						vars.insert(param.to_string(), value.into_owned());
					}
					None => warn!(param, "EXT-X-DEFINE query parameter not found in playlist uri"),
				}
			} else if let Some(name) = tag.attr("IMPORT") {
				match parent.and_then(|p| p.vars.get(name)) {
					Some(value) => {
						vars.insert(name.to_string(), value.clone());
					}
					None => warn!(name, "EXT-X-DEFINE import not found in master scope"),
				}
			}
		}

		Self { vars }
	}

	pub fn is_empty(&self) -> bool {
		self.vars.is_empty()
	}

	/// Expand `{$NAME}` references. Unknown variables expand to the empty
	/// string with a warning.
	pub fn substitute(&self, input: &str) -> String {
		if self.vars.is_empty() || !input.contains("{$") {
			return input.to_string();
		}

		let mut out = String::with_capacity(input.len());
		let mut rest = input;

		while let Some(start) = rest.find("{$") {
			out.push_str(&rest[..start]);
			let after = &rest[start + 2..];

			match after.find('}') {
				Some(end) => {
					let name = &after[..end];
					match self.vars.get(name) {
						Some(value) => out.push_str(value),
						None => warn!(name, "undefined playlist variable"),
					}
					rest = &after[end + 1..];
				}
				None => {
					// Unterminated reference; emit the rest verbatim.
					out.push_str(&rest[start..]);
					rest = "";
				}
			}
		}

		out.push_str(rest);
		out
	}
}
