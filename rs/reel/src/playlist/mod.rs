//! M3U8 playlist lexing.
//!
//! The lexer splits playlist text into tags, attribute lists, and segment
//! records, without interpreting them. Variable substitution is deferred to
//! whoever consumes an attribute, so the raw text survives until then.

mod attribute;
mod define;
mod lexer;

pub use attribute::*;
pub use define::*;
pub use lexer::*;

use crate::{Error, Result};

/// A single `#EXT*` line, split into a name, an optional value, and an
/// optional attribute list.
///
/// Ids are assigned in source order across one playlist and are used to
/// resolve positional rules like "this KEY precedes this MAP".
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
	pub id: u64,
	pub name: String,
	pub value: Option<String>,
	pub attrs: Vec<Attribute>,
}

/// One `NAME=value` entry of an attribute list, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
	pub name: String,
	pub value: String,
	/// Whether the value was a quoted string. Unquoted values are enum
	/// tokens, numbers, or resolutions.
	pub quoted: bool,
}

impl Tag {
	pub fn attr(&self, name: &str) -> Option<&str> {
		self.attrs.iter().find(|a| a.name == name).map(|a| a.value.as_str())
	}

	pub fn has_attr(&self, name: &str) -> bool {
		self.attrs.iter().any(|a| a.name == name)
	}

	/// Look up an attribute, failing with the tag and attribute name when absent.
	pub fn required_attr(&self, name: &str) -> Result<&str> {
		self.attr(name)
			.ok_or_else(|| Error::RequiredAttributeMissing(format!("{}:{}", self.name, name)))
	}

	/// `YES` means true; anything else (including absence) means false.
	pub fn bool_attr(&self, name: &str) -> bool {
		self.attr(name) == Some("YES")
	}

	pub fn f64_attr(&self, name: &str) -> Option<f64> {
		self.attr(name).and_then(|v| v.parse().ok())
	}

	pub fn u64_attr(&self, name: &str) -> Option<u64> {
		self.attr(name).and_then(|v| v.parse().ok())
	}

	/// The tag value parsed as a float, e.g. `#EXT-X-TARGETDURATION:10`.
	pub fn f64_value(&self) -> Option<f64> {
		self.value.as_deref().and_then(|v| v.parse().ok())
	}

	pub fn u64_value(&self) -> Option<u64> {
		self.value.as_deref().and_then(|v| v.parse().ok())
	}
}

/// Whether a playlist describes variants (master) or segments (media).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistKind {
	Master,
	Media,
}

/// A media segment record: the tags preceding the URI line, the URI itself,
/// and any partial-segment tags.
///
/// The URI is absent only for a trailing segment made entirely of
/// `EXT-X-PRELOAD-HINT` material.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSegment {
	pub tags: Vec<Tag>,
	pub partial_tags: Vec<Tag>,
	pub uri: Option<String>,
}

impl ParsedSegment {
	pub fn tag(&self, name: &str) -> Option<&Tag> {
		self.tags.iter().find(|t| t.name == name)
	}

	pub fn has_tag(&self, name: &str) -> bool {
		self.tags.iter().any(|t| t.name == name)
	}
}

/// The lexed form of one playlist document.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
	pub kind: PlaylistKind,
	pub tags: Vec<Tag>,
	pub segments: Vec<ParsedSegment>,
}

impl Playlist {
	pub fn tag(&self, name: &str) -> Option<&Tag> {
		self.tags.iter().find(|t| t.name == name)
	}

	pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> {
		self.tags.iter().filter(move |t| t.name == name)
	}

	pub fn has_tag(&self, name: &str) -> bool {
		self.tags.iter().any(|t| t.name == name)
	}
}
