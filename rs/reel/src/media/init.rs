use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::model::{AesKey, InitSegmentReference};
use crate::playlist::{parse_byterange, Tag, VariableRegistry};
use crate::Result;

/// Deduplicates `EXT-X-MAP` references.
///
/// Every segment using the same map shares one [InitSegmentReference];
/// the key is the resolved URI plus the byte range attribute text.
#[derive(Debug, Default)]
pub struct InitSegmentCache {
	map: HashMap<String, Arc<InitSegmentReference>>,
}

impl InitSegmentCache {
	/// Resolve a map tag to its shared reference, creating it on first use.
	///
	/// `inherited_byterange` is the value of an `EXT-X-BYTERANGE` tag that
	/// preceded the map, which some packagers use instead of the BYTERANGE
	/// attribute. `aes_key` is the key context in effect at the tag's
	/// position.
	pub fn get_or_create(
		&mut self,
		tag: &Tag,
		base: &Url,
		vars: &VariableRegistry,
		inherited_byterange: Option<&str>,
		aes_key: Option<&AesKey>,
	) -> Result<Arc<InitSegmentReference>> {
		let uri = vars.substitute(tag.required_attr("URI")?);
		let resolved = base.join(&uri)?;

		let byterange_attr = tag
			.attr("BYTERANGE")
			.map(|v| vars.substitute(v))
			.or_else(|| inherited_byterange.map(str::to_string));

		let cache_key = format!("{resolved}-{}", byterange_attr.as_deref().unwrap_or(""));
		if let Some(existing) = self.map.get(&cache_key) {
			return Ok(existing.clone());
		}

		let (start_byte, end_byte) = match byterange_attr.as_deref() {
			Some(raw) => {
				let (mut length, offset) = parse_byterange(raw)?;
				if aes_key.is_some() {
					// The range describes the unencrypted size; the stored
					// section is padded to whole AES blocks.
					length = length.div_ceil(16) * 16;
				}
				let start = offset.unwrap_or(0);
				(start, Some(start + length - 1))
			}
			None => (0, None),
		};

		let mut reference = InitSegmentReference::new(vec![resolved], start_byte, end_byte);
		reference.aes_key = aes_key.cloned();
		reference.encrypted = aes_key.is_some();

		let reference = Arc::new(reference);
		self.map.insert(cache_key, reference.clone());
		Ok(reference)
	}

	pub fn len(&self) -> usize {
		self.map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.map.is_empty()
	}

	pub fn clear(&mut self) {
		self.map.clear();
	}
}
