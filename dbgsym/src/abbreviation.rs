use std::collections::HashMap;
use anyhow::anyhow;
use byteorder::ByteOrder;
use crate::Error;
use crate::leb::TargetIntegerTooNarrow;
use crate::reader::Reader;
use crate::types::{AbbreviationCode, AttributeName, Form, Section, TagName};

#[derive(Debug, Clone)]
pub struct Abbreviation {
	code: AbbreviationCode,
	tag: TagName,
	child: bool,
	attributes: Vec<AbbreviationAttribute>,
}
impl Abbreviation {
	pub fn code(&self) -> AbbreviationCode {
		self.code
	}

	pub fn tag(&self) -> TagName {
		self.tag
	}

	pub fn has_children(&self) -> bool {
		self.child
	}

	/// The attributes of entries using this abbreviation, in the order their
	/// values appear in the entry.
	pub fn attributes(&self) -> &[AbbreviationAttribute] {
		&self.attributes
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AbbreviationAttribute {
	pub name: AttributeName,
	pub form: Form,
}

/// The abbreviations used by the entries of a single compilation unit.
#[derive(Debug, Default)]
pub struct AbbreviationTable {
	index: HashMap<AbbreviationCode, Abbreviation, ahash::RandomState>,
}
impl AbbreviationTable {
	/// Parse the table starting at the given offset into the abbreviation
	/// section.
	///
	/// The table ends at the first null abbreviation code, or at the end of
	/// the section, whichever comes first.
	pub fn parse<Order>(abbrev: &[u8], offset: usize) -> Result<Self, Error>
		where Order: ByteOrder {

		if offset > abbrev.len() {
			return Err(Error::InvalidAbbreviationSection {
				source: anyhow!("table offset 0x{:x} is past the end of the \
					section (0x{:x} bytes)",
					offset,
					abbrev.len())
			})
		}

		let mut index = HashMap::default();
		let mut reader = Reader::<Order>::at(abbrev, Section::Abbrev, offset);
		while !reader.is_empty() {
			let code = reader.read_uleb128()?;
			if code == 0 { break }

			/* Make sure the tag value isn't greater than DW_TAG_hi_user. */
			let at = reader.position();
			let tag: TagName = reader.read_uleb128_raw()?
				.try_into()
				.map_err(|what: TargetIntegerTooNarrow| Error::InvalidAbbreviationSection {
					source: anyhow!("abbreviation {} has an invalid tag at \
						offset 0x{:x}: {}",
						code,
						at,
						what)
				})?;

			let child = match reader.read_u8()? {
				0 => false,
				1 => true,
				other => {
					tracing::warn!("abbreviation {} at 0x{:x} has invalid child \
						determination byte {}, assuming it has children",
						code,
						at,
						other);
					true
				}
			};

			let mut attributes = Vec::new();
			loop {
				let at = reader.position();
				let name = reader.read_uleb128_raw()?;
				let form = reader.read_uleb128_raw()?;
				if name.is_zero() && form.is_zero() { break }

				let name: AttributeName = name.try_into()
					.map_err(|what| Error::InvalidAbbreviationSection {
						source: anyhow!("abbreviation {} has an invalid \
							attribute name at offset 0x{:x}: {}",
							code,
							at,
							what)
					})?;

				attributes.push(AbbreviationAttribute {
					name,
					form: Form::from(form.value()),
				});
			}

			let previous = index.insert(code, Abbreviation {
				code,
				tag,
				child,
				attributes,
			});
			if previous.is_some() {
				tracing::warn!("abbreviation code {} is declared more than once \
					in the table at 0x{:x}, keeping the last declaration",
					code,
					offset);
			}
		}

		Ok(Self { index })
	}

	pub fn get(&self, code: AbbreviationCode) -> Option<&Abbreviation> {
		self.index.get(&code)
	}

	pub fn len(&self) -> usize {
		self.index.len()
	}
}
