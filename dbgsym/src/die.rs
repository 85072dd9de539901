use std::cell::Cell;
use std::collections::HashMap;
use std::ops::Range;
use anyhow::anyhow;
use byteorder::ByteOrder;
use smallvec::SmallVec;
use dw2_consts::*;
use crate::Error;
use crate::abbreviation::{Abbreviation, AbbreviationTable};
use crate::attribute::{AttributeValue, UnitContext};
use crate::reader::Reader;
use crate::symbol::SymbolId;
use crate::types::{EntryOffset, Section, TagName};

/// State of the symbol built out of an entry.
///
/// An entry goes through the states in order, and never back.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SymbolSlot {
	/// Nobody asked for the symbol of this entry yet.
	Unresolved,
	/// The symbol of this entry is being built. Entries reached while in this
	/// state get the identifier of the symbol that will be built, if it is
	/// already known, and nothing otherwise.
	Pending(Option<SymbolId>),
	/// The symbol of this entry has been built. Entries that produce no
	/// symbol hold `None`.
	Resolved(Option<SymbolId>),
}

/// A debugging information entry.
#[derive(Debug)]
pub struct Die<'t> {
	/// Offset of this entry in the .debug_info section.
	offset: EntryOffset,
	abbreviation: &'t Abbreviation,
	/// Offsets in the .debug_info section of the raw values of the attributes
	/// of this entry, in the same order as in the abbreviation.
	attributes: SmallVec<[usize; 8]>,
	children: Vec<EntryOffset>,
	symbol: Cell<SymbolSlot>,
}
impl<'t> Die<'t> {
	pub fn offset(&self) -> EntryOffset {
		self.offset
	}

	pub fn tag(&self) -> TagName {
		self.abbreviation.tag()
	}

	pub fn abbreviation(&self) -> &'t Abbreviation {
		self.abbreviation
	}

	pub fn attribute_offsets(&self) -> &[usize] {
		&self.attributes
	}

	pub fn has_children(&self) -> bool {
		self.abbreviation.has_children()
	}

	pub fn children(&self) -> &[EntryOffset] {
		&self.children
	}

	pub fn slot(&self) -> SymbolSlot {
		self.symbol.get()
	}

	pub fn set_slot(&self, slot: SymbolSlot) {
		self.symbol.set(slot)
	}
}

/// The entries of a compilation unit, indexed by their offset.
#[derive(Debug)]
pub struct DieTree<'t> {
	entries: HashMap<EntryOffset, Die<'t>, ahash::RandomState>,
	root: EntryOffset,
}
impl<'t> DieTree<'t> {
	/// Read the tree of entries found in the given range of the .debug_info
	/// section, using the given abbreviations.
	pub fn parse<'a, Order>(
		context: &UnitContext<'a, Order>,
		range: Range<usize>,
		abbreviations: &'t AbbreviationTable,
	) -> Result<Self, Error>
		where Order: ByteOrder {

		let mut builder = TreeBuilder {
			context,
			reader: Reader::at(context.info(), Section::Info, range.start),
			end: range.end.min(context.info().len()),
			abbreviations,
			entries: HashMap::default(),
		};

		let root = match builder.entry()? {
			Some(root) => root,
			None => return Err(Error::InvalidInfoSection {
				source: anyhow!("compilation unit at 0x{:x} has no root entry",
					context.base())
			})
		};

		Ok(Self {
			entries: builder.entries,
			root,
		})
	}

	pub fn root(&self) -> EntryOffset {
		self.root
	}

	pub fn get(&self, offset: EntryOffset) -> Option<&Die<'t>> {
		self.entries.get(&offset)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}
}

struct TreeBuilder<'a, 'c, 't, Order> {
	context: &'c UnitContext<'a, Order>,
	reader: Reader<'a, Order>,
	end: usize,
	abbreviations: &'t AbbreviationTable,
	entries: HashMap<EntryOffset, Die<'t>, ahash::RandomState>,
}
impl<'a, 'c, 't, Order> TreeBuilder<'a, 'c, 't, Order>
	where Order: ByteOrder {

	/// Read the entry at the current position, along with all of its
	/// children, returning `None` for a null entry.
	fn entry(&mut self) -> Result<Option<EntryOffset>, Error> {
		let offset = self.reader.position();
		if offset >= self.end {
			return Ok(None)
		}

		let code = self.reader.read_uleb128()?;
		if code == 0 {
			return Ok(None)
		}

		let abbreviation = self.abbreviations.get(code)
			.ok_or_else(|| Error::InvalidInfoSection {
				source: anyhow!("entry at 0x{:x} uses abbreviation code {}, \
					which is not in the table of its unit",
					offset,
					code)
			})?;

		#[cfg(feature = "trace-entries")]
		tracing::trace!("entry 0x{:x}: code {}, tag 0x{:x}",
			offset,
			code,
			abbreviation.tag());

		let mut attributes = SmallVec::new();
		let mut sibling = None;
		for attribute in abbreviation.attributes() {
			let at = self.reader.position();
			attributes.push(at);

			if attribute.name == DW_AT_sibling {
				let (_, value) = self.context.read_value(&mut self.reader, attribute.form)?;
				if let Some(AttributeValue::Reference(target)) = value {
					sibling = Some(target);
				}
			} else {
				self.context.skip_value(&mut self.reader, attribute.form)?;
			}
		}

		let mut children = Vec::new();
		if abbreviation.has_children() {
			while let Some(child) = self.entry()? {
				children.push(child);
			}
		}

		/* Jump to the declared sibling if we're not already there. */
		if let Some(target) = sibling {
			let position = self.reader.position();
			if target > position {
				tracing::warn!("setting cursor for entry 0x{:x} to its next \
					sibling at 0x{:x}, from 0x{:x}",
					offset,
					target,
					position);
				self.reader.set_position(target.min(self.end));
			} else if target < position {
				tracing::warn!("entry 0x{:x} declares a sibling at 0x{:x}, \
					behind the cursor at 0x{:x}, ignoring it",
					offset,
					target,
					position);
			}
		}

		self.entries.insert(offset, Die {
			offset,
			abbreviation,
			attributes,
			children,
			symbol: Cell::new(SymbolSlot::Unresolved),
		});
		Ok(Some(offset))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use byteorder::LittleEndian;
	use crate::testing::{AbbreviationWriter, UnitWriter};

	fn abbreviations() -> AbbreviationTable {
		let mut writer = AbbreviationWriter::default();
		writer.declare(1, DW_TAG_compile_unit, true, &[(DW_AT_name, DW_FORM_string)]);
		writer.declare(2, DW_TAG_base_type, false, &[
			(DW_AT_byte_size, DW_FORM_data1),
			(DW_AT_encoding, DW_FORM_data1),
		]);
		writer.declare(3, DW_TAG_structure_type, true, &[
			(DW_AT_sibling, DW_FORM_ref4),
			(DW_AT_name, DW_FORM_string),
		]);
		writer.declare(4, DW_TAG_member, false, &[(DW_AT_type, DW_FORM_ref4)]);
		AbbreviationTable::parse::<LittleEndian>(&writer.finish(), 0).unwrap()
	}

	#[test]
	fn entries_are_indexed_by_offset() {
		let table = abbreviations();

		let mut unit = UnitWriter::new(4);
		let root = unit.entry(1);
		unit.cstr("a.c");
		let int = unit.entry(2);
		unit.u8(4);
		unit.u8(DW_ATE_signed);
		let point = unit.entry(3);
		let sibling = unit.ref4_placeholder();
		unit.cstr("point");
		let x = unit.entry(4);
		unit.ref4(int);
		let y = unit.entry(4);
		unit.ref4(int);
		unit.end_children();
		unit.patch_ref4(sibling, unit.position());
		unit.end_children();
		let info = unit.finish();

		let context = UnitContext::<LittleEndian>::new(&info, &[], 0, 4);
		let tree = DieTree::parse(&context, 11..info.len(), &table).unwrap();

		assert_eq!(tree.root(), root);
		assert_eq!(tree.len(), 5);
		assert_eq!(tree.get(root).unwrap().children(), &[int, point]);
		assert_eq!(tree.get(point).unwrap().children(), &[x, y]);
		assert!(tree.get(x).unwrap().children().is_empty());
		assert_eq!(tree.get(int).unwrap().tag(), DW_TAG_base_type);
		assert_eq!(tree.get(int).unwrap().attribute_offsets(), &[int + 1, int + 2]);
		assert_eq!(tree.get(y).unwrap().slot(), SymbolSlot::Unresolved);
		assert!(tree.get(int + 1).is_none());
	}

	#[test]
	fn siblings_skip_ahead() {
		let table = abbreviations();

		/* The structure declares a sibling past a chunk of padding that
		 * would otherwise be read as more children of the unit. */
		let mut unit = UnitWriter::new(4);
		let root = unit.entry(1);
		unit.cstr("a.c");
		let point = unit.entry(3);
		let sibling = unit.ref4_placeholder();
		unit.cstr("point");
		unit.end_children();
		unit.bytes(&[0x7f, 0x7f]);
		unit.patch_ref4(sibling, unit.position());
		let int = unit.entry(2);
		unit.u8(4);
		unit.u8(DW_ATE_signed);
		unit.end_children();
		let info = unit.finish();

		let context = UnitContext::<LittleEndian>::new(&info, &[], 0, 4);
		let tree = DieTree::parse(&context, 11..info.len(), &table).unwrap();
		assert_eq!(tree.get(root).unwrap().children(), &[point, int]);
	}

	#[test]
	fn unknown_codes_abort_the_unit() {
		let table = abbreviations();

		let mut unit = UnitWriter::new(4);
		unit.entry(1);
		unit.cstr("a.c");
		unit.entry(9);
		unit.end_children();
		let info = unit.finish();

		let context = UnitContext::<LittleEndian>::new(&info, &[], 0, 4);
		let result = DieTree::parse(&context, 11..info.len(), &table);
		assert!(matches!(result, Err(Error::InvalidInfoSection { .. })));
	}

	#[test]
	fn children_stop_at_the_end_of_the_unit() {
		let table = abbreviations();

		let mut unit = UnitWriter::new(4);
		let root = unit.entry(1);
		unit.cstr("a.c");
		let int = unit.entry(2);
		unit.u8(4);
		unit.u8(DW_ATE_signed);
		let info = unit.finish();

		let context = UnitContext::<LittleEndian>::new(&info, &[], 0, 4);
		let tree = DieTree::parse(&context, 11..info.len(), &table).unwrap();
		assert_eq!(tree.get(root).unwrap().children(), &[int]);

		let empty = UnitContext::<LittleEndian>::new(&info, &[], 0, 4);
		let result = DieTree::parse(&empty, 11..11, &table);
		assert!(matches!(result, Err(Error::InvalidInfoSection { .. })));
	}

	#[test]
	fn attributes_decode_the_same_every_time() {
		let table = abbreviations();

		let mut unit = UnitWriter::new(4);
		unit.entry(1);
		unit.cstr("a.c");
		let int = unit.entry(2);
		unit.u8(4);
		unit.u8(DW_ATE_signed);
		unit.end_children();
		let info = unit.finish();

		let context = UnitContext::<LittleEndian>::new(&info, &[], 0, 4);
		let tree = DieTree::parse(&context, 11..info.len(), &table).unwrap();
		let int = tree.get(int).unwrap();

		let size = context.attribute(int, DW_AT_byte_size);
		let encoding = context.attribute(int, DW_AT_encoding);
		assert_eq!(size.and_then(|size| size.as_unsigned()), Some(4));
		assert_eq!(context.attribute(int, DW_AT_byte_size), size);
		assert_eq!(context.attribute(int, DW_AT_encoding), encoding);
		assert_eq!(context.attribute(int, DW_AT_byte_size), size);
		assert!(context.attribute(int, DW_AT_name).is_none());
	}
}
