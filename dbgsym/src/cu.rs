use std::ops::Range;
use anyhow::anyhow;
use byteorder::ByteOrder;
use crate::{DwarfSections, Error, ModuleInfo, NameSynthesizer};
use crate::abbreviation::AbbreviationTable;
use crate::attribute::UnitContext;
use crate::builder::SymbolBuilder;
use crate::die::DieTree;
use crate::line;
use crate::reader::Reader;
use crate::symbol::SymbolTable;
use crate::types::Section;

/// Size of a compilation unit header, length included.
const HEADER_SIZE: usize = 11;

/// Header of a compilation unit in the .debug_info section.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UnitHeader {
	/// Offset of the header in the .debug_info section.
	pub offset: usize,
	/// Length of the unit, not counting the length field itself.
	pub length: u32,
	pub version: u16,
	pub abbrev_offset: u32,
	pub address_size: u8,
}
impl UnitHeader {
	pub fn parse<Order>(info: &[u8], offset: usize) -> Result<Self, Error>
		where Order: ByteOrder {

		let mut reader = Reader::<Order>::at(info, Section::Info, offset);
		let length = reader.read_u32()?;
		if length == u32::MAX {
			return Err(Error::InvalidInfoSection {
				source: anyhow!("unit at 0x{:x} uses the 64-bit format", offset)
			})
		}

		Ok(Self {
			offset,
			length,
			version: reader.read_u16()?,
			abbrev_offset: reader.read_u32()?,
			address_size: reader.read_u8()?,
		})
	}

	/// Offset of the header of the unit following this one.
	pub fn next_offset(&self) -> usize {
		self.offset
			.saturating_add(4)
			.saturating_add(self.length as usize)
	}

	/// Range of the .debug_info section holding the entries of this unit.
	fn entries(&self, info_len: usize) -> Range<usize> {
		let start = self.offset.saturating_add(HEADER_SIZE);
		let end = self.next_offset();
		if end > info_len {
			tracing::warn!("unit at 0x{:x} ends at 0x{:x}, past the end of the section",
				self.offset,
				end);
		}
		start..end.min(info_len)
	}
}

/// Decode a single compilation unit into the symbol table.
///
/// Errors are returned before any symbol gets built, so a unit that fails
/// leaves the table untouched. Problems with the line number program of a
/// unit are logged, and do not fail it.
pub fn parse_compilation_unit<Order>(
	sections: &DwarfSections,
	header: &UnitHeader,
	module: &ModuleInfo,
	names: &mut NameSynthesizer,
	symbols: &mut SymbolTable,
) -> Result<(), Error>
	where Order: ByteOrder {

	tracing::debug!("compilation unit at 0x{:08x}: {:?}", header.offset, header);
	if header.version != 2 {
		return Err(Error::UnsupportedVersion { version: header.version })
	}

	let abbreviations = AbbreviationTable::parse::<Order>(
		sections.abbrev,
		header.abbrev_offset as usize)?;
	let context = UnitContext::<Order>::new(
		sections.info,
		sections.str,
		header.offset,
		header.address_size);
	let tree = DieTree::parse(&context, header.entries(sections.info.len()), &abbreviations)?;
	tracing::trace!("unit at 0x{:08x} has {} entries using {} abbreviations",
		header.offset,
		tree.len(),
		abbreviations.len());

	let root = SymbolBuilder::new(&context, &tree, module, names, symbols).build_unit()?;

	if let Some(offset) = root.stmt_list {
		if sections.line.is_empty() {
			tracing::debug!("no line numbers for unit at 0x{:08x}, section is stripped",
				header.offset);
			return Ok(())
		}

		match line::parse_line_program::<Order>(
			sections.line,
			offset as usize,
			root.comp_dir.as_deref(),
			header.address_size,
			module.base_address,
			symbols
		) {
			Ok(attached) => tracing::debug!("attached {} lines for compiland {:?} of \
				unit at 0x{:08x}",
				attached,
				root.compiland,
				header.offset),
			Err(what) => tracing::warn!("line numbers of unit at 0x{:08x} are \
				incomplete: {}",
				header.offset,
				what)
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use byteorder::LittleEndian;
	use dw2_consts::*;
	use crate::symbol::Symbol;
	use crate::testing::{AbbreviationWriter, UnitWriter};

	fn sections<'a>(info: &'a [u8], abbrev: &'a [u8]) -> DwarfSections<'a> {
		DwarfSections {
			info,
			abbrev,
			str: &[],
			line: &[],
		}
	}

	#[test]
	fn headers() {
		let mut unit = UnitWriter::build(vec![0xaa; 3], 2, 0x20, 8);
		unit.u8(0);
		let info = unit.finish();

		let header = UnitHeader::parse::<LittleEndian>(&info, 3).unwrap();
		assert_eq!(header, UnitHeader {
			offset: 3,
			length: 8,
			version: 2,
			abbrev_offset: 0x20,
			address_size: 8,
		});
		assert_eq!(header.next_offset(), info.len());
		assert_eq!(header.entries(info.len()), 14..15);
		assert_eq!(header.entries(14), 14..14);

		assert!(UnitHeader::parse::<LittleEndian>(&info, 10).is_err());
		assert!(UnitHeader::parse::<LittleEndian>(&[0xff; 11], 0).is_err());
	}

	#[test]
	fn units_are_built_from_their_root() {
		let mut abbrev = AbbreviationWriter::default();
		abbrev.declare(1, DW_TAG_compile_unit, true, &[
			(DW_AT_name, DW_FORM_string),
			(DW_AT_comp_dir, DW_FORM_string),
		]);
		abbrev.declare(2, DW_TAG_base_type, false, &[(DW_AT_name, DW_FORM_string)]);
		let abbrev = abbrev.finish();

		let mut unit = UnitWriter::new(4);
		unit.entry(1);
		unit.cstr("main.c");
		unit.cstr("/src");
		unit.entry(2);
		unit.cstr("int");
		unit.end_children();
		let info = unit.finish();

		let header = UnitHeader::parse::<LittleEndian>(&info, 0).unwrap();
		let mut symbols = SymbolTable::new();
		parse_compilation_unit::<LittleEndian>(
			&sections(&info, &abbrev),
			&header,
			&ModuleInfo::default(),
			&mut NameSynthesizer::default(),
			&mut symbols).unwrap();

		let kinds = symbols.iter()
			.map(|(_, symbol)| symbol.kind_name())
			.collect::<Vec<_>>();
		assert_eq!(kinds, vec!["compiland", "base type"]);
		match symbols.iter().next() {
			Some((_, Symbol::Compiland(compiland))) =>
				assert_eq!(symbols.source(compiland.source), Some("/src/main.c")),
			other => panic!("expected a compiland, got {:?}", other)
		};
	}

	#[test]
	fn failing_units_build_nothing() {
		let mut abbrev = AbbreviationWriter::default();
		abbrev.declare(1, DW_TAG_base_type, false, &[(DW_AT_name, DW_FORM_string)]);
		let abbrev = abbrev.finish();

		let mut unit = UnitWriter::new(4);
		unit.entry(1);
		unit.cstr("int");
		let info = unit.finish();

		let mut symbols = SymbolTable::new();
		let header = UnitHeader::parse::<LittleEndian>(&info, 0).unwrap();
		let result = parse_compilation_unit::<LittleEndian>(
			&sections(&info, &abbrev),
			&header,
			&ModuleInfo::default(),
			&mut NameSynthesizer::default(),
			&mut symbols);
		assert!(matches!(result, Err(Error::UnexpectedRootTag { tag: DW_TAG_base_type })));

		let mut unit = UnitWriter::build(Vec::new(), 3, 0, 4);
		unit.entry(1);
		unit.cstr("int");
		let info = unit.finish();

		let header = UnitHeader::parse::<LittleEndian>(&info, 0).unwrap();
		let result = parse_compilation_unit::<LittleEndian>(
			&sections(&info, &abbrev),
			&header,
			&ModuleInfo::default(),
			&mut NameSynthesizer::default(),
			&mut symbols);
		assert!(matches!(result, Err(Error::UnsupportedVersion { version: 3 })));
		assert!(symbols.is_empty());
	}
}
