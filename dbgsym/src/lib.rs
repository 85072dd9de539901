//! Decoder for DWARF 2 debug information.
//!
//! Given the `.debug_info`, `.debug_abbrev`, `.debug_str` and `.debug_line`
//! sections of a module, this crate rebuilds the compilation units, types,
//! functions, global variables and line tables they describe into a
//! [`SymbolTable`].

/* DWARF has a bunch of these, so no point in having Rust warn us of them. */
#![allow(non_upper_case_globals)]

use std::marker::PhantomData;
use std::ops::Range;
use byteorder::ByteOrder;
use crate::cu::UnitHeader;
use crate::types::Section;

mod leb;
mod reader;
mod types;
mod abbreviation;
mod die;
mod attribute;
mod location;
mod register;
mod symbol;
mod builder;
mod line;
mod cu;

#[cfg(test)]
mod testing;

pub use byteorder;
pub use location::{Location, Storage};
pub use symbol::*;
pub use types::{Address, AttributeName, EntryOffset, TagName};

/// The DWARF sections a decode session reads from.
///
/// All four are borrowed for the whole session. The line section may be
/// empty, in which case no line information gets decoded.
#[derive(Debug, Copy, Clone)]
pub struct DwarfSections<'a> {
	/// The .debug_info section.
	pub info: &'a [u8],
	/// The .debug_abbrev section.
	pub abbrev: &'a [u8],
	/// The .debug_str section.
	pub str: &'a [u8],
	/// The .debug_line section.
	pub line: &'a [u8],
}

/// Information about the module the sections were loaded from.
#[derive(Debug, Clone, Default)]
pub struct ModuleInfo {
	/// Address the module is loaded at. Every address found in the debug
	/// information is relative to it.
	pub base_address: Address,
	/// Compiler-generated thunk areas. Functions starting inside one of these
	/// do not get a symbol.
	pub thunks: Vec<ThunkArea>,
}
impl ModuleInfo {
	/// Whether the given absolute address falls in one of the thunk areas.
	pub fn in_thunk_area(&self, address: Address) -> Option<&ThunkArea> {
		self.thunks.iter().find(|thunk| thunk.range.contains(&address))
	}
}

/// A named range of addresses occupied by compiler-generated thunks.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ThunkArea {
	pub name: String,
	pub range: Range<Address>,
}

/// Source of synthetic names for entries that carry no `DW_AT_name`.
///
/// Names are of the form `<prefix>_<n>`, where `n` is shared by all prefixes
/// and strictly increases for the lifetime of a decode session.
#[derive(Debug, Default)]
pub struct NameSynthesizer {
	next: u64,
}
impl NameSynthesizer {
	pub fn synthesize(&mut self, prefix: &str) -> String {
		let name = format!("{}_{}", prefix, self.next);
		self.next += 1;
		name
	}
}

/// Outcome of decoding a single compilation unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UnitOutcome {
	/// Offset of the unit header in the .debug_info section.
	pub offset: usize,
	/// Whether the unit was recognized and its symbols were committed.
	pub processed: bool,
}

/// Summary of a decode session.
#[derive(Debug, Clone, Default)]
pub struct ParseSummary {
	pub units: Vec<UnitOutcome>,
}
impl ParseSummary {
	/// Number of units that were recognized and processed.
	pub fn processed(&self) -> usize {
		self.units.iter().filter(|unit| unit.processed).count()
	}
}

/// A DWARF 2 decode session over a set of sections.
pub struct Dwarf<'a, Order: ByteOrder> {
	sections: DwarfSections<'a>,
	module: ModuleInfo,
	names: NameSynthesizer,
	_bind: PhantomData<Order>,
}
impl<'a, Order> Dwarf<'a, Order>
	where Order: ByteOrder {

	pub fn new(sections: DwarfSections<'a>, module: ModuleInfo) -> Self {
		Self {
			sections,
			module,
			names: NameSynthesizer::default(),
			_bind: Default::default(),
		}
	}

	/// Decode every compilation unit in the .debug_info section into the
	/// given symbol table.
	///
	/// A unit that cannot be decoded is skipped in its entirety, and the
	/// symbols committed by the units before it are kept. The header of the
	/// next unit is always found through the length declared by the current
	/// one, whether or not its contents were understood.
	pub fn parse(&mut self, symbols: &mut SymbolTable) -> ParseSummary {
		let timer = std::time::Instant::now();
		let info = self.sections.info;
		let mut summary = ParseSummary::default();

		let mut offset = 0usize;
		while offset < info.len() {
			let header = match UnitHeader::parse::<Order>(info, offset) {
				Ok(header) => header,
				Err(what) => {
					tracing::warn!("stopping at unit header 0x{:08x}: {}", offset, what);
					break
				}
			};

			let processed = match cu::parse_compilation_unit::<Order>(
				&self.sections,
				&header,
				&self.module,
				&mut self.names,
				symbols
			) {
				Ok(()) => true,
				Err(what) => {
					tracing::warn!("skipping compilation unit at 0x{:08x}: {}",
						offset,
						what);
					false
				}
			};
			summary.units.push(UnitOutcome { offset, processed });

			offset = header.next_offset();
		}

		symbols.set_capabilities(Capabilities {
			line_numbers: true,
			global_symbols: true,
			type_info: true,
			source_indexed: true,
		});

		tracing::info!("decoded {} of {} compilation units in {:?}",
			summary.processed(),
			summary.units.len(),
			timer.elapsed());

		summary
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid .debug_abbrev section: {source}")]
	InvalidAbbreviationSection {
		source: anyhow::Error
	},
	#[error("invalid .debug_info section: {source}")]
	InvalidInfoSection {
		source: anyhow::Error
	},
	#[error("invalid .debug_str section: {source}")]
	InvalidStringsSection {
		source: anyhow::Error
	},
	#[error("invalid .debug_line section: {source}")]
	InvalidLineSection {
		source: anyhow::Error
	},
	#[error("DWARF version {version} is not supported, only version 2 is")]
	UnsupportedVersion {
		version: u16
	},
	#[error("root entry has tag 0x{tag:04x}, expected DW_TAG_compile_unit")]
	UnexpectedRootTag {
		tag: TagName
	},
}
impl Error {
	/// Wrap a failure in the error variant for the given section.
	pub(crate) fn in_section(section: Section, source: anyhow::Error) -> Self {
		match section {
			Section::Info => Error::InvalidInfoSection { source },
			Section::Abbrev => Error::InvalidAbbreviationSection { source },
			Section::Str => Error::InvalidStringsSection { source },
			Section::Line => Error::InvalidLineSection { source },
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn synthesized_names_are_never_reused() {
		let mut names = NameSynthesizer::default();
		assert_eq!(names.synthesize("udt"), "udt_0");
		assert_eq!(names.synthesize("enum"), "enum_1");
		assert_eq!(names.synthesize("udt"), "udt_2");
	}

	#[test]
	fn thunk_areas() {
		let module = ModuleInfo {
			base_address: 0x400000,
			thunks: vec![ThunkArea {
				name: "plt".into(),
				range: 0x401000..0x401040,
			}],
		};
		assert_eq!(module.in_thunk_area(0x401000).map(|thunk| thunk.name.as_str()), Some("plt"));
		assert!(module.in_thunk_area(0x40103f).is_some());
		assert!(module.in_thunk_area(0x401040).is_none());
		assert!(module.in_thunk_area(0x400fff).is_none());
	}
}
