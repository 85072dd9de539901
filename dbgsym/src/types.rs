use anyhow::anyhow;
use dw2_consts::*;
use crate::Error;

/// Attribute names have a maximum value of 0x3fff.
pub type AttributeName = u16;

/// Form names have a maximum value of 0x16.
pub type FormName = u8;

/// Tag names have a maximum value of 0xffff.
pub type TagName = u16;

/// Operation names have a maximum value of 0xff.
pub type OperationName = u8;

/// Abbreviation codes are unsigned LEB128 values.
pub type AbbreviationCode = u64;

/// Type that can house all of the addresses we support.
pub type Address = u64;

/// Offset of an entry from the start of the .debug_info section.
///
/// These are unique across the whole section and are what references between
/// entries resolve to.
pub type EntryOffset = usize;

/// Shows a tag by its name, if it has one.
#[derive(Debug, Copy, Clone)]
pub struct DisplayTag(pub TagName);
impl std::fmt::Display for DisplayTag {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match tag_name(self.0) {
			Some(name) => f.write_str(name),
			None => write!(f, "tag 0x{:x}", self.0)
		}
	}
}

/// Shows an attribute by its name, if it has one.
#[derive(Debug, Copy, Clone)]
pub struct DisplayAttribute(pub AttributeName);
impl std::fmt::Display for DisplayAttribute {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match attribute_name(self.0) {
			Some(name) => f.write_str(name),
			None => write!(f, "attribute 0x{:x}", self.0)
		}
	}
}

/// The sections a reader can be reading from.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Section {
	Info,
	Abbrev,
	Str,
	Line,
}

/// Encodings an attribute value can have.
///
/// Forms we have no support for are kept around as [`Form::Unknown`], so that
/// an abbreviation using them can still be described.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Form {
	Addr,
	Block1,
	Block2,
	Block4,
	Block,
	Data1,
	Data2,
	Data4,
	Data8,
	Flag,
	Sdata,
	Udata,
	String,
	Strp,
	RefAddr,
	Ref1,
	Ref2,
	Ref4,
	Ref8,
	RefUdata,
	Indirect,
	Unknown(u64),
}
impl From<u64> for Form {
	fn from(value: u64) -> Self {
		let name = match FormName::try_from(value) {
			Ok(name) => name,
			Err(_) => return Form::Unknown(value)
		};

		match name {
			DW_FORM_addr => Form::Addr,
			DW_FORM_block1 => Form::Block1,
			DW_FORM_block2 => Form::Block2,
			DW_FORM_block4 => Form::Block4,
			DW_FORM_block => Form::Block,
			DW_FORM_data1 => Form::Data1,
			DW_FORM_data2 => Form::Data2,
			DW_FORM_data4 => Form::Data4,
			DW_FORM_data8 => Form::Data8,
			DW_FORM_flag => Form::Flag,
			DW_FORM_sdata => Form::Sdata,
			DW_FORM_udata => Form::Udata,
			DW_FORM_string => Form::String,
			DW_FORM_strp => Form::Strp,
			DW_FORM_ref_addr => Form::RefAddr,
			DW_FORM_ref1 => Form::Ref1,
			DW_FORM_ref2 => Form::Ref2,
			DW_FORM_ref4 => Form::Ref4,
			DW_FORM_ref8 => Form::Ref8,
			DW_FORM_ref_udata => Form::RefUdata,
			DW_FORM_indirect => Form::Indirect,
			_ => Form::Unknown(value),
		}
	}
}
impl Form {
	/// Whether values of this form are plain integer constants.
	///
	/// Location attributes with one of these forms hold an offset directly,
	/// rather than an expression.
	pub fn is_constant(self) -> bool {
		matches!(self,
			Form::Data1 | Form::Data2 | Form::Data4 | Form::Data8
				| Form::Udata | Form::Sdata)
	}

	/// Returns the length in bytes of values of this form, if it is static.
	///
	/// The length of address-sized forms depends on the compilation unit,
	/// so it has to be passed in.
	pub fn static_len(self, address_size: u8) -> Option<usize> {
		Some(match self {
			Form::Addr | Form::RefAddr => usize::from(address_size),
			Form::Flag | Form::Data1 | Form::Ref1 => 1,
			Form::Data2 | Form::Ref2 => 2,
			Form::Data4 | Form::Ref4 | Form::Strp => 4,
			Form::Data8 | Form::Ref8 => 8,
			_ => return None
		})
	}
}

/// Build the error for a read that ran past the end of the given section.
pub fn unexpected_eof(section: Section, position: usize, what: impl std::fmt::Display) -> Error {
	Error::in_section(section, anyhow!(
		"section data ends unexpectedly at offset 0x{:x}: {}",
		position,
		what))
}

/// Take an I/O error produced by a cursor and repackage it in case of an EOF
/// so we can signal the user the data in the section ended sooner than we
/// expected, and panic on other kinds of I/O errors.
pub fn repackage_eof(section: Section, position: usize, what: std::io::Error) -> Error {
	if let std::io::ErrorKind::UnexpectedEof = what.kind() {
		unexpected_eof(section, position, what)
	} else {
		panic!(
			"unexpected i/o error when reading from section data cursor: {}",
			what
		)
	}
}
