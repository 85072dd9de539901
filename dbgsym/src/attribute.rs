use std::borrow::Cow;
use std::ffi::CStr;
use std::marker::PhantomData;
use byteorder::ByteOrder;
use crate::Error;
use crate::die::Die;
use crate::reader::Reader;
use crate::types::{AttributeName, DisplayAttribute, EntryOffset, Form, Section};

/// Everything needed to interpret the raw attribute values of the entries in
/// a compilation unit.
#[derive(Debug, Copy, Clone)]
pub struct UnitContext<'a, Order> {
	/// The whole .debug_info section. Raw attribute offsets index into it.
	info: &'a [u8],
	/// The whole .debug_str section.
	strings: &'a [u8],
	/// Offset of the unit header, added to unit-relative references.
	base: EntryOffset,
	/// Size of a target address, in bytes.
	address_size: u8,
	_bind: PhantomData<Order>,
}
impl<'a, Order> UnitContext<'a, Order>
	where Order: ByteOrder {

	pub fn new(
		info: &'a [u8],
		strings: &'a [u8],
		base: EntryOffset,
		address_size: u8
	) -> Self {
		Self {
			info,
			strings,
			base,
			address_size,
			_bind: Default::default(),
		}
	}

	pub fn info(&self) -> &'a [u8] {
		self.info
	}

	pub fn base(&self) -> EntryOffset {
		self.base
	}

	pub fn address_size(&self) -> u8 {
		self.address_size
	}

	/// Find and decode the attribute with the given name in an entry.
	///
	/// Attributes that are missing, and attributes whose values cannot be
	/// decoded, are both reported as `None`. The latter are logged.
	pub fn attribute(&self, die: &Die, name: AttributeName) -> Option<Attribute<'a>> {
		match self.read_attribute(die, name) {
			Ok(attribute) => attribute,
			Err(what) => {
				tracing::warn!("could not decode {} of entry 0x{:x}: {}",
					DisplayAttribute(name),
					die.offset(),
					what);
				None
			}
		}
	}

	/// Find and decode the attribute with the given name in an entry.
	pub fn read_attribute(
		&self,
		die: &Die,
		name: AttributeName
	) -> Result<Option<Attribute<'a>>, Error> {
		let found = die.abbreviation()
			.attributes()
			.iter()
			.zip(die.attribute_offsets())
			.find(|(attribute, _)| attribute.name == name);
		let (declared, offset) = match found {
			Some(found) => found,
			None => return Ok(None)
		};

		let mut reader = Reader::<Order>::at(self.info, Section::Info, *offset);
		let (form, value) = self.read_value(&mut reader, declared.form)?;

		Ok(value.map(|value| Attribute {
			name,
			form,
			value,
		}))
	}

	/// Decode a value of the given form at the current position of the
	/// reader, returning the form the value was actually encoded with.
	///
	/// Forms we cannot represent decode as `None`, after having been skipped
	/// over as best as we can.
	pub fn read_value(
		&self,
		reader: &mut Reader<'a, Order>,
		form: Form
	) -> Result<(Form, Option<AttributeValue<'a>>), Error> {
		let value = match form {
			Form::Addr => AttributeValue::Address(reader.read_address(self.address_size)?),
			Form::Flag | Form::Data1 | Form::Data2 | Form::Data4 => {
				let width = form.static_len(self.address_size).unwrap_or(0);
				AttributeValue::Unsigned(reader.read_fixed(width)?)
			},
			Form::Udata => AttributeValue::Unsigned(reader.read_uleb128()?),
			Form::Sdata => AttributeValue::Signed(reader.read_sleb128()?),
			Form::String => AttributeValue::String(reader.read_cstr()?),
			Form::Strp => {
				let offset = reader.read_u32()? as usize;
				match self.string_at(offset) {
					Some(string) => AttributeValue::String(string),
					None => {
						tracing::warn!("string offset 0x{:x} at 0x{:x} does \
							not point to a string",
							offset,
							reader.position() - 4);
						return Ok((form, None))
					}
				}
			},
			Form::RefAddr => {
				let target = reader.read_address(self.address_size)?;
				AttributeValue::Reference(widen(target))
			},
			Form::Ref1 | Form::Ref2 | Form::Ref4 => {
				let width = form.static_len(self.address_size).unwrap_or(0);
				self.reference(reader.read_fixed(width)?)
			},
			Form::RefUdata => self.reference(reader.read_uleb128()?),
			Form::Block1 => {
				let len = usize::from(reader.read_u8()?);
				AttributeValue::Block(reader.read_bytes(len)?)
			},
			Form::Block2 => {
				let len = usize::from(reader.read_u16()?);
				AttributeValue::Block(reader.read_bytes(len)?)
			},
			Form::Block4 => {
				let len = reader.read_u32()? as usize;
				AttributeValue::Block(reader.read_bytes(len)?)
			},
			Form::Block => {
				let len = widen(reader.read_uleb128()?);
				AttributeValue::Block(reader.read_bytes(len)?)
			},
			Form::Data8 | Form::Ref8 => {
				tracing::warn!("64-bit values are not supported, ignoring \
					{:?} value at 0x{:x}",
					form,
					reader.position());
				reader.skip(8)?;
				return Ok((form, None))
			},
			Form::Indirect => {
				let actual = self.indirect_form(reader)?;
				return self.read_value(reader, actual)
			},
			Form::Unknown(name) => {
				tracing::warn!("unhandled attribute form 0x{:x} at 0x{:x}",
					name,
					reader.position());
				return Ok((form, None))
			}
		};

		Ok((form, Some(value)))
	}

	/// Move the reader past a value of the given form, without decoding it.
	pub fn skip_value(
		&self,
		reader: &mut Reader<'a, Order>,
		form: Form
	) -> Result<(), Error> {
		if let Some(len) = form.static_len(self.address_size) {
			return reader.skip(len)
		}

		match form {
			Form::Udata | Form::Sdata | Form::RefUdata => {
				let len = reader.peek_uleb128_len()?;
				reader.skip(len)
			},
			Form::String => reader.read_cstr().map(|_| ()),
			Form::Block1 => {
				let len = usize::from(reader.read_u8()?);
				reader.skip(len)
			},
			Form::Block2 => {
				let len = usize::from(reader.read_u16()?);
				reader.skip(len)
			},
			Form::Block4 => {
				let len = reader.read_u32()? as usize;
				reader.skip(len)
			},
			Form::Block => {
				let len = widen(reader.read_uleb128()?);
				reader.skip(len)
			},
			Form::Indirect => {
				let actual = self.indirect_form(reader)?;
				self.skip_value(reader, actual)
			},
			_ => {
				/* We have no idea how long this value is, so we guess it is
				 * empty and hope for the best. */
				tracing::warn!("cannot skip value of unhandled form {:?} at \
					0x{:x}",
					form,
					reader.position());
				Ok(())
			}
		}
	}

	/// Read the form of an indirect value. Indirect forms may name further
	/// indirect forms, all of which are read here.
	fn indirect_form(&self, reader: &mut Reader<'a, Order>) -> Result<Form, Error> {
		loop {
			let form = Form::from(reader.read_uleb128()?);
			if form != Form::Indirect {
				return Ok(form)
			}
		}
	}

	fn reference(&self, offset: u64) -> AttributeValue<'a> {
		AttributeValue::Reference(self.base.saturating_add(widen(offset)))
	}

	fn string_at(&self, offset: usize) -> Option<&'a CStr> {
		Reader::<Order>::at(self.strings, Section::Str, offset)
			.read_cstr()
			.ok()
	}
}

fn widen(value: u64) -> usize {
	usize::try_from(value).unwrap_or(usize::MAX)
}

/// A decoded attribute of an entry.
///
/// These are cheap to produce and only ever borrow from the section data, so
/// they are decoded anew every time somebody asks for them.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Attribute<'a> {
	pub name: AttributeName,
	/// The form the value was encoded with, with indirection resolved.
	pub form: Form,
	pub value: AttributeValue<'a>,
}
impl<'a> Attribute<'a> {
	/// The value as an unsigned integer, if it is any kind of integer.
	pub fn as_unsigned(&self) -> Option<u64> {
		match self.value {
			AttributeValue::Unsigned(value) | AttributeValue::Address(value) => Some(value),
			AttributeValue::Signed(value) => Some(value as u64),
			AttributeValue::Reference(value) => Some(value as u64),
			_ => None
		}
	}

	/// The value as a signed integer, if it is any kind of integer.
	pub fn as_signed(&self) -> Option<i64> {
		self.as_unsigned().map(|value| match self.value {
			AttributeValue::Signed(value) => value,
			_ => value as i64
		})
	}

	pub fn as_reference(&self) -> Option<EntryOffset> {
		match self.value {
			AttributeValue::Reference(target) => Some(target),
			_ => None
		}
	}

	pub fn as_str(&self) -> Option<Cow<'a, str>> {
		match self.value {
			AttributeValue::String(string) => Some(string.to_string_lossy()),
			_ => None
		}
	}

	pub fn as_block(&self) -> Option<&'a [u8]> {
		match self.value {
			AttributeValue::Block(block) => Some(block),
			_ => None
		}
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AttributeValue<'a> {
	Unsigned(u64),
	Signed(i64),
	Address(u64),
	/// Offset of the referenced entry in the .debug_info section.
	Reference(EntryOffset),
	String(&'a CStr),
	/// Bytes of an inline block, borrowed from the section.
	Block(&'a [u8]),
}
