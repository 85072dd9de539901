use std::ffi::CStr;
use std::io::Cursor;
use std::marker::PhantomData;
use anyhow::anyhow;
use byteorder::{ByteOrder, ReadBytesExt};
use crate::Error;
use crate::leb::{ILeb128, ULeb128};
use crate::types::{repackage_eof, unexpected_eof, Section};

/// Cursor over the data of one of the DWARF sections.
///
/// Every read advances the position by exactly the number of bytes it
/// consumed. Reads are bounds checked against the end of the data the reader
/// was created with, and running off of it is reported as an error in the
/// section the data came from.
#[derive(Debug, Clone)]
pub struct Reader<'a, Order> {
	cursor: Cursor<&'a [u8]>,
	section: Section,
	_bind: PhantomData<Order>,
}
impl<'a, Order> Reader<'a, Order>
	where Order: ByteOrder {

	pub fn new(data: &'a [u8], section: Section) -> Self {
		Self::at(data, section, 0)
	}

	pub fn at(data: &'a [u8], section: Section, position: usize) -> Self {
		let mut cursor = Cursor::new(data);
		cursor.set_position(position as u64);

		Self {
			cursor,
			section,
			_bind: Default::default(),
		}
	}

	pub fn position(&self) -> usize {
		self.cursor.position() as usize
	}

	pub fn set_position(&mut self, position: usize) {
		self.cursor.set_position(position as u64)
	}

	/// All of the data this reader was created over, regardless of position.
	pub fn data(&self) -> &'a [u8] {
		self.cursor.get_ref()
	}

	pub fn remaining(&self) -> usize {
		self.data().len().saturating_sub(self.position())
	}

	pub fn is_empty(&self) -> bool {
		self.remaining() == 0
	}

	pub fn read_u8(&mut self) -> Result<u8, Error> {
		let (section, position) = (self.section, self.position());
		self.cursor.read_u8().map_err(|what| repackage_eof(section, position, what))
	}

	pub fn read_i8(&mut self) -> Result<i8, Error> {
		let (section, position) = (self.section, self.position());
		self.cursor.read_i8().map_err(|what| repackage_eof(section, position, what))
	}

	pub fn read_u16(&mut self) -> Result<u16, Error> {
		let (section, position) = (self.section, self.position());
		self.cursor.read_u16::<Order>().map_err(|what| repackage_eof(section, position, what))
	}

	pub fn read_u32(&mut self) -> Result<u32, Error> {
		let (section, position) = (self.section, self.position());
		self.cursor.read_u32::<Order>().map_err(|what| repackage_eof(section, position, what))
	}

	pub fn read_u64(&mut self) -> Result<u64, Error> {
		let (section, position) = (self.section, self.position());
		self.cursor.read_u64::<Order>().map_err(|what| repackage_eof(section, position, what))
	}

	/// Read a fixed width unsigned integer of 1, 2, 4 or 8 bytes.
	pub fn read_fixed(&mut self, width: usize) -> Result<u64, Error> {
		Ok(match width {
			1 => u64::from(self.read_u8()?),
			2 => u64::from(self.read_u16()?),
			4 => u64::from(self.read_u32()?),
			8 => self.read_u64()?,
			_ => return Err(Error::in_section(self.section, anyhow!(
				"invalid fixed integer width {} at offset 0x{:x}",
				width,
				self.position())))
		})
	}

	/// Read a raw target address, as wide as the given word size.
	pub fn read_address(&mut self, word_size: u8) -> Result<u64, Error> {
		if !(1..=8).contains(&word_size) {
			return Err(Error::in_section(self.section, anyhow!(
				"unsupported address size {} at offset 0x{:x}",
				word_size,
				self.position())))
		}

		let (section, position) = (self.section, self.position());
		self.cursor
			.read_uint::<Order>(usize::from(word_size))
			.map_err(|what| repackage_eof(section, position, what))
	}

	fn uleb128(&self) -> Result<ULeb128<'a>, Error> {
		ULeb128::new(self.data(), self.position())
			.map_err(|what| unexpected_eof(self.section, self.position(), what))
	}

	pub fn read_uleb128(&mut self) -> Result<u64, Error> {
		let value = self.uleb128()?;
		self.set_position(self.position() + value.len());

		Ok(value.value())
	}

	/// Read an unsigned LEB128 value, without converting it.
	pub fn read_uleb128_raw(&mut self) -> Result<ULeb128<'a>, Error> {
		let value = self.uleb128()?;
		self.set_position(self.position() + value.len());

		Ok(value)
	}

	pub fn read_sleb128(&mut self) -> Result<i64, Error> {
		let value = ILeb128::new(self.data(), self.position())
			.map_err(|what| unexpected_eof(self.section, self.position(), what))?;
		self.set_position(self.position() + value.len());

		Ok(value.value())
	}

	/// Number of bytes the LEB128 value at the current position spans.
	///
	/// The position is left untouched.
	pub fn peek_uleb128_len(&self) -> Result<usize, Error> {
		self.uleb128().map(|value| value.len())
	}

	/// Read a NUL terminated string, consuming the terminator.
	pub fn read_cstr(&mut self) -> Result<&'a CStr, Error> {
		let data = self.data().get(self.position()..).unwrap_or_default();
		let string = CStr::from_bytes_until_nul(data)
			.map_err(|what| unexpected_eof(self.section, self.position(), what))?;
		self.set_position(self.position() + string.to_bytes_with_nul().len());

		Ok(string)
	}

	/// Borrow the next `len` bytes and move past them.
	pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], Error> {
		let start = self.position();
		let bytes = start.checked_add(len)
			.and_then(|end| self.data().get(start..end))
			.ok_or_else(|| unexpected_eof(self.section, start, format!(
				"needed {} bytes, only {} remain",
				len,
				self.remaining())))?;
		self.set_position(start + len);

		Ok(bytes)
	}

	pub fn skip(&mut self, len: usize) -> Result<(), Error> {
		self.read_bytes(len).map(|_| ())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use byteorder::LittleEndian;

	type LeReader<'a> = Reader<'a, LittleEndian>;

	#[test]
	fn reads_advance_by_their_width() {
		let data = [
			0x01,
			0x02, 0x03,
			0x04, 0x05, 0x06, 0x07,
			0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
		];
		let mut reader = LeReader::new(&data, Section::Info);

		assert_eq!(reader.read_fixed(1).unwrap(), 0x01);
		assert_eq!(reader.position(), 1);
		assert_eq!(reader.read_fixed(2).unwrap(), 0x0302);
		assert_eq!(reader.position(), 3);
		assert_eq!(reader.read_fixed(4).unwrap(), 0x07060504);
		assert_eq!(reader.position(), 7);
		assert_eq!(reader.read_fixed(8).unwrap(), 0x0f0e0d0c0b0a0908);
		assert!(reader.is_empty());
		assert!(reader.read_u8().is_err());
	}

	#[test]
	fn addresses_follow_the_word_size() {
		let data = [0x00, 0x10, 0x00, 0x00, 0x78, 0x56, 0x34, 0x12];
		let mut reader = LeReader::new(&data, Section::Info);

		assert_eq!(reader.read_address(4).unwrap(), 0x1000);
		assert_eq!(reader.read_address(4).unwrap(), 0x12345678);

		let mut reader = LeReader::new(&data, Section::Info);
		assert_eq!(reader.read_address(8).unwrap(), 0x1234567800001000);
		assert!(reader.read_address(0).is_err());
		assert!(reader.read_address(9).is_err());
	}

	#[test]
	fn peeking_does_not_consume() {
		let data = [0xe5, 0x8e, 0x26, 0x7f];
		let mut reader = LeReader::new(&data, Section::Line);

		assert_eq!(reader.peek_uleb128_len().unwrap(), 3);
		assert_eq!(reader.position(), 0);
		assert_eq!(reader.read_uleb128().unwrap(), 624485);
		assert_eq!(reader.position(), 3);
		assert_eq!(reader.read_sleb128().unwrap(), -1);
		assert!(reader.is_empty());
	}

	#[test]
	fn strings_consume_their_terminator() {
		let data = b"main.c\0/usr/src\0x";
		let mut reader = LeReader::new(data, Section::Str);

		assert_eq!(reader.read_cstr().unwrap().to_bytes(), b"main.c");
		assert_eq!(reader.position(), 7);
		assert_eq!(reader.read_cstr().unwrap().to_bytes(), b"/usr/src");
		assert!(matches!(
			reader.read_cstr(),
			Err(Error::InvalidStringsSection { .. })));
	}

	#[test]
	fn blocks_are_borrowed() {
		let data = [0x03, 0xaa, 0xbb, 0xcc, 0xdd];
		let mut reader = LeReader::at(&data, Section::Info, 1);

		let block = reader.read_bytes(3).unwrap();
		assert_eq!(block, &data[1..4]);
		assert_eq!(reader.remaining(), 1);
		assert!(matches!(
			reader.read_bytes(2),
			Err(Error::InvalidInfoSection { .. })));
		assert_eq!(reader.position(), 4);
	}
}
