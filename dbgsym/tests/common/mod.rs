//! Little endian section assembly for the decode tests.

#![allow(dead_code)]

/// A growable section, with chainable writers.
#[derive(Default)]
pub struct Bytes(pub Vec<u8>);
impl Bytes {
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn u8(&mut self, value: u8) -> &mut Self {
		self.0.push(value);
		self
	}

	pub fn u16(&mut self, value: u16) -> &mut Self {
		self.0.extend(value.to_le_bytes());
		self
	}

	pub fn u32(&mut self, value: u32) -> &mut Self {
		self.0.extend(value.to_le_bytes());
		self
	}

	pub fn uleb(&mut self, mut value: u64) -> &mut Self {
		loop {
			let byte = (value & 0x7f) as u8;
			value >>= 7;
			if value == 0 {
				self.0.push(byte);
				return self
			}
			self.0.push(byte | 0x80);
		}
	}

	pub fn cstr(&mut self, value: &str) -> &mut Self {
		self.0.extend(value.as_bytes());
		self.0.push(0);
		self
	}

	pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
		self.0.extend_from_slice(bytes);
		self
	}

	pub fn patch_u32(&mut self, at: usize, value: u32) {
		self.0[at..at + 4].copy_from_slice(&value.to_le_bytes());
	}
}

/// Declare an abbreviation.
pub fn declare(abbrev: &mut Bytes, code: u64, tag: u16, children: bool, attributes: &[(u16, u8)]) {
	abbrev.uleb(code).uleb(u64::from(tag)).u8(children as u8);
	for (name, form) in attributes {
		abbrev.uleb(u64::from(*name)).uleb(u64::from(*form));
	}
	abbrev.u8(0).u8(0);
}

/// Write the header of a unit with a 4 byte address size, returning the
/// offset of the unit. Its length is filled in by [`end_unit`].
pub fn begin_unit(info: &mut Bytes, version: u16, abbrev_offset: u32) -> usize {
	let offset = info.len();
	info.u32(0).u16(version).u32(abbrev_offset).u8(4);
	offset
}

pub fn end_unit(info: &mut Bytes, offset: usize) {
	let length = (info.len() - offset - 4) as u32;
	info.patch_u32(offset, length);
}

/// A line program with the usual header values, a single file in the
/// compilation directory and the given instructions.
pub fn line_program(file: &str, program: &[u8]) -> Vec<u8> {
	let mut header = Bytes::default();
	header.u8(1).u8(1).u8(0xfb).u8(14).u8(10);
	header.raw(&[0, 1, 1, 1, 1, 0, 0, 0, 1]);
	header.u8(0);
	header.cstr(file).uleb(0).uleb(0).uleb(0);
	header.u8(0);

	let mut line = Bytes::default();
	line.u32((2 + 4 + header.len() + program.len()) as u32)
		.u16(2)
		.u32(header.len() as u32)
		.raw(&header.0)
		.raw(program);
	line.0
}
