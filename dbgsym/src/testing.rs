//! Writers for hand-assembled debug sections, used by the unit tests.

pub fn uleb128(mut value: u64) -> Vec<u8> {
	let mut data = Vec::new();
	loop {
		let byte = (value & 0x7f) as u8;
		value >>= 7;
		if value == 0 {
			data.push(byte);
			return data
		}
		data.push(byte | 0x80);
	}
}

pub fn sleb128(mut value: i64) -> Vec<u8> {
	let mut data = Vec::new();
	loop {
		let byte = (value & 0x7f) as u8;
		value >>= 7;
		let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
		if done {
			data.push(byte);
			return data
		}
		data.push(byte | 0x80);
	}
}

#[derive(Default)]
pub struct AbbreviationWriter {
	data: Vec<u8>,
}
impl AbbreviationWriter {
	pub fn declare(&mut self, code: u64, tag: u16, children: bool, attributes: &[(u16, u8)]) {
		self.data.extend(uleb128(code));
		self.data.extend(uleb128(u64::from(tag)));
		self.data.push(children as u8);
		for (name, form) in attributes {
			self.data.extend(uleb128(u64::from(*name)));
			self.data.extend(uleb128(u64::from(*form)));
		}
		self.data.extend([0, 0]);
	}

	pub fn finish(mut self) -> Vec<u8> {
		self.data.push(0);
		self.data
	}
}

/// Writes a single little endian compilation unit at the end of a
/// .debug_info section.
pub struct UnitWriter {
	data: Vec<u8>,
	start: usize,
	address_size: u8,
}
impl UnitWriter {
	pub fn new(address_size: u8) -> Self {
		Self::build(Vec::new(), 2, 0, address_size)
	}

	pub fn build(section: Vec<u8>, version: u16, abbrev_offset: u32, address_size: u8) -> Self {
		let start = section.len();
		let mut writer = Self {
			data: section,
			start,
			address_size,
		};
		writer.u32(0);
		writer.u16(version);
		writer.u32(abbrev_offset);
		writer.u8(address_size);
		writer
	}

	pub fn position(&self) -> usize {
		self.data.len()
	}

	pub fn entry(&mut self, code: u64) -> usize {
		let offset = self.position();
		self.uleb(code);
		offset
	}

	pub fn end_children(&mut self) {
		self.data.push(0);
	}

	pub fn bytes(&mut self, bytes: &[u8]) {
		self.data.extend_from_slice(bytes);
	}

	pub fn u8(&mut self, value: u8) {
		self.data.push(value);
	}

	pub fn u16(&mut self, value: u16) {
		self.bytes(&value.to_le_bytes());
	}

	pub fn u32(&mut self, value: u32) {
		self.bytes(&value.to_le_bytes());
	}

	pub fn addr(&mut self, value: u64) {
		let size = usize::from(self.address_size);
		self.bytes(&value.to_le_bytes()[..size]);
	}

	pub fn uleb(&mut self, value: u64) {
		self.data.extend(uleb128(value));
	}

	pub fn sleb(&mut self, value: i64) {
		self.data.extend(sleb128(value));
	}

	pub fn cstr(&mut self, value: &str) {
		self.bytes(value.as_bytes());
		self.data.push(0);
	}

	pub fn block1(&mut self, block: &[u8]) {
		self.data.push(block.len() as u8);
		self.bytes(block);
	}

	/// A unit relative reference to the entry at the given offset.
	pub fn ref4(&mut self, target: usize) {
		self.u32((target - self.start) as u32);
	}

	pub fn ref4_placeholder(&mut self) -> usize {
		let at = self.position();
		self.u32(0);
		at
	}

	pub fn patch_ref4(&mut self, at: usize, target: usize) {
		let value = ((target - self.start) as u32).to_le_bytes();
		self.data[at..at + 4].copy_from_slice(&value);
	}

	pub fn finish(mut self) -> Vec<u8> {
		let length = (self.data.len() - self.start - 4) as u32;
		self.data[self.start..self.start + 4].copy_from_slice(&length.to_le_bytes());
		self.data
	}
}

/// Writes a single little endian line program, with the standard set of
/// opcodes.
pub struct LineProgramWriter {
	min_instruction_length: u8,
	line_base: i8,
	line_range: u8,
	opcode_base: u8,
	address_size: u8,
	directories: Vec<u8>,
	files: Vec<u8>,
	program: Vec<u8>,
}
impl LineProgramWriter {
	pub fn new(address_size: u8) -> Self {
		Self {
			min_instruction_length: 1,
			line_base: -5,
			line_range: 14,
			opcode_base: 10,
			address_size,
			directories: Vec::new(),
			files: Vec::new(),
			program: Vec::new(),
		}
	}

	pub fn line_range(mut self, line_range: u8) -> Self {
		self.line_range = line_range;
		self
	}

	pub fn opcode_base(mut self, opcode_base: u8) -> Self {
		self.opcode_base = opcode_base;
		self
	}

	pub fn min_instruction_length(mut self, length: u8) -> Self {
		self.min_instruction_length = length;
		self
	}

	pub fn directory(&mut self, name: &str) {
		self.directories.extend_from_slice(name.as_bytes());
		self.directories.push(0);
	}

	pub fn file(&mut self, name: &str, directory: u64) {
		self.files.extend_from_slice(name.as_bytes());
		self.files.push(0);
		self.files.extend(uleb128(directory));
		self.files.extend([0, 0]);
	}

	/// The special opcode advancing by the given deltas.
	pub fn special(&mut self, address: u8, line: i8) {
		let opcode = (line - self.line_base) as u8 + self.line_range * address + self.opcode_base;
		self.program.push(opcode);
	}

	pub fn op(&mut self, opcode: u8, operands: &[u8]) {
		self.program.push(opcode);
		self.program.extend_from_slice(operands);
	}

	pub fn set_address(&mut self, address: u64) {
		let size = usize::from(self.address_size);
		self.program.extend([0, self.address_size + 1, 0x02]);
		self.program.extend_from_slice(&address.to_le_bytes()[..size]);
	}

	pub fn end_sequence(&mut self) {
		self.program.extend([0, 1, 0x01]);
	}

	pub fn finish(self) -> Vec<u8> {
		let mut header = vec![
			self.min_instruction_length,
			1,
			self.line_base as u8,
			self.line_range,
			self.opcode_base,
		];
		let standard = [0u8, 1, 1, 1, 1, 0, 0, 0, 1];
		for opcode in 1..self.opcode_base {
			header.push(standard.get(usize::from(opcode) - 1).copied().unwrap_or(1));
		}
		header.extend(self.directories);
		header.push(0);
		header.extend(self.files);
		header.push(0);

		let mut data = Vec::new();
		let length = 2 + 4 + header.len() + self.program.len();
		data.extend((length as u32).to_le_bytes());
		data.extend(2u16.to_le_bytes());
		data.extend((header.len() as u32).to_le_bytes());
		data.extend(header);
		data.extend(self.program);
		data
	}
}
