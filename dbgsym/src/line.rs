use anyhow::anyhow;
use byteorder::ByteOrder;
use dw2_consts::*;
use crate::Error;
use crate::reader::Reader;
use crate::symbol::{SourceId, SymbolTable};
use crate::types::{Address, Section};

/// Header of the line number program of a compilation unit.
#[derive(Debug, Clone)]
pub struct LineProgramHeader {
	pub version: u16,
	pub min_instruction_length: u8,
	pub default_is_stmt: bool,
	pub line_base: i8,
	pub line_range: u8,
	pub opcode_base: u8,
	/// Number of operands of each standard opcode, starting with opcode 1.
	pub standard_opcode_lengths: Vec<u8>,
	/// Offset of the first instruction in the .debug_line section.
	pub program: usize,
	/// Offset of the end of the program in the .debug_line section.
	pub end: usize,
}
impl LineProgramHeader {
	fn parse<Order>(reader: &mut Reader<Order>) -> Result<Self, Error>
		where Order: ByteOrder {

		let start = reader.position();
		let unit_length = reader.read_u32()? as usize;
		let declared_end = start.saturating_add(4).saturating_add(unit_length);
		let end = declared_end.min(reader.data().len());
		if end < declared_end {
			tracing::warn!("line program at 0x{:x} ends at 0x{:x}, past the end \
				of the section",
				start,
				declared_end);
		}

		let version = reader.read_u16()?;
		let header_length = reader.read_u32()? as usize;
		let program = reader.position().saturating_add(header_length);

		let min_instruction_length = reader.read_u8()?;
		let default_is_stmt = reader.read_u8()? != 0;
		let line_base = reader.read_i8()?;
		let line_range = reader.read_u8()?;
		let opcode_base = reader.read_u8()?;
		if line_range == 0 {
			return Err(Error::InvalidLineSection {
				source: anyhow!("line program at 0x{:x} has a line range of zero", start)
			})
		}
		if opcode_base == 0 {
			return Err(Error::InvalidLineSection {
				source: anyhow!("line program at 0x{:x} has an opcode base of zero", start)
			})
		}

		let standard_opcode_lengths = reader.read_bytes(usize::from(opcode_base) - 1)?.to_vec();

		Ok(Self {
			version,
			min_instruction_length,
			default_is_stmt,
			line_base,
			line_range,
			opcode_base,
			standard_opcode_lengths,
			program,
			end,
		})
	}

	/// Address advance of the given special opcode, or of what would be
	/// special opcode 255 for `DW_LNS_const_add_pc`.
	fn address_advance(&self, opcode: u8) -> u64 {
		let delta = opcode.wrapping_sub(self.opcode_base);
		u64::from(delta / self.line_range) * u64::from(self.min_instruction_length)
	}

	fn line_advance(&self, opcode: u8) -> i64 {
		let delta = opcode.wrapping_sub(self.opcode_base);
		i64::from(self.line_base) + i64::from(delta % self.line_range)
	}
}

/// An instruction of a line number program.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LineInstruction {
	Special(u8),
	Copy,
	AdvancePc(u64),
	AdvanceLine(i64),
	SetFile(u64),
	SetColumn(u64),
	NegateStmt,
	SetBasicBlock,
	ConstAddPc,
	FixedAdvancePc(u16),
	/// A standard opcode we don't know, with its operands skipped over.
	UnknownStandard(u8),
	EndSequence,
	SetAddress(u64),
	DefineFile,
	/// An extended opcode we don't know, with its operands skipped over.
	UnknownExtended(u8),
}
impl LineInstruction {
	fn read<Order>(
		reader: &mut Reader<Order>,
		header: &LineProgramHeader,
		address_size: u8
	) -> Result<Self, Error>
		where Order: ByteOrder {

		let opcode = reader.read_u8()?;
		if opcode >= header.opcode_base {
			return Ok(LineInstruction::Special(opcode))
		}

		Ok(match opcode {
			DW_LNS_extended_op => return Self::read_extended(reader, address_size),
			DW_LNS_copy => LineInstruction::Copy,
			DW_LNS_advance_pc => LineInstruction::AdvancePc(reader.read_uleb128()?),
			DW_LNS_advance_line => LineInstruction::AdvanceLine(reader.read_sleb128()?),
			DW_LNS_set_file => LineInstruction::SetFile(reader.read_uleb128()?),
			DW_LNS_set_column => LineInstruction::SetColumn(reader.read_uleb128()?),
			DW_LNS_negate_stmt => LineInstruction::NegateStmt,
			DW_LNS_set_basic_block => LineInstruction::SetBasicBlock,
			DW_LNS_const_add_pc => LineInstruction::ConstAddPc,
			DW_LNS_fixed_advance_pc => LineInstruction::FixedAdvancePc(reader.read_u16()?),
			other => {
				let operands = header.standard_opcode_lengths
					.get(usize::from(other) - 1)
					.copied()
					.unwrap_or(0);
				for _ in 0..operands {
					reader.read_uleb128()?;
				}
				LineInstruction::UnknownStandard(other)
			}
		})
	}

	fn read_extended<Order>(reader: &mut Reader<Order>, address_size: u8) -> Result<Self, Error>
		where Order: ByteOrder {

		let length = reader.read_uleb128()?;
		if length == 0 {
			return Ok(LineInstruction::UnknownExtended(0))
		}

		let opcode = reader.read_u8()?;
		Ok(match opcode {
			DW_LNE_end_sequence => LineInstruction::EndSequence,
			DW_LNE_set_address => LineInstruction::SetAddress(reader.read_address(address_size)?),
			DW_LNE_define_file => {
				let name = reader.read_cstr()?;
				let directory = reader.read_uleb128()?;
				reader.read_uleb128()?;
				reader.read_uleb128()?;
				tracing::debug!("not handling definition of file {:?} in directory {}",
					name,
					directory);
				LineInstruction::DefineFile
			},
			other => {
				let operands = usize::try_from(length - 1).unwrap_or(usize::MAX);
				reader.skip(operands)?;
				LineInstruction::UnknownExtended(other)
			}
		})
	}
}

/// The registers of the line number state machine.
#[derive(Debug, Copy, Clone)]
struct LineState {
	address: Address,
	file: u64,
	line: u64,
	is_stmt: bool,
	basic_block: bool,
}
impl LineState {
	fn new(header: &LineProgramHeader) -> Self {
		Self {
			address: 0,
			file: 1,
			line: 1,
			is_stmt: header.default_is_stmt,
			basic_block: false,
		}
	}
}

/// Runs the line number program at the given offset of the .debug_line
/// section, attaching the lines it produces to the functions covering them.
///
/// Returns the number of lines that were attached. Rows repeating a line a
/// function already holds are not counted.
pub fn parse_line_program<Order>(
	line: &[u8],
	offset: usize,
	comp_dir: Option<&str>,
	address_size: u8,
	base_address: Address,
	symbols: &mut SymbolTable,
) -> Result<usize, Error>
	where Order: ByteOrder {

	if offset >= line.len() {
		return Err(Error::InvalidLineSection {
			source: anyhow!("line program offset 0x{:x} is past the end of the section",
				offset)
		})
	}

	let mut reader = Reader::<Order>::at(line, Section::Line, offset);
	let header = LineProgramHeader::parse(&mut reader)?;
	tracing::trace!("line program at 0x{:x}: {:?}", offset, header);
	if header.version != 2 {
		tracing::warn!("line program at 0x{:x} has version {}, decoding it as \
			version 2",
			offset,
			header.version);
	}

	/* The zeroth directory is the one the unit was compiled in. */
	let mut directories = vec![comp_dir.unwrap_or(".").to_owned()];
	loop {
		let directory = reader.read_cstr()?.to_string_lossy();
		if directory.is_empty() {
			break
		}
		let directory = match comp_dir {
			Some(comp_dir) if !directory.starts_with('/') => {
				format!("{}/{}", comp_dir.trim_end_matches('/'), directory)
			},
			_ => directory.into_owned()
		};
		tracing::trace!("include directory {}", directory);
		directories.push(directory);
	}

	let mut files = Vec::<SourceId>::new();
	loop {
		let name = reader.read_cstr()?.to_string_lossy();
		if name.is_empty() {
			break
		}
		let directory = reader.read_uleb128()?;
		reader.read_uleb128()?;
		reader.read_uleb128()?;

		let directory = usize::try_from(directory).ok()
			.and_then(|index| directories.get(index));
		if directory.is_none() {
			tracing::warn!("file {} is in a directory that was not declared", name);
		}
		files.push(symbols.source_new(directory.map(String::as_str), &name));
	}

	if reader.position() != header.program {
		tracing::debug!("line program at 0x{:x} starts at 0x{:x}, file table \
			ends at 0x{:x}",
			offset,
			header.program,
			reader.position());
	}

	let program = line.get(..header.end).unwrap_or(line);
	let mut reader = Reader::<Order>::at(program, Section::Line, header.program);
	let mut machine = LineMachine {
		header: &header,
		files: &files,
		base_address,
		symbols,
		attached: 0,
	};
	while !reader.is_empty() {
		machine.sequence(&mut reader, address_size)?;
	}

	Ok(machine.attached)
}

struct LineMachine<'h, 's> {
	header: &'h LineProgramHeader,
	files: &'h [SourceId],
	base_address: Address,
	symbols: &'s mut SymbolTable,
	attached: usize,
}
impl<'h, 's> LineMachine<'h, 's> {
	/// Run a single sequence, up to and including its end.
	fn sequence<Order>(&mut self, reader: &mut Reader<Order>, address_size: u8) -> Result<(), Error>
		where Order: ByteOrder {

		let header = self.header;
		let mut state = LineState::new(header);
		loop {
			match LineInstruction::read(reader, header, address_size)? {
				LineInstruction::Special(opcode) => {
					state.address = state.address.wrapping_add(header.address_advance(opcode));
					state.line = state.line.wrapping_add_signed(header.line_advance(opcode));
					self.emit(&state);
					state.basic_block = false;
				},
				LineInstruction::Copy => {
					self.emit(&state);
					state.basic_block = false;
				},
				LineInstruction::AdvancePc(advance) => {
					let advance = advance.wrapping_mul(u64::from(header.min_instruction_length));
					state.address = state.address.wrapping_add(advance);
				},
				LineInstruction::AdvanceLine(advance) =>
					state.line = state.line.wrapping_add_signed(advance),
				LineInstruction::SetFile(file) => state.file = file,
				LineInstruction::SetColumn(_) => {},
				LineInstruction::NegateStmt => state.is_stmt = !state.is_stmt,
				LineInstruction::SetBasicBlock => state.basic_block = true,
				LineInstruction::ConstAddPc =>
					state.address = state.address.wrapping_add(header.address_advance(255)),
				LineInstruction::FixedAdvancePc(advance) =>
					state.address = state.address.wrapping_add(u64::from(advance)),
				LineInstruction::EndSequence => {
					self.emit(&state);
					return Ok(())
				},
				LineInstruction::SetAddress(address) =>
					state.address = self.base_address.wrapping_add(address),
				LineInstruction::DefineFile => {},
				LineInstruction::UnknownStandard(opcode) =>
					tracing::debug!("skipped unknown standard opcode {}", opcode),
				LineInstruction::UnknownExtended(opcode) =>
					tracing::warn!("skipped unknown extended opcode {}", opcode),
			}
		}
	}

	fn emit(&mut self, state: &LineState) {
		let source = usize::try_from(state.file).ok()
			.and_then(|file| file.checked_sub(1))
			.and_then(|index| self.files.get(index));
		let source = match source {
			Some(source) => *source,
			None => {
				tracing::debug!("dropping line {} at 0x{:x}, file {} is not declared",
					state.line,
					state.address,
					state.file);
				return
			}
		};

		tracing::trace!("line {} at 0x{:x}, statement {}, basic block {}",
			state.line,
			state.address,
			state.is_stmt,
			state.basic_block);
		if self.symbols.add_line(source, state.line, state.address) {
			self.attached += 1;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use byteorder::LittleEndian;
	use crate::symbol::CallingConvention;
	use crate::testing::LineProgramWriter;

	fn table_with_function(address: Address, length: u64) -> (SymbolTable, crate::SymbolId) {
		let mut table = SymbolTable::new();
		let signature = table.new_signature(None, CallingConvention::FarC);
		let function = table.new_function(None, "main".into(), address, length, signature);
		(table, function)
	}

	fn lines(table: &SymbolTable, function: crate::SymbolId) -> Vec<(String, u64, u64)> {
		table.function(function).unwrap()
			.lines
			.iter()
			.map(|fact| (table.source(fact.source).unwrap().to_owned(), fact.line, fact.offset))
			.collect()
	}

	#[test]
	fn special_opcodes_advance_and_emit() {
		let (mut table, main) = table_with_function(0x402000, 0x10);

		let mut writer = LineProgramWriter::new(4);
		writer.file("main.c", 0);
		writer.set_address(0x2000);
		writer.op(DW_LNS_copy, &[]);
		writer.special(4, 1);
		writer.end_sequence();
		let data = writer.finish();

		let attached = parse_line_program::<LittleEndian>(
			&data, 0, Some("/src"), 4, 0x400000, &mut table).unwrap();
		assert_eq!(attached, 2);
		assert_eq!(lines(&table, main), vec![
			("/src/main.c".to_owned(), 1, 0),
			("/src/main.c".to_owned(), 2, 4),
		]);
	}

	#[test]
	fn lines_without_a_function_are_dropped() {
		let mut table = SymbolTable::new();

		let mut writer = LineProgramWriter::new(4);
		writer.file("main.c", 0);
		writer.set_address(0x2000);
		writer.special(4, 1);
		writer.end_sequence();
		let data = writer.finish();

		let attached = parse_line_program::<LittleEndian>(
			&data, 0, None, 4, 0, &mut table).unwrap();
		assert_eq!(attached, 0);
		assert_eq!(table.sources().count(), 1);
	}

	#[test]
	fn standard_opcodes() {
		let (mut table, main) = table_with_function(0x1000, 0x100);

		let mut writer = LineProgramWriter::new(4).min_instruction_length(2);
		writer.directory("include");
		writer.directory("/usr/include");
		writer.file("main.c", 0);
		writer.file("list.h", 1);
		writer.file("stdio.h", 2);
		writer.set_address(0x1000);
		/* 0x1000 + 3 * 2, line 1 + 9 */
		writer.op(DW_LNS_advance_pc, &[3]);
		writer.op(DW_LNS_advance_line, &[9]);
		writer.op(DW_LNS_set_column, &[4]);
		writer.op(DW_LNS_negate_stmt, &[]);
		writer.op(DW_LNS_set_basic_block, &[]);
		writer.op(DW_LNS_copy, &[]);
		/* (255 - 10) / 14 * 2 = 34 */
		writer.op(DW_LNS_const_add_pc, &[]);
		writer.op(DW_LNS_set_file, &[2]);
		writer.op(DW_LNS_advance_line, &[0x7e]);
		writer.op(DW_LNS_copy, &[]);
		/* Not scaled by the instruction length. */
		writer.op(DW_LNS_fixed_advance_pc, &[0x03, 0x00]);
		writer.op(DW_LNS_set_file, &[3]);
		writer.op(DW_LNS_copy, &[]);
		writer.end_sequence();
		let data = writer.finish();

		parse_line_program::<LittleEndian>(&data, 0, Some("/src/"), 4, 0, &mut table).unwrap();
		assert_eq!(lines(&table, main), vec![
			("/src/main.c".to_owned(), 10, 0x6),
			("/src/include/list.h".to_owned(), 8, 0x28),
			("/usr/include/stdio.h".to_owned(), 8, 0x2b),
		]);
	}

	#[test]
	fn undeclared_files_are_dropped() {
		let (mut table, main) = table_with_function(0x1000, 0x100);

		let mut writer = LineProgramWriter::new(4);
		writer.file("main.c", 0);
		writer.set_address(0x1000);
		writer.op(DW_LNS_set_file, &[0]);
		writer.op(DW_LNS_copy, &[]);
		writer.op(DW_LNS_set_file, &[2]);
		writer.op(DW_LNS_copy, &[]);
		writer.op(DW_LNS_set_file, &[1]);
		writer.special(1, 0);
		writer.end_sequence();
		let data = writer.finish();

		let attached = parse_line_program::<LittleEndian>(
			&data, 0, None, 4, 0, &mut table).unwrap();
		assert_eq!(attached, 1);
		assert_eq!(lines(&table, main), vec![("./main.c".to_owned(), 1, 1)]);
	}

	#[test]
	fn unknown_opcodes_are_skipped() {
		let (mut table, main) = table_with_function(0x1000, 0x100);

		/* Opcode 10 is standard here, with a single operand. */
		let mut writer = LineProgramWriter::new(4).opcode_base(13);
		writer.file("main.c", 0);
		writer.set_address(0x1000);
		writer.op(10, &[0x80, 0x01]);
		writer.op(0, &[3, 0x80, 0xaa, 0xbb]);
		writer.op(0, &[6, DW_LNE_define_file, b'x', 0, 0, 0, 0]);
		writer.special(2, 3);
		writer.end_sequence();
		let data = writer.finish();

		parse_line_program::<LittleEndian>(&data, 0, Some("/src"), 4, 0, &mut table).unwrap();
		assert_eq!(lines(&table, main), vec![("/src/main.c".to_owned(), 4, 2)]);
	}

	#[test]
	fn sequences_restart_the_state_machine() {
		let (mut table, main) = table_with_function(0x1000, 0x100);

		let mut writer = LineProgramWriter::new(4);
		writer.file("main.c", 0);
		writer.set_address(0x1010);
		writer.op(DW_LNS_advance_line, &[4]);
		writer.op(DW_LNS_copy, &[]);
		writer.end_sequence();
		writer.set_address(0x1000);
		writer.op(DW_LNS_copy, &[]);
		writer.end_sequence();
		let data = writer.finish();

		parse_line_program::<LittleEndian>(&data, 0, Some("/src"), 4, 0, &mut table).unwrap();
		assert_eq!(lines(&table, main), vec![
			("/src/main.c".to_owned(), 1, 0x0),
			("/src/main.c".to_owned(), 5, 0x10),
		]);
	}

	#[test]
	fn malformed_programs() {
		let mut table = SymbolTable::new();

		let mut writer = LineProgramWriter::new(4).line_range(0);
		writer.file("main.c", 0);
		writer.end_sequence();
		let data = writer.finish();
		let result = parse_line_program::<LittleEndian>(&data, 0, None, 4, 0, &mut table);
		assert!(matches!(result, Err(Error::InvalidLineSection { .. })));

		let result = parse_line_program::<LittleEndian>(&data, data.len(), None, 4, 0, &mut table);
		assert!(matches!(result, Err(Error::InvalidLineSection { .. })));

		/* A sequence cut short by the end of the program. */
		let mut writer = LineProgramWriter::new(4);
		writer.file("main.c", 0);
		writer.set_address(0x1000);
		let data = writer.finish();
		let result = parse_line_program::<LittleEndian>(&data, 0, None, 4, 0, &mut table);
		assert!(matches!(result, Err(Error::InvalidLineSection { .. })));
	}
}
