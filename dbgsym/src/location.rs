use byteorder::ByteOrder;
use smallvec::SmallVec;
use dw2_consts::*;
use crate::Error;
use crate::attribute::Attribute;
use crate::reader::Reader;
use crate::types::{DisplayAttribute, OperationName, Section};

/// Where the value described by a location lives.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Storage {
	/// The offset is an address, or a plain constant.
	NoRegister,
	/// The value is in, or relative to, the given DWARF register.
	Register(u16),
	/// The value is relative to the frame base of the enclosing function.
	FrameBase,
}

/// The result of evaluating a location description.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Location {
	pub storage: Storage,
	/// Whether the storage holds the address of the value, rather than the
	/// value itself.
	pub deref: bool,
	pub offset: i64,
}
impl Location {
	pub fn constant(offset: i64) -> Self {
		Self {
			storage: Storage::NoRegister,
			deref: false,
			offset,
		}
	}
}

/// The operations of a location expression we know how to evaluate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Operation {
	Addr(u64),
	Const1u(u8),
	Const1s(i8),
	Const2u(u16),
	Const2s(i16),
	Const4u(u32),
	Const4s(i32),
	Constu(u64),
	Consts(i64),
	PlusUconst(u64),
	/// The value is in the given register.
	Reg(u8),
	/// The value is at the given offset from the address in the register.
	Breg(u8, i64),
	/// The value is at the given offset from the frame base.
	Fbreg(i64),
	/// Only part of the value, of the given size, is described.
	Piece(u64),
	/// Anything else. Evaluation cannot go past these, as we don't know the
	/// size of their operands.
	Unsupported(OperationName),
}
impl Operation {
	pub fn read<Order>(reader: &mut Reader<Order>, address_size: u8) -> Result<Self, Error>
		where Order: ByteOrder {

		let op = reader.read_u8()?;
		Ok(match op {
			DW_OP_addr => Operation::Addr(reader.read_address(address_size)?),
			DW_OP_const1u => Operation::Const1u(reader.read_u8()?),
			DW_OP_const1s => Operation::Const1s(reader.read_i8()?),
			DW_OP_const2u => Operation::Const2u(reader.read_u16()?),
			DW_OP_const2s => Operation::Const2s(reader.read_u16()? as i16),
			DW_OP_const4u => Operation::Const4u(reader.read_u32()?),
			DW_OP_const4s => Operation::Const4s(reader.read_u32()? as i32),
			DW_OP_constu => Operation::Constu(reader.read_uleb128()?),
			DW_OP_consts => Operation::Consts(reader.read_sleb128()?),
			DW_OP_plus_uconst => Operation::PlusUconst(reader.read_uleb128()?),
			DW_OP_reg0..=DW_OP_reg31 => Operation::Reg(op - DW_OP_reg0),
			DW_OP_breg0..=DW_OP_breg31 => Operation::Breg(op - DW_OP_breg0, reader.read_sleb128()?),
			DW_OP_fbreg => Operation::Fbreg(reader.read_sleb128()?),
			DW_OP_piece => Operation::Piece(reader.read_uleb128()?),
			other => Operation::Unsupported(other),
		})
	}
}

/// Evaluate the location described by an attribute.
///
/// Attributes of constant forms are offsets by themselves. Blocks are run as
/// location expressions, on a stack holding a single zero to begin with. The
/// offset of the result is whatever ends up at the top of the stack. Only a
/// single register can be described, further ones are logged and ignored.
pub fn evaluate<Order>(attribute: &Attribute, address_size: u8) -> Result<Location, Error>
	where Order: ByteOrder {

	if attribute.form.is_constant() {
		if let Some(offset) = attribute.as_signed() {
			return Ok(Location::constant(offset))
		}
	}
	let expression = match attribute.as_block() {
		Some(expression) => expression,
		None => {
			tracing::warn!("location {} has non-block value {:?}",
				DisplayAttribute(attribute.name),
				attribute.value);
			return Ok(Location::constant(attribute.as_signed().unwrap_or(0)))
		}
	};

	let mut stack = SmallVec::<[i64; 8]>::new();
	stack.push(0);

	let mut location = Location::constant(0);
	let mut piece_found = false;

	let mut reader = Reader::<Order>::new(expression, Section::Info);
	while !reader.is_empty() {
		let operation = Operation::read(&mut reader, address_size)?;
		match operation {
			Operation::Addr(value) | Operation::Constu(value) => stack.push(value as i64),
			Operation::Const1u(value) => stack.push(i64::from(value)),
			Operation::Const1s(value) => stack.push(i64::from(value)),
			Operation::Const2u(value) => stack.push(i64::from(value)),
			Operation::Const2s(value) => stack.push(i64::from(value)),
			Operation::Const4u(value) => stack.push(i64::from(value)),
			Operation::Const4s(value) => stack.push(i64::from(value)),
			Operation::Consts(value) => stack.push(value),
			Operation::PlusUconst(value) => {
				if let Some(top) = stack.last_mut() {
					*top = top.wrapping_add(value as i64);
				}
			},
			Operation::Reg(register) | Operation::Breg(register, _) => {
				let register = u16::from(register);
				match location.storage {
					Storage::NoRegister => {
						location.storage = Storage::Register(register);
						location.deref = matches!(operation, Operation::Breg(..));
					},
					/* A value split over consecutive registers. */
					Storage::Register(first) if piece_found && register == first + 1 => {},
					current => tracing::warn!("only a single register is supported \
						per location, keeping {:?} over register {}",
						current,
						register)
				}
				if let Operation::Breg(_, offset) = operation {
					stack.push(offset);
				}
			},
			Operation::Fbreg(offset) => {
				match location.storage {
					Storage::NoRegister => {
						location.storage = Storage::FrameBase;
						location.deref = true;
					},
					current => tracing::warn!("only a single register is supported \
						per location, keeping {:?} over the frame base",
						current)
				}
				stack.push(offset);
			},
			Operation::Piece(size) => {
				tracing::debug!("not handling piece of {} bytes directly", size);
				piece_found = true;
			},
			Operation::Unsupported(op) => {
				tracing::warn!("unhandled location operation 0x{:02x}", op);
				break
			}
		}
	}

	location.offset = stack.last().copied().unwrap_or(0);
	Ok(location)
}
