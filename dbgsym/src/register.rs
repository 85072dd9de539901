//! Mapping of i386 DWARF register numbers to CodeView register identifiers,
//! which is what consumers of the symbol table speak.

pub const CV_REG_NONE: u16 = 0;
pub const CV_REG_EAX: u16 = 17;
pub const CV_REG_ECX: u16 = 18;
pub const CV_REG_EDX: u16 = 19;
pub const CV_REG_EBX: u16 = 20;
pub const CV_REG_ESP: u16 = 21;
pub const CV_REG_EBP: u16 = 22;
pub const CV_REG_ESI: u16 = 23;
pub const CV_REG_EDI: u16 = 24;
pub const CV_REG_ES: u16 = 25;
pub const CV_REG_CS: u16 = 26;
pub const CV_REG_SS: u16 = 27;
pub const CV_REG_DS: u16 = 28;
pub const CV_REG_FS: u16 = 29;
pub const CV_REG_GS: u16 = 30;
pub const CV_REG_EIP: u16 = 33;
pub const CV_REG_EFLAGS: u16 = 34;
pub const CV_REG_ST0: u16 = 128;
pub const CV_REG_CTRL: u16 = 136;
pub const CV_REG_STAT: u16 = 137;
pub const CV_REG_TAG: u16 = 138;
pub const CV_REG_XMM0: u16 = 154;
pub const CV_REG_MXCSR: u16 = 211;

/// Map a DWARF register number to its CodeView counterpart.
///
/// Registers we don't know about map to [`CV_REG_NONE`].
pub fn to_codeview(register: u16) -> u16 {
	match register {
		0 => CV_REG_EAX,
		1 => CV_REG_ECX,
		2 => CV_REG_EDX,
		3 => CV_REG_EBX,
		4 => CV_REG_ESP,
		5 => CV_REG_EBP,
		6 => CV_REG_ESI,
		7 => CV_REG_EDI,
		8 => CV_REG_EIP,
		9 => CV_REG_EFLAGS,
		10 => CV_REG_CS,
		11 => CV_REG_SS,
		12 => CV_REG_DS,
		13 => CV_REG_ES,
		14 => CV_REG_FS,
		15 => CV_REG_GS,
		16..=23 => CV_REG_ST0 + (register - 16),
		24 => CV_REG_CTRL,
		25 => CV_REG_STAT,
		26 => CV_REG_TAG,
		/* 27 through 31 are the x87 instruction and operand pointers, which
		 * have no CodeView equivalent. */
		32..=39 => CV_REG_XMM0 + (register - 32),
		40 => CV_REG_MXCSR,
		_ => {
			tracing::warn!("don't know how to map register {}", register);
			CV_REG_NONE
		}
	}
}
