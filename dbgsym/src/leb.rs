/// An unsigned LEB128 value, borrowed straight out of the data it was found in.
#[derive(Debug, Copy, Clone)]
pub struct ULeb128<'a> {
	ptr: &'a [u8],
}
impl<'a> ULeb128<'a> {
	pub fn new(base: &'a [u8], offset: usize) -> Result<Self, UnexpectedEndOfBuffer> {
		let base = base.get(offset..).ok_or(UnexpectedEndOfBuffer)?;
		let (last, _) = base.iter()
			.enumerate()
			.find(|(_, byte)| *byte & 0x80 == 0)
			.ok_or(UnexpectedEndOfBuffer)?;

		Ok(Self {
			ptr: &base[..=last],
		})
	}

	pub fn is_zero(&self) -> bool {
		self.ptr.iter().all(|byte| byte & 0x7f == 0)
	}

	pub fn len(&self) -> usize {
		self.ptr.len()
	}

	pub fn bytes(&self) -> impl Iterator<Item = u8> + 'a {
		self.ptr.iter().cloned()
	}

	/// The value of this number, saturated to [`u64::MAX`] if it does not fit.
	///
	/// There is no limit to how many bytes an encoded value may span, so a
	/// producer is free to pad a small value out with any number of zero
	/// groups. Those never count towards saturation.
	pub fn value(&self) -> u64 {
		let mut target = 0u64;
		for (index, byte) in self.bytes().enumerate() {
			let payload = u64::from(byte & 0x7f);
			if payload == 0 { continue }

			let shift = index.saturating_mul(7);
			if shift >= u64::BITS as usize {
				return u64::MAX
			}

			let shifted = payload << shift;
			if shifted >> shift != payload {
				return u64::MAX
			}
			target |= shifted;
		}

		target
	}
}

/// A signed LEB128 value.
///
/// The grouping is the same as in the unsigned variant, so all of the length
/// related logic is shared with [`ULeb128`].
#[derive(Debug, Copy, Clone)]
pub struct ILeb128<'a>(ULeb128<'a>);
impl<'a> ILeb128<'a> {
	pub fn new(base: &'a [u8], offset: usize) -> Result<Self, UnexpectedEndOfBuffer> {
		ULeb128::new(base, offset).map(Self)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// The value of this number.
	///
	/// Groups past the 64th bit are dropped. The result is sign extended when
	/// the second highest bit of the terminating byte is set and the groups
	/// that were read cover fewer than 64 bits.
	pub fn value(&self) -> i64 {
		let mut target = 0i64;
		let mut shift = 0u32;
		let mut last = 0u8;
		for byte in self.0.bytes() {
			if shift < i64::BITS {
				target |= i64::from(byte & 0x7f) << shift;
			}
			shift = shift.saturating_add(7);
			last = byte;
		}

		if shift < i64::BITS && last & 0x40 != 0 {
			target |= -1i64 << shift;
		}
		target
	}
}

#[derive(Debug, thiserror::Error)]
#[error("the backing slice ends before the LEB128 value")]
pub struct UnexpectedEndOfBuffer;

#[derive(Debug, thiserror::Error)]
#[error("the target integer is too narrow for this LEB128 value")]
pub struct TargetIntegerTooNarrow;

macro_rules! implement_conversion_to {
	(target: $target:ty) => {
		impl<'a> TryFrom<ULeb128<'a>> for $target {
			type Error = TargetIntegerTooNarrow;
			fn try_from(value: ULeb128<'a>) -> Result<Self, Self::Error> {
				/* Zero padding groups never make a value wider, so only the
				 * saturated value decides whether it fits. */
				<$target>::try_from(value.value())
					.map_err(|_| TargetIntegerTooNarrow)
			}
		}
	}
}

implement_conversion_to! { target: u32 }
implement_conversion_to! { target: u16 }
