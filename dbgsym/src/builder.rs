use byteorder::ByteOrder;
use dw2_consts::*;
use crate::{Error, ModuleInfo, NameSynthesizer};
use crate::attribute::{Attribute, UnitContext};
use crate::die::{Die, DieTree, SymbolSlot};
use crate::location::{self, Location, Storage};
use crate::register;
use crate::symbol::*;
use crate::types::{Address, AttributeName, DisplayTag, EntryOffset};

/// The entries under the given one.
fn children<'b>(tree: &'b DieTree<'b>, die: &'b Die<'b>) -> impl Iterator<Item = &'b Die<'b>> + 'b {
	die.children().iter().filter_map(move |offset| tree.get(*offset))
}

/// Frame base of a function, resolved once for all of its variables.
#[derive(Debug, Copy, Clone, Default)]
struct FrameBase {
	register: Option<u16>,
	offset: i64,
}

/// The function whose children are being built.
#[derive(Debug, Copy, Clone, Default)]
struct Scope {
	function: Option<SymbolId>,
	/// Signature parameters get appended to, if any.
	signature: Option<SymbolId>,
	frame: FrameBase,
}

/// What the root entry of a compilation unit told us about the unit.
#[derive(Debug, Clone)]
pub struct UnitRoot {
	pub compiland: SymbolId,
	pub comp_dir: Option<String>,
	pub stmt_list: Option<u64>,
}

/// Builds symbols out of the entries of a compilation unit.
///
/// Every entry gets built at most once. The outcome is remembered in the
/// symbol slot of the entry, and later requests for it get the very same
/// symbol back.
pub struct SymbolBuilder<'b, Order> {
	context: &'b UnitContext<'b, Order>,
	tree: &'b DieTree<'b>,
	module: &'b ModuleInfo,
	names: &'b mut NameSynthesizer,
	symbols: &'b mut SymbolTable,
	compiland: Option<SymbolId>,
}
impl<'b, Order> SymbolBuilder<'b, Order>
	where Order: ByteOrder {

	pub fn new(
		context: &'b UnitContext<'b, Order>,
		tree: &'b DieTree<'b>,
		module: &'b ModuleInfo,
		names: &'b mut NameSynthesizer,
		symbols: &'b mut SymbolTable,
	) -> Self {
		Self {
			context,
			tree,
			module,
			names,
			symbols,
			compiland: None,
		}
	}

	/// Build the compiland of the unit and every entry directly under it.
	pub fn build_unit(&mut self) -> Result<UnitRoot, Error> {
		let tree = self.tree;
		let root = tree.get(tree.root())
			.ok_or_else(|| Error::InvalidInfoSection {
				source: anyhow::anyhow!("root entry of unit 0x{:x} is missing",
					self.context.base())
			})?;
		if root.tag() != DW_TAG_compile_unit {
			return Err(Error::UnexpectedRootTag { tag: root.tag() })
		}

		let name = self.name(root, "compiland");
		let comp_dir = self.attribute(root, DW_AT_comp_dir)
			.and_then(|attribute| attribute.as_str())
			.map(|dir| dir.into_owned());
		let source = self.symbols.source_new(comp_dir.as_deref(), &name);

		let compiland = self.symbols.new_compiland(source);
		root.set_slot(SymbolSlot::Resolved(Some(compiland)));
		self.compiland = Some(compiland);

		tracing::debug!("building compilation unit {} at 0x{:x}",
			name,
			self.context.base());
		for child in root.children() {
			self.resolve(*child);
		}

		Ok(UnitRoot {
			compiland,
			comp_dir,
			stmt_list: self.unsigned(root, DW_AT_stmt_list),
		})
	}

	/// Get the symbol of the entry at the given offset, building it if it
	/// hasn't been built yet.
	pub fn resolve(&mut self, offset: EntryOffset) -> Option<SymbolId> {
		let tree = self.tree;
		let die = match tree.get(offset) {
			Some(die) => die,
			None => {
				tracing::warn!("unable to find referenced entry 0x{:x}", offset);
				return None
			}
		};

		match die.slot() {
			SymbolSlot::Resolved(id) | SymbolSlot::Pending(id) => return id,
			SymbolSlot::Unresolved => {}
		}

		die.set_slot(SymbolSlot::Pending(None));
		let id = self.build(die);
		die.set_slot(SymbolSlot::Resolved(id));

		id
	}

	fn build(&mut self, die: &'b Die<'b>) -> Option<SymbolId> {
		match die.tag() {
			DW_TAG_base_type => Some(self.base_type(die)),
			DW_TAG_typedef => Some(self.typedef(die)),
			DW_TAG_pointer_type => Some(self.pointer(die)),
			/* References are modeled as pointers. */
			DW_TAG_reference_type => Some(self.pointer(die)),
			DW_TAG_class_type => Some(self.udt(die, UdtKind::Class)),
			DW_TAG_structure_type => Some(self.udt(die, UdtKind::Struct)),
			DW_TAG_union_type => Some(self.udt(die, UdtKind::Union)),
			DW_TAG_array_type => self.array(die),
			DW_TAG_const_type | DW_TAG_volatile_type => self.qualifier(die),
			DW_TAG_enumeration_type => Some(self.enumeration(die)),
			DW_TAG_subprogram => self.subprogram(die),
			DW_TAG_subroutine_type => Some(self.subroutine_type(die)),
			DW_TAG_variable => {
				self.variable(&Scope::default(), None, die);
				None
			},
			tag => {
				tracing::debug!("unhandled {} for entry 0x{:x}",
					DisplayTag(tag),
					die.offset());
				None
			}
		}
	}

	fn attribute(&self, die: &Die, name: AttributeName) -> Option<Attribute<'b>> {
		self.context.attribute(die, name)
	}

	fn unsigned(&self, die: &Die, name: AttributeName) -> Option<u64> {
		self.attribute(die, name).and_then(|attribute| attribute.as_unsigned())
	}

	fn signed(&self, die: &Die, name: AttributeName) -> Option<i64> {
		self.attribute(die, name).and_then(|attribute| attribute.as_signed())
	}

	fn flag(&self, die: &Die, name: AttributeName) -> bool {
		self.unsigned(die, name).unwrap_or(0) != 0
	}

	/// The name of the entry, or a synthesized one if it has none.
	fn name(&mut self, die: &Die, prefix: &str) -> String {
		match self.attribute(die, DW_AT_name).and_then(|name| name.as_str()) {
			Some(name) => name.into_owned(),
			None => self.names.synthesize(prefix)
		}
	}

	fn location(&self, die: &Die, name: AttributeName) -> Option<Location> {
		let attribute = self.attribute(die, name)?;
		match location::evaluate::<Order>(&attribute, self.context.address_size()) {
			Ok(location) => Some(location),
			Err(what) => {
				tracing::warn!("could not evaluate location of entry 0x{:x}: {}",
					die.offset(),
					what);
				None
			}
		}
	}

	/// Resolve the type the entry refers to.
	fn lookup_type(&mut self, die: &Die) -> Option<SymbolId> {
		let attribute = self.attribute(die, DW_AT_type)?;
		match attribute.as_reference() {
			Some(target) => self.resolve(target),
			None => {
				tracing::warn!("type of entry 0x{:x} is not a reference: {:?}",
					die.offset(),
					attribute.value);
				None
			}
		}
	}

	fn address(&self, offset: u64) -> Address {
		self.module.base_address.wrapping_add(offset)
	}

	fn no_children(&self, die: &Die) {
		if !die.children().is_empty() {
			tracing::debug!("ignoring children of entry 0x{:x} with abbreviation {}",
				die.offset(),
				die.abbreviation().code());
		}
	}

	fn base_type(&mut self, die: &Die) -> SymbolId {
		let name = self.name(die, "basetype");
		let size = self.unsigned(die, DW_AT_byte_size).unwrap_or(0);
		let encoding = self.unsigned(die, DW_AT_encoding).unwrap_or(u64::from(DW_ATE_void));

		let basic = match u8::try_from(encoding) {
			Ok(DW_ATE_void) => BasicType::Void,
			Ok(DW_ATE_address) => BasicType::ULong,
			Ok(DW_ATE_boolean) => BasicType::Bool,
			Ok(DW_ATE_complex_float) => BasicType::Complex,
			Ok(DW_ATE_float) => BasicType::Float,
			Ok(DW_ATE_signed) => BasicType::Int,
			Ok(DW_ATE_unsigned) => BasicType::UInt,
			Ok(DW_ATE_signed_char) | Ok(DW_ATE_unsigned_char) => BasicType::Char,
			_ => BasicType::NoType,
		};

		self.no_children(die);
		self.symbols.new_base_type(name, basic, size)
	}

	fn typedef(&mut self, die: &Die) -> SymbolId {
		let id = self.symbols.reserve();
		die.set_slot(SymbolSlot::Pending(Some(id)));

		let name = self.name(die, "typedef");
		let target = self.lookup_type(die);
		self.symbols.fill(id, Symbol::Typedef(Typedef { name, target }));

		self.no_children(die);
		id
	}

	fn pointer(&mut self, die: &Die) -> SymbolId {
		let id = self.symbols.reserve();
		die.set_slot(SymbolSlot::Pending(Some(id)));

		let size = self.unsigned(die, DW_AT_byte_size)
			.unwrap_or(u64::from(self.context.address_size()));
		let target = self.lookup_type(die);
		self.symbols.fill(id, Symbol::Pointer(PointerType { target, size }));

		self.no_children(die);
		id
	}

	/// Qualified types are the type they qualify.
	fn qualifier(&mut self, die: &Die) -> Option<SymbolId> {
		self.no_children(die);
		self.lookup_type(die)
	}

	fn array(&mut self, die: &'b Die<'b>) -> Option<SymbolId> {
		if !die.has_children() {
			tracing::warn!("array 0x{:x} has no range information", die.offset());
			return None
		}

		let id = self.symbols.reserve();
		die.set_slot(SymbolSlot::Pending(Some(id)));

		let element = self.lookup_type(die);
		let (mut min, mut max, mut index) = (0, 0, None);
		for child in children(self.tree, die) {
			match child.tag() {
				DW_TAG_subrange_type => {
					index = self.lookup_type(child);
					min = self.signed(child, DW_AT_lower_bound).unwrap_or(0);
					max = self.signed(child, DW_AT_upper_bound).unwrap_or(0);
					if let Some(count) = self.signed(child, DW_AT_count) {
						max = min.wrapping_add(count);
					}
				},
				tag => tracing::debug!("unhandled {} in array 0x{:x}",
					DisplayTag(tag),
					die.offset())
			}
		}

		self.symbols.fill(id, Symbol::Array(ArrayType { min, max, element, index }));
		Some(id)
	}

	fn udt(&mut self, die: &'b Die<'b>, kind: UdtKind) -> SymbolId {
		let name = self.name(die, "udt");
		let size = self.unsigned(die, DW_AT_byte_size).unwrap_or(0);

		let id = self.symbols.new_udt(name, size, kind);
		die.set_slot(SymbolSlot::Pending(Some(id)));

		for child in children(self.tree, die) {
			match child.tag() {
				DW_TAG_member => self.member(child, id),
				DW_TAG_enumeration_type => {
					self.resolve(child.offset());
				},
				/* Nested type definitions are not modeled. */
				DW_TAG_structure_type | DW_TAG_class_type | DW_TAG_union_type => {},
				tag => tracing::debug!("unhandled {} in type 0x{:x}",
					DisplayTag(tag),
					die.offset())
			}
		}

		id
	}

	fn member(&mut self, die: &Die, udt: SymbolId) {
		let name = self.name(die, "udt_member");
		let ty = self.lookup_type(die);
		let offset = self.location(die, DW_AT_data_member_location)
			.map(|location| location.offset)
			.unwrap_or(0);
		let bit_size = self.unsigned(die, DW_AT_bit_size).unwrap_or(0);

		/* Bit offsets count from the most significant bit of the storage
		 * unit, which we flip around for a little endian target. */
		let bit_offset = match self.unsigned(die, DW_AT_bit_offset) {
			Some(declared) => {
				let bytes = self.unsigned(die, DW_AT_byte_size)
					.or_else(|| ty.and_then(|ty| self.symbols.type_length(ty)))
					.unwrap_or(0);
				bytes.wrapping_mul(8)
					.wrapping_sub(declared)
					.wrapping_sub(bit_size)
			},
			None => 0
		};

		self.no_children(die);
		self.symbols.add_udt_member(udt, Member {
			name,
			ty,
			bit_offset: (offset as u64).wrapping_shl(3).wrapping_add(bit_offset),
			bit_size,
		});
	}

	fn enumeration(&mut self, die: &'b Die<'b>) -> SymbolId {
		let name = self.name(die, "enum");
		let size = self.unsigned(die, DW_AT_byte_size).unwrap_or(0);

		let id = self.symbols.new_enum(name, size);
		die.set_slot(SymbolSlot::Pending(Some(id)));

		for child in children(self.tree, die) {
			match child.tag() {
				DW_TAG_enumerator => {
					let name = self.name(child, "enum_value");
					let value = self.signed(child, DW_AT_const_value).unwrap_or(0);
					self.symbols.add_enumerator(id, Enumerator { name, value });
				},
				tag => tracing::debug!("unhandled {} in enumeration 0x{:x}",
					DisplayTag(tag),
					die.offset())
			}
		}

		id
	}

	fn subroutine_type(&mut self, die: &'b Die<'b>) -> SymbolId {
		let return_type = self.lookup_type(die);
		let id = self.symbols.new_signature(return_type, CallingConvention::FarC);
		die.set_slot(SymbolSlot::Pending(Some(id)));

		for child in children(self.tree, die) {
			match child.tag() {
				DW_TAG_formal_parameter => {
					let ty = self.lookup_type(child);
					self.symbols.add_signature_parameter(id, ty);
				},
				/* Variadic signatures are not modeled. */
				DW_TAG_unspecified_parameters => {},
				tag => tracing::debug!("unhandled {} in signature 0x{:x}",
					DisplayTag(tag),
					die.offset())
			}
		}

		id
	}

	fn subprogram(&mut self, die: &'b Die<'b>) -> Option<SymbolId> {
		let low_pc = self.unsigned(die, DW_AT_low_pc).unwrap_or(0);
		let high_pc = self.unsigned(die, DW_AT_high_pc).unwrap_or(0);

		if let Some(thunk) = self.module.in_thunk_area(self.address(low_pc)) {
			tracing::debug!("skipping function 0x{:x} inside thunk area {}",
				die.offset(),
				thunk.name);
			return None
		}

		let is_declaration = self.flag(die, DW_AT_declaration);
		let name = self.name(die, "subprogram");
		let return_type = self.lookup_type(die);
		let signature = self.symbols.new_signature(return_type, CallingConvention::FarC);

		let function = if is_declaration {
			None
		} else {
			let function = self.symbols.new_function(
				self.compiland,
				name,
				self.address(low_pc),
				high_pc.saturating_sub(low_pc),
				signature);
			die.set_slot(SymbolSlot::Pending(Some(function)));
			Some(function)
		};

		let frame = match self.location(die, DW_AT_frame_base) {
			Some(Location { storage: Storage::Register(register), offset, .. }) =>
				FrameBase { register: Some(register), offset },
			/* Most likely a location list, which we don't support. */
			_ => FrameBase::default()
		};
		let scope = Scope {
			function,
			signature: function.map(|_| signature),
			frame,
		};

		for child in children(self.tree, die) {
			match child.tag() {
				DW_TAG_variable | DW_TAG_formal_parameter =>
					self.variable(&scope, None, child),
				DW_TAG_lexical_block => self.block(&scope, None, child),
				DW_TAG_inlined_subroutine => self.inlined_subroutine(&scope, None, child),
				DW_TAG_label => self.label(&scope, child),
				/* Types get built when something refers to them, and nested
				 * functions are most likely declarations. */
				DW_TAG_subprogram
					| DW_TAG_class_type
					| DW_TAG_structure_type
					| DW_TAG_union_type
					| DW_TAG_enumeration_type
					| DW_TAG_typedef
					| DW_TAG_unspecified_parameters => {},
				tag => tracing::debug!("unhandled {} in function 0x{:x}",
					DisplayTag(tag),
					die.offset())
			}
		}

		if let Some(function) = function {
			self.symbols.normalize_function(function);
		}
		function
	}

	fn block(&mut self, scope: &Scope, parent: Option<BlockId>, die: &'b Die<'b>) {
		let low_pc = self.unsigned(die, DW_AT_low_pc).unwrap_or(0);
		let high_pc = self.unsigned(die, DW_AT_high_pc).unwrap_or(0);

		let block = match scope.function {
			Some(function) => self.symbols.open_block(
				function,
				parent,
				self.address(low_pc),
				high_pc.saturating_sub(low_pc)),
			None => {
				tracing::warn!("lexical block 0x{:x} is outside of any function",
					die.offset());
				None
			}
		};

		for child in children(self.tree, die) {
			match child.tag() {
				DW_TAG_inlined_subroutine => self.inlined_subroutine(scope, block, child),
				DW_TAG_variable => self.variable(scope, block, child),
				DW_TAG_lexical_block => self.block(scope, block, child),
				/* Declarations, and parameters of exception handlers. */
				DW_TAG_subprogram | DW_TAG_formal_parameter => {},
				DW_TAG_class_type
					| DW_TAG_structure_type
					| DW_TAG_union_type
					| DW_TAG_enumeration_type => {},
				tag => tracing::debug!("unhandled {} in block 0x{:x}",
					DisplayTag(tag),
					die.offset())
			}
		}
	}

	/// The contents of an inlined function become part of the function it is
	/// inlined into. Its own name and range are not recorded.
	fn inlined_subroutine(&mut self, scope: &Scope, block: Option<BlockId>, die: &'b Die<'b>) {
		let scope = Scope {
			signature: None,
			..*scope
		};

		for child in children(self.tree, die) {
			match child.tag() {
				DW_TAG_formal_parameter | DW_TAG_variable =>
					self.variable(&scope, block, child),
				DW_TAG_lexical_block => self.block(&scope, block, child),
				DW_TAG_inlined_subroutine => self.inlined_subroutine(&scope, block, child),
				DW_TAG_label => self.label(&scope, child),
				tag => tracing::debug!("unhandled {} in inlined function 0x{:x}",
					DisplayTag(tag),
					die.offset())
			}
		}
	}

	fn label(&mut self, scope: &Scope, die: &Die) {
		let low_pc = self.unsigned(die, DW_AT_low_pc).unwrap_or(0);
		let name = self.name(die, "label");

		match scope.function {
			Some(function) => self.symbols.add_label(function, Label {
				name,
				address: self.address(low_pc),
			}),
			None => tracing::warn!("label {} is outside of any function", name)
		}
	}

	/// Build a variable or a parameter.
	///
	/// Variables at fixed addresses are global, no matter where they are
	/// declared. Everything else belongs to the function in scope.
	fn variable(&mut self, scope: &Scope, block: Option<BlockId>, die: &Die) {
		let is_parameter = die.tag() == DW_TAG_formal_parameter;
		let ty = self.lookup_type(die);
		let name = self.name(die, "parameter");

		if let Some(location) = self.location(die, DW_AT_location) {
			let (register, deref, offset) = match location.storage {
				Storage::NoRegister => {
					self.symbols.new_global_variable(GlobalVariable {
						name: name.clone(),
						compiland: self.compiland,
						is_static: !self.flag(die, DW_AT_external),
						address: self.address(location.offset as u64),
						size: 0,
						ty,
					});
					(None, false, 0)
				},
				Storage::FrameBase => (
					Some(scope.frame.register),
					true,
					location.offset.wrapping_add(scope.frame.offset)),
				Storage::Register(register) => (
					Some(Some(register)),
					location.deref,
					location.offset),
			};

			if let Some(register) = register {
				let local = LocalVariable {
					name: name.clone(),
					kind: if is_parameter { DataKind::Param } else { DataKind::Local },
					register: register
						.map(register::to_codeview)
						.unwrap_or(register::CV_REG_NONE),
					deref,
					offset,
					block,
					ty,
				};
				match scope.function {
					Some(function) => self.symbols.add_local(function, local),
					None => {
						tracing::debug!("variable {} at 0x{:x} is register based \
							but has no function",
							name,
							die.offset());
						self.symbols.add_detached_local(local);
					}
				}
			}
		}

		if let Some(value) = self.attribute(die, DW_AT_const_value) {
			tracing::trace!("constant value {:?} of {} is not represented",
				value.value,
				name);
		}
		if is_parameter {
			if let Some(signature) = scope.signature {
				self.symbols.add_signature_parameter(signature, ty);
			}
		}

		self.no_children(die);
	}
}
