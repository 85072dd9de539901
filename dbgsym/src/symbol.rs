use std::collections::{BTreeSet, HashMap};
use crate::types::Address;

/// Identifier of a symbol in a [`SymbolTable`].
///
/// Two references to the same symbol always carry the same identifier.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SymbolId(usize);
impl SymbolId {
	pub fn index(self) -> usize {
		self.0
	}
}

/// Identifier of an interned source file name in a [`SymbolTable`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SourceId(usize);

/// Index of a lexical block in the block list of its function.
pub type BlockId = usize;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BasicType {
	NoType,
	Void,
	Char,
	Int,
	UInt,
	Float,
	Bool,
	ULong,
	Complex,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UdtKind {
	Struct,
	Class,
	Union,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CallingConvention {
	FarC,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DataKind {
	Param,
	Local,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Compiland {
	pub source: SourceId,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct BaseType {
	pub name: String,
	pub basic: BasicType,
	pub size: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PointerType {
	pub target: Option<SymbolId>,
	pub size: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ArrayType {
	pub min: i64,
	pub max: i64,
	pub element: Option<SymbolId>,
	pub index: Option<SymbolId>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Typedef {
	pub name: String,
	pub target: Option<SymbolId>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Member {
	pub name: String,
	pub ty: Option<SymbolId>,
	/// Offset of the member from the start of its parent, in bits.
	pub bit_offset: u64,
	/// Size of the member in bits, for bit fields. Zero otherwise.
	pub bit_size: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UdtType {
	pub name: String,
	pub kind: UdtKind,
	pub size: u64,
	pub members: Vec<Member>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Enumerator {
	pub name: String,
	pub value: i64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EnumType {
	pub name: String,
	pub size: u64,
	pub enumerators: Vec<Enumerator>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FunctionSignature {
	pub return_type: Option<SymbolId>,
	pub calling_convention: CallingConvention,
	pub parameters: Vec<Option<SymbolId>>,
}

/// A parameter or local variable of a function.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocalVariable {
	pub name: String,
	pub kind: DataKind,
	/// CodeView identifier of the register holding the variable, or its
	/// address if `deref` is set.
	pub register: u16,
	pub deref: bool,
	pub offset: i64,
	/// Innermost lexical block the variable is declared in.
	pub block: Option<BlockId>,
	pub ty: Option<SymbolId>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Block {
	pub address: Address,
	pub length: u64,
	pub parent: Option<BlockId>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Label {
	pub name: String,
	pub address: Address,
}

/// A source line, relative to the function containing it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LineFact {
	pub source: SourceId,
	pub line: u64,
	/// Offset of the first instruction of the line from the start of the
	/// function.
	pub offset: u64,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Function {
	pub name: String,
	pub compiland: Option<SymbolId>,
	pub address: Address,
	pub length: u64,
	pub signature: SymbolId,
	pub locals: Vec<LocalVariable>,
	pub blocks: Vec<Block>,
	pub labels: Vec<Label>,
	/// Ordered by offset.
	pub lines: Vec<LineFact>,
	pub normalized: bool,
}
impl Function {
	/// Whether the given address falls inside this function. The end bound
	/// is inclusive, so that the row closing a line sequence still lands on
	/// the function it closes.
	pub fn covers(&self, address: Address) -> bool {
		address >= self.address
			&& address - self.address <= self.length
	}
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GlobalVariable {
	pub name: String,
	pub compiland: Option<SymbolId>,
	/// Whether the variable is only visible inside its compilation unit.
	pub is_static: bool,
	pub address: Address,
	pub size: u64,
	pub ty: Option<SymbolId>,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Symbol {
	/// Slot reserved for a symbol that is still being built.
	Placeholder,
	Compiland(Compiland),
	BaseType(BaseType),
	Pointer(PointerType),
	Array(ArrayType),
	Typedef(Typedef),
	Udt(UdtType),
	Enum(EnumType),
	Signature(FunctionSignature),
	Function(Function),
	GlobalVariable(GlobalVariable),
}
impl Symbol {
	pub fn kind_name(&self) -> &'static str {
		match self {
			Symbol::Placeholder => "placeholder",
			Symbol::Compiland(_) => "compiland",
			Symbol::BaseType(_) => "base type",
			Symbol::Pointer(_) => "pointer",
			Symbol::Array(_) => "array",
			Symbol::Typedef(_) => "typedef",
			Symbol::Udt(_) => "user defined type",
			Symbol::Enum(_) => "enumeration",
			Symbol::Signature(_) => "function signature",
			Symbol::Function(_) => "function",
			Symbol::GlobalVariable(_) => "global variable",
		}
	}
}

/// What kind of information a symbol table has to offer.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Capabilities {
	pub line_numbers: bool,
	pub global_symbols: bool,
	pub type_info: bool,
	pub source_indexed: bool,
}

/// The symbols of a module.
///
/// Symbols are stored in an arena and refer to each other through their
/// identifiers. Functions and global variables are additionally indexed by
/// their address.
#[derive(Debug, Default)]
pub struct SymbolTable {
	symbols: Vec<Symbol>,
	addresses: BTreeSet<(Address, SymbolId)>,
	sources: Vec<String>,
	source_index: HashMap<String, SourceId, ahash::RandomState>,
	detached_locals: Vec<LocalVariable>,
	capabilities: Capabilities,
}
impl SymbolTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.symbols.len()
	}

	pub fn is_empty(&self) -> bool {
		self.symbols.is_empty()
	}

	pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
		self.symbols.get(id.0)
	}

	pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
		self.symbols.iter()
			.enumerate()
			.map(|(index, symbol)| (SymbolId(index), symbol))
	}

	pub fn function(&self, id: SymbolId) -> Option<&Function> {
		match self.get(id)? {
			Symbol::Function(function) => Some(function),
			_ => None
		}
	}

	fn function_mut(&mut self, id: SymbolId) -> Option<&mut Function> {
		match self.symbols.get_mut(id.0)? {
			Symbol::Function(function) => Some(function),
			_ => None
		}
	}

	fn push(&mut self, symbol: Symbol) -> SymbolId {
		let id = SymbolId(self.symbols.len());
		self.symbols.push(symbol);
		self.index(id);
		id
	}

	fn index(&mut self, id: SymbolId) {
		let address = match self.symbols.get(id.0) {
			Some(Symbol::Function(function)) => function.address,
			Some(Symbol::GlobalVariable(variable)) => variable.address,
			_ => return
		};
		self.addresses.insert((address, id));
	}

	/// Reserve the identifier of a symbol that can only be built later.
	pub fn reserve(&mut self) -> SymbolId {
		self.push(Symbol::Placeholder)
	}

	/// Build a symbol whose identifier was previously reserved.
	pub fn fill(&mut self, id: SymbolId, symbol: Symbol) {
		match self.symbols.get_mut(id.0) {
			Some(slot @ Symbol::Placeholder) => {
				*slot = symbol;
				self.index(id);
			},
			_ => tracing::warn!("symbol {:?} was not reserved, not replacing it", id)
		}
	}

	pub fn new_compiland(&mut self, source: SourceId) -> SymbolId {
		self.push(Symbol::Compiland(Compiland { source }))
	}

	pub fn new_base_type(&mut self, name: String, basic: BasicType, size: u64) -> SymbolId {
		self.push(Symbol::BaseType(BaseType { name, basic, size }))
	}

	pub fn new_udt(&mut self, name: String, size: u64, kind: UdtKind) -> SymbolId {
		self.push(Symbol::Udt(UdtType {
			name,
			kind,
			size,
			members: Vec::new(),
		}))
	}

	pub fn add_udt_member(&mut self, udt: SymbolId, member: Member) {
		match self.symbols.get_mut(udt.0) {
			Some(Symbol::Udt(udt)) => udt.members.push(member),
			_ => tracing::warn!("symbol {:?} is not a user defined type", udt)
		}
	}

	pub fn new_enum(&mut self, name: String, size: u64) -> SymbolId {
		self.push(Symbol::Enum(EnumType {
			name,
			size,
			enumerators: Vec::new(),
		}))
	}

	pub fn add_enumerator(&mut self, enumeration: SymbolId, enumerator: Enumerator) {
		match self.symbols.get_mut(enumeration.0) {
			Some(Symbol::Enum(enumeration)) => enumeration.enumerators.push(enumerator),
			_ => tracing::warn!("symbol {:?} is not an enumeration", enumeration)
		}
	}

	pub fn new_signature(
		&mut self,
		return_type: Option<SymbolId>,
		calling_convention: CallingConvention
	) -> SymbolId {
		self.push(Symbol::Signature(FunctionSignature {
			return_type,
			calling_convention,
			parameters: Vec::new(),
		}))
	}

	pub fn add_signature_parameter(&mut self, signature: SymbolId, ty: Option<SymbolId>) {
		match self.symbols.get_mut(signature.0) {
			Some(Symbol::Signature(signature)) => signature.parameters.push(ty),
			_ => tracing::warn!("symbol {:?} is not a function signature", signature)
		}
	}

	pub fn new_function(
		&mut self,
		compiland: Option<SymbolId>,
		name: String,
		address: Address,
		length: u64,
		signature: SymbolId
	) -> SymbolId {
		self.push(Symbol::Function(Function {
			name,
			compiland,
			address,
			length,
			signature,
			locals: Vec::new(),
			blocks: Vec::new(),
			labels: Vec::new(),
			lines: Vec::new(),
			normalized: false,
		}))
	}

	pub fn add_local(&mut self, function: SymbolId, local: LocalVariable) {
		match self.function_mut(function) {
			Some(function) => function.locals.push(local),
			None => tracing::warn!("symbol {:?} is not a function", function)
		}
	}

	/// Record a local variable that has no function to belong to.
	pub fn add_detached_local(&mut self, local: LocalVariable) {
		self.detached_locals.push(local)
	}

	pub fn detached_locals(&self) -> &[LocalVariable] {
		&self.detached_locals
	}

	/// Open a lexical block inside a function, nested in the given parent
	/// block, or directly in the function if there is none.
	pub fn open_block(
		&mut self,
		function: SymbolId,
		parent: Option<BlockId>,
		address: Address,
		length: u64
	) -> Option<BlockId> {
		let function = self.function_mut(function)?;
		function.blocks.push(Block {
			address,
			length,
			parent,
		});
		Some(function.blocks.len() - 1)
	}

	pub fn add_label(&mut self, function: SymbolId, label: Label) {
		match self.function_mut(function) {
			Some(function) => function.labels.push(label),
			None => tracing::warn!("symbol {:?} is not a function", function)
		}
	}

	/// Finish the construction of a function.
	pub fn normalize_function(&mut self, function: SymbolId) {
		if let Some(function) = self.function_mut(function) {
			function.labels.sort_by_key(|label| label.address);
			function.normalized = true;
		}
	}

	pub fn new_global_variable(&mut self, variable: GlobalVariable) -> SymbolId {
		self.push(Symbol::GlobalVariable(variable))
	}


	/// The function or global variable with the greatest address not past
	/// the given one.
	pub fn find_nearest(&self, address: Address) -> Option<SymbolId> {
		self.addresses
			.range(..=(address, SymbolId(usize::MAX)))
			.next_back()
			.map(|(_, id)| *id)
	}

	/// Attach a source line starting at the given address to the function
	/// covering it. Returns whether the line got recorded, which it does not
	/// when no function covers it or the function already holds it.
	pub fn add_line(&mut self, source: SourceId, line: u64, address: Address) -> bool {
		let id = match self.find_nearest(address) {
			Some(id) => id,
			None => return false
		};
		let function = match self.function_mut(id) {
			Some(function) if function.covers(address) => function,
			_ => return false
		};

		let offset = address - function.address;
		let fact = LineFact { source, line, offset };
		let first = function.lines.partition_point(|fact| fact.offset < offset);
		let at = function.lines.partition_point(|fact| fact.offset <= offset);
		if function.lines[first..at].contains(&fact) {
			return false
		}
		function.lines.insert(at, fact);
		true
	}

	/// Intern a source file name, given the directory it is relative to.
	pub fn source_new(&mut self, directory: Option<&str>, name: &str) -> SourceId {
		let path = match directory {
			Some(directory) if !name.starts_with('/') && !directory.is_empty() => {
				if directory.ends_with('/') {
					format!("{}{}", directory, name)
				} else {
					format!("{}/{}", directory, name)
				}
			},
			_ => name.to_owned()
		};

		if let Some(id) = self.source_index.get(&path) {
			return *id
		}
		let id = SourceId(self.sources.len());
		self.sources.push(path.clone());
		self.source_index.insert(path, id);
		id
	}

	pub fn source(&self, id: SourceId) -> Option<&str> {
		self.sources.get(id.0).map(String::as_str)
	}

	pub fn sources(&self) -> impl Iterator<Item = &str> {
		self.sources.iter().map(String::as_str)
	}

	/// Size in bytes of values of the given type, if it is known.
	///
	/// Arrays hold `max - min` elements. This is exact for bounds given as a
	/// count, and one element short for bounds given as an upper bound, which
	/// arrays keep as declared.
	///
	/// Types that end up containing themselves have no size.
	pub fn type_length(&self, id: SymbolId) -> Option<u64> {
		let mut current = id;
		let mut elements = 1u64;

		/* Every hop goes through a typedef or an array, so a walk longer
		 * than there are symbols has to be going around in circles. */
		for _ in 0..=self.symbols.len() {
			let size = match self.get(current)? {
				Symbol::BaseType(base) => base.size,
				Symbol::Pointer(pointer) => pointer.size,
				Symbol::Udt(udt) => udt.size,
				Symbol::Enum(enumeration) => enumeration.size,
				Symbol::Array(array) => {
					let count = array.max.saturating_sub(array.min).max(0) as u64;
					elements = elements.saturating_mul(count);
					current = array.element?;
					continue
				},
				Symbol::Typedef(typedef) => {
					current = typedef.target?;
					continue
				},
				_ => return None
			};
			return Some(size.saturating_mul(elements))
		}

		tracing::warn!("type 0x{:x} contains itself", id.index());
		None
	}

	pub fn capabilities(&self) -> Capabilities {
		self.capabilities
	}

	pub fn set_capabilities(&mut self, capabilities: Capabilities) {
		self.capabilities = capabilities
	}
}
