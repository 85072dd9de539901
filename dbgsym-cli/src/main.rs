use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use anyhow::Context;
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use dbgsym::{Dwarf, DwarfSections, ModuleInfo, SymbolTable};
use memmap2::Mmap;
use tracing_subscriber::EnvFilter;

/// Map a raw section dump. Empty files can't be mapped, and stand for empty
/// sections.
fn map(path: &OsString) -> anyhow::Result<Option<Mmap>> {
	let file = File::open(path)
		.with_context(|| format!("could not open {:?}", path))?;
	if file.metadata()?.len() == 0 {
		return Ok(None)
	}

	let map = unsafe {
		memmap2::MmapOptions::new()
			.map(&file)
	}.with_context(|| format!("could not map {:?}", path))?;
	Ok(Some(map))
}

fn bytes(map: &Option<Mmap>) -> &[u8] {
	map.as_deref().unwrap_or(&[])
}

fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let mut args = std::env::args_os();
	let name = args.next().unwrap_or_default();
	let mut args = args.collect::<Vec<_>>();

	let big_endian = args.first().map(|arg| arg == "--big-endian").unwrap_or(false);
	if big_endian {
		args.remove(0);
	}
	if args.len() < 3 || args.len() > 4 {
		eprintln!("Usage: {:?} [--big-endian] <info> <abbrev> <str> [line]", name);
		std::process::exit(1)
	}

	let info = map(&args[0])?;
	let abbrev = map(&args[1])?;
	let str = map(&args[2])?;
	let line = match args.get(3) {
		Some(path) => map(path)?,
		None => None
	};

	let sections = DwarfSections {
		info: bytes(&info),
		abbrev: bytes(&abbrev),
		str: bytes(&str),
		line: bytes(&line),
	};
	if big_endian {
		process::<BigEndian>(sections)
	} else {
		process::<LittleEndian>(sections)
	}
}

fn process<B>(sections: DwarfSections) -> anyhow::Result<()>
	where B: ByteOrder {

	let mut symbols = SymbolTable::new();
	let summary = Dwarf::<B>::new(sections, ModuleInfo::default())
		.parse(&mut symbols);

	println!("compilation units: {} of {} decoded", summary.processed(), summary.units.len());
	for unit in summary.units.iter().filter(|unit| !unit.processed) {
		println!("  skipped unit at 0x{:08x}", unit.offset);
	}

	let mut kinds = BTreeMap::<&str, usize>::new();
	for (_, symbol) in symbols.iter() {
		*kinds.entry(symbol.kind_name()).or_default() += 1;
	}
	println!("symbols: {}", symbols.len());
	for (kind, count) in kinds {
		println!("  {}: {}", kind, count);
	}

	println!("sources: {}", symbols.sources().count());
	println!("{:?}", symbols.capabilities());

	Ok(())
}
