use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use serde_yaml::Value;

const TABLES: &str = "dwarf-consts/dwarf2.yml";

/// How the constants of a table get written out.
struct Table {
	ty: &'static str,
	max: u64,
	/// Name of the generated function mapping values back to their names.
	lookup: Option<&'static str>,
}

const U8: Table = Table { ty: "u8", max: u8::MAX as u64, lookup: None };
const U16: Table = Table { ty: "u16", max: u16::MAX as u64, lookup: None };

fn main() {
	println!("cargo:rerun-if-changed={}", TABLES);

	let consts = File::open(TABLES).unwrap();
	let data: Vec<Value> = serde_yaml::from_reader(consts).unwrap();

	let mut map = HashMap::new();
	map.insert("Tag encodings", Table { lookup: Some("tag_name"), ..U16 });
	map.insert("Child determination encodings", U8);
	map.insert("Attribute encodings", Table { lookup: Some("attribute_name"), ..U16 });
	map.insert("Attribute form encodings", U8);
	map.insert("Location operation encodings", U8);
	map.insert("Base type encoding values", U8);
	map.insert("Calling convention encodings", U8);
	map.insert("Inline codes", U8);
	map.insert("Standard opcode encodings", U8);
	map.insert("Extended opcode encodings", U8);

	let mut out_dir = std::env::var_os("OUT_DIR").unwrap();
	out_dir.push("/consts.rs");

	let mut target = File::create(out_dir).unwrap();
	for value in data {
		let value = value.as_mapping().unwrap();
		let name = value.get("name").unwrap().as_str().unwrap();
		let table = match map.get(name) {
			Some(table) => table,
			None => panic!("unknown table name in {}: {}", TABLES, name)
		};

		writeln!(target, "\n/* {} */", name).unwrap();
		let mut entries = Vec::new();
		for item in value.get("body").unwrap().as_sequence().unwrap() {
			let item = item.as_sequence().unwrap();
			let name = item.get(0).unwrap().as_str().unwrap();
			let value = item.get(1).unwrap().as_u64().unwrap();
			if name == "Reserved" { continue }

			assert!(value <= table.max, "{} does not fit in a {}", name, table.ty);
			writeln!(target, "pub const {}: {} = 0x{:x};", name, table.ty, value).unwrap();
			entries.push(name);
		}

		if let Some(lookup) = table.lookup {
			write_lookup(&mut target, lookup, table.ty, &entries).unwrap();
		}
	}
}

/// Write a function giving the name of a constant out of its value. Ranges
/// reserved for vendors have no names.
fn write_lookup(file: &mut dyn Write, lookup: &str, ty: &str, names: &[&str]) -> std::io::Result<()> {
	writeln!(file, "\npub fn {}(value: {}) -> Option<&'static str> {{", lookup, ty)?;
	writeln!(file, "\tmatch value {{")?;
	for name in names.iter().filter(|name| !name.ends_with("_lo_user") && !name.ends_with("_hi_user")) {
		writeln!(file, "\t\t{} => Some(\"{}\"),", name, name)?;
	}
	writeln!(file, "\t\t_ => None")?;
	writeln!(file, "\t}}")?;
	writeln!(file, "}}")
}
