//! DWARF 2 constant tables.
//!
//! The constants are generated at build time from `dwarf-consts/dwarf2.yml`,
//! along with `tag_name` and `attribute_name` for turning tags and attributes
//! back into their names.

/* DWARF names its constants in mixed case. */
#![allow(non_upper_case_globals)]

include!(concat!(env!("OUT_DIR"), "/consts.rs"));
