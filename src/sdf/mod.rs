//! Scene Description Foundations

mod abstract_data;
mod change_list;
mod layer;
mod list_op;
mod path;
mod path_parser;
mod path_table;
mod retiming;
mod schema;

pub use abstract_data::*;
pub use change_list::*;
pub use layer::*;
pub use list_op::*;
pub use path::*;
pub use path_parser::PathError;
pub use path_table::*;
pub use retiming::*;
pub use schema::{CHILDREN_KEYS, FIELD_KEYS};

use std::collections::BTreeMap;
use std::sync::Arc;

/// An enum that specifies the type of an object.
/// Objects have fields and are adressable by path.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecType {
	Unknown = 0,
	Attribute,
	Connection,
	Expression,
	Mapper,
	MapperArg,
	Prim,
	PseudoRoot,
	Relationship,
	RelationshipTarget,
	Variant,
	VariantSet,
}

/// An enum that identifies the possible specifiers for a PrimSpec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specifier {
	Def,
	Over,
	Class,
}

/// Map of variant set name to selected variant name.
pub type VariantSelectionMap = BTreeMap<String, String>;

/// Represents a reference and all its meta data.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reference {
	/// The asset path to the external layer.
	pub asset_path: String,
	/// The path to the referenced prim in the external layer.
	pub prim_path: Path,
	/// The layer offset to transform time.
	pub layer_offset: Retiming,
}

impl Reference {
	pub fn new(asset_path: impl Into<String>, prim_path: impl Into<Path>) -> Self {
		Self {
			asset_path: asset_path.into(),
			prim_path: prim_path.into(),
			layer_offset: Retiming::identity(),
		}
	}

	/// An internal reference targets a prim in the referencing layer stack.
	pub fn internal(prim_path: impl Into<Path>) -> Self {
		Self::new(String::new(), prim_path)
	}

	pub fn is_internal(&self) -> bool {
		self.asset_path.is_empty()
	}
}

/// Represents a payload and all its meta data.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Payload {
	/// The asset path to the external layer.
	pub asset_path: String,
	/// The root prim path to the referenced prim in the external layer.
	pub prim_path: Path,
	/// The layer offset to transform time.
	pub layer_offset: Retiming,
}

impl Payload {
	pub fn new(asset_path: impl Into<String>, prim_path: impl Into<Path>) -> Self {
		Self {
			asset_path: asset_path.into(),
			prim_path: prim_path.into(),
			layer_offset: Retiming::identity(),
		}
	}
}

/// A single relocate specifying a source and target path for a relocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relocate {
	pub source: Path,
	pub target: Path,
}

impl Relocate {
	pub fn new(source: impl Into<Path>, target: impl Into<Path>) -> Self {
		Self {
			source: source.into(),
			target: target.into(),
		}
	}
}

/// A path in a specific layer.
#[derive(Debug, Clone)]
pub struct Site {
	pub layer: Arc<Layer>,
	pub path: Path,
}

impl Site {
	pub fn new(layer: Arc<Layer>, path: Path) -> Self {
		Self { layer, path }
	}
}

impl PartialEq for Site {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.layer, &other.layer) && self.path == other.path
	}
}

impl Eq for Site {}

impl PartialOrd for Site {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Site {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.layer
			.identifier()
			.cmp(other.layer.identifier())
			.then_with(|| self.path.cmp(&other.path))
	}
}

impl std::fmt::Display for Site {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "@{}@<{}>", self.layer.identifier(), self.path)
	}
}
