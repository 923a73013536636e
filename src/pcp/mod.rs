//! Prim Cache Population
//!
//! Computes and caches prim indexes (the composition graphs of prims),
//! tracks which layer stack sites every cached index depends on, and
//! answers the invalidation and namespace editing questions those
//! dependencies make possible.

mod cache;
mod changes;
mod dependencies;
mod dependency;
pub mod diagnostic;
mod errors;
mod graph;
mod indexer;
mod layer_stack;
mod layer_stack_registry;
mod lifeboat;
mod map_function;
mod namespace_edits;
mod options;
mod parallel;
mod prim_index;
mod property_index;

pub use cache::*;
pub use changes::*;
pub use dependencies::*;
pub use dependency::*;
pub use errors::{CodingErrorMark, Error, ErrorVector};
pub use graph::*;
pub use indexer::*;
pub use layer_stack::*;
pub use layer_stack_registry::*;
pub use lifeboat::*;
pub use map_function::*;
pub use namespace_edits::*;
pub use options::*;
pub use prim_index::*;
pub use property_index::*;

/// Describes the type of arc connecting two nodes in the prim index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArcType {
	// The arcs are listed in strength order.
	// Root is the root node of the prim index and has no parent node.
	Root,
	/// An inherit authored in the node's own layer stack.
	LocalInherit,
	/// An inherit implied into the root layer stack by a local inherit
	/// authored across a reference or payload.
	GlobalInherit,
	Variant,
	Relocate,
	Reference,
	Payload,
	LocalSpecialize,
	GlobalSpecialize,
}

impl ArcType {
	/// Lower values are stronger.
	pub fn strength(self) -> u8 {
		self as u8
	}

	pub fn is_inherit(self) -> bool {
		matches!(self, Self::LocalInherit | Self::GlobalInherit)
	}

	pub fn is_specialize(self) -> bool {
		matches!(self, Self::LocalSpecialize | Self::GlobalSpecialize)
	}

	/// Class-based arcs target sites that any prim may opt into.
	pub fn is_class_based(self) -> bool {
		self.is_inherit() || self.is_specialize()
	}

	/// The implied counterpart of a class-based arc.
	pub(crate) fn implied(self) -> Self {
		match self {
			Self::LocalInherit => Self::GlobalInherit,
			Self::LocalSpecialize => Self::GlobalSpecialize,
			other => other,
		}
	}
}

impl std::fmt::Display for ArcType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Root => "root",
			Self::LocalInherit => "inherit",
			Self::GlobalInherit => "implied inherit",
			Self::Variant => "variant",
			Self::Relocate => "relocate",
			Self::Reference => "reference",
			Self::Payload => "payload",
			Self::LocalSpecialize => "specialize",
			Self::GlobalSpecialize => "implied specialize",
		})
	}
}
