use super::graph::NodeRef;
use super::layer_stack::LayerStack;
use super::map_function::MapFunction;
use super::prim_index::PrimIndex;
use super::ArcType;
use crate::sdf;
use enumset::{EnumSet, EnumSetType, enum_set};

/// Classifies how a prim index depends on a site.
///
/// A dependency is either on the root site, direct (introduced by an arc on
/// the prim itself), ancestral (introduced by an arc on a namespace
/// ancestor), or a mix of the last two along the node's parent chain.
/// Independently, it is virtual when the node contributes no opinions but
/// could start to if specs were authored at its site.
#[derive(EnumSetType, Debug)]
pub enum DependencyType {
	Root,
	PurelyDirect,
	PartlyDirect,
	Ancestral,
	Virtual,
	NonVirtual,
}

pub type DependencyFlags = EnumSet<DependencyType>;

pub const DEPENDENCY_TYPE_DIRECT: DependencyFlags =
	enum_set!(DependencyType::PurelyDirect | DependencyType::PartlyDirect);

pub const DEPENDENCY_TYPE_ANY_NON_VIRTUAL: DependencyFlags = enum_set!(
	DependencyType::Root
		| DependencyType::PurelyDirect
		| DependencyType::PartlyDirect
		| DependencyType::Ancestral
		| DependencyType::NonVirtual
);

pub const DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL: DependencyFlags = enum_set!(
	DependencyType::Root
		| DependencyType::PurelyDirect
		| DependencyType::PartlyDirect
		| DependencyType::Ancestral
		| DependencyType::NonVirtual
		| DependencyType::Virtual
);

/// Classifies the dependency the prim index owning `node` has on its site.
pub fn classify_node_dependency(node: NodeRef) -> DependencyFlags {
	if node.is_root_node() {
		return enum_set!(DependencyType::Root);
	}

	let mut any_direct = false;
	let mut any_ancestral = false;
	let mut current = Some(node);
	while let Some(n) = current.filter(|n| !n.is_root_node()) {
		if n.is_due_to_ancestor() {
			any_ancestral = true;
		} else {
			any_direct = true;
		}
		current = n.parent_node();
	}

	let mut flags = if any_direct && any_ancestral {
		enum_set!(DependencyType::PartlyDirect)
	} else if any_direct {
		enum_set!(DependencyType::PurelyDirect)
	} else {
		enum_set!(DependencyType::Ancestral)
	};

	// Class-based arcs without specs exist only to be picked up later.
	if is_virtual(node) {
		flags |= DependencyType::Virtual;
	} else {
		flags |= DependencyType::NonVirtual;
	}
	flags
}

fn is_virtual(node: NodeRef) -> bool {
	node.arc_type().is_class_based() && !node.subtree_has_specs()
}

/// Whether the dependency index records dependencies with these flags.
/// The rest are recovered by walking namespace when queried.
pub fn should_store_dependency(flags: DependencyFlags) -> bool {
	!flags.is_disjoint(DEPENDENCY_TYPE_DIRECT)
}

/// Describes one dependency of a cached index on a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
	/// The path of the dependent prim or property index.
	pub index_path: sdf::Path,
	/// The path of the site in the queried layer stack.
	pub site_path: sdf::Path,
	/// Maps paths in the site's namespace to the index's namespace.
	pub map_func: MapFunction,
}

pub type DependencyVector = Vec<Dependency>;

impl std::fmt::Display for Dependency {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "<{}> depends on <{}>", self.index_path, self.site_path)
	}
}

impl std::fmt::Display for DependencyType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Root => "root",
			Self::PurelyDirect => "purely-direct",
			Self::PartlyDirect => "partly-direct",
			Self::Ancestral => "ancestral",
			Self::Virtual => "virtual",
			Self::NonVirtual => "non-virtual",
		})
	}
}

/// Human-readable form of a set of dependency flags.
pub fn dependency_flags_to_string(flags: DependencyFlags) -> String {
	if flags.is_empty() {
		return "none".to_string();
	}
	flags
		.iter()
		.map(|flag| flag.to_string())
		.collect::<Vec<_>>()
		.join(", ")
}

/// Calls `node_fn` for each node of `index` whose site contains
/// `site_path` in a layer stack accepted by `matches_layer_stack`, along
/// with the node's dependency flags.
///
/// Culled nodes are visited too: they contribute nothing now but may once
/// specs appear at their sites.
pub(crate) fn for_each_dependent_node<'a>(
	site_path: &sdf::Path,
	matches_layer_stack: impl Fn(&LayerStack) -> bool,
	index: &'a PrimIndex,
	mut node_fn: impl FnMut(NodeRef<'a>, DependencyFlags),
) {
	for node in index.node_range() {
		if !site_path.has_prefix(node.path()) || !matches_layer_stack(node.layer_stack()) {
			continue;
		}
		node_fn(node, classify_node_dependency(node));
	}
}

/// The path in the root node's namespace that `node` contributes
/// `site_path` to, or the empty path if the node cannot map it.
pub(crate) fn translate_to_index_path(node: NodeRef, site_path: &sdf::Path) -> sdf::Path {
	if node.arc_type() == ArcType::Relocate {
		// Relocate nodes map their whole source namespace onto the parent.
		let Some(parent) = node.parent_node() else {
			return sdf::Path::empty_path();
		};
		return site_path.replace_prefix(node.path(), parent.path());
	}
	node.map_to_root().map_source_to_target(site_path)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ar;
	use crate::pcp::{LayerStackIdentifier, LayerStackRegistry, PrimIndexInputs, compute_prim_index};
	use std::sync::Arc;

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	fn index_for(root: &Arc<sdf::Layer>, resolver: Arc<ar::MemoryResolver>, path: &str) -> PrimIndex {
		let registry = LayerStackRegistry::new(resolver, String::new(), false);
		let layer_stack = registry.find_or_create(&LayerStackIdentifier::new(root.clone()), &mut Vec::new());
		let inputs = PrimIndexInputs::new(&registry).cull(false);
		compute_prim_index(&p(path), &layer_stack, &inputs).prim_index
	}

	#[test]
	fn classifies_direct_and_ancestral_arcs() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		root.define_prim("/Ref/Child");
		root.define_prim("/A/Child");
		root.add_reference(&p("/A"), sdf::Reference::internal("/Ref"));
		root.add_inherit_path(&p("/A/Child"), p("/Class"));

		let index = index_for(&root, resolver, "/A/Child");
		let flags: Vec<(String, DependencyFlags)> = index
			.node_range()
			.into_iter()
			.map(|node| (node.path().to_string(), classify_node_dependency(node)))
			.collect();

		assert_eq!(flags[0], ("/A/Child".to_string(), enum_set!(DependencyType::Root)));
		let class = flags.iter().find(|(path, _)| path == "/Class").unwrap();
		assert_eq!(
			class.1,
			DependencyType::PurelyDirect | DependencyType::Virtual
		);
		let reference = flags.iter().find(|(path, _)| path == "/Ref/Child").unwrap();
		assert_eq!(
			reference.1,
			DependencyType::Ancestral | DependencyType::NonVirtual
		);
		assert!(should_store_dependency(class.1));
		assert!(!should_store_dependency(reference.1));
		assert!(!should_store_dependency(flags[0].1));
	}

	#[test]
	fn flag_sets_nest() {
		assert!(DEPENDENCY_TYPE_ANY_NON_VIRTUAL.is_superset(DEPENDENCY_TYPE_DIRECT));
		assert!(DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL.is_superset(DEPENDENCY_TYPE_ANY_NON_VIRTUAL));
		assert!(!DEPENDENCY_TYPE_ANY_NON_VIRTUAL.contains(DependencyType::Virtual));
		assert_eq!(dependency_flags_to_string(EnumSet::empty()), "none");
		assert_eq!(
			dependency_flags_to_string(DependencyType::Root | DependencyType::NonVirtual),
			"root, non-virtual"
		);
	}
}
