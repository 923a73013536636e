use super::errors::Error;
use super::graph::{NodeRef, PrimIndexGraph};
use crate::sdf::{self, FIELD_KEYS};
use crate::tf;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A spec contributing to a prim: a layer of some node's layer stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedSite {
	pub node_index: u16,
	pub layer_index: u16,
}

/// An index of all the sites of scene description that contribute
/// opinions to a specific prim, under composition semantics.
///
/// The default value is the invalid (not yet computed) index. Clones share
/// the node graph.
#[derive(Debug, Clone, Default)]
pub struct PrimIndex {
	graph: Option<Arc<PrimIndexGraph>>,
	prim_stack: Vec<CompressedSite>,
	local_errors: Vec<Error>,
	has_payloads: bool,
	culled: bool,
}

impl PrimIndex {
	pub(crate) fn new(
		mut graph: PrimIndexGraph,
		local_errors: Vec<Error>,
		has_payloads: bool,
		cull: bool,
	) -> Self {
		let prim_stack = compute_prim_stack(&mut graph, cull);
		Self {
			graph: Some(Arc::new(graph)),
			prim_stack,
			local_errors,
			has_payloads,
			culled: cull,
		}
	}

	/// Returns true if this index has been computed.
	pub fn is_valid(&self) -> bool {
		self.graph.as_ref().is_some_and(|g| !g.is_empty())
	}

	pub fn graph(&self) -> Option<&Arc<PrimIndexGraph>> {
		self.graph.as_ref()
	}

	pub fn root_node(&self) -> Option<NodeRef<'_>> {
		self.graph
			.as_deref()
			.filter(|g| !g.is_empty())
			.map(PrimIndexGraph::root_node)
	}

	/// The path of the prim this index is for, or the empty path.
	pub fn path(&self) -> sdf::Path {
		self.root_node()
			.map(|n| n.path().clone())
			.unwrap_or_default()
	}

	/// All nodes in strength order.
	pub fn node_range(&self) -> Vec<NodeRef<'_>> {
		match self.graph.as_deref() {
			Some(graph) => graph
				.strength_order()
				.into_iter()
				.map(|i| graph.node(i))
				.collect(),
			None => Vec::new(),
		}
	}

	/// Specs contributing to this prim, strongest first.
	pub fn prim_stack(&self) -> Vec<(Arc<sdf::Layer>, sdf::Path, NodeRef<'_>)> {
		let Some(graph) = self.graph.as_deref() else {
			return Vec::new();
		};
		self.prim_stack
			.iter()
			.map(|site| {
				let node = graph.node(site.node_index);
				let layer = node.layer_stack().layers()[site.layer_index as usize].clone();
				(layer, node.path().clone(), node)
			})
			.collect()
	}

	pub fn compressed_prim_stack(&self) -> &[CompressedSite] {
		&self.prim_stack
	}

	/// Returns true if any node contributes a spec.
	pub fn has_specs(&self) -> bool {
		!self.prim_stack.is_empty()
	}

	pub fn has_any_payloads(&self) -> bool {
		self.has_payloads
	}

	/// Errors encountered while computing this index.
	pub fn local_errors(&self) -> &[Error] {
		&self.local_errors
	}

	/// Layers contributing specs to this prim.
	pub fn used_layers(&self) -> Vec<Arc<sdf::Layer>> {
		let mut seen = BTreeSet::new();
		let mut layers = Vec::new();
		for node in self.node_range() {
			for layer in node.layer_stack().layers() {
				if seen.insert(layer.identifier().to_string()) {
					layers.push(layer.clone());
				}
			}
		}
		layers
	}

	/// Re-scans which nodes have specs and rebuilds the prim stack, keeping
	/// the node graph. Returns whether any specs remain.
	pub(crate) fn update_prim_stack(&mut self) -> bool {
		let Some(graph) = self.graph.as_mut() else {
			return false;
		};
		let graph = Arc::make_mut(graph);
		self.prim_stack = compute_prim_stack(graph, self.culled);
		self.has_specs()
	}
}

fn compute_prim_stack(graph: &mut PrimIndexGraph, cull: bool) -> Vec<CompressedSite> {
	for i in 0..graph.len() {
		let path = graph.site_path(i as u16).clone();
		let node = &mut graph.nodes[i];
		node.has_specs = !node.inert
			&& node
				.layer_stack
				.layers()
				.iter()
				.any(|layer| layer.has_prim_spec(&path));
	}
	for i in 1..graph.len() {
		let culled = cull && !graph.subtree_has_specs(i as u16);
		graph.nodes[i].culled = culled;
	}

	let mut stack = Vec::new();
	for node_index in graph.strength_order() {
		let node = graph.node(node_index);
		if !node.can_contribute_specs() {
			continue;
		}
		for (layer_index, layer) in node.layer_stack().layers().iter().enumerate() {
			if layer.has_prim_spec(node.path()) {
				stack.push(CompressedSite {
					node_index,
					layer_index: layer_index as u16,
				});
			}
		}
	}
	stack
}

/// Queries
impl PrimIndex {
	/// Composes the names of this prim's children, strongest opinions
	/// ordering first, and the names that relocations prohibit.
	pub fn compute_prim_child_names(&self) -> (Vec<tf::Token>, BTreeSet<tf::Token>) {
		let mut names: Vec<tf::Token> = Vec::new();
		let mut prohibited = BTreeSet::new();
		let Some(root) = self.root_node() else {
			return (names, prohibited);
		};

		for node in self.node_range() {
			if !node.can_contribute_specs() {
				continue;
			}
			for layer in node.layer_stack().layers() {
				for name in layer.prim_children(node.path()) {
					if !names.contains(&name) {
						names.push(name);
					}
				}
			}
		}

		// Relocations move children in and out of this prim.
		let path = root.path();
		let layer_stack = root.layer_stack();
		for (target, _) in layer_stack.relocates_target_to_source() {
			if target.parent_path() == *path {
				let name = target.name_token();
				if !names.contains(&name) {
					names.push(name);
				}
			}
		}
		for (source, _) in layer_stack.relocates_source_to_target() {
			if source.parent_path() == *path {
				prohibited.insert(source.name_token());
			}
		}
		names.retain(|name| !prohibited.contains(name));

		(names, prohibited)
	}

	/// Composes the names of this prim's properties.
	pub fn compute_prim_property_names(&self) -> Vec<tf::Token> {
		let mut names: Vec<tf::Token> = Vec::new();
		for node in self.node_range() {
			if !node.can_contribute_specs() {
				continue;
			}
			for layer in node.layer_stack().layers() {
				for name in layer.property_children(node.path()) {
					if !names.contains(&name) {
						names.push(name);
					}
				}
			}
		}
		names
	}

	/// The variant selections that apply to this prim, by variant set.
	pub fn variant_selections(&self) -> sdf::VariantSelectionMap {
		let mut selections = sdf::VariantSelectionMap::new();
		for node in self.node_range() {
			if node.arc_type() == super::ArcType::Variant {
				let (set, variant) = node.path().variant_selection();
				selections.entry(set).or_insert(variant);
			}
		}
		selections
	}

	/// The variant selected for `variant_set`, if any.
	pub fn variant_selection(&self, variant_set: &str) -> Option<String> {
		self.variant_selections().remove(variant_set)
	}

	/// The strongest authored specifier of this prim.
	pub fn composed_specifier(&self) -> Option<sdf::Specifier> {
		self.prim_stack()
			.iter()
			.find_map(|(layer, path, _)| layer.get::<sdf::Specifier>(path, &FIELD_KEYS.specifier))
	}
}
