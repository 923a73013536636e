use super::ArcType;
use super::errors::{Error, coding_error};
use super::graph::{INVALID_NODE_INDEX, Node, PrimIndexGraph};
use super::layer_stack::{LayerStack, LayerStackIdentifier, format_args};
use super::layer_stack_registry::LayerStackRegistry;
use super::map_function::MapFunction;
use super::options::culling_enabled;
use super::prim_index::PrimIndex;
use crate::sdf::{self, FIELD_KEYS};
use crate::{ar, tf};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Variant names to try, in order, for variant sets without an authored
/// selection.
pub type VariantFallbackMap = BTreeMap<String, Vec<String>>;

/// Prim index paths whose payloads are included.
pub type PayloadSet = HashSet<sdf::Path>;

/// Decides payload inclusion for prims not in the included set.
pub type IncludePayloadPredicate<'a> = &'a (dyn Fn(&sdf::Path) -> bool + Sync);

/// Contributes file format arguments used when opening payload layers.
pub trait PayloadDecorator: Send + Sync {
	fn decorate_payload(
		&self,
		prim_index_path: &sdf::Path,
		payload: &sdf::Payload,
		args: &mut ar::FileFormatArguments,
	);

	/// Whether changing `field` on the prim spec at `path` in `layer` can
	/// change the arguments [PayloadDecorator::decorate_payload] produces.
	fn is_field_relevant_for_decoration(&self, _layer: &sdf::Layer, _path: &sdf::Path, _field: &tf::Token) -> bool {
		false
	}
}

/// How the payloads of a prim index were treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadState {
	#[default]
	NoPayload,
	IncludedByIncludeSet,
	ExcludedByIncludeSet,
	IncludedByPredicate,
	ExcludedByPredicate,
}

/// Everything prim indexing reads besides the path and layer stack.
#[derive(Clone, Copy)]
pub struct PrimIndexInputs<'a> {
	registry: &'a LayerStackRegistry,
	variant_fallbacks: Option<&'a VariantFallbackMap>,
	included_payloads: Option<&'a RwLock<PayloadSet>>,
	include_payload_predicate: Option<IncludePayloadPredicate<'a>>,
	payload_decorator: Option<&'a dyn PayloadDecorator>,
	parent_index: Option<&'a PrimIndex>,
	cull: bool,
	usd: bool,
}

impl<'a> PrimIndexInputs<'a> {
	pub fn new(registry: &'a LayerStackRegistry) -> Self {
		Self {
			registry,
			variant_fallbacks: None,
			included_payloads: None,
			include_payload_predicate: None,
			payload_decorator: None,
			parent_index: None,
			cull: culling_enabled(),
			usd: registry.is_usd(),
		}
	}

	pub fn variant_fallbacks(mut self, fallbacks: &'a VariantFallbackMap) -> Self {
		self.variant_fallbacks = Some(fallbacks);
		self
	}

	pub fn included_payloads(mut self, payloads: &'a RwLock<PayloadSet>) -> Self {
		self.included_payloads = Some(payloads);
		self
	}

	pub fn include_payload_predicate(mut self, predicate: Option<IncludePayloadPredicate<'a>>) -> Self {
		self.include_payload_predicate = predicate;
		self
	}

	pub fn payload_decorator(mut self, decorator: Option<&'a dyn PayloadDecorator>) -> Self {
		self.payload_decorator = decorator;
		self
	}

	/// The already computed index of the parent prim, if any.
	pub fn parent_index(mut self, parent: Option<&'a PrimIndex>) -> Self {
		self.parent_index = parent;
		self
	}

	pub fn cull(mut self, cull: bool) -> Self {
		self.cull = cull;
		self
	}

	pub fn usd(mut self, usd: bool) -> Self {
		self.usd = usd;
		self
	}
}

#[derive(Debug, Default)]
pub struct PrimIndexOutputs {
	pub prim_index: PrimIndex,
	pub all_errors: Vec<Error>,
	pub payload_state: PayloadState,
}

impl PrimIndexOutputs {
	/// Whether a payload was included only because the inclusion predicate
	/// accepted it. The cache adds such paths to its included set.
	pub fn included_discovered_payload(&self) -> bool {
		self.payload_state == PayloadState::IncludedByPredicate
	}
}

/// Computes the prim index for `path` in `layer_stack`.
///
/// The index starts from the parent prim's index, whose nodes carry over as
/// ancestral arcs, and adds the arcs authored for the prim itself.
pub fn compute_prim_index(
	path: &sdf::Path,
	layer_stack: &Arc<LayerStack>,
	inputs: &PrimIndexInputs,
) -> PrimIndexOutputs {
	if !path.is_absolute_path() || !path.is_absolute_root_or_prim_path() {
		coding_error!("cannot compute a prim index for <{}>", path);
		return PrimIndexOutputs::default();
	}

	let _span = tracing::trace_span!("compute_prim_index", %path).entered();
	let _binder = ar::ResolverContextBinder::new(&layer_stack.identifier().resolver_context);

	let mut indexer = Indexer {
		inputs,
		path: path.clone(),
		depth: path.element_count() as u16,
		root_layer_stack: layer_stack.clone(),
		graph: build_initial_graph(path, layer_stack, inputs),
		errors: Vec::new(),
		payload_state: PayloadState::NoPayload,
		has_payloads: false,
		capacity_exceeded: false,
	};

	let inherited = indexer.graph.len() as u16;
	for node in 0..inherited {
		let site = indexer.graph.site_path(node).clone();
		indexer.compose_node(node, &site);
	}
	if !inputs.usd {
		indexer.eval_relocations();
	}

	let Indexer {
		graph,
		errors,
		payload_state,
		has_payloads,
		..
	} = indexer;
	PrimIndexOutputs {
		prim_index: PrimIndex::new(graph, errors.clone(), has_payloads, inputs.cull),
		all_errors: errors,
		payload_state,
	}
}

/// Starts the graph for `path` from its parent's graph with the child name
/// appended to every site.
fn build_initial_graph(path: &sdf::Path, layer_stack: &Arc<LayerStack>, inputs: &PrimIndexInputs) -> PrimIndexGraph {
	if path.is_absolute_root_path() {
		return PrimIndexGraph::with_root(layer_stack.clone(), path.clone());
	}

	let parent_path = path.parent_path();
	let computed;
	let parent = match inputs
		.parent_index
		.filter(|parent| parent.is_valid() && parent.path() == parent_path)
	{
		Some(parent) => parent,
		None => {
			let parent_inputs = PrimIndexInputs {
				parent_index: None,
				..*inputs
			};
			computed = compute_prim_index(&parent_path, layer_stack, &parent_inputs).prim_index;
			&computed
		}
	};

	let Some(parent_graph) = parent.graph().filter(|g| !g.is_empty()) else {
		return PrimIndexGraph::with_root(layer_stack.clone(), path.clone());
	};

	let mut graph = PrimIndexGraph::clone(parent_graph);
	let name = path.name_token();
	for node in 0..graph.len() as u16 {
		let site = graph.site_path(node).append_child(&name);
		graph.set_site_path(node, site);
	}
	for node in &mut graph.nodes {
		node.has_specs = false;
		node.culled = false;
	}
	graph.nodes[0].namespace_depth = path.element_count() as u16;

	// Prims at relocation sources are elided from namespace.
	if !inputs.usd && layer_stack.relocates_source_to_target().contains_key(path) {
		graph.nodes[0].inert = true;
	}
	graph
}

/// Maps `source` in a child namespace onto `target` in its parent's.
fn arc_map(source: &sdf::Path, target: &sdf::Path, offset: sdf::Retiming) -> MapFunction {
	MapFunction::new(
		[
			(source.clone(), target.clone()),
			(sdf::Path::absolute_root_path(), sdf::Path::absolute_root_path()),
		],
		offset,
	)
}

/// The paths whose arcs apply to `site`: the site itself and its ancestors
/// up to and including `stop`.
fn check_paths(site: &sdf::Path, stop: &sdf::Path) -> Vec<sdf::Path> {
	let mut paths = Vec::new();
	for path in site.ancestors_range() {
		let done = path == *stop;
		paths.push(path);
		if done {
			break;
		}
	}
	paths
}

struct Indexer<'a> {
	inputs: &'a PrimIndexInputs<'a>,
	path: sdf::Path,
	depth: u16,
	root_layer_stack: Arc<LayerStack>,
	graph: PrimIndexGraph,
	errors: Vec<Error>,
	payload_state: PayloadState,
	has_payloads: bool,
	capacity_exceeded: bool,
}

impl Indexer<'_> {
	/// Evaluates the arcs that apply to `node_idx`'s site, from the site up
	/// to `ancestral_stop`, and recursively the arcs of the nodes they add.
	fn compose_node(&mut self, node_idx: u16, ancestral_stop: &sdf::Path) {
		if self.graph.nodes[node_idx as usize].inert {
			return;
		}
		let site_path = self.graph.site_path(node_idx).clone();
		let checks = check_paths(&site_path, ancestral_stop);

		for check_path in &checks {
			self.eval_class_arcs(node_idx, check_path, &site_path, ArcType::LocalInherit);
		}
		for check_path in &checks {
			self.eval_variants(node_idx, check_path, &site_path);
		}
		for check_path in &checks {
			self.eval_references_or_payloads(node_idx, check_path, &site_path, ArcType::Reference);
		}
		for check_path in &checks {
			self.eval_references_or_payloads(node_idx, check_path, &site_path, ArcType::Payload);
		}
		for check_path in &checks {
			self.eval_class_arcs(node_idx, check_path, &site_path, ArcType::LocalSpecialize);
		}
	}

	fn layer_stack(&self, node_idx: u16) -> Arc<LayerStack> {
		self.graph.nodes[node_idx as usize].layer_stack.clone()
	}

	/// Adds an arc below `parent`, rejecting arcs whose target site is
	/// already in namespace above or below a site on the parent chain.
	fn add_arc(
		&mut self,
		parent: u16,
		origin: u16,
		arc_type: ArcType,
		layer_stack: Arc<LayerStack>,
		site_path: sdf::Path,
		map_to_parent: MapFunction,
	) -> Option<u16> {
		if arc_type != ArcType::Variant {
			let mut current = parent;
			while current != INVALID_NODE_INDEX {
				let node = &self.graph.nodes[current as usize];
				let node_path = self.graph.site_path(current);
				if Arc::ptr_eq(&node.layer_stack, &layer_stack)
					&& (site_path.has_prefix(node_path) || node_path.has_prefix(&site_path))
				{
					self.errors.push(Error::ArcCycle {
						site_path: self.graph.site_path(parent).clone(),
						target: format!("{layer_stack}<{site_path}>"),
						arc_type,
					});
					return None;
				}
				current = node.parent_index;
			}
		}

		let mut node = Node::new(layer_stack, parent, origin, arc_type, map_to_parent);
		node.namespace_depth = self.depth;
		match self.graph.add_child(parent, node, site_path) {
			Some(index) => Some(index),
			None => {
				if !self.capacity_exceeded {
					self.capacity_exceeded = true;
					self.errors.push(Error::CapacityExceeded {
						site_path: self.path.clone(),
					});
				}
				None
			}
		}
	}

	fn eval_relocations(&mut self) {
		let Some(source) = self
			.root_layer_stack
			.relocates_target_to_source()
			.get(&self.path)
			.cloned()
		else {
			return;
		};
		let map = arc_map(&source, &self.path, sdf::Retiming::identity());
		let layer_stack = self.root_layer_stack.clone();
		if let Some(index) = self.add_arc(0, 0, ArcType::Relocate, layer_stack, source, map) {
			self.compose_node(index, &sdf::Path::absolute_root_path());
		}
	}

	/// Inherits or specializes, with their implied counterparts in the
	/// root layer stack.
	fn eval_class_arcs(&mut self, node_idx: u16, check_path: &sdf::Path, site_path: &sdf::Path, arc_type: ArcType) {
		let layer_stack = self.layer_stack(node_idx);
		let field = if arc_type.is_inherit() {
			&FIELD_KEYS.inherit_paths
		} else {
			&FIELD_KEYS.specializes
		};

		for class_path in compose_site_paths(&layer_stack, check_path, field) {
			if !class_path.is_absolute_path() || !class_path.is_prim_path() {
				self.errors.push(Error::InvalidPrimPath {
					site_path: site_path.clone(),
					target_path: class_path,
					arc_type,
				});
				continue;
			}

			let class_site = site_path.replace_prefix_without_targets(check_path, &class_path);
			let map = arc_map(&class_path, check_path, sdf::Retiming::identity());
			let Some(local) = self.add_arc(node_idx, node_idx, arc_type, layer_stack.clone(), class_site.clone(), map) else {
				continue;
			};
			self.compose_node(local, &class_site);

			if Arc::ptr_eq(&layer_stack, &self.root_layer_stack) {
				continue;
			}

			// Classes across a reference also apply in the root layer stack.
			let to_root = self.graph.map_to_root(node_idx);
			let class_root = to_root.map_source_to_target(&class_path);
			let inheritor_root = to_root.map_source_to_target(check_path);
			let implied_site = to_root.map_source_to_target(&class_site);
			if class_root.is_empty() || inheritor_root.is_empty() || implied_site.is_empty() {
				continue;
			}
			let implied_arc = arc_type.implied();
			let exists = self.graph.children_indices(0).into_iter().any(|child| {
				self.graph.nodes[child as usize].arc_type == implied_arc
					&& *self.graph.site_path(child) == implied_site
			});
			if exists {
				continue;
			}
			let map = arc_map(&class_root, &inheritor_root, sdf::Retiming::identity());
			let root_layer_stack = self.root_layer_stack.clone();
			if let Some(implied) = self.add_arc(0, local, implied_arc, root_layer_stack, implied_site.clone(), map) {
				self.compose_node(implied, &implied_site);
			}
		}
	}

	fn eval_variants(&mut self, node_idx: u16, check_path: &sdf::Path, site_path: &sdf::Path) {
		if !check_path.is_prim_or_prim_variant_selection_path() {
			return;
		}
		let layer_stack = self.layer_stack(node_idx);

		for variant_set in compose_site_strings(&layer_stack, check_path, &FIELD_KEYS.variant_set_names) {
			// Sites already inside a selection of this set.
			let already_selected = site_path.ancestors_range().any(|p| {
				p.is_prim_variant_selection_path()
					&& p.parent_path() == *check_path
					&& p.variant_selection().0 == variant_set
			});
			if already_selected {
				continue;
			}

			let Some(variant) = self.resolve_variant_selection(node_idx, check_path, &variant_set) else {
				continue;
			};
			let variant_path = check_path.append_variant_selection(&variant_set, &variant);
			let variant_site = site_path.replace_prefix_without_targets(check_path, &variant_path);
			let map = arc_map(&variant_path, check_path, sdf::Retiming::identity());
			if let Some(index) = self.add_arc(node_idx, node_idx, ArcType::Variant, layer_stack.clone(), variant_site, map) {
				self.compose_node(index, &variant_path);
			}
		}
	}

	/// The strongest selection authored for `variant_set` anywhere in the
	/// index, else the first fallback with a variant spec.
	fn resolve_variant_selection(&self, node_idx: u16, check_path: &sdf::Path, variant_set: &str) -> Option<String> {
		let root_path = self.graph.map_to_root(node_idx).map_source_to_target(check_path);
		let authored = if root_path.is_empty() {
			authored_variant_selection(&self.graph.nodes[node_idx as usize].layer_stack, check_path, variant_set)
		} else {
			self.graph.strength_order().into_iter().find_map(|index| {
				let local_path = self.graph.map_to_root(index).map_target_to_source(&root_path);
				if local_path.is_empty() {
					return None;
				}
				authored_variant_selection(&self.graph.nodes[index as usize].layer_stack, &local_path, variant_set)
			})
		};
		if let Some(selection) = authored {
			// An empty selection explicitly selects nothing.
			return (!selection.is_empty()).then_some(selection);
		}

		let layer_stack = &self.graph.nodes[node_idx as usize].layer_stack;
		self.inputs
			.variant_fallbacks
			.and_then(|fallbacks| fallbacks.get(variant_set))
			.and_then(|candidates| {
				candidates
					.iter()
					.find(|candidate| {
						layer_stack.has_prim_specs(&check_path.append_variant_selection(variant_set, candidate))
					})
					.cloned()
			})
	}

	fn payloads_included(&mut self) -> bool {
		if self.payload_state == PayloadState::NoPayload {
			let in_set = self
				.inputs
				.included_payloads
				.is_some_and(|set| set.read().contains(&self.path));
			self.payload_state = if in_set {
				PayloadState::IncludedByIncludeSet
			} else if let Some(predicate) = self.inputs.include_payload_predicate {
				if predicate(&self.path) {
					PayloadState::IncludedByPredicate
				} else {
					PayloadState::ExcludedByPredicate
				}
			} else {
				PayloadState::ExcludedByIncludeSet
			};
		}
		matches!(
			self.payload_state,
			PayloadState::IncludedByIncludeSet | PayloadState::IncludedByPredicate
		)
	}

	fn eval_references_or_payloads(
		&mut self,
		node_idx: u16,
		check_path: &sdf::Path,
		site_path: &sdf::Path,
		arc_type: ArcType,
	) {
		if !check_path.is_prim_or_prim_variant_selection_path() {
			return;
		}
		let layer_stack = self.layer_stack(node_idx);
		let resolver = self.inputs.registry.resolver().clone();
		let arcs = compose_site_arcs(&layer_stack, check_path, arc_type, resolver.as_ref());
		if arcs.is_empty() {
			return;
		}
		if arc_type == ArcType::Payload {
			self.has_payloads = true;
			if !self.payloads_included() {
				return;
			}
		}

		for arc in arcs {
			let authoring_layer = layer_stack.layers()[arc.layer_index].clone();

			let target_layer_stack = if arc.identifier.is_empty() {
				layer_stack.clone()
			} else {
				if let Some(canonical) = self
					.inputs
					.registry
					.is_layer_muted(&authoring_layer, &arc.authored_asset_path)
				{
					self.errors.push(Error::MutedAssetPath {
						site_path: site_path.clone(),
						layer: authoring_layer.identifier().to_string(),
						asset_path: arc.authored_asset_path.clone(),
						resolved_asset_path: canonical,
						arc_type,
					});
					continue;
				}

				let mut args = format_args(self.inputs.registry.file_format_target());
				if arc_type == ArcType::Payload
					&& let Some(decorator) = self.inputs.payload_decorator
				{
					let payload = sdf::Payload {
						asset_path: arc.authored_asset_path.clone(),
						prim_path: arc.prim_path.clone(),
						layer_offset: arc.layer_offset,
					};
					decorator.decorate_payload(&self.path, &payload, &mut args);
				}

				let Some(layer) = resolver.open_layer(&ar::identifier_with_args(&arc.identifier, &args)) else {
					self.errors.push(Error::InvalidAssetPath {
						site_path: site_path.clone(),
						layer: authoring_layer.identifier().to_string(),
						asset_path: arc.authored_asset_path.clone(),
						resolved_asset_path: arc.identifier.clone(),
						arc_type,
					});
					continue;
				};
				let identifier = LayerStackIdentifier::new(layer)
					.with_resolver_context(layer_stack.identifier().resolver_context.clone());
				self.inputs
					.registry
					.find_or_create(&identifier, &mut self.errors)
			};

			let prim_path = if arc.prim_path.is_empty() && !arc.identifier.is_empty() {
				target_layer_stack.root_layer().default_prim_as_path()
			} else {
				arc.prim_path.clone()
			};
			if prim_path.is_empty() {
				self.errors.push(Error::UnresolvedPrimPath {
					site_path: site_path.clone(),
					target_layer: target_layer_stack.root_layer().identifier().to_string(),
					unresolved_path: prim_path,
					arc_type,
				});
				continue;
			}
			if !prim_path.is_absolute_path() || !prim_path.is_prim_path() {
				self.errors.push(Error::InvalidPrimPath {
					site_path: site_path.clone(),
					target_path: prim_path,
					arc_type,
				});
				continue;
			}
			if !target_layer_stack.has_prim_specs(&prim_path) {
				self.errors.push(Error::UnresolvedPrimPath {
					site_path: site_path.clone(),
					target_layer: target_layer_stack.root_layer().identifier().to_string(),
					unresolved_path: prim_path,
					arc_type,
				});
				continue;
			}

			let target_site = site_path.replace_prefix_without_targets(check_path, &prim_path);
			let offset = layer_stack.layer_offsets()[arc.layer_index] * arc.layer_offset;
			let map = arc_map(&prim_path, check_path, offset);
			if let Some(index) = self.add_arc(node_idx, node_idx, arc_type, target_layer_stack, target_site, map) {
				self.compose_node(index, &sdf::Path::absolute_root_path());
			}
		}
	}
}

/// A reference or payload with its identifier anchored to the layer that
/// authored it.
#[derive(Debug, Clone)]
struct ArcSpec {
	identifier: String,
	authored_asset_path: String,
	prim_path: sdf::Path,
	layer_offset: sdf::Retiming,
	layer_index: usize,
}

impl PartialEq for ArcSpec {
	fn eq(&self, other: &Self) -> bool {
		self.identifier == other.identifier
			&& self.prim_path == other.prim_path
			&& self.layer_offset == other.layer_offset
	}
}

fn compose_site_arcs(
	layer_stack: &LayerStack,
	path: &sdf::Path,
	arc_type: ArcType,
	resolver: &dyn ar::Resolver,
) -> Vec<ArcSpec> {
	let spec = |layer_index: usize, layer: &sdf::Layer, asset_path: &str, prim_path: &sdf::Path, offset| ArcSpec {
		identifier: if asset_path.is_empty() {
			String::new()
		} else {
			resolver.create_identifier(asset_path, Some(layer.identifier()))
		},
		authored_asset_path: asset_path.to_string(),
		prim_path: prim_path.clone(),
		layer_offset: offset,
		layer_index,
	};

	let mut ops = Vec::new();
	for (layer_index, layer) in layer_stack.layers().iter().enumerate() {
		let op = if arc_type == ArcType::Payload {
			layer
				.get::<sdf::PayloadListOp>(path, &FIELD_KEYS.payload)
				.map(|op| op.map(|p| spec(layer_index, layer.as_ref(), &p.asset_path, &p.prim_path, p.layer_offset)))
		} else {
			layer
				.get::<sdf::ReferenceListOp>(path, &FIELD_KEYS.references)
				.map(|op| op.map(|r| spec(layer_index, layer.as_ref(), &r.asset_path, &r.prim_path, r.layer_offset)))
		};
		if let Some(op) = op {
			ops.push(op);
		}
	}

	sdf::compose_list_ops(ops.iter())
		.into_iter()
		.map(|mut arc| {
			// The strongest layer mentioning the arc is the one that authored it.
			let authored = ops
				.iter()
				.flat_map(|op| {
					[&op.explicit_items, &op.added_items, &op.prepended_items, &op.appended_items]
						.into_iter()
						.flatten()
				})
				.find(|item| **item == arc);
			if let Some(authored) = authored {
				arc.layer_index = authored.layer_index;
				arc.authored_asset_path = authored.authored_asset_path.clone();
			}
			arc
		})
		.collect()
}

fn compose_site_paths(layer_stack: &LayerStack, path: &sdf::Path, field: &tf::Token) -> Vec<sdf::Path> {
	let ops: Vec<sdf::PathListOp> = layer_stack
		.layers()
		.iter()
		.filter_map(|layer| layer.get::<sdf::PathListOp>(path, field))
		.collect();
	sdf::compose_list_ops(ops.iter())
}

fn compose_site_strings(layer_stack: &LayerStack, path: &sdf::Path, field: &tf::Token) -> Vec<String> {
	let ops: Vec<sdf::StringListOp> = layer_stack
		.layers()
		.iter()
		.filter_map(|layer| layer.get::<sdf::StringListOp>(path, field))
		.collect();
	sdf::compose_list_ops(ops.iter())
}

fn authored_variant_selection(layer_stack: &LayerStack, path: &sdf::Path, variant_set: &str) -> Option<String> {
	layer_stack.layers().iter().find_map(|layer| {
		layer
			.get::<sdf::VariantSelectionMap>(path, &FIELD_KEYS.variant_selection)
			.and_then(|selections| selections.get(variant_set).cloned())
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pcp::LayerStackIdentifier;
	use pretty_assertions::assert_eq;

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	struct Fixture {
		resolver: Arc<ar::MemoryResolver>,
		registry: LayerStackRegistry,
		root: Arc<sdf::Layer>,
	}

	impl Fixture {
		fn new() -> Self {
			let resolver = ar::MemoryResolver::new();
			let registry = LayerStackRegistry::new(resolver.clone(), String::new(), false);
			let root = resolver.create_layer("/root.usda");
			Self {
				resolver,
				registry,
				root,
			}
		}

		fn compute(&self, path: &str) -> PrimIndexOutputs {
			let layer_stack = self
				.registry
				.find_or_create(&LayerStackIdentifier::new(self.root.clone()), &mut Vec::new());
			let inputs = PrimIndexInputs::new(&self.registry).cull(false);
			compute_prim_index(&p(path), &layer_stack, &inputs)
		}
	}

	fn arcs(index: &PrimIndex) -> Vec<(ArcType, String)> {
		index
			.node_range()
			.into_iter()
			.map(|node| (node.arc_type(), node.path().to_string()))
			.collect()
	}

	#[test]
	fn references_carry_to_children() {
		let f = Fixture::new();
		let model = f.resolver.create_layer("/model.usda");
		model.define_prim("/Model/Geom");
		model.set_default_prim("Model");
		f.root.define_prim("/World/A");
		f.root
			.add_reference(&p("/World/A"), sdf::Reference::new("model.usda", sdf::Path::empty_path()));

		let outputs = f.compute("/World/A/Geom");
		assert!(outputs.all_errors.is_empty());
		let index = &outputs.prim_index;
		assert_eq!(
			arcs(index),
			vec![
				(ArcType::Root, "/World/A/Geom".to_string()),
				(ArcType::Reference, "/Model/Geom".to_string()),
			]
		);
		let reference = index.node_range()[1];
		assert!(reference.is_due_to_ancestor());
		assert_eq!(
			reference.map_to_root().map_source_to_target(&p("/Model/Geom")),
			p("/World/A/Geom")
		);
	}

	#[test]
	fn variant_selection_and_fallbacks() {
		let f = Fixture::new();
		f.root.define_prim("/A");
		f.root.create_variant_spec(&p("/A"), "shading", "red");
		f.root.create_variant_spec(&p("/A"), "shading", "blue");

		let unselected = f.compute("/A");
		assert_eq!(unselected.prim_index.node_range().len(), 1);

		let layer_stack = f
			.registry
			.find_or_create(&LayerStackIdentifier::new(f.root.clone()), &mut Vec::new());
		let fallbacks = VariantFallbackMap::from([(
			"shading".to_string(),
			vec!["green".to_string(), "blue".to_string()],
		)]);
		let inputs = PrimIndexInputs::new(&f.registry).variant_fallbacks(&fallbacks);
		let with_fallback = compute_prim_index(&p("/A"), &layer_stack, &inputs);
		assert_eq!(with_fallback.prim_index.variant_selection("shading"), Some("blue".into()));

		f.root.set_variant_selection(&p("/A"), "shading", "red");
		let selected = compute_prim_index(&p("/A"), &layer_stack, &inputs);
		assert_eq!(selected.prim_index.variant_selection("shading"), Some("red".into()));
	}

	#[test]
	fn inherits_across_references_are_implied() {
		let f = Fixture::new();
		let model = f.resolver.create_layer("/model.usda");
		model.define_prim("/Model");
		model.add_inherit_path(&p("/Model"), p("/_class_Model"));
		model.create_prim_spec(&p("/_class_Model"), sdf::Specifier::Class);
		f.root.define_prim("/A");
		f.root.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));
		f.root.create_prim_spec(&p("/_class_Model"), sdf::Specifier::Class);

		let outputs = f.compute("/A");
		assert_eq!(
			arcs(&outputs.prim_index),
			vec![
				(ArcType::Root, "/A".to_string()),
				(ArcType::GlobalInherit, "/_class_Model".to_string()),
				(ArcType::Reference, "/Model".to_string()),
				(ArcType::LocalInherit, "/_class_Model".to_string()),
			]
		);
	}

	#[test]
	fn reports_composition_errors() {
		let f = Fixture::new();
		f.root.define_prim("/A");
		f.root.add_reference(&p("/A"), sdf::Reference::new("missing.usda", "/X"));
		f.root.define_prim("/B");
		f.root.add_reference(&p("/B"), sdf::Reference::internal("/Nowhere"));
		f.root.define_prim("/C/D");
		f.root.add_reference(&p("/C/D"), sdf::Reference::internal("/C"));

		let a = f.compute("/A");
		assert!(matches!(a.all_errors[..], [Error::InvalidAssetPath { .. }]));
		assert_eq!(a.prim_index.node_range().len(), 1);

		let b = f.compute("/B");
		assert!(matches!(b.all_errors[..], [Error::UnresolvedPrimPath { .. }]));

		let d = f.compute("/C/D");
		assert!(matches!(d.all_errors[..], [Error::ArcCycle { .. }]));
	}

	#[test]
	fn payloads_follow_inclusion() {
		let f = Fixture::new();
		let asset = f.resolver.create_layer("/asset.usda");
		asset.define_prim("/Asset");
		f.root.define_prim("/A");
		f.root.add_payload(&p("/A"), sdf::Payload::new("asset.usda", "/Asset"));
		let layer_stack = f
			.registry
			.find_or_create(&LayerStackIdentifier::new(f.root.clone()), &mut Vec::new());

		let excluded = f.compute("/A");
		assert_eq!(excluded.payload_state, PayloadState::ExcludedByIncludeSet);
		assert!(excluded.prim_index.has_any_payloads());
		assert_eq!(excluded.prim_index.node_range().len(), 1);

		let include_all: IncludePayloadPredicate = &|_: &sdf::Path| true;
		let inputs = PrimIndexInputs::new(&f.registry).include_payload_predicate(Some(include_all));
		let discovered = compute_prim_index(&p("/A"), &layer_stack, &inputs);
		assert!(discovered.included_discovered_payload());
		assert_eq!(discovered.prim_index.node_range().len(), 2);

		let included = RwLock::new(PayloadSet::from([p("/A")]));
		let inputs = PrimIndexInputs::new(&f.registry).included_payloads(&included);
		let from_set = compute_prim_index(&p("/A"), &layer_stack, &inputs);
		assert_eq!(from_set.payload_state, PayloadState::IncludedByIncludeSet);
		assert!(!from_set.included_discovered_payload());
	}

	#[test]
	fn relocations_add_relocate_arcs() {
		let f = Fixture::new();
		f.root.define_prim("/A/Old");
		f.root.define_prim("/B");
		f.root.set_relocates(&p("/B"), vec![sdf::Relocate::new("/A/Old", "/B/New")]);

		let target = f.compute("/B/New");
		assert_eq!(
			arcs(&target.prim_index),
			vec![
				(ArcType::Root, "/B/New".to_string()),
				(ArcType::Relocate, "/A/Old".to_string()),
			]
		);

		let source = f.compute("/A/Old");
		assert!(source.prim_index.root_node().is_some_and(|n| n.is_inert()));
		assert!(!source.prim_index.has_specs());
	}
}
