use super::ArcType;
use super::layer_stack::{LayerStack, LayerStackSite};
use super::map_function::MapFunction;
use crate::sdf;
use std::sync::Arc;

// Index used to represent an invalid node.
pub const INVALID_NODE_INDEX: u16 = u16::MAX;

/// Largest number of nodes a graph can hold.
pub const MAX_NODES: usize = INVALID_NODE_INDEX as usize;

#[derive(Debug, Clone)]
pub struct Node {
	pub layer_stack: Arc<LayerStack>,

	pub parent_index: u16,
	pub origin_index: u16,

	// The indices of the first/last child, previous/next sibling.
	// The previous sibling index of a first child and the next
	// sibling index of a last child are `INVALID_NODE_INDEX`
	// (i.e. they form a list, not a ring).
	pub first_child_index: u16,
	pub last_child_index: u16,
	pub prev_sibling_index: u16,
	pub next_sibling_index: u16,

	pub arc_type: ArcType,
	pub map_to_parent: MapFunction,

	// Element count of the prim index path at which this node's arc was
	// introduced. Smaller than the index path's count for ancestral arcs.
	pub namespace_depth: u16,

	pub inert: bool,
	pub culled: bool,
	pub has_specs: bool,
}

impl Node {
	pub fn new(
		layer_stack: Arc<LayerStack>,
		parent_index: u16,
		origin_index: u16,
		arc_type: ArcType,
		map_to_parent: MapFunction,
	) -> Self {
		Self {
			layer_stack,
			parent_index,
			origin_index,
			first_child_index: INVALID_NODE_INDEX,
			last_child_index: INVALID_NODE_INDEX,
			prev_sibling_index: INVALID_NODE_INDEX,
			next_sibling_index: INVALID_NODE_INDEX,
			arc_type,
			map_to_parent,
			namespace_depth: 0,
			inert: false,
			culled: false,
			has_specs: false,
		}
	}
}

#[derive(Debug, Clone)]
pub struct UnsharedData {
	pub site_path: sdf::Path,
}

/// Arena of the nodes of a prim index, linked by index.
#[derive(Debug, Clone, Default)]
pub struct PrimIndexGraph {
	pub nodes: Vec<Node>,
	pub unshared: Vec<UnsharedData>,
}

impl PrimIndexGraph {
	pub fn new() -> Self {
		Self {
			nodes: Vec::new(),
			unshared: Vec::new(),
		}
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	/// Starts a graph whose root node is the site `path` in `layer_stack`.
	pub fn with_root(layer_stack: Arc<LayerStack>, path: sdf::Path) -> Self {
		let mut graph = Self::new();
		let mut root = Node::new(
			layer_stack,
			INVALID_NODE_INDEX,
			INVALID_NODE_INDEX,
			ArcType::Root,
			MapFunction::identity(),
		);
		root.namespace_depth = path.element_count() as u16;
		graph.add_node(root, path);
		graph
	}

	pub fn add_node(&mut self, node: Node, site_path: sdf::Path) -> u16 {
		let index = self.nodes.len();
		self.nodes.push(node);
		self.unshared.push(UnsharedData { site_path });
		index as u16
	}

	pub fn get_node(&self, index: u16) -> Option<&Node> {
		if index == INVALID_NODE_INDEX {
			None
		} else {
			self.nodes.get(index as usize)
		}
	}

	pub fn get_node_mut(&mut self, index: u16) -> Option<&mut Node> {
		if index == INVALID_NODE_INDEX {
			None
		} else {
			self.nodes.get_mut(index as usize)
		}
	}

	pub fn get_unshared(&self, index: u16) -> Option<&UnsharedData> {
		if index == INVALID_NODE_INDEX {
			None
		} else {
			self.unshared.get(index as usize)
		}
	}

	pub fn site_path(&self, index: u16) -> &sdf::Path {
		&self.unshared[index as usize].site_path
	}

	pub(crate) fn set_site_path(&mut self, index: u16, path: sdf::Path) {
		self.unshared[index as usize].site_path = path;
	}

	/// Adds `node` as a child of `parent_idx`, keeping siblings in strength
	/// order. Returns `None` when the graph is full.
	pub fn add_child(&mut self, parent_idx: u16, node: Node, site_path: sdf::Path) -> Option<u16> {
		if self.nodes.len() >= MAX_NODES {
			return None;
		}
		let arc_type = node.arc_type;
		let child_idx = self.add_node(node, site_path);

		// Insert child in strength order; weaker arcs go later and arcs of
		// equal strength keep their authored order.
		let mut insert_after = INVALID_NODE_INDEX;
		let mut current = self.nodes[parent_idx as usize].first_child_index;

		while current != INVALID_NODE_INDEX {
			let current_arc = self.nodes[current as usize].arc_type;
			if arc_type.strength() < current_arc.strength() {
				break;
			}
			insert_after = current;
			current = self.nodes[current as usize].next_sibling_index;
		}

		if insert_after == INVALID_NODE_INDEX {
			let old_first = self.nodes[parent_idx as usize].first_child_index;
			self.nodes[parent_idx as usize].first_child_index = child_idx;
			if old_first != INVALID_NODE_INDEX {
				self.nodes[old_first as usize].prev_sibling_index = child_idx;
				self.nodes[child_idx as usize].next_sibling_index = old_first;
			} else {
				self.nodes[parent_idx as usize].last_child_index = child_idx;
			}
		} else {
			let next = self.nodes[insert_after as usize].next_sibling_index;
			self.nodes[insert_after as usize].next_sibling_index = child_idx;
			self.nodes[child_idx as usize].prev_sibling_index = insert_after;
			self.nodes[child_idx as usize].next_sibling_index = next;
			if next != INVALID_NODE_INDEX {
				self.nodes[next as usize].prev_sibling_index = child_idx;
			} else {
				self.nodes[parent_idx as usize].last_child_index = child_idx;
			}
		}

		self.nodes[child_idx as usize].parent_index = parent_idx;
		Some(child_idx)
	}

	pub fn children_indices(&self, node_idx: u16) -> Vec<u16> {
		let mut indices = Vec::new();
		if let Some(node) = self.get_node(node_idx) {
			let mut current = node.first_child_index;
			while current != INVALID_NODE_INDEX {
				indices.push(current);
				current = self.nodes[current as usize].next_sibling_index;
			}
		}
		indices
	}

	/// Node indices in strength order: a pre-order walk from the root.
	pub fn strength_order(&self) -> Vec<u16> {
		let mut order = Vec::with_capacity(self.nodes.len());
		if !self.nodes.is_empty() {
			self.collect_strength_order(0, &mut order);
		}
		order
	}

	fn collect_strength_order(&self, node_idx: u16, order: &mut Vec<u16>) {
		order.push(node_idx);
		let mut current = self.nodes[node_idx as usize].first_child_index;
		while current != INVALID_NODE_INDEX {
			self.collect_strength_order(current, order);
			current = self.nodes[current as usize].next_sibling_index;
		}
	}

	/// The function mapping paths in `node_idx`'s namespace to the root node's.
	pub fn map_to_root(&self, node_idx: u16) -> MapFunction {
		let mut result = MapFunction::identity();
		let mut current = node_idx;
		while let Some(node) = self.get_node(current) {
			if node.parent_index == INVALID_NODE_INDEX {
				break;
			}
			result = node.map_to_parent.compose(&result);
			current = node.parent_index;
		}
		result
	}

	/// Whether any node in `node_idx`'s subtree has specs.
	pub fn subtree_has_specs(&self, node_idx: u16) -> bool {
		let node = &self.nodes[node_idx as usize];
		node.has_specs
			|| self
				.children_indices(node_idx)
				.into_iter()
				.any(|child| self.subtree_has_specs(child))
	}

	pub fn node(&self, index: u16) -> NodeRef<'_> {
		NodeRef { graph: self, index }
	}

	pub fn root_node(&self) -> NodeRef<'_> {
		self.node(0)
	}
}

/// A handle to a node of a [PrimIndexGraph].
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
	graph: &'a PrimIndexGraph,
	index: u16,
}

impl<'a> NodeRef<'a> {
	fn data(&self) -> &'a Node {
		&self.graph.nodes[self.index as usize]
	}

	pub fn graph(&self) -> &'a PrimIndexGraph {
		self.graph
	}

	pub fn index(&self) -> u16 {
		self.index
	}

	pub fn arc_type(&self) -> ArcType {
		self.data().arc_type
	}

	pub fn layer_stack(&self) -> &'a Arc<LayerStack> {
		&self.data().layer_stack
	}

	pub fn path(&self) -> &'a sdf::Path {
		self.graph.site_path(self.index)
	}

	pub fn site(&self) -> LayerStackSite {
		LayerStackSite::new(self.layer_stack().clone(), self.path().clone())
	}

	pub fn is_root_node(&self) -> bool {
		self.data().parent_index == INVALID_NODE_INDEX
	}

	pub fn parent_node(&self) -> Option<NodeRef<'a>> {
		let parent = self.data().parent_index;
		(parent != INVALID_NODE_INDEX).then(|| self.graph.node(parent))
	}

	pub fn origin_node(&self) -> Option<NodeRef<'a>> {
		let origin = self.data().origin_index;
		(origin != INVALID_NODE_INDEX).then(|| self.graph.node(origin))
	}

	pub fn root_node(&self) -> NodeRef<'a> {
		self.graph.root_node()
	}

	pub fn children(&self) -> Vec<NodeRef<'a>> {
		self.graph
			.children_indices(self.index)
			.into_iter()
			.map(|i| self.graph.node(i))
			.collect()
	}

	pub fn map_to_parent(&self) -> &'a MapFunction {
		&self.data().map_to_parent
	}

	pub fn map_to_root(&self) -> MapFunction {
		self.graph.map_to_root(self.index)
	}

	pub fn namespace_depth(&self) -> u16 {
		self.data().namespace_depth
	}

	/// Whether this node was introduced by an arc on an ancestral prim.
	pub fn is_due_to_ancestor(&self) -> bool {
		let root_depth = self.graph.site_path(0).element_count();
		!self.is_root_node() && (self.data().namespace_depth as usize) < root_depth
	}

	pub fn is_inert(&self) -> bool {
		self.data().inert
	}

	pub fn is_culled(&self) -> bool {
		self.data().culled
	}

	pub fn has_specs(&self) -> bool {
		self.data().has_specs
	}

	pub fn subtree_has_specs(&self) -> bool {
		self.graph.subtree_has_specs(self.index)
	}

	/// Whether this node contributes opinions to the prim.
	pub fn can_contribute_specs(&self) -> bool {
		!self.is_inert() && !self.is_culled()
	}
}

impl PartialEq for NodeRef<'_> {
	fn eq(&self, other: &Self) -> bool {
		std::ptr::eq(self.graph, other.graph) && self.index == other.index
	}
}

impl Eq for NodeRef<'_> {}

impl std::fmt::Debug for NodeRef<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} {} ({})", self.arc_type(), self.site(), self.index)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ar;
	use crate::pcp::{LayerStackIdentifier, LayerStackRegistry};

	fn layer_stack() -> Arc<LayerStack> {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let registry = LayerStackRegistry::new(resolver, String::new(), false);
		registry.find_or_create(&LayerStackIdentifier::new(root), &mut Vec::new())
	}

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	#[test]
	fn children_are_kept_in_strength_order() {
		let ls = layer_stack();
		let mut graph = PrimIndexGraph::with_root(ls.clone(), p("/A"));
		let make = |arc| Node::new(ls.clone(), 0, 0, arc, MapFunction::identity());
		let reference = graph.add_child(0, make(ArcType::Reference), p("/R")).unwrap();
		let specialize = graph.add_child(0, make(ArcType::LocalSpecialize), p("/S")).unwrap();
		let inherit = graph.add_child(0, make(ArcType::LocalInherit), p("/I")).unwrap();
		let second_reference = graph.add_child(0, make(ArcType::Reference), p("/R2")).unwrap();

		assert_eq!(
			graph.children_indices(0),
			vec![inherit, reference, second_reference, specialize]
		);
		assert_eq!(
			graph.strength_order(),
			vec![0, inherit, reference, second_reference, specialize]
		);
		// The arena outlives the throwaway registry; the layer stack is
		// kept alive by the nodes.
		drop(ls);
		assert_eq!(graph.node(reference).layer_stack().layers().len(), 1);
	}

	#[test]
	fn map_to_root_composes_up_the_chain() {
		let ls = layer_stack();
		let mut graph = PrimIndexGraph::with_root(ls.clone(), p("/World/A"));
		let mut reference = Node::new(
			ls.clone(),
			0,
			0,
			ArcType::Reference,
			MapFunction::new([(p("/Ref"), p("/World/A"))], sdf::Retiming::identity()),
		);
		reference.namespace_depth = 2;
		let r = graph.add_child(0, reference, p("/Ref")).unwrap();
		let mut nested = Node::new(
			ls,
			r,
			r,
			ArcType::Reference,
			MapFunction::new([(p("/Model"), p("/Ref"))], sdf::Retiming::identity()),
		);
		nested.namespace_depth = 2;
		let m = graph.add_child(r, nested, p("/Model")).unwrap();
		assert_eq!(
			graph.node(m).map_to_root().map_source_to_target(&p("/Model/Geom")),
			p("/World/A/Geom")
		);
		assert!(!graph.node(m).is_due_to_ancestor());
		assert_eq!(graph.node(m).parent_node(), Some(graph.node(r)));
	}
}
