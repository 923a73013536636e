use super::ArcType;
use super::cache::Cache;
use super::dependency::{
	DEPENDENCY_TYPE_ANY_NON_VIRTUAL, DEPENDENCY_TYPE_DIRECT, Dependency, DependencyType, for_each_dependent_node,
};
use super::errors::coding_error;
use super::graph::NodeRef;
use super::layer_stack::{LayerStack, LayerStackPtr, LayerStackSite};
use crate::sdf;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The kind of scene description fix a namespace edit requires at a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EditType {
	/// Rename, reparent or remove the specs at the site.
	Path,
	/// Retarget the inherits authored at the site.
	Inherit,
	/// Retarget the specializes authored at the site.
	Specializes,
	/// Retarget the references authored at the site.
	Reference,
	/// Retarget the payloads authored at the site.
	Payload,
	/// Rewrite the relocates authored at the site.
	Relocate,
}

impl std::fmt::Display for EditType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Self::Path => "path",
			Self::Inherit => "inherit",
			Self::Specializes => "specializes",
			Self::Reference => "reference",
			Self::Payload => "payload",
			Self::Relocate => "relocate",
		})
	}
}

/// A composed object whose identity changes in one cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSite {
	/// Index into the caches given to [compute_namespace_edits].
	pub cache_index: usize,
	pub old_path: sdf::Path,
	/// Empty when the object is removed.
	pub new_path: sdf::Path,
}

/// An edit to apply to every spec at `site_path` in every layer of
/// `layer_stack`.
#[derive(Debug, Clone)]
pub struct LayerStackEdit {
	pub cache_index: usize,
	pub edit_type: EditType,
	pub layer_stack: Arc<LayerStack>,
	pub site_path: sdf::Path,
	/// For path edits the site itself. For arc and relocate edits the
	/// path to replace in the arc or relocation.
	pub old_path: sdf::Path,
	pub new_path: sdf::Path,
}

impl std::fmt::Display for LayerStackEdit {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{} edit at {}<{}>: <{}> -> <{}>",
			self.edit_type, self.layer_stack, self.site_path, self.old_path, self.new_path
		)
	}
}

/// Everything a namespace edit implies across a set of caches.
#[derive(Debug, Clone, Default)]
pub struct NamespaceEdits {
	/// Composed objects that change path. Callers fix connections, targets
	/// and relocations pointing at them.
	pub cache_sites: Vec<CacheSite>,
	/// Scene description edits that preserve composition.
	pub layer_stack_sites: Vec<LayerStackEdit>,
	/// Edits that cannot be represented, such as reparenting an object
	/// under itself. Callers report them instead of applying them.
	pub invalid_layer_stack_sites: Vec<LayerStackEdit>,
}

impl NamespaceEdits {
	pub fn is_empty(&self) -> bool {
		self.cache_sites.is_empty() && self.layer_stack_sites.is_empty() && self.invalid_layer_stack_sites.is_empty()
	}

	fn sites_for_edit(&mut self, old_path: &sdf::Path, new_path: &sdf::Path) -> &mut Vec<LayerStackEdit> {
		if is_invalid_edit(old_path, new_path) {
			&mut self.invalid_layer_stack_sites
		} else {
			&mut self.layer_stack_sites
		}
	}
}

impl std::fmt::Display for NamespaceEdits {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		for site in &self.cache_sites {
			writeln!(
				f,
				"cache site [{}]: <{}> -> <{}>",
				site.cache_index, site.old_path, site.new_path
			)?;
		}
		for site in &self.layer_stack_sites {
			writeln!(f, "layer stack site [{}]: {site}", site.cache_index)?;
		}
		for site in &self.invalid_layer_stack_sites {
			writeln!(f, "invalid layer stack site [{}]: {site}", site.cache_index)?;
		}
		Ok(())
	}
}

/// How an arc responds when the site it targets is namespace edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArcEditPolicy {
	/// A direct arc of this kind absorbs the edit: the arc is retargeted
	/// and the objects composing through it keep their paths.
	pub absorbs_direct_edit: bool,
	/// The fix recorded on the arc's owner when it absorbs the edit.
	pub retarget: Option<EditType>,
	/// The edit passes through the arc without recording a site.
	pub passes_through: bool,
	/// The arc may target a descendant of a root prim.
	pub can_target_descendants: bool,
}

impl ArcType {
	/// How arcs of this type take part in namespace edits.
	pub fn namespace_edit_policy(self) -> ArcEditPolicy {
		let absorbs = |retarget| ArcEditPolicy {
			absorbs_direct_edit: true,
			retarget,
			passes_through: false,
			can_target_descendants: false,
		};
		match self {
			Self::Root => ArcEditPolicy {
				absorbs_direct_edit: false,
				retarget: None,
				passes_through: false,
				can_target_descendants: false,
			},
			Self::LocalInherit | Self::GlobalInherit => ArcEditPolicy {
				can_target_descendants: true,
				..absorbs(Some(EditType::Inherit))
			},
			Self::LocalSpecialize | Self::GlobalSpecialize => absorbs(Some(EditType::Specializes)),
			Self::Reference => absorbs(Some(EditType::Reference)),
			Self::Payload => absorbs(Some(EditType::Payload)),
			// Variants have no name of their own to refer to.
			Self::Variant => absorbs(None),
			Self::Relocate => ArcEditPolicy {
				absorbs_direct_edit: false,
				retarget: None,
				passes_through: true,
				can_target_descendants: false,
			},
		}
	}
}

/// An object cannot be reparented under itself.
fn is_invalid_edit(old_path: &sdf::Path, new_path: &sdf::Path) -> bool {
	new_path.has_prefix(old_path)
}

/// Identifies a node of a cached prim index across caches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DependentNode {
	cache_index: usize,
	index_path: sdf::Path,
	node: u16,
}

impl DependentNode {
	fn new(cache_index: usize, node: NodeRef) -> Self {
		Self {
			cache_index,
			index_path: node.root_node().path().clone(),
			node: node.index(),
		}
	}

	fn resolve<'c>(&self, caches: &[&'c Cache]) -> Option<NodeRef<'c>> {
		let graph = caches
			.get(self.cache_index)?
			.find_prim_index(&self.index_path)?
			.graph()?;
		Some(graph.node(self.node))
	}
}

/// Records `node`, or the node that introduced it when it comes from a
/// variant, since that node represents the edited site.
fn insert_node(nodes: &mut BTreeSet<DependentNode>, cache_index: usize, node: NodeRef) {
	let mut node = Some(node);
	while let Some(n) = node.filter(|n| n.arc_type() == ArcType::Variant) {
		node = n.parent_node();
	}
	if let Some(node) = node {
		nodes.insert(DependentNode::new(cache_index, node));
	}
}

/// Calls `f` for each node of the prim index containing `dep` that uses
/// its site in a layer stack accepted by `matches_layer_stack`.
fn visit_dependent_nodes<'c>(
	cache: &'c Cache,
	dep: &Dependency,
	matches_layer_stack: impl Fn(&LayerStack) -> bool,
	mut f: impl FnMut(&sdf::Path, NodeRef<'c>),
) {
	let mut index_path = dep.index_path.prim_path();
	let index = loop {
		if let Some(index) = cache.find_prim_index(&index_path) {
			break index;
		}
		if index_path.is_empty() || index_path.is_absolute_root_path() {
			tracing::debug!("no prim index contains <{}>", dep.index_path);
			return;
		}
		index_path = index_path.parent_path();
	};
	for_each_dependent_node(&dep.site_path, matches_layer_stack, index, |node, _| {
		f(&dep.index_path, node);
	});
}

/// Records a relocate edit for every prim in `layer_stack` whose
/// relocations mention `old_path` or a descendant of it.
fn add_relocate_edits(
	result: Option<&mut NamespaceEdits>,
	layer_stack: &Arc<LayerStack>,
	cache_index: usize,
	old_path: &sdf::Path,
	new_path: &sdf::Path,
) {
	let Some(result) = result else {
		return;
	};
	for prim_path in layer_stack.paths_to_prims_with_relocates() {
		let mentions_old_path = layer_stack.layers().iter().any(|layer| {
			layer.has_relocates(prim_path)
				&& layer
					.relocates(prim_path)
					.iter()
					.any(|relocate| relocate.source.has_prefix(old_path) || relocate.target.has_prefix(old_path))
		});
		if !mentions_old_path {
			continue;
		}
		result
			.sites_for_edit(old_path, new_path)
			.push(LayerStackEdit {
				cache_index,
				edit_type: EditType::Relocate,
				layer_stack: layer_stack.clone(),
				site_path: prim_path.clone(),
				old_path: old_path.clone(),
				new_path: new_path.clone(),
			});
	}
}

/// Maps `path` and the target paths embedded in it across the arc from
/// `node` to its parent. Returns the empty path when `path` only maps
/// through the root identity.
fn translate_path_and_target_paths(node: NodeRef, path: &sdf::Path) -> sdf::Path {
	let map = node.map_to_parent();
	let mut translated = map.map_source_to_target(path);
	if translated == *path {
		let root = sdf::Path::absolute_root_path();
		if map.map_source_to_target(&root) == root {
			return sdf::Path::empty_path();
		}
	}

	// Targets may map through the root identity.
	for target in translated.all_target_paths_recursively() {
		let translated_target = map.map_source_to_target(&target);
		if translated_target.is_empty() {
			return sdf::Path::empty_path();
		}
		translated = translated.replace_prefix(&target, &translated_target);
	}
	translated
}

/// Maps the old and new paths from `node` into its parent's namespace,
/// recording edits to relocations in the parent's layer stack that
/// involve them.
fn translate_paths_and_edit_relocates(
	mut result: Option<&mut NamespaceEdits>,
	node: NodeRef,
	cache_index: usize,
	old_node_path: &mut sdf::Path,
	new_node_path: &mut sdf::Path,
) {
	let old_parent_path = translate_path_and_target_paths(node, old_node_path);
	let mut new_parent_path = translate_path_and_target_paths(node, new_node_path);

	// Relocations only target prims. The new path is empty for removals.
	let Some(parent) = node
		.parent_node()
		.filter(|_| old_node_path.is_prim_path())
	else {
		*old_node_path = old_parent_path;
		*new_node_path = new_parent_path;
		return;
	};
	let layer_stack = parent.layer_stack();

	// The parent paths already have the parent layer stack's relocations
	// applied, so look them up by target. Only a relocation of the edited
	// prim itself is rewritten; descendants keep their ancestor's.
	let relocates = layer_stack.relocates_target_to_source();
	match relocates.get_key_value(&old_parent_path) {
		Some((target, source)) => {
			let unrelocated_old = old_parent_path.replace_prefix(target, source);
			let unrelocated_new = new_parent_path.replace_prefix(target, source);
			let mut target_needs_edit = true;

			if new_parent_path.is_empty() {
				// Removed, or not mappable across the arc.
				add_relocate_edits(result.as_deref_mut(), layer_stack, cache_index, target, &new_parent_path);
			} else if old_node_path.parent_path() != new_node_path.parent_path() {
				// Reparenting fixes the relocation source only.
				add_relocate_edits(
					result.as_deref_mut(),
					layer_stack,
					cache_index,
					&unrelocated_old,
					&unrelocated_new,
				);
				target_needs_edit = false;
			} else {
				add_relocate_edits(
					result.as_deref_mut(),
					layer_stack,
					cache_index,
					&unrelocated_old,
					&unrelocated_new,
				);
				// A relocation that keeps the prim name is renamed at both
				// ends. One that renames the prim keeps its target.
				if source.name_token() == target.name_token() {
					new_parent_path = target.replace_name(&new_node_path.name_token());
					add_relocate_edits(result.as_deref_mut(), layer_stack, cache_index, target, &new_parent_path);
				} else {
					target_needs_edit = false;
				}
			}

			// An unchanged relocation target absorbs the edit.
			if !target_needs_edit {
				new_parent_path = old_parent_path.clone();
			}
		}
		None => {
			// Descendants may still be relocated.
			add_relocate_edits(
				result.as_deref_mut(),
				layer_stack,
				cache_index,
				&old_parent_path,
				&new_parent_path,
			);
		}
	}

	*old_node_path = old_parent_path;
	*new_node_path = new_parent_path;
}

/// Translates the edit across the arc from `node` to its parent and
/// records the edit the parent's site needs. Returns true once an arc
/// absorbs the edit, ending the walk toward the root.
fn add_layer_stack_site(
	mut result: Option<&mut NamespaceEdits>,
	node: NodeRef,
	cache_index: usize,
	old_node_path: &mut sdf::Path,
	new_node_path: &mut sdf::Path,
) -> bool {
	let Some(parent) = node.parent_node() else {
		return true;
	};
	let (old_path, new_path) = (old_node_path.clone(), new_node_path.clone());
	translate_paths_and_edit_relocates(result.as_deref_mut(), node, cache_index, old_node_path, new_node_path);
	let site_path = old_node_path.clone();

	let policy = node.arc_type().namespace_edit_policy();
	let edit = if policy.passes_through {
		tracing::debug!("  skipping relocate arc");
		*old_node_path = old_path;
		*new_node_path = new_path;
		return false;
	} else if old_node_path == new_node_path {
		tracing::debug!("  edit absorbed where the path is unaffected");
		return true;
	} else if old_node_path.is_prim_path() && !node.is_due_to_ancestor() {
		tracing::debug!("  edit absorbed by a direct {} arc", node.arc_type());
		if !policy.absorbs_direct_edit {
			coding_error!("unexpected {} arc at <{}>", node.arc_type(), node.path());
			return true;
		}
		let Some(edit_type) = policy.retarget else {
			return true;
		};
		(edit_type, old_path, new_path)
	} else {
		(EditType::Path, old_node_path.clone(), new_node_path.clone())
	};

	let absorbed = edit.0 != EditType::Path;
	if let Some(result) = result {
		let (edit_type, old_path, new_path) = edit;
		tracing::debug!("  adding {edit_type} edit <{old_path}> -> <{new_path}>");
		result
			.sites_for_edit(&old_path, &new_path)
			.push(LayerStackEdit {
				cache_index,
				edit_type,
				layer_stack: parent.layer_stack().clone(),
				site_path,
				old_path,
				new_path,
			});
	}
	absorbed
}

/// Whether `sites` holds `site` or an ancestor of it.
fn has_site(sites: &BTreeMap<LayerStackSite, usize>, site: &LayerStackSite) -> bool {
	if sites.contains_key(site) {
		return true;
	}
	sites
		.range(..site)
		.next_back()
		.is_some_and(|(closest, _)| {
			Arc::ptr_eq(&closest.layer_stack, &site.layer_stack) && site.path.has_prefix(&closest.path)
		})
}

/// Computes the edits that renaming, reparenting or, with an empty
/// `new_path`, removing `cur_path` in `primary` requires across `caches`.
///
/// Every prim index that may depend on the edited site must already be
/// cached; in particular `primary` must hold the index of the prim at or
/// owning `cur_path`. When the edited prim has no specs in the primary
/// layer stack the edit is a relocation authored in `relocates_layer`,
/// and only layer stacks using that layer are affected.
pub fn compute_namespace_edits(
	primary: &Cache,
	caches: &[&Cache],
	cur_path: &sdf::Path,
	new_path: &sdf::Path,
	relocates_layer: &sdf::Layer,
) -> NamespaceEdits {
	let _span = tracing::debug_span!("compute_namespace_edits", %cur_path, %new_path).entered();
	let mut result = NamespaceEdits::default();
	if caches.is_empty() {
		return result;
	}

	let primary_layer_stack = primary.layer_stack();
	let prim_path = cur_path.prim_path();
	if primary.find_prim_index(&prim_path).is_none() {
		coding_error!("no prim index computed for {}<{}>", primary_layer_stack, cur_path);
		return result;
	}
	if cur_path == new_path {
		return result;
	}

	let prim_sites = primary_layer_stack.prim_sites(&prim_path);
	let mut nodes = BTreeSet::new();
	let mut descendant_nodes = BTreeSet::new();

	if prim_sites.is_empty() {
		// Opinions only arrive across an ancestral arc, so this is a
		// relocation.
		for (cache_index, &cache) in caches.iter().enumerate() {
			let deps = cache.find_site_dependencies_for_layer(
				relocates_layer,
				&prim_path,
				DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
				true,
				true,
				true,
			);
			for dep in &deps {
				visit_dependent_nodes(
					cache,
					dep,
					|layer_stack| layer_stack.has_layer(relocates_layer),
					|_, node| insert_node(&mut nodes, cache_index, node),
				);
			}
		}
	} else {
		for (cache_index, &cache) in caches.iter().enumerate() {
			for site in &prim_sites {
				let deps = cache.find_site_dependencies_for_layer(
					&site.layer,
					&prim_path,
					DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
					false,
					false,
					true,
				);
				for dep in &deps {
					visit_dependent_nodes(
						cache,
						dep,
						|layer_stack| layer_stack.has_layer(&site.layer),
						|index_path, node| {
							tracing::debug!("found dependent node <{}> in <{index_path}>", node.path());
							insert_node(&mut nodes, cache_index, node);
						},
					);
				}
			}

			if cache.id() == primary.id() && cur_path.is_prim_path() {
				collect_descendant_inherits(cache, cache_index, &prim_path, &mut descendant_nodes);
			}
		}
	}

	// Walk from each node to the root of its graph. Paths are translated
	// one arc at a time so that relocations edited along the way are
	// accounted for.
	let mut sites = BTreeSet::new();
	let mut cache_sites = BTreeSet::new();
	for dependent in &nodes {
		let Some(mut node) = dependent.resolve(caches) else {
			continue;
		};
		let cache_index = dependent.cache_index;
		let mut old_node_path = cur_path.clone();
		let mut new_node_path = new_path.clone();
		tracing::debug!(
			"processing {} node <{}> in {} for cache {cache_index}",
			node.arc_type(),
			node.path(),
			node.layer_stack()
		);

		// Scenes sharing a layer see the node in each of their layer stacks.
		if sites.insert(node.site()) {
			result
				.sites_for_edit(&old_node_path, &new_node_path)
				.push(LayerStackEdit {
					cache_index,
					edit_type: EditType::Path,
					layer_stack: node.layer_stack().clone(),
					site_path: old_node_path.clone(),
					old_path: old_node_path.clone(),
					new_path: new_node_path.clone(),
				});
			add_relocate_edits(
				Some(&mut result),
				node.layer_stack(),
				cache_index,
				&old_node_path,
				&new_node_path,
			);
		}

		let mut absorbed = false;
		while let Some(parent) = node.parent_node() {
			let new_site = sites.insert(parent.site());
			if add_layer_stack_site(
				new_site.then_some(&mut result),
				node,
				cache_index,
				&mut old_node_path,
				&mut new_node_path,
			) {
				absorbed = true;
				break;
			}
			node = parent;
		}

		// Several nodes of one cache may reach the same composed object.
		if !absorbed
			&& !is_invalid_edit(&old_node_path, &new_node_path)
			&& cache_sites.insert((cache_index, old_node_path.clone()))
		{
			tracing::debug!("adding cache site <{old_node_path}> -> <{new_node_path}>");
			result.cache_sites.push(CacheSite {
				cache_index,
				old_path: old_node_path,
				new_path: new_node_path,
			});
		}
	}

	if new_path.is_empty() && cur_path.is_prim_path() {
		let removals = collect_descendant_removals(caches, &prim_sites, &prim_path, cur_path, &descendant_nodes);
		for (site, cache_index) in removals {
			result.layer_stack_sites.push(LayerStackEdit {
				cache_index,
				edit_type: EditType::Path,
				site_path: site.path.clone(),
				old_path: site.path,
				new_path: new_path.clone(),
				layer_stack: site.layer_stack,
			});
		}
	}

	for dependent in &descendant_nodes {
		let Some(node) = dependent.resolve(caches) else {
			continue;
		};
		let mut old_node_path = node.path().clone();
		let mut new_node_path = old_node_path.replace_prefix(cur_path, new_path);
		add_layer_stack_site(
			Some(&mut result),
			node,
			dependent.cache_index,
			&mut old_node_path,
			&mut new_node_path,
		);
	}

	if tracing::enabled!(tracing::Level::DEBUG) {
		tracing::debug!("namespace edits:\n{result}");
	}
	result
}

/// Finds direct inherits in `cache` that target a proper descendant of
/// `prim_path`. Only inherits can target non-root prims.
fn collect_descendant_inherits(
	cache: &Cache,
	cache_index: usize,
	prim_path: &sdf::Path,
	descendant_nodes: &mut BTreeSet<DependentNode>,
) {
	let layer_stack = cache.layer_stack();
	let dep_mask = DEPENDENCY_TYPE_DIRECT | DependencyType::NonVirtual;
	let mut descendant_prim_paths: BTreeSet<sdf::Path> = cache
		.find_site_dependencies(layer_stack, prim_path, dep_mask, true, false, true)
		.into_iter()
		.map(|dep| dep.index_path)
		.filter(sdf::Path::is_prim_path)
		.collect();
	for dep in cache.find_site_dependencies(layer_stack, prim_path, dep_mask, false, false, true) {
		descendant_prim_paths.remove(&dep.index_path);
	}

	for path in &descendant_prim_paths {
		let Some(index) = cache.find_prim_index(path) else {
			continue;
		};
		for node in index.node_range() {
			if node
				.arc_type()
				.namespace_edit_policy()
				.can_target_descendants
				&& Arc::ptr_eq(node.layer_stack(), layer_stack)
				&& !node.path().is_root_prim_path()
				&& !node.is_due_to_ancestor()
			{
				descendant_nodes.insert(DependentNode::new(cache_index, node));
			}
		}
	}
}

/// Collects every uncomposed site using a descendant of the removed prim,
/// skipping sites whose ancestor is already removed and sites owning a
/// direct inherit of a descendant.
fn collect_descendant_removals(
	caches: &[&Cache],
	prim_sites: &[sdf::Site],
	prim_path: &sdf::Path,
	cur_path: &sdf::Path,
	descendant_nodes: &BTreeSet<DependentNode>,
) -> BTreeMap<LayerStackSite, usize> {
	let do_not_remove: BTreeSet<LayerStackSite> = descendant_nodes
		.iter()
		.filter_map(|dependent| dependent.resolve(caches))
		.filter_map(|node| node.parent_node())
		.map(|parent| parent.site())
		.collect();

	let mut descendant_sites = BTreeMap::new();
	for (cache_index, &cache) in caches.iter().enumerate() {
		let layer_stacks: BTreeSet<LayerStackPtr> = prim_sites
			.iter()
			.flat_map(|site| cache.find_all_layer_stacks_using_layer(&site.layer))
			.map(LayerStackPtr)
			.collect();

		let mut descendant_paths_and_nodes: BTreeMap<sdf::Path, NodeRef> = BTreeMap::new();
		for layer_stack in &layer_stacks {
			let deps = cache.find_site_dependencies(
				&layer_stack.0,
				prim_path,
				DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
				true,
				true,
				true,
			);
			for dep in &deps {
				// Indexes found below a dependent index need not use the site.
				if !layer_stack.has_prim_specs(&dep.site_path) {
					continue;
				}
				visit_dependent_nodes(
					cache,
					dep,
					|candidate| std::ptr::eq(candidate, Arc::as_ptr(&layer_stack.0)),
					|index_path, node| {
						if !index_path.is_prim_path() || node.path() != cur_path {
							descendant_paths_and_nodes.insert(index_path.clone(), node);
						}
					},
				);
			}
		}

		for (descendant_path, node) in &descendant_paths_and_nodes {
			let descendant_prim_path = descendant_path.prim_path();
			let mut current = Some(*node);
			while let Some(node) = current {
				let path = descendant_path.replace_prefix(&descendant_prim_path, node.path());
				let site = LayerStackSite::new(node.layer_stack().clone(), path);
				if !has_site(&descendant_sites, &site) && !do_not_remove.contains(&site) {
					descendant_sites.insert(site, cache_index);
				}
				current = node.parent_node();
			}
		}
	}
	descendant_sites
}

impl Cache {
	/// Computes the edits renaming, reparenting or removing `cur_path`
	/// requires in this cache alone. See [compute_namespace_edits].
	pub fn compute_namespace_edits(
		&self,
		cur_path: &sdf::Path,
		new_path: &sdf::Path,
		relocates_layer: &sdf::Layer,
	) -> NamespaceEdits {
		compute_namespace_edits(self, &[self], cur_path, new_path, relocates_layer)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn arc_policies() {
		let reference = ArcType::Reference.namespace_edit_policy();
		assert!(reference.absorbs_direct_edit);
		assert_eq!(reference.retarget, Some(EditType::Reference));
		assert!(!reference.can_target_descendants);

		assert!(
			ArcType::LocalInherit
				.namespace_edit_policy()
				.can_target_descendants
		);
		assert_eq!(
			ArcType::GlobalSpecialize.namespace_edit_policy().retarget,
			Some(EditType::Specializes)
		);
		assert_eq!(ArcType::Variant.namespace_edit_policy().retarget, None);
		assert!(ArcType::Relocate.namespace_edit_policy().passes_through);
		assert!(!ArcType::Root.namespace_edit_policy().absorbs_direct_edit);
	}

	#[test]
	fn reparenting_under_itself_is_invalid() {
		let p = sdf::Path::from;
		assert!(is_invalid_edit(&p("/A"), &p("/A/Child")));
		assert!(is_invalid_edit(&p("/A"), &p("/A")));
		assert!(!is_invalid_edit(&p("/A"), &p("/B/A")));
		assert!(!is_invalid_edit(&p("/A"), &sdf::Path::empty_path()));
	}
}
