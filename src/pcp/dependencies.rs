use super::dependency::{classify_node_dependency, should_store_dependency};
use super::errors::verify;
use super::layer_stack::{LayerStack, LayerStackPtr};
use super::lifeboat::Lifeboat;
use super::prim_index::PrimIndex;
use crate::sdf;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::Arc;

/// Prim index paths depending on each site of one layer stack.
type SiteDepMap = sdf::PathTable<Vec<sdf::Path>>;

/// Tracks the sites of scene description every cached prim index depends
/// on.
///
/// Only direct dependencies are stored. Root dependencies and dependencies
/// on ancestral sites are implied by namespace and recovered when
/// querying, which keeps the table proportional to the number of arcs
/// rather than to the depth of namespace below them.
#[derive(Debug, Default)]
pub struct Dependencies {
	deps: BTreeMap<LayerStackPtr, SiteDepMap>,
}

/// The sites `prim_index` stores dependencies on, without duplicates.
fn stored_sites(prim_index: &PrimIndex) -> BTreeSet<(LayerStackPtr, sdf::Path)> {
	prim_index
		.node_range()
		.into_iter()
		.filter(|node| should_store_dependency(classify_node_dependency(*node)))
		.map(|node| (LayerStackPtr(node.layer_stack().clone()), node.path().clone()))
		.collect()
}

impl Dependencies {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records the dependencies of `prim_index`.
	pub fn add(&mut self, prim_index: &PrimIndex) {
		let index_path = prim_index.path();
		if index_path.is_empty() {
			return;
		}

		let mut count = 0;
		for (layer_stack, site_path) in stored_sites(prim_index) {
			let dependents = self.deps.entry(layer_stack).or_default().entry(&site_path);
			if !dependents.contains(&index_path) {
				dependents.push(index_path.clone());
				count += 1;
			}
		}
		tracing::trace!("added {count} dependencies for <{index_path}>");
	}

	/// Removes the dependencies of `prim_index`. Layer stacks no longer
	/// depended on are handed to `lifeboat`.
	pub fn remove(&mut self, prim_index: &PrimIndex, lifeboat: &mut Lifeboat) {
		let index_path = prim_index.path();
		if index_path.is_empty() {
			return;
		}

		for (layer_stack, site_path) in stored_sites(prim_index) {
			let Some(table) = self.deps.get_mut(&layer_stack) else {
				verify!(false, "no dependencies on {} for <{}>", *layer_stack, index_path);
				continue;
			};
			let Some(dependents) = table.get_mut(&site_path) else {
				verify!(false, "no dependencies on <{}> for <{}>", site_path, index_path);
				continue;
			};
			let Some(position) = dependents.iter().position(|p| *p == index_path) else {
				verify!(false, "<{}> is not recorded as depending on <{}>", index_path, site_path);
				continue;
			};
			dependents.swap_remove(position);

			if dependents.is_empty() {
				prune(table, &site_path);
			}
			if table.is_empty() {
				self.deps.remove(&layer_stack);
				lifeboat.retain_layer_stack(layer_stack.0);
			}
		}
		tracing::trace!("removed dependencies for <{index_path}>");
	}

	/// Forgets every dependency. All layer stacks go to `lifeboat`.
	pub fn remove_all(&mut self, lifeboat: &mut Lifeboat) {
		for (layer_stack, _) in std::mem::take(&mut self.deps) {
			lifeboat.retain_layer_stack(layer_stack.0);
		}
	}

	/// Calls `f(index_path, dep_site_path)` for every prim index depending
	/// on `site_path` in `layer_stack`.
	///
	/// With `recurse_below_site` dependencies on descendant sites are
	/// visited too. With `include_ancestral` dependencies on ancestor sites
	/// are visited, up to and including the absolute root.
	pub fn for_each_dependency_on_site(
		&self,
		layer_stack: &Arc<LayerStack>,
		site_path: &sdf::Path,
		include_ancestral: bool,
		recurse_below_site: bool,
		mut f: impl FnMut(&sdf::Path, &sdf::Path),
	) {
		let Some(table) = self.deps.get(&LayerStackPtr(layer_stack.clone())) else {
			return;
		};

		if recurse_below_site {
			for (dep_site, dependents) in table.subtree(site_path) {
				for index_path in dependents {
					f(index_path, dep_site);
				}
			}
		} else if let Some(dependents) = table.get(site_path) {
			for index_path in dependents {
				f(index_path, site_path);
			}
		}

		if include_ancestral && !site_path.is_absolute_root_path() {
			let ancestors = site_path
				.parent_path()
				.ancestors_range()
				.chain(std::iter::once(sdf::Path::absolute_root_path()));
			for ancestor in ancestors {
				if let Some(dependents) = table.get(&ancestor) {
					for index_path in dependents {
						f(index_path, &ancestor);
					}
				}
			}
		}
	}

	/// Every layer used by a layer stack with recorded dependencies.
	pub fn used_layers(&self) -> Vec<Arc<sdf::Layer>> {
		let mut layers: Vec<Arc<sdf::Layer>> = Vec::new();
		for layer_stack in self.deps.keys() {
			for layer in layer_stack.layers() {
				if !layers.iter().any(|l| Arc::ptr_eq(l, layer)) {
					layers.push(layer.clone());
				}
			}
		}
		layers
	}

	/// The root layers of the layer stacks with recorded dependencies.
	pub fn used_root_layers(&self) -> Vec<Arc<sdf::Layer>> {
		let mut layers: Vec<Arc<sdf::Layer>> = Vec::new();
		for layer_stack in self.deps.keys() {
			let root = layer_stack.root_layer();
			if !layers.iter().any(|l| Arc::ptr_eq(l, root)) {
				layers.push(root.clone());
			}
		}
		layers
	}

	pub fn uses_layer_stack(&self, layer_stack: &Arc<LayerStack>) -> bool {
		self.deps.contains_key(&LayerStackPtr(layer_stack.clone()))
	}

	pub fn layer_stacks(&self) -> Vec<Arc<LayerStack>> {
		self.deps.keys().map(|ptr| ptr.0.clone()).collect()
	}

	pub fn is_empty(&self) -> bool {
		self.deps.is_empty()
	}

	/// Lists the recorded dependencies per layer stack and site.
	pub fn dump(&self) -> String {
		let mut out = String::new();
		for (layer_stack, table) in &self.deps {
			let _ = writeln!(out, "{}", **layer_stack);
			for (site, dependents) in table.iter() {
				if dependents.is_empty() {
					continue;
				}
				let paths: Vec<String> = dependents.iter().map(|p| format!("<{p}>")).collect();
				let _ = writeln!(out, "    <{site}>: {}", paths.join(" "));
			}
		}
		out
	}

	/// Verifies that no empty subtrees or duplicate entries were left
	/// behind.
	pub fn check_invariants(&self) -> bool {
		let mut ok = true;
		for (layer_stack, table) in &self.deps {
			ok &= verify!(!table.is_empty(), "empty dependency table for {}", **layer_stack);
			for (site, dependents) in table.iter() {
				let unique: BTreeSet<&sdf::Path> = dependents.iter().collect();
				ok &= verify!(
					unique.len() == dependents.len(),
					"duplicate dependencies on <{}>",
					site
				);
				if dependents.is_empty() {
					let live = table.subtree(site).any(|(_, d)| !d.is_empty());
					ok &= verify!(live, "dead dependency subtree at <{}>", site);
				}
			}
		}
		ok
	}
}

/// Erases the subtree at `path` and then each ancestor subtree for as long
/// as they hold no dependencies.
fn prune(table: &mut SiteDepMap, path: &sdf::Path) {
	let mut current = path.clone();
	loop {
		if table.subtree(&current).any(|(_, dependents)| !dependents.is_empty()) {
			break;
		}
		table.erase_subtree(&current);
		if current.is_absolute_root_path() || current.is_empty() {
			break;
		}
		current = current.parent_path();
	}
}

/// Lets parallel prim indexing add dependencies from several threads.
///
/// Writes are serialized for as long as the context lives; outside of one
/// the index is only reachable through `&mut`.
pub struct ConcurrentPopulationContext<'a> {
	deps: Mutex<&'a mut Dependencies>,
}

impl<'a> ConcurrentPopulationContext<'a> {
	pub fn new(deps: &'a mut Dependencies) -> Self {
		Self {
			deps: Mutex::new(deps),
		}
	}

	pub fn add(&self, prim_index: &PrimIndex) {
		self.deps.lock().add(prim_index);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ar;
	use crate::pcp::{LayerStackIdentifier, LayerStackRegistry, PrimIndexInputs, compute_prim_index};
	use proptest::prelude::*;

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	struct Scene {
		_resolver: Arc<ar::MemoryResolver>,
		layer_stack: Arc<LayerStack>,
		indexes: Vec<PrimIndex>,
	}

	/// Prims `/P{i}` with a child `C`, each optionally referencing a later
	/// prim, indexed for every prim and child.
	fn scene(references: &[Option<usize>]) -> Scene {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		for (i, reference) in references.iter().enumerate() {
			let prim = p(&format!("/P{i}"));
			root.define_prim(format!("/P{i}/C").as_str());
			if let Some(target) = reference {
				let target = (*target).max(i + 1).min(references.len() - 1);
				if target != i {
					root.add_reference(&prim, sdf::Reference::internal(format!("/P{target}").as_str()));
				}
			}
		}
		let registry = LayerStackRegistry::new(resolver.clone(), String::new(), false);
		let layer_stack = registry.find_or_create(&LayerStackIdentifier::new(root), &mut Vec::new());
		let inputs = PrimIndexInputs::new(&registry).cull(false);
		let indexes = (0..references.len())
			.flat_map(|i| [format!("/P{i}"), format!("/P{i}/C")])
			.map(|path| compute_prim_index(&p(&path), &layer_stack, &inputs).prim_index)
			.collect();
		Scene {
			_resolver: resolver,
			layer_stack,
			indexes,
		}
	}

	fn dependents_of(deps: &Dependencies, layer_stack: &Arc<LayerStack>, site: &sdf::Path) -> Vec<sdf::Path> {
		let mut found = Vec::new();
		deps.for_each_dependency_on_site(layer_stack, site, false, false, |index, _| found.push(index.clone()));
		found
	}

	#[test]
	fn stores_direct_arcs_only() {
		let scene = scene(&[Some(1), None]);
		let mut deps = Dependencies::new();
		for index in &scene.indexes {
			deps.add(index);
		}
		assert_eq!(dependents_of(&deps, &scene.layer_stack, &p("/P1")), vec![p("/P0")]);
		// The child's dependency on /P1/C is ancestral and recovered by walking up.
		assert!(dependents_of(&deps, &scene.layer_stack, &p("/P1/C")).is_empty());
		let mut ancestral = Vec::new();
		deps.for_each_dependency_on_site(&scene.layer_stack, &p("/P1/C"), true, false, |index, site| {
			ancestral.push((index.clone(), site.clone()));
		});
		assert_eq!(ancestral, vec![(p("/P0"), p("/P1"))]);
		assert!(deps.check_invariants());
	}

	#[test]
	fn removal_prunes_and_releases_layer_stacks() {
		let scene = scene(&[Some(1), None]);
		let mut deps = Dependencies::new();
		for index in &scene.indexes {
			deps.add(index);
		}
		assert!(deps.uses_layer_stack(&scene.layer_stack));

		let mut lifeboat = Lifeboat::new();
		for index in &scene.indexes {
			deps.remove(index, &mut lifeboat);
		}
		assert!(deps.is_empty());
		assert!(!deps.uses_layer_stack(&scene.layer_stack));
		assert_eq!(lifeboat.layer_stacks().len(), 1);
		assert!(Arc::ptr_eq(&lifeboat.layer_stacks()[0], &scene.layer_stack));
	}

	#[test]
	fn concurrent_population_serializes_adds() {
		let scene = scene(&[Some(1), Some(2), None]);
		let mut deps = Dependencies::new();
		{
			let context = ConcurrentPopulationContext::new(&mut deps);
			rayon::scope(|s| {
				for index in &scene.indexes {
					let context = &context;
					s.spawn(move |_| context.add(index));
				}
			});
		}
		// /P0 reaches /P2 through the reference nested in /P1. Threads add
		// in any order.
		let mut dependents = dependents_of(&deps, &scene.layer_stack, &p("/P2"));
		dependents.sort();
		assert_eq!(dependents, vec![p("/P0"), p("/P1")]);
		let dump = deps.dump();
		assert!(dump.contains("</P1>: </P0>"), "{dump}");
		assert!(deps.check_invariants());
	}

	proptest! {
		#![proptest_config(ProptestConfig::with_cases(48))]

		#[test]
		fn dependency_round_trip(
			references in prop::collection::vec(prop::option::of(0usize..6), 2..6),
			removed in prop::collection::vec(any::<bool>(), 12),
		) {
			let scene = scene(&references);
			let mut deps = Dependencies::new();
			for index in &scene.indexes {
				deps.add(index);
			}

			for index in &scene.indexes {
				for (layer_stack, site) in stored_sites(index) {
					let hits = dependents_of(&deps, &layer_stack.0, &site)
						.into_iter()
						.filter(|path| *path == index.path())
						.count();
					prop_assert_eq!(hits, 1);
				}
			}

			let mut lifeboat = Lifeboat::new();
			let (gone, kept): (Vec<_>, Vec<_>) = scene
				.indexes
				.iter()
				.enumerate()
				.partition(|(i, _)| removed.get(*i).copied().unwrap_or(true));
			for (_, index) in &gone {
				deps.remove(index, &mut lifeboat);
			}
			prop_assert!(deps.check_invariants());

			for (_, index) in &gone {
				for (layer_stack, site) in stored_sites(index) {
					prop_assert!(!dependents_of(&deps, &layer_stack.0, &site).contains(&index.path()));
				}
			}
			for (_, index) in &kept {
				for (layer_stack, site) in stored_sites(index) {
					prop_assert!(dependents_of(&deps, &layer_stack.0, &site).contains(&index.path()));
				}
			}

			for (_, index) in &kept {
				deps.remove(index, &mut lifeboat);
			}
			prop_assert!(deps.is_empty());
			prop_assert!(!deps.uses_layer_stack(&scene.layer_stack));
		}
	}
}
