use super::cache::{Cache, CacheId};
use super::dependency::{DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL, DEPENDENCY_TYPE_ANY_NON_VIRTUAL};
use super::layer_stack::{LayerStack, LayerStackPtr, LayerStackSite, Relocations};
use super::lifeboat::Lifeboat;
use super::prim_index::PrimIndex;
use crate::sdf::{self, ChangeFlag, ChangeFlags, FIELD_KEYS, SubLayerChange};
use crate::{tf, vt};
use enumset::{EnumSet, EnumSetType, enum_set};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The kinds of composed targets a property can have.
#[derive(EnumSetType, Debug)]
pub enum TargetType {
	RelationshipTarget,
	Connection,
}

pub type TargetTypes = EnumSet<TargetType>;

/// The invalidation one cache needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheChanges {
	/// Paths whose prim or property indexes, and everything below them,
	/// must be recomputed.
	pub did_change_significantly: BTreeSet<sdf::Path>,
	/// Prim indexes to rebuild without touching their descendants.
	pub did_change_prims: BTreeSet<sdf::Path>,
	/// Paths whose spec stacks changed without changing composition arcs.
	pub did_change_specs: BTreeSet<sdf::Path>,
	/// Renames and reparents, in the order they were made.
	pub did_change_path: Vec<(sdf::Path, sdf::Path)>,
	/// Properties whose relationship targets or connections changed.
	/// Indexes are unaffected; consumers re-read the composed targets.
	pub did_change_targets: BTreeMap<sdf::Path, TargetTypes>,
	/// Set when a layer stack the cache uses was recomputed.
	pub did_maybe_change_layers: bool,
}

impl CacheChanges {
	pub fn is_empty(&self) -> bool {
		self.did_change_significantly.is_empty()
			&& self.did_change_prims.is_empty()
			&& self.did_change_specs.is_empty()
			&& self.did_change_path.is_empty()
			&& self.did_change_targets.is_empty()
			&& !self.did_maybe_change_layers
	}

	/// Drops changes already implied by a significant change of an
	/// ancestor or by a prim rebuild.
	pub fn optimize(&mut self) {
		subsume_descendants(&mut self.did_change_significantly);
		for path in &self.did_change_significantly {
			subsume_descendants_of(&mut self.did_change_prims, path);
			subsume_descendants_of(&mut self.did_change_specs, path);
		}
		for path in &self.did_change_prims {
			self.did_change_specs.remove(path);
		}
	}
}

/// Removes every path that has another path of the set as a prefix.
fn subsume_descendants(paths: &mut BTreeSet<sdf::Path>) {
	let mut kept: Vec<sdf::Path> = Vec::new();
	for path in std::mem::take(paths) {
		if kept.last().is_some_and(|prefix| path.has_prefix(prefix)) {
			continue;
		}
		kept.push(path);
	}
	paths.extend(kept);
}

/// Removes `prefix` and every path below it.
fn subsume_descendants_of(paths: &mut BTreeSet<sdf::Path>, prefix: &sdf::Path) {
	paths.retain(|path| !path.has_prefix(prefix));
}

/// How a layer stack changed. Layer stacks are immutable, so any change
/// means the registry recomputes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerStackChanges {
	/// The set or order of layers changed.
	pub did_change_layers: bool,
	/// Only sublayer offsets changed. Cleared by a layer change.
	pub did_change_layer_offsets: bool,
	/// The composed relocation tables changed.
	pub did_change_relocates: bool,
	/// Both ends of every relocation that was added, removed or retargeted.
	pub paths_affected_by_relocation_changes: BTreeSet<sdf::Path>,
	/// Every prim index using the layer stack must be recomputed.
	pub did_change_significantly: bool,
}

impl LayerStackChanges {
	fn layers_changed(&mut self) {
		self.did_change_layers = true;
		self.did_change_layer_offsets = false;
	}

	fn offsets_changed(&mut self) {
		if !self.did_change_layers {
			self.did_change_layer_offsets = true;
		}
	}
}

/// Collects the cache invalidation that scene description changes imply.
///
/// Producers only read the caches they are given. Nothing is invalidated
/// until [Changes::apply], and layers and layer stacks released by it are
/// kept alive in the lifeboat until this value is dropped.
#[derive(Debug, Default)]
pub struct Changes {
	cache_changes: BTreeMap<CacheId, CacheChanges>,
	/// Renames reported by layers but not confirmed through
	/// [Changes::did_change_paths], keyed by the index paths they affect.
	rename_changes: BTreeMap<CacheId, BTreeMap<sdf::Path, sdf::Path>>,
	layer_stack_changes: BTreeMap<LayerStackPtr, LayerStackChanges>,
	lifeboat: Lifeboat,
}

impl Changes {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.cache_changes.values().all(CacheChanges::is_empty)
			&& self.rename_changes.values().all(BTreeMap::is_empty)
			&& self.layer_stack_changes.is_empty()
	}

	/// The optimized changes recorded for `cache`, if any.
	pub fn cache_changes(&self, cache: &Cache) -> Option<CacheChanges> {
		let renames = self.rename_changes.get(&cache.id());
		let mut changes = match self.cache_changes.get(&cache.id()) {
			Some(changes) => changes.clone(),
			None if renames.is_some() => CacheChanges::default(),
			None => return None,
		};
		if let Some(renames) = renames {
			resync_unconfirmed_renames(&mut changes, renames);
		}
		changes.optimize();
		Some(changes)
	}

	/// Layer stacks that must be recomputed.
	pub fn stale_layer_stacks(&self) -> Vec<Arc<LayerStack>> {
		self.layer_stack_changes
			.keys()
			.map(|ptr| ptr.0.clone())
			.collect()
	}

	/// How `layer_stack` changed, if it did.
	pub fn layer_stack_changes(&self, layer_stack: &Arc<LayerStack>) -> Option<LayerStackChanges> {
		self.layer_stack_changes
			.get(&LayerStackPtr(layer_stack.clone()))
			.cloned()
	}

	pub fn lifeboat(&self) -> &Lifeboat {
		&self.lifeboat
	}

	pub fn swap(&mut self, other: &mut Changes) {
		std::mem::swap(self, other);
	}

	fn changes_for(&mut self, cache: &Cache) -> &mut CacheChanges {
		self.cache_changes.entry(cache.id()).or_default()
	}

	fn layer_stack_changes_for(&mut self, layer_stack: &Arc<LayerStack>) -> &mut LayerStackChanges {
		self.layer_stack_changes
			.entry(LayerStackPtr(layer_stack.clone()))
			.or_default()
	}
}

/// Renames only a layer reported may not be renames in composed namespace,
/// so both ends are resynced.
fn resync_unconfirmed_renames(changes: &mut CacheChanges, renames: &BTreeMap<sdf::Path, sdf::Path>) {
	for (old_path, new_path) in renames {
		let confirmed = changes
			.did_change_path
			.iter()
			.any(|(old, new)| old == old_path && new == new_path);
		if confirmed {
			continue;
		}
		tracing::debug!("unconfirmed path change <{old_path}> to <{new_path}>");
		changes.did_change_significantly.insert(old_path.clone());
		if !new_path.is_empty() {
			changes.did_change_significantly.insert(new_path.clone());
		}
	}
}

/// Producers
impl Changes {
	/// Everything at and below `path` in `cache` must be recomputed.
	pub fn did_change_significantly(&mut self, cache: &Cache, path: &sdf::Path) {
		tracing::debug!("significant change at <{path}>");
		self.changes_for(cache)
			.did_change_significantly
			.insert(path.clone());
	}

	/// The prim index at `path` must be rebuilt; descendants are unaffected.
	pub fn did_change_prims(&mut self, cache: &Cache, path: &sdf::Path) {
		self.changes_for(cache).did_change_prims.insert(path.clone());
	}

	/// A spec was added or removed at `changed_path` in `changed_layer`,
	/// contributing to the index at `path`.
	///
	/// Removing a prim's last spec or adding one to a prim without any
	/// escalates to a significant change. Adding a spec at a culled site
	/// needs a prim rebuild. Everything else only rescans the spec stack.
	pub fn did_change_specs(
		&mut self,
		cache: &Cache,
		path: &sdf::Path,
		changed_layer: &sdf::Layer,
		changed_path: &sdf::Path,
	) {
		if path.is_prim_path() {
			let was_added = changed_layer.has_spec(changed_path);
			match cache.find_prim_index(path).filter(|index| index.has_specs()) {
				Some(index) => {
					if !was_added && no_longer_has_any_specs(index) {
						self.did_change_significantly(cache, path);
						return;
					}
					if was_added && !provides_spec(index, changed_layer, changed_path) {
						self.did_change_prims(cache, path);
						return;
					}
				}
				None if was_added => {
					self.did_change_significantly(cache, path);
					return;
				}
				None => {}
			}
		}
		self.changes_for(cache).did_change_specs.insert(path.clone());
	}

	/// `old_path` was renamed or reparented to `new_path`. The order of
	/// calls is kept: `A -> B, B -> C` differs from `B -> C, A -> B`.
	pub fn did_change_paths(&mut self, cache: &Cache, old_path: &sdf::Path, new_path: &sdf::Path) {
		tracing::debug!("path change <{old_path}> to <{new_path}>");
		self.changes_for(cache)
			.did_change_path
			.push((old_path.clone(), new_path.clone()));
	}

	/// Relocations authored at `path` changed.
	pub fn did_change_relocates(&mut self, cache: &Cache, path: &sdf::Path) {
		self.did_change_significantly(cache, path);
	}

	/// The relationship targets or connections of the property at `path`
	/// changed.
	pub fn did_change_targets(&mut self, cache: &Cache, path: &sdf::Path, target_type: TargetType) {
		*self
			.changes_for(cache)
			.did_change_targets
			.entry(path.clone())
			.or_default() |= target_type;
	}

	/// Every index depending on the site `(layer, path)` changed
	/// significantly.
	pub fn did_change_significantly_at_site(&mut self, cache: &Cache, layer: &sdf::Layer, path: &sdf::Path) {
		self.did_change_dependents(DependentChange::Significant.into(), cache, layer, path, true);
	}

	/// A spec at the site `(layer, path)` was added or removed without
	/// changing any composition arc.
	pub fn did_change_spec_at_site(&mut self, cache: &Cache, layer: &sdf::Layer, path: &sdf::Path) {
		self.did_change_dependents(DependentChange::Specs.into(), cache, layer, path, true);
	}

	/// Records `change` for every index using the site `(layer, path)`.
	/// Significant prim changes also reach indexes using descendant sites,
	/// which relocations may have moved elsewhere in namespace.
	fn did_change_dependents(
		&mut self,
		change: EnumSet<DependentChange>,
		cache: &Cache,
		layer: &sdf::Layer,
		path: &sdf::Path,
		only_existing: bool,
	) {
		let significant = change.contains(DependentChange::Significant);
		let recurse_on_site =
			significant && (path.is_absolute_root_path() || path.is_prim_or_prim_variant_selection_path());
		let deps = cache.find_site_dependencies_for_layer(
			layer,
			path,
			DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL,
			recurse_on_site,
			false,
			only_existing,
		);
		for dep in deps {
			tracing::debug!("{dep} in @{}@", layer.identifier());
			if significant {
				self.did_change_significantly(cache, &dep.index_path);
				continue;
			}
			if change.contains(DependentChange::Specs) {
				self.did_change_specs(cache, &dep.index_path, layer, &dep.site_path);
			}
			if change.contains(DependentChange::Targets) {
				self.did_change_targets(cache, &dep.index_path, TargetType::RelationshipTarget);
			}
			if change.contains(DependentChange::Connections) {
				self.did_change_targets(cache, &dep.index_path, TargetType::Connection);
			}
		}
	}

	/// `layer_stack` must be recomputed. Every prim index using it is
	/// resynced.
	pub fn did_change_layer_stack(&mut self, cache: &Cache, layer_stack: &Arc<LayerStack>) {
		self.did_change_layer_stack_with(cache, layer_stack, LayerStackChange::Layers | LayerStackChange::Significant);
	}

	/// The layers of the cache's own layer stack changed.
	pub fn did_change_layers(&mut self, cache: &Cache) {
		self.did_change_layer_stack_with(cache, cache.layer_stack(), LayerStackChange::Layers.into());
	}

	/// Sublayer offsets in the cache's own layer stack changed. Offsets are
	/// folded into the map functions of the arcs leaving each layer.
	pub fn did_change_layer_offsets(&mut self, cache: &Cache) {
		self.did_change_layer_stack_with(cache, cache.layer_stack(), LayerStackChange::Offsets.into());
	}

	/// The relocations authored in the layers of `layer_stack` changed.
	/// Both ends of every added, removed or retargeted relocation are
	/// recorded in the layer stack's changes.
	pub fn did_change_layer_stack_relocations(&mut self, cache: &Cache, layer_stack: &Arc<LayerStack>) {
		let relocations = Relocations::compute(layer_stack.layers());
		let changes = self.layer_stack_changes_for(layer_stack);
		if changes.did_change_relocates {
			return;
		}
		changes.did_change_relocates = true;
		changes.paths_affected_by_relocation_changes =
			Relocations::affected_paths(layer_stack.relocates_source_to_target(), &relocations.source_to_target);
		tracing::debug!(
			"relocations of {layer_stack} changed: {:?}",
			changes.paths_affected_by_relocation_changes
		);
		self.resync_layer_stack(cache, layer_stack);
	}

	fn did_change_layer_stack_with(
		&mut self,
		cache: &Cache,
		layer_stack: &Arc<LayerStack>,
		change: EnumSet<LayerStackChange>,
	) {
		tracing::debug!("layer stack {layer_stack} changed: {change:?}");
		let changes = self.layer_stack_changes_for(layer_stack);
		if change.contains(LayerStackChange::Layers) {
			changes.layers_changed();
		}
		if change.contains(LayerStackChange::Offsets) {
			changes.offsets_changed();
		}
		if change.contains(LayerStackChange::Significant) {
			changes.did_change_significantly = true;
		}
		self.resync_layer_stack(cache, layer_stack);
	}

	/// Every prim index of `cache` using `layer_stack` is resynced, since
	/// its nodes hold on to the layer stack being replaced.
	fn resync_layer_stack(&mut self, cache: &Cache, layer_stack: &Arc<LayerStack>) {
		if cache.uses_layer_stack(layer_stack) {
			self.changes_for(cache).did_maybe_change_layers = true;
		}
		let deps = cache.find_site_dependencies(
			layer_stack,
			&sdf::Path::absolute_root_path(),
			DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL,
			true,
			false,
			true,
		);
		for dep in deps {
			if dep.index_path.is_absolute_root_or_prim_path() {
				self.did_change_significantly(cache, &dep.index_path);
			}
		}
	}

	/// The contents of `layer` were replaced wholesale, as by a reload.
	pub fn did_change_layer_contents(&mut self, cache: &Cache, layer: &Arc<sdf::Layer>) {
		self.lifeboat.retain_layer(layer.clone());
		for layer_stack in cache.find_all_layer_stacks_using_layer(layer) {
			self.did_change_layer_stack(cache, &layer_stack);
		}
	}

	/// The layer `identifier` was muted.
	pub fn did_mute_layer(&mut self, cache: &Cache, identifier: &str) {
		let layer = cache.registry().resolver().open_layer(identifier);
		let layer_stacks = cache
			.registry()
			.find_all_using_layer_identifier(identifier);
		self.did_change_sublayer(cache, &layer_stacks, identifier, layer);
	}

	/// The layer `identifier` was unmuted.
	pub fn did_unmute_layer(&mut self, cache: &Cache, identifier: &str) {
		self.did_mute_layer(cache, identifier);
	}

	/// `sublayer_path` of `layer` failed to load before and may load now.
	pub fn did_maybe_fix_sublayer(&mut self, cache: &Cache, layer: &sdf::Layer, sublayer_path: &str) {
		let resolver = cache.registry().resolver();
		let identifier = resolver.create_identifier(sublayer_path, Some(layer.identifier()));
		let sublayer = resolver.open_layer(&identifier);
		let layer_stacks = cache.registry().find_all_using_layer(layer);
		self.did_change_sublayer(cache, &layer_stacks, &identifier, sublayer);
	}

	fn did_change_sublayer(
		&mut self,
		cache: &Cache,
		layer_stacks: &[Arc<LayerStack>],
		identifier: &str,
		sublayer: Option<Arc<sdf::Layer>>,
	) {
		let Some(sublayer) = sublayer else {
			tracing::debug!("sublayer @{identifier}@ is invalid");
			return;
		};
		tracing::debug!("sublayer @{identifier}@ changed in {} layer stacks", layer_stacks.len());
		self.lifeboat.retain_layer(sublayer);
		for layer_stack in layer_stacks {
			self.did_change_layer_stack(cache, layer_stack);
		}
	}

	/// The asset `identifier`, referenced from `site`, failed to open
	/// before and may open now.
	pub fn did_maybe_fix_asset(&mut self, cache: &Cache, site: &LayerStackSite, identifier: &str) {
		let Some(layer) = cache.registry().resolver().open_layer(identifier) else {
			tracing::debug!("asset @{identifier}@ is still invalid");
			return;
		};
		self.lifeboat.retain_layer(layer);

		if Arc::ptr_eq(&site.layer_stack, cache.layer_stack()) {
			self.did_change_significantly(cache, &site.path);
		}
		let deps = cache.find_site_dependencies(
			&site.layer_stack,
			&site.path,
			DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL,
			true,
			true,
			true,
		);
		for dep in deps {
			self.did_change_significantly(cache, &dep.index_path);
		}
	}
}

/// Layer changes
impl Changes {
	/// Classifies the edits each layer reports and records the invalidation
	/// they imply for `cache`.
	///
	/// Renames reported here are only trusted once confirmed through
	/// [Changes::did_change_paths]; unconfirmed ones resync both ends.
	pub fn did_change(&mut self, cache: &Cache, layer_changes: &[(Arc<sdf::Layer>, sdf::ChangeList)]) {
		let mut layer_stack_changes: BTreeMap<LayerStackPtr, EnumSet<LayerStackChange>> = BTreeMap::new();

		for (layer, change_list) in layer_changes {
			if cache.is_usd() && !change_list.entries().any(|(path, _)| is_prim_change_path(path)) {
				tracing::debug!("layer @{}@ changed: skipping non-prim changes", layer.identifier());
				continue;
			}
			let layer_stacks = cache.find_all_layer_stacks_using_layer(layer);
			if layer_stacks.is_empty() {
				tracing::debug!("layer @{}@ changed: unused", layer.identifier());
				continue;
			}
			tracing::debug!("changes to layer @{}@:\n{change_list}", layer.identifier());

			let mut layer_stack_mask = EnumSet::<LayerStackChange>::empty();
			let mut significant = BTreeSet::new();
			let mut spec_changes: BTreeMap<sdf::Path, EnumSet<SpecChange>> = BTreeMap::new();
			let mut fallback_to_ancestor = BTreeSet::new();
			let mut renames = Vec::new();

			for (path, entry) in change_list.entries() {
				if !entry.flags.is_disjoint(SPEC_ADDED_OR_REMOVED) {
					fallback_to_ancestor.insert(path.clone());
				}

				if path.is_absolute_root_path() {
					if entry.flags.contains(ChangeFlag::DidReplaceContent) {
						significant.insert(path.clone());
					}
					if let Some((old, new)) = entry.info_changed.get(&FIELD_KEYS.default_prim) {
						significant.insert(default_prim_path(old));
						significant.insert(default_prim_path(new));
					}
					match layer_stack_entry_change(entry) {
						LayerStackEntryChange::Significant => {
							tracing::debug!("layer @{}@ changed: significant", layer.identifier());
							layer_stack_mask |= LayerStackChange::Layers | LayerStackChange::Significant;
							significant.insert(path.clone());
						}
						LayerStackEntryChange::Sublayers => {
							layer_stack_mask |= LayerStackChange::Layers | LayerStackChange::Significant;
							for (sublayer_path, change) in &entry.sub_layer_changes {
								if *change != SubLayerChange::Offset {
									self.retain_changed_sublayer(cache, layer, sublayer_path, *change);
								}
							}
						}
						LayerStackEntryChange::None => {
							let offsets_changed = entry
								.sub_layer_changes
								.iter()
								.any(|(_, change)| *change == SubLayerChange::Offset);
							if offsets_changed {
								tracing::debug!("layer @{}@ changed: layer offsets", layer.identifier());
								layer_stack_mask |= LayerStackChange::Offsets;
								significant.insert(path.clone());
							}
						}
					}
				} else if path.is_prim_or_prim_variant_selection_path() {
					if entry.flags.contains(ChangeFlag::DidRename) {
						renames.push((entry.old_path.clone(), path.clone()));
					}
					let specs = prim_spec_changes(entry.flags);
					if !specs.is_empty() {
						*spec_changes.entry(path.clone()).or_default() |= specs;
					}
					if requires_prim_index_change(entry) || affects_payload_decoration(cache, layer, path, entry) {
						significant.insert(path.clone());
					}
					if entry.has_info_change(&FIELD_KEYS.relocates) {
						layer_stack_mask |= LayerStackChange::Relocates;
					}
				} else if cache.is_usd() {
					continue;
				} else if path.is_property_path() {
					if entry.flags.contains(ChangeFlag::DidRename) {
						renames.push((entry.old_path.clone(), path.clone()));
					}
					let specs = property_spec_changes(entry.flags);
					if !specs.is_empty() {
						*spec_changes.entry(path.clone()).or_default() |= specs;
					}
					if entry.has_info_change(&FIELD_KEYS.permission) {
						significant.insert(path.clone());
					}
				} else if path.is_target_path() {
					let mut specs = EnumSet::empty();
					if entry.flags.contains(ChangeFlag::DidAddTarget) {
						specs |= SpecChange::AddInert;
					}
					if entry.flags.contains(ChangeFlag::DidRemoveTarget) {
						specs |= SpecChange::RemoveInert;
					}
					if !specs.is_empty() {
						*spec_changes.entry(path.clone()).or_default() |= specs;
					}
				}
			}

			if !layer_stack_mask.is_empty() {
				for layer_stack in &layer_stacks {
					*layer_stack_changes
						.entry(LayerStackPtr(layer_stack.clone()))
						.or_default() |= layer_stack_mask;
				}
			}

			// A prim spec first or last in its stack escalates inside
			// did_change_specs.
			let mut dependent_changes: BTreeMap<sdf::Path, EnumSet<DependentChange>> = BTreeMap::new();
			for (path, specs) in &spec_changes {
				if !specs.is_disjoint(NON_INERT_SPECS) {
					significant.insert(path.clone());
				} else if !specs.is_disjoint(INERT_SPECS) {
					*dependent_changes.entry(path.clone()).or_default() |= DependentChange::Specs;
				}
				if path.is_prim_or_prim_variant_selection_path() {
					continue;
				}
				if specs.contains(SpecChange::Targets) {
					*dependent_changes.entry(path.clone()).or_default() |= DependentChange::Targets;
				}
				if specs.contains(SpecChange::Connections) {
					*dependent_changes.entry(path.clone()).or_default() |= DependentChange::Connections;
				}
			}

			for path in &significant {
				let only_existing = !fallback_to_ancestor.contains(path);
				self.did_change_dependents(DependentChange::Significant.into(), cache, layer, path, only_existing);
			}

			if !cache.is_usd() {
				let relocating_prims = layer.prims_with_relocates();
				let added_relocates = spec_changes.iter().any(|(path, specs)| {
					path.is_prim_or_prim_variant_selection_path()
						&& specs.contains(SpecChange::AddNonInert)
						&& relocating_prims.iter().any(|prim| prim.has_prefix(path))
				});
				for layer_stack in &layer_stacks {
					let resynced_relocates = layer_stack
						.paths_to_prims_with_relocates()
						.iter()
						.any(|prim| significant.iter().any(|path| prim.has_prefix(path)));
					if added_relocates || resynced_relocates {
						*layer_stack_changes
							.entry(LayerStackPtr(layer_stack.clone()))
							.or_default() |= LayerStackChange::Relocates;
					}
				}
			}

			for (path, change) in &dependent_changes {
				self.did_change_dependents(*change, cache, layer, path, false);
			}

			for (old_path, new_path) in &renames {
				self.record_rename(cache, layer, old_path, new_path);
			}
		}

		for (layer_stack, change) in layer_stack_changes {
			if change.contains(LayerStackChange::Relocates) {
				self.did_change_layer_stack_relocations(cache, &layer_stack);
			}
			let change = change - LayerStackChange::Relocates;
			if !change.is_empty() {
				self.did_change_layer_stack_with(cache, &layer_stack, change);
			}
		}
	}

	/// Keeps a sublayer named by a `subLayers` edit of `layer` alive until
	/// the change is applied.
	fn retain_changed_sublayer(&mut self, cache: &Cache, layer: &sdf::Layer, sublayer_path: &str, change: SubLayerChange) {
		let resolver = cache.registry().resolver();
		let identifier = resolver.create_identifier(sublayer_path, Some(layer.identifier()));
		match resolver.open_layer(&identifier) {
			Some(sublayer) => self.lifeboat.retain_layer(sublayer),
			None => tracing::debug!("{change:?} sublayer @{identifier}@ is invalid"),
		}
	}

	/// Records where the indexes using `old_path` in `layer` would move if
	/// the rename holds in composed namespace. Indexes using `new_path` are
	/// treated as deleted.
	fn record_rename(&mut self, cache: &Cache, layer: &sdf::Layer, old_path: &sdf::Path, new_path: &sdf::Path) {
		tracing::debug!("renamed @{}@<{old_path}> to <{new_path}>", layer.identifier());
		let mut renames = Vec::new();
		if !new_path.is_empty() {
			let deps = cache.find_site_dependencies_for_layer(
				layer,
				new_path,
				DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
				false,
				false,
				true,
			);
			renames.extend(deps.into_iter().map(|dep| (dep.index_path, sdf::Path::empty_path())));
		}
		let deps = cache.find_site_dependencies_for_layer(
			layer,
			old_path,
			DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
			false,
			false,
			true,
		);
		for dep in deps {
			let new_index_path = if new_path.is_empty() {
				sdf::Path::empty_path()
			} else {
				dep.map_func.map_source_to_target(new_path)
			};
			renames.push((dep.index_path, new_index_path));
		}
		self.rename_changes
			.entry(cache.id())
			.or_default()
			.extend(renames);
	}
}

/// Application
impl Changes {
	/// Applies the changes recorded for `cache`.
	///
	/// Stale layer stacks are dropped from the registry first so the cache
	/// recomputes them. Released resources stay in this value's lifeboat.
	pub fn apply(&mut self, cache: &mut Cache) {
		for layer_stack in self.layer_stack_changes.keys() {
			if cache.registry().remove(layer_stack) {
				tracing::debug!("dropped stale layer stack {}", **layer_stack);
			}
			self.lifeboat.retain_layer_stack(layer_stack.0.clone());
		}

		let renames = self.rename_changes.remove(&cache.id());
		let mut changes = match self.cache_changes.remove(&cache.id()) {
			Some(changes) => changes,
			None if renames.is_some() => CacheChanges::default(),
			None => return,
		};
		if let Some(renames) = renames {
			resync_unconfirmed_renames(&mut changes, &renames);
		}
		changes.optimize();
		cache.apply(&changes, &mut self.lifeboat);
	}
}

/// How a layer stack changed, as seen while classifying layer edits.
#[derive(EnumSetType, Debug)]
enum LayerStackChange {
	Layers,
	Offsets,
	Relocates,
	Significant,
}

/// What the indexes using a changed site must do.
#[derive(EnumSetType, Debug)]
enum DependentChange {
	Significant,
	Specs,
	Targets,
	Connections,
}

/// How the specs at one path of a layer changed.
#[derive(EnumSetType, Debug)]
enum SpecChange {
	AddInert,
	RemoveInert,
	AddNonInert,
	RemoveNonInert,
	Targets,
	Connections,
}

const INERT_SPECS: EnumSet<SpecChange> = enum_set!(SpecChange::AddInert | SpecChange::RemoveInert);
const NON_INERT_SPECS: EnumSet<SpecChange> = enum_set!(SpecChange::AddNonInert | SpecChange::RemoveNonInert);

/// Adding or removing a spec at these paths has no dependencies to look up
/// yet, so queries fall back to an ancestor.
const SPEC_ADDED_OR_REMOVED: ChangeFlags = enum_set!(
	ChangeFlag::DidAddInertPrim
		| ChangeFlag::DidRemoveInertPrim
		| ChangeFlag::DidAddNonInertPrim
		| ChangeFlag::DidRemoveNonInertPrim
		| ChangeFlag::DidAddProperty
		| ChangeFlag::DidRemoveProperty
		| ChangeFlag::DidAddPropertyWithOnlyRequiredFields
		| ChangeFlag::DidRemovePropertyWithOnlyRequiredFields
);

const PRIM_ARC_CHANGES: ChangeFlags = enum_set!(
	ChangeFlag::DidChangePrimInheritPaths
		| ChangeFlag::DidChangePrimSpecializes
		| ChangeFlag::DidChangePrimReferences
		| ChangeFlag::DidChangePrimVariantSets
);

enum LayerStackEntryChange {
	None,
	Sublayers,
	Significant,
}

fn layer_stack_entry_change(entry: &sdf::ChangeEntry) -> LayerStackEntryChange {
	if !entry
		.flags
		.is_disjoint(ChangeFlag::DidReplaceContent | ChangeFlag::DidChangeIdentifier)
	{
		return LayerStackEntryChange::Significant;
	}
	let layer_order_fields = [&FIELD_KEYS.owner, &FIELD_KEYS.session_owner, &FIELD_KEYS.has_owned_sub_layers];
	if layer_order_fields
		.into_iter()
		.any(|field| entry.has_info_change(field))
	{
		return LayerStackEntryChange::Significant;
	}
	if entry
		.sub_layer_changes
		.iter()
		.any(|(_, change)| *change != SubLayerChange::Offset)
	{
		return LayerStackEntryChange::Sublayers;
	}
	LayerStackEntryChange::None
}

fn requires_prim_index_change(entry: &sdf::ChangeEntry) -> bool {
	if !entry.flags.is_disjoint(PRIM_ARC_CHANGES) {
		return true;
	}
	let fields = [
		&FIELD_KEYS.payload,
		&FIELD_KEYS.permission,
		&FIELD_KEYS.variant_selection,
		&FIELD_KEYS.instanceable,
	];
	fields.into_iter().any(|field| entry.has_info_change(field))
}

fn affects_payload_decoration(cache: &Cache, layer: &sdf::Layer, path: &sdf::Path, entry: &sdf::ChangeEntry) -> bool {
	let Some(decorator) = cache.payload_decorator() else {
		return false;
	};
	entry
		.info_changed
		.keys()
		.any(|field| decorator.is_field_relevant_for_decoration(layer, path, field))
}

fn prim_spec_changes(flags: ChangeFlags) -> EnumSet<SpecChange> {
	let mut specs = EnumSet::empty();
	for (flag, spec) in [
		(ChangeFlag::DidAddInertPrim, SpecChange::AddInert),
		(ChangeFlag::DidRemoveInertPrim, SpecChange::RemoveInert),
		(ChangeFlag::DidAddNonInertPrim, SpecChange::AddNonInert),
		(ChangeFlag::DidRemoveNonInertPrim, SpecChange::RemoveNonInert),
	] {
		if flags.contains(flag) {
			specs |= spec;
		}
	}
	specs
}

fn property_spec_changes(flags: ChangeFlags) -> EnumSet<SpecChange> {
	let mut specs = EnumSet::empty();
	for (flag, spec) in [
		(ChangeFlag::DidAddPropertyWithOnlyRequiredFields, SpecChange::AddInert),
		(ChangeFlag::DidRemovePropertyWithOnlyRequiredFields, SpecChange::RemoveInert),
		(ChangeFlag::DidAddProperty, SpecChange::AddNonInert),
		(ChangeFlag::DidRemoveProperty, SpecChange::RemoveNonInert),
		(ChangeFlag::DidChangeRelationshipTargets, SpecChange::Targets),
		(ChangeFlag::DidChangeAttributeConnection, SpecChange::Connections),
	] {
		if flags.contains(flag) {
			specs |= spec;
		}
	}
	specs
}

/// The root prim a `defaultPrim` value names, or the absolute root when it
/// names none.
fn default_prim_path(value: &vt::Value) -> sdf::Path {
	match value.get::<tf::Token>() {
		Some(name) if sdf::Path::is_valid_identifier(name.as_str()) => {
			sdf::Path::absolute_root_path().append_child(&name)
		}
		_ => sdf::Path::absolute_root_path(),
	}
}

fn is_prim_change_path(path: &sdf::Path) -> bool {
	path.is_absolute_root_path() || path.is_prim_or_prim_variant_selection_path()
}

fn no_longer_has_any_specs(index: &PrimIndex) -> bool {
	index
		.node_range()
		.into_iter()
		.all(|node| !node.layer_stack().has_prim_specs(node.path()))
}

/// Whether a node of `index` already provides the spec at `path` in
/// `layer`.
fn provides_spec(index: &PrimIndex, layer: &sdf::Layer, path: &sdf::Path) -> bool {
	index.node_range().into_iter().any(|node| {
		node.path() == path && !node.is_culled() && node.layer_stack().has_layer(layer)
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn set(paths: &[&str]) -> BTreeSet<sdf::Path> {
		paths.iter().map(|p| sdf::Path::from(*p)).collect()
	}

	#[test]
	fn significant_changes_subsume_descendants() {
		let mut changes = CacheChanges {
			did_change_significantly: set(&["/A", "/A/B", "/A/B/C", "/B", "/C/D"]),
			did_change_prims: set(&["/A/X", "/C", "/D"]),
			did_change_specs: set(&["/B/Y", "/C", "/C/D/E", "/E"]),
			..CacheChanges::default()
		};
		changes.optimize();
		assert_eq!(changes.did_change_significantly, set(&["/A", "/B", "/C/D"]));
		assert_eq!(changes.did_change_prims, set(&["/C", "/D"]));
		assert_eq!(changes.did_change_specs, set(&["/E"]));
	}

	#[test]
	fn subsume_keeps_siblings_with_common_name_prefix() {
		let mut paths = set(&["/A", "/AB", "/A/B", "/A.x"]);
		subsume_descendants(&mut paths);
		assert_eq!(paths, set(&["/A", "/AB"]));
	}

	#[test]
	fn layer_changes_clear_offset_changes() {
		let mut changes = LayerStackChanges::default();
		changes.offsets_changed();
		assert!(changes.did_change_layer_offsets);
		changes.layers_changed();
		changes.offsets_changed();
		assert!(changes.did_change_layers);
		assert!(!changes.did_change_layer_offsets);
	}

	#[test]
	fn relocation_diffs_cover_both_ends() {
		let table = |pairs: &[(&str, &str)]| -> BTreeMap<sdf::Path, sdf::Path> {
			pairs
				.iter()
				.map(|(source, target)| (sdf::Path::from(*source), sdf::Path::from(*target)))
				.collect()
		};
		let old = table(&[("/A/B", "/D/B"), ("/A/C", "/D/C"), ("/A/E", "/D/E")]);
		let new = table(&[("/A/B", "/D/B"), ("/A/C", "/D/X"), ("/A/F", "/D/F")]);
		assert_eq!(
			Relocations::affected_paths(&old, &new),
			set(&["/A/C", "/D/C", "/D/X", "/A/E", "/D/E", "/A/F", "/D/F"])
		);
		assert!(Relocations::affected_paths(&old, &old).is_empty());
	}

	#[test]
	fn default_prim_values_name_root_prims() {
		assert_eq!(default_prim_path(&tf::Token::new("World").into()), sdf::Path::from("/World"));
		assert_eq!(default_prim_path(&tf::Token::new("not valid").into()), sdf::Path::absolute_root_path());
		assert_eq!(default_prim_path(&vt::Value::empty()), sdf::Path::absolute_root_path());
	}

	#[test]
	fn empty_changes() {
		assert!(CacheChanges::default().is_empty());
		assert!(Changes::new().is_empty());
	}
}
