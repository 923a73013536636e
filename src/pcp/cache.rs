use super::changes::{CacheChanges, Changes};
use super::dependencies::Dependencies;
use super::dependency::{
	Dependency, DependencyFlags, DependencyType, DependencyVector, for_each_dependent_node,
	translate_to_index_path,
};
use super::errors::{Error, coding_error, verify};
use super::indexer::{
	IncludePayloadPredicate, PayloadDecorator, PayloadSet, PrimIndexInputs, PrimIndexOutputs,
	VariantFallbackMap, compute_prim_index,
};
use super::layer_stack::{LayerStack, LayerStackIdentifier, LayerStackPtr, LayerStackSite};
use super::layer_stack_registry::LayerStackRegistry;
use super::lifeboat::Lifeboat;
use super::map_function::MapFunction;
use super::options::CacheOptions;
use super::parallel::{ChildrenPredicate, ParallelIndexer, Publisher};
use super::prim_index::PrimIndex;
use super::property_index::PropertyIndex;
use crate::{ar, sdf};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

static INVALID_PRIM_INDEX: LazyLock<PrimIndex> = LazyLock::new(PrimIndex::default);
static INVALID_PROPERTY_INDEX: LazyLock<PropertyIndex> = LazyLock::new(PropertyIndex::default);

/// Identifies a cache for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheId(u64);

/// Counts describing what a cache holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
	pub prim_indexes: usize,
	pub property_indexes: usize,
	pub nodes: usize,
	pub layer_stacks: usize,
	pub prim_index_computations: usize,
}

impl std::fmt::Display for CacheStatistics {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		writeln!(f, "prim indexes: {}", self.prim_indexes)?;
		writeln!(f, "property indexes: {}", self.property_indexes)?;
		writeln!(f, "prim index nodes: {}", self.nodes)?;
		writeln!(f, "layer stacks: {}", self.layer_stacks)?;
		write!(f, "prim index computations: {}", self.prim_index_computations)
	}
}

/// Caches the composition of prims and properties in one layer stack.
///
/// The cache computes prim indexes lazily, memoizes them in a path table
/// and records the sites each of them depends on, so that scene
/// description changes can invalidate exactly the affected entries.
///
/// Reads through `&self` may happen from several threads. Mutation goes
/// through `&mut self`; parallel indexing takes the cache mutably for the
/// duration of the pass.
pub struct Cache {
	id: CacheId,
	options: CacheOptions,
	layer_stack_identifier: LayerStackIdentifier,
	payload_decorator: Option<Arc<dyn PayloadDecorator>>,
	included_payloads: RwLock<PayloadSet>,
	variant_fallbacks: VariantFallbackMap,
	prim_indexes: sdf::PathTable<PrimIndex>,
	property_indexes: sdf::PathTable<PropertyIndex>,
	dependencies: Dependencies,
	prim_index_computations: AtomicUsize,
	layer_stack: Arc<LayerStack>,
	registry: Arc<LayerStackRegistry>,
}

impl std::fmt::Debug for Cache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Cache")
			.field("id", &self.id)
			.field("layer_stack", &self.layer_stack_identifier.to_string())
			.field("usd", &self.options.usd)
			.finish_non_exhaustive()
	}
}

impl Cache {
	/// Creates a cache for `identifier`, resolving assets with `resolver`.
	pub fn new(identifier: LayerStackIdentifier, resolver: Arc<dyn ar::Resolver>, options: CacheOptions) -> Self {
		let registry = Arc::new(LayerStackRegistry::new(
			resolver,
			options.file_format_target.clone(),
			options.usd,
		));
		let layer_stack = registry.find_or_create(&identifier, &mut Vec::new());
		let id = CacheId(NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed));
		tracing::debug!("created cache {} for {}", id.0, identifier);
		Self {
			id,
			options,
			layer_stack_identifier: identifier,
			payload_decorator: None,
			included_payloads: RwLock::new(PayloadSet::new()),
			variant_fallbacks: VariantFallbackMap::new(),
			prim_indexes: sdf::PathTable::new(),
			property_indexes: sdf::PathTable::new(),
			dependencies: Dependencies::new(),
			prim_index_computations: AtomicUsize::new(0),
			layer_stack,
			registry,
		}
	}

	pub fn with_payload_decorator(mut self, decorator: Arc<dyn PayloadDecorator>) -> Self {
		self.payload_decorator = Some(decorator);
		self
	}
}

/// Accessors
impl Cache {
	pub fn id(&self) -> CacheId {
		self.id
	}

	pub fn options(&self) -> &CacheOptions {
		&self.options
	}

	pub fn is_usd(&self) -> bool {
		self.options.usd
	}

	pub fn file_format_target(&self) -> &str {
		&self.options.file_format_target
	}

	pub fn layer_stack_identifier(&self) -> &LayerStackIdentifier {
		&self.layer_stack_identifier
	}

	/// The layer stack this cache composes in.
	pub fn layer_stack(&self) -> &Arc<LayerStack> {
		&self.layer_stack
	}

	pub fn registry(&self) -> &LayerStackRegistry {
		&self.registry
	}

	pub fn payload_decorator(&self) -> Option<&dyn PayloadDecorator> {
		self.payload_decorator.as_deref()
	}

	pub fn variant_fallbacks(&self) -> &VariantFallbackMap {
		&self.variant_fallbacks
	}

	/// Prim index paths whose payloads are included.
	pub fn included_payloads(&self) -> BTreeSet<sdf::Path> {
		self.included_payloads.read().iter().cloned().collect()
	}

	pub fn is_payload_included(&self, path: &sdf::Path) -> bool {
		self.included_payloads.read().contains(path)
	}

	/// The live layer stack for `identifier`, if any.
	pub fn find_layer_stack(&self, identifier: &LayerStackIdentifier) -> Option<Arc<LayerStack>> {
		self.registry.find(identifier)
	}

	/// Whether any cached index or the cache itself uses `layer_stack`.
	pub fn uses_layer_stack(&self, layer_stack: &Arc<LayerStack>) -> bool {
		Arc::ptr_eq(layer_stack, &self.layer_stack) || self.dependencies.uses_layer_stack(layer_stack)
	}

	/// The inputs prim indexing reads from this cache.
	pub fn prim_index_inputs(&self) -> PrimIndexInputs<'_> {
		index_inputs(
			&self.registry,
			&self.variant_fallbacks,
			&self.included_payloads,
			self.payload_decorator.as_deref(),
			&self.options,
		)
	}

	pub fn statistics(&self) -> CacheStatistics {
		let valid = || self.prim_indexes.values().filter(|index| index.is_valid());
		CacheStatistics {
			prim_indexes: valid().count(),
			property_indexes: self
				.property_indexes
				.values()
				.filter(|index| index.is_valid())
				.count(),
			nodes: valid()
				.filter_map(|index| index.graph())
				.map(|graph| graph.len())
				.sum(),
			layer_stacks: self.registry.all_layer_stacks().len(),
			prim_index_computations: self.prim_index_computations.load(Ordering::Relaxed),
		}
	}
}

fn index_inputs<'a>(
	registry: &'a LayerStackRegistry,
	variant_fallbacks: &'a VariantFallbackMap,
	included_payloads: &'a RwLock<PayloadSet>,
	payload_decorator: Option<&'a dyn PayloadDecorator>,
	options: &CacheOptions,
) -> PrimIndexInputs<'a> {
	PrimIndexInputs::new(registry)
		.variant_fallbacks(variant_fallbacks)
		.included_payloads(included_payloads)
		.payload_decorator(payload_decorator)
		.cull(options.culling)
		.usd(options.usd)
}

/// Prim indexes
impl Cache {
	/// Returns the prim index for `path`, computing and caching it and the
	/// indexes of its ancestors as needed. Errors from computations are
	/// appended to `all_errors`.
	pub fn compute_prim_index(&mut self, path: &sdf::Path, all_errors: &mut Vec<Error>) -> &PrimIndex {
		if !path.is_absolute_path() || !path.is_absolute_root_or_prim_path() {
			coding_error!("<{}> is not an absolute prim path", path);
			return &INVALID_PRIM_INDEX;
		}
		if self.find_prim_index(path).is_none() {
			if !path.is_absolute_root_path() {
				self.compute_prim_index(&path.parent_path(), all_errors);
			}
			let outputs = {
				let parent = self
					.prim_indexes
					.get(&path.parent_path())
					.filter(|index| index.is_valid());
				let inputs = self.prim_index_inputs().parent_index(parent);
				compute_prim_index(path, &self.layer_stack, &inputs)
			};
			self.prim_index_computations
				.fetch_add(1, Ordering::Relaxed);
			self.publish_prim_index(path, outputs, all_errors);
		}
		self.prim_indexes
			.get(path)
			.unwrap_or(&INVALID_PRIM_INDEX)
	}

	fn publish_prim_index(&mut self, path: &sdf::Path, outputs: PrimIndexOutputs, all_errors: &mut Vec<Error>) {
		if outputs.included_discovered_payload() {
			self.included_payloads.get_mut().insert(path.clone());
		}
		all_errors.extend(outputs.all_errors);
		self.dependencies.add(&outputs.prim_index);
		self.prim_indexes
			.insert(path.clone(), outputs.prim_index);
	}

	/// Returns the cached prim index for `path` without computing it.
	pub fn find_prim_index(&self, path: &sdf::Path) -> Option<&PrimIndex> {
		self.prim_indexes
			.get(path)
			.filter(|index| index.is_valid())
	}

	/// Calls `f` for every cached prim index.
	pub fn for_each_prim_index(&self, mut f: impl FnMut(&PrimIndex)) {
		for index in self.prim_indexes.values() {
			if index.is_valid() {
				f(index);
			}
		}
	}

	/// Computes the prim indexes at `roots` and, as far as
	/// `children_predicate` allows, their namespace descendants on the
	/// rayon thread pool.
	///
	/// `payload_predicate` decides whether to include payloads of prims not
	/// yet in the included set; prims it includes are added to the set.
	/// Only caches in USD mode support parallel indexing.
	pub fn compute_prim_indexes_in_parallel(
		&mut self,
		roots: &[sdf::Path],
		all_errors: &mut Vec<Error>,
		children_predicate: ChildrenPredicate,
		payload_predicate: Option<IncludePayloadPredicate>,
	) {
		if !self.options.usd {
			coding_error!("parallel prim indexing requires a USD mode cache");
			return;
		}

		let mut seeds = Vec::with_capacity(roots.len());
		for root in roots {
			if !root.is_absolute_path() || !root.is_absolute_root_or_prim_path() {
				coding_error!("<{}> is not an absolute prim path", root);
				continue;
			}
			let parent = if root.is_absolute_root_path() {
				None
			} else {
				Some(
					self.compute_prim_index(&root.parent_path(), all_errors)
						.clone(),
				)
			};
			seeds.push((root.clone(), parent));
		}

		let indexer = ParallelIndexer {
			layer_stack: &self.layer_stack,
			inputs: index_inputs(
				&self.registry,
				&self.variant_fallbacks,
				&self.included_payloads,
				self.payload_decorator.as_deref(),
				&self.options,
			),
			included_payloads: &self.included_payloads,
			children_predicate,
			payload_predicate,
			publisher: Publisher::new(
				&mut self.prim_indexes,
				&mut self.dependencies,
				self.options.flush_threshold,
			),
			errors: Mutex::new(Vec::new()),
			computations: &self.prim_index_computations,
		};
		indexer.run(&seeds);
		all_errors.append(&mut indexer.errors.into_inner());
	}
}

/// Property indexes
impl Cache {
	/// Returns the property index for `path`, computing and caching it and
	/// the prim index owning it as needed.
	///
	/// USD mode caches do not cache property indexes; use
	/// [PropertyIndex::build] there.
	pub fn compute_property_index(&mut self, path: &sdf::Path, all_errors: &mut Vec<Error>) -> &PropertyIndex {
		if self.options.usd {
			coding_error!("cannot compute a cached property index for <{}> in USD mode", path);
			return &INVALID_PROPERTY_INDEX;
		}
		if !path.is_property_path() {
			coding_error!("<{}> is not a property path", path);
			return &INVALID_PROPERTY_INDEX;
		}
		if self.find_property_index(path).is_none() {
			let prim_path = path.prim_path();
			self.compute_prim_index(&prim_path, all_errors);
			let property_index = match self.prim_indexes.get(&prim_path) {
				Some(prim_index) => PropertyIndex::build(path, prim_index, all_errors),
				None => PropertyIndex::default(),
			};
			self.property_indexes
				.insert(path.clone(), property_index);
		}
		self.property_indexes
			.get(path)
			.unwrap_or(&INVALID_PROPERTY_INDEX)
	}

	/// Returns the cached property index for `path` without computing it.
	pub fn find_property_index(&self, path: &sdf::Path) -> Option<&PropertyIndex> {
		self.property_indexes
			.get(path)
			.filter(|index| index.is_valid())
	}
}

/// Configuration changes
impl Cache {
	/// Replaces the variant fallbacks. Every prim index is invalidated if
	/// they differ from the current ones.
	pub fn set_variant_fallbacks(&mut self, fallbacks: VariantFallbackMap, changes: Option<&mut Changes>) {
		if self.variant_fallbacks == fallbacks {
			return;
		}
		self.with_changes(changes, |cache, changes| {
			changes.did_change_significantly(cache, &sdf::Path::absolute_root_path());
		});
		self.variant_fallbacks = fallbacks;
	}

	/// Adds and removes prims from the included payload set.
	///
	/// The set changes right away. The prim indexes affected are
	/// invalidated immediately, or through `changes` when given.
	pub fn request_payloads(
		&mut self,
		to_include: &[sdf::Path],
		to_exclude: &[sdf::Path],
		changes: Option<&mut Changes>,
	) {
		let mut changed = Vec::new();
		{
			let payloads = self.included_payloads.get_mut();
			for path in to_include {
				if !path.is_absolute_root_or_prim_path() {
					coding_error!("cannot include payloads for <{}>", path);
				} else if payloads.insert(path.clone()) {
					changed.push(path.clone());
				}
			}
			for path in to_exclude {
				if !path.is_absolute_root_or_prim_path() {
					coding_error!("cannot exclude payloads for <{}>", path);
				} else if payloads.remove(path) {
					changed.push(path.clone());
				}
			}
		}

		self.with_changes(changes, |cache, changes| {
			for path in &changed {
				changes.did_change_significantly(cache, path);
			}
		});
	}

	/// Mutes and unmutes layers, anchoring relative identifiers to the root
	/// layer. Returns the canonical identifiers that were muted and
	/// unmuted.
	///
	/// The cache's own root and session layers cannot be muted.
	pub fn request_layer_muting(
		&mut self,
		to_mute: &[String],
		to_unmute: &[String],
		changes: Option<&mut Changes>,
	) -> (Vec<String>, Vec<String>) {
		let _binder = ar::ResolverContextBinder::new(&self.layer_stack_identifier.resolver_context);
		let root_layer = self.layer_stack_identifier.root_layer.clone();
		let own_layers: Vec<String> = std::iter::once(&root_layer)
			.chain(&self.layer_stack_identifier.session_layer)
			.map(|layer| layer.identifier().to_string())
			.collect();

		let resolver = self.registry.resolver();
		let mut muted: Vec<String> = to_mute
			.iter()
			.filter(|identifier| {
				let canonical = resolver.create_identifier(identifier, Some(root_layer.identifier()));
				let own = own_layers.contains(&canonical);
				if own {
					coding_error!("cannot mute the cache's own layer @{}@", canonical);
				}
				!own
			})
			.cloned()
			.collect();
		let mut unmuted = to_unmute.to_vec();
		self.registry
			.mute_and_unmute(&root_layer, &mut muted, &mut unmuted);

		self.with_changes(changes, |cache, changes| {
			for identifier in &muted {
				changes.did_mute_layer(cache, identifier);
			}
			for identifier in &unmuted {
				changes.did_unmute_layer(cache, identifier);
			}
			// Arcs to a layer that was muted carry an error instead of a
			// layer stack, so nothing depends on one yet.
			for (path, index) in cache.prim_indexes.iter() {
				let mentions_unmuted = index.local_errors().iter().any(|error| {
					matches!(error, Error::MutedAssetPath { resolved_asset_path, .. }
						if unmuted.contains(resolved_asset_path))
				});
				if index.is_valid() && mentions_unmuted {
					changes.did_change_significantly(cache, path);
				}
			}
		});
		(muted, unmuted)
	}

	/// Collects the invalidation `produce` describes and applies it, into
	/// `changes` when the caller collects them or immediately otherwise.
	fn with_changes(&mut self, changes: Option<&mut Changes>, produce: impl FnOnce(&Self, &mut Changes)) {
		match changes {
			Some(changes) => produce(self, changes),
			None => {
				let mut changes = Changes::new();
				produce(self, &mut changes);
				changes.apply(self);
			}
		}
	}
}

/// Reloading
impl Cache {
	/// Reloads every layer the cache uses and retries every sublayer and
	/// asset that failed to load.
	pub fn reload(&mut self, changes: Option<&mut Changes>) {
		let _binder = ar::ResolverContextBinder::new(&self.layer_stack_identifier.resolver_context);
		let _span = tracing::debug_span!("reload").entered();
		self.with_changes(changes, |cache, changes| {
			for layer_stack in cache.registry.all_layer_stacks() {
				cache.retry_invalid_sublayers(&layer_stack, changes);
			}
			for (_, index) in cache.prim_indexes.iter() {
				cache.retry_invalid_assets(index, changes);
			}
			let layers = cache.used_layers();
			for layer in cache.registry.resolver().reload_layers(&layers) {
				changes.did_change_layer_contents(cache, &layer);
			}
		});
	}

	/// Like [Cache::reload], limited to the layers and errors of prim
	/// indexes at and below `prim_path`. Layers of the cache's own layer
	/// stack are not reloaded.
	pub fn reload_references(&mut self, changes: Option<&mut Changes>, prim_path: &sdf::Path) {
		let _binder = ar::ResolverContextBinder::new(&self.layer_stack_identifier.resolver_context);
		let _span = tracing::debug_span!("reload_references", %prim_path).entered();
		self.with_changes(changes, |cache, changes| {
			let mut layer_stacks = BTreeSet::new();
			for (_, index) in cache.prim_indexes.subtree(prim_path) {
				cache.retry_invalid_assets(index, changes);
				for node in index.node_range() {
					layer_stacks.insert(LayerStackPtr(node.layer_stack().clone()));
				}
			}
			for layer_stack in &layer_stacks {
				cache.retry_invalid_sublayers(layer_stack, changes);
			}

			let mut layers: Vec<Arc<sdf::Layer>> = Vec::new();
			for layer_stack in &layer_stacks {
				for layer in layer_stack.layers() {
					if !cache.layer_stack.has_layer(layer) && !layers.iter().any(|l| Arc::ptr_eq(l, layer)) {
						layers.push(layer.clone());
					}
				}
			}
			for layer in cache.registry.resolver().reload_layers(&layers) {
				changes.did_change_layer_contents(cache, &layer);
			}
		});
	}

	fn retry_invalid_sublayers(&self, layer_stack: &LayerStack, changes: &mut Changes) {
		for error in layer_stack.local_errors() {
			let Some((layer, sublayer_path)) = error.invalid_sublayer() else {
				continue;
			};
			if let Some(layer) = layer_stack.layers().iter().find(|l| l.identifier() == layer) {
				changes.did_maybe_fix_sublayer(self, layer, sublayer_path);
			}
		}
	}

	fn retry_invalid_assets(&self, index: &PrimIndex, changes: &mut Changes) {
		for error in index.local_errors() {
			let Error::InvalidAssetPath {
				site_path,
				layer,
				resolved_asset_path,
				..
			} = error
			else {
				continue;
			};
			for layer_stack in self.registry.find_all_using_layer_identifier(layer) {
				let site = LayerStackSite::new(layer_stack, site_path.clone());
				changes.did_maybe_fix_asset(self, &site, resolved_asset_path);
			}
		}
	}

	/// Sublayer asset paths of any layer stack that failed to load.
	pub fn invalid_sublayer_identifiers(&self) -> Vec<String> {
		let mut identifiers = BTreeSet::new();
		for layer_stack in self.registry.all_layer_stacks() {
			for error in layer_stack.local_errors() {
				if let Some((_, sublayer_path)) = error.invalid_sublayer() {
					identifiers.insert(sublayer_path.to_string());
				}
			}
		}
		identifiers.into_iter().collect()
	}

	pub fn is_invalid_sublayer_identifier(&self, identifier: &str) -> bool {
		self.invalid_sublayer_identifiers()
			.iter()
			.any(|id| id == identifier)
	}

	/// Asset identifiers that failed to open, by the prim index that
	/// tried.
	pub fn invalid_asset_paths(&self) -> BTreeMap<sdf::Path, Vec<String>> {
		let mut assets: BTreeMap<sdf::Path, Vec<String>> = BTreeMap::new();
		for (path, index) in self.prim_indexes.iter() {
			for error in index.local_errors() {
				if let Some(asset) = error.invalid_asset() {
					assets
						.entry(path.clone())
						.or_default()
						.push(asset.to_string());
				}
			}
		}
		assets
	}

	pub fn is_invalid_asset_path(&self, identifier: &str) -> bool {
		self.invalid_asset_paths()
			.values()
			.flatten()
			.any(|asset| asset == identifier)
	}
}

/// Dependencies
impl Cache {
	/// Every layer of the cache's layer stack and of the layer stacks its
	/// prim indexes depend on.
	pub fn used_layers(&self) -> Vec<Arc<sdf::Layer>> {
		let mut layers = self.layer_stack.layers().to_vec();
		for layer in self.dependencies.used_layers() {
			if !layers.iter().any(|l| Arc::ptr_eq(l, &layer)) {
				layers.push(layer);
			}
		}
		layers
	}

	/// The root layers of the layer stacks in [Cache::used_layers].
	pub fn used_root_layers(&self) -> Vec<Arc<sdf::Layer>> {
		let mut layers = vec![self.layer_stack.root_layer().clone()];
		for layer in self.dependencies.used_root_layers() {
			if !layers.iter().any(|l| Arc::ptr_eq(l, &layer)) {
				layers.push(layer);
			}
		}
		layers
	}

	/// Every live layer stack that includes `layer`.
	pub fn find_all_layer_stacks_using_layer(&self, layer: &sdf::Layer) -> Vec<Arc<LayerStack>> {
		self.registry.find_all_using_layer(layer)
	}

	/// Text listing of the recorded dependencies.
	pub fn dump_dependencies(&self) -> String {
		self.dependencies.dump()
	}

	/// Finds the cached indexes depending on `site_path` in `layer_stack`.
	///
	/// `dep_mask` selects the kinds of dependency reported. It must hold
	/// `Virtual` or `NonVirtual` and one of `Root`, a direct kind or
	/// `Ancestral`; `Root` requires `NonVirtual`.
	///
	/// With `recurse_on_site`, dependencies on sites below `site_path` are
	/// found too. With `recurse_on_index`, results are extended to the
	/// cached indexes below each dependent index. With
	/// `filter_for_existing_caches_only`, only paths that have a cached
	/// index are reported.
	pub fn find_site_dependencies(
		&self,
		layer_stack: &Arc<LayerStack>,
		site_path: &sdf::Path,
		dep_mask: DependencyFlags,
		recurse_on_site: bool,
		recurse_on_index: bool,
		filter_for_existing_caches_only: bool,
	) -> DependencyVector {
		if !valid_dependency_mask(dep_mask) {
			return DependencyVector::new();
		}
		let _span = tracing::trace_span!("find_site_dependencies", %site_path).entered();

		let is_cached = |path: &sdf::Path| {
			if !filter_for_existing_caches_only {
				return true;
			}
			if path.is_absolute_root_or_prim_path() {
				self.find_prim_index(path).is_some()
			} else {
				self.find_property_index(path).is_some()
			}
		};
		let mut deps = DependencyVector::new();

		// The cache's own prims depend on their sites in its layer stack.
		if dep_mask.contains(DependencyType::Root)
			&& Arc::ptr_eq(layer_stack, &self.layer_stack)
			&& !site_path.contains_prim_variant_selection()
			&& is_cached(site_path)
		{
			deps.push(Dependency {
				index_path: site_path.clone(),
				site_path: site_path.clone(),
				map_func: MapFunction::identity(),
			});
		}

		let site_prim_path = if site_path.is_absolute_root_path() {
			site_path.clone()
		} else {
			site_path.prim_path()
		};
		let include_ancestral = dep_mask.contains(DependencyType::Ancestral);
		self.dependencies.for_each_dependency_on_site(
			layer_stack,
			&site_prim_path,
			include_ancestral,
			recurse_on_site,
			|dep_index_path, dep_site_path| {
				// Recursing on a property site must not pick up its siblings.
				if dep_site_path != &site_prim_path
					&& dep_site_path.has_prefix(&site_prim_path)
					&& !dep_site_path.has_prefix(site_path)
				{
					return;
				}
				let local_site_path = if dep_site_path.has_prefix(site_path) {
					dep_site_path.clone()
				} else {
					site_path.clone()
				};
				let Some(index) = self.find_prim_index(dep_index_path) else {
					verify!(false, "no cached prim index for <{}>", dep_index_path);
					return;
				};
				for_each_dependent_node(
					&local_site_path,
					|node_layer_stack| std::ptr::eq(node_layer_stack, Arc::as_ptr(layer_stack)),
					index,
					|node, flags| {
						if !dep_mask.is_superset(flags) {
							return;
						}
						let index_path = translate_to_index_path(node, &local_site_path);
						if index_path.is_empty() || !is_cached(&index_path) {
							return;
						}
						let dep = Dependency {
							index_path,
							site_path: local_site_path.clone(),
							map_func: node.map_to_root(),
						};
						if !deps.contains(&dep) {
							deps.push(dep);
						}
					},
				);
			},
		);

		if recurse_on_index {
			deps = self.expand_to_cached_descendants(deps);
		}
		deps
	}

	fn expand_to_cached_descendants(&self, deps: DependencyVector) -> DependencyVector {
		let mut seen = BTreeSet::new();
		let mut expanded = DependencyVector::new();
		for dep in deps {
			if !seen.insert(dep.index_path.clone()) {
				continue;
			}
			let mut add = |sub_path: &sdf::Path| {
				expanded.push(Dependency {
					index_path: sub_path.clone(),
					site_path: sub_path.replace_prefix(&dep.index_path, &dep.site_path),
					map_func: dep.map_func.clone(),
				});
			};
			if dep.index_path.is_absolute_root_or_prim_path() {
				for (sub_path, index) in self.prim_indexes.subtree(&dep.index_path) {
					if index.is_valid() {
						add(sub_path);
					}
				}
			} else {
				for (sub_path, index) in self.property_indexes.subtree(&dep.index_path) {
					if index.is_valid() {
						add(sub_path);
					}
				}
			}
		}
		expanded
	}

	/// Like [Cache::find_site_dependencies], for the site `(layer,
	/// site_path)` in every layer stack using `layer`. Map functions carry
	/// the layer's offset within each layer stack.
	pub fn find_site_dependencies_for_layer(
		&self,
		layer: &sdf::Layer,
		site_path: &sdf::Path,
		dep_mask: DependencyFlags,
		recurse_on_site: bool,
		recurse_on_index: bool,
		filter_for_existing_caches_only: bool,
	) -> DependencyVector {
		let mut result = DependencyVector::new();
		for layer_stack in self.find_all_layer_stacks_using_layer(layer) {
			let deps = self.find_site_dependencies(
				&layer_stack,
				site_path,
				dep_mask,
				recurse_on_site,
				recurse_on_index,
				filter_for_existing_caches_only,
			);
			let offset = layer_stack
				.layer_offset_for_layer(layer)
				.filter(|offset| !offset.is_identity());
			for mut dep in deps {
				if let Some(offset) = offset {
					dep.map_func = MapFunction::new(
						dep.map_func.source_to_target().iter().cloned(),
						dep.map_func.time_offset() * offset,
					);
				}
				result.push(dep);
			}
		}
		result
	}
}

fn valid_dependency_mask(dep_mask: DependencyFlags) -> bool {
	if !dep_mask.contains(DependencyType::Virtual) && !dep_mask.contains(DependencyType::NonVirtual) {
		coding_error!("dependency mask must include Virtual or NonVirtual");
		return false;
	}
	let kinds = DependencyType::Root
		| DependencyType::PurelyDirect
		| DependencyType::PartlyDirect
		| DependencyType::Ancestral;
	if dep_mask.is_disjoint(kinds) {
		coding_error!("dependency mask must include Root, a direct kind or Ancestral");
		return false;
	}
	if dep_mask.contains(DependencyType::Root) && !dep_mask.contains(DependencyType::NonVirtual) {
		coding_error!("root dependencies are always non-virtual");
		return false;
	}
	true
}

/// Change application
impl Cache {
	/// Invalidates the entries `changes` describes. Layer stacks and layers
	/// released on the way are kept in `lifeboat`.
	pub fn apply(&mut self, changes: &CacheChanges, lifeboat: &mut Lifeboat) {
		let _span = tracing::debug_span!("apply", cache = self.id.0).entered();

		if changes.did_maybe_change_layers && !self.registry.contains(&self.layer_stack) {
			lifeboat.retain_layer_stack(self.layer_stack.clone());
			let mut errors = Vec::new();
			self.layer_stack = self
				.registry
				.find_or_create(&self.layer_stack_identifier, &mut errors);
			tracing::debug!("recomputed layer stack {} with {} errors", self.layer_stack, errors.len());
		}

		let root = sdf::Path::absolute_root_path();
		if changes.did_change_significantly.contains(&root) {
			tracing::debug!("invalidating every index");
			self.dependencies.remove_all(lifeboat);
			self.prim_indexes.clear();
			self.property_indexes.clear();
		} else {
			for path in &changes.did_change_significantly {
				tracing::debug!("invalidating <{path}> and below");
				if path.is_prim_or_prim_variant_selection_path() {
					self.remove_prim_subtree(path, lifeboat);
				}
				self.property_indexes.erase_subtree(path);
			}
		}

		for path in &changes.did_change_prims {
			tracing::debug!("rebuilding <{path}>");
			if let Some(index) = self.prim_indexes.get_mut(path) {
				let index = std::mem::take(index);
				self.dependencies.remove(&index, lifeboat);
			}
			self.remove_property_indexes_of(path);
		}

		for path in &changes.did_change_specs {
			if path.is_absolute_root_or_prim_path() {
				let still_has_specs = match self.prim_indexes.get_mut(path) {
					Some(index) if index.is_valid() => index.update_prim_stack(),
					_ => true,
				};
				if !still_has_specs {
					tracing::debug!("<{path}> lost its last spec");
					self.remove_prim_subtree(path, lifeboat);
					self.property_indexes.erase_subtree(path);
				}
			} else if let Some(index) = self.property_indexes.get_mut(path) {
				*index = PropertyIndex::default();
			}
		}

		if !changes.did_change_path.is_empty() {
			for (old_path, new_path) in &changes.did_change_path {
				for path in [new_path, old_path] {
					self.remove_prim_subtree(path, lifeboat);
					self.property_indexes.erase_subtree(path);
				}
			}

			let payloads = self.included_payloads.get_mut();
			let mut renamed = Vec::new();
			for (old_path, new_path) in &changes.did_change_path {
				let moved: Vec<sdf::Path> = payloads
					.iter()
					.filter(|path| path.has_prefix(old_path))
					.cloned()
					.collect();
				for path in moved {
					payloads.remove(&path);
					renamed.push(path.replace_prefix(old_path, new_path));
				}
			}
			payloads.extend(renamed);
		}
	}

	fn remove_prim_subtree(&mut self, path: &sdf::Path, lifeboat: &mut Lifeboat) {
		for (_, index) in self.prim_indexes.erase_subtree(path) {
			if index.is_valid() {
				self.dependencies.remove(&index, lifeboat);
			}
		}
	}

	fn remove_property_indexes_of(&mut self, prim_path: &sdf::Path) {
		let owned: Vec<sdf::Path> = self
			.property_indexes
			.subtree(prim_path)
			.filter(|(path, _)| path.is_property_path() && path.prim_path() == *prim_path)
			.map(|(path, _)| path.clone())
			.collect();
		for path in owned {
			self.property_indexes.erase_subtree(&path);
		}
	}
}

impl Drop for Cache {
	/// Prim indexes and the other large tables go first, in parallel. The
	/// dependency index follows once they are gone, since both release
	/// layer stacks. The registry goes last.
	fn drop(&mut self) {
		let prim_indexes = std::mem::take(&mut self.prim_indexes);
		let property_indexes = std::mem::take(&mut self.property_indexes);
		let included_payloads = std::mem::take(self.included_payloads.get_mut());
		let variant_fallbacks = std::mem::take(&mut self.variant_fallbacks);
		let payload_decorator = self.payload_decorator.take();
		rayon::scope(|scope| {
			scope.spawn(move |_| drop(prim_indexes));
			scope.spawn(move |_| drop(property_indexes));
			scope.spawn(move |_| drop(included_payloads));
			scope.spawn(move |_| drop(variant_fallbacks));
			scope.spawn(move |_| drop(payload_decorator));
		});
		drop(std::mem::take(&mut self.dependencies));
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pcp::{CodingErrorMark, DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL, DEPENDENCY_TYPE_ANY_NON_VIRTUAL};
	use pretty_assertions::assert_eq;

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	fn cache_for(root: &Arc<sdf::Layer>, resolver: &Arc<ar::MemoryResolver>) -> Cache {
		Cache::new(
			LayerStackIdentifier::new(root.clone()),
			resolver.clone(),
			CacheOptions::default().culling(false),
		)
	}

	#[test]
	fn memoizes_prim_indexes() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		root.define_prim("/A/B");
		let mut cache = cache_for(&root, &resolver);

		let mut errors = Vec::new();
		let first = cache.compute_prim_index(&p("/A/B"), &mut errors).graph().cloned();
		let computations = cache.statistics().prim_index_computations;
		assert_eq!(computations, 3);
		let second = cache.compute_prim_index(&p("/A/B"), &mut errors).graph().cloned();
		assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
		assert_eq!(cache.statistics().prim_index_computations, computations);
		assert!(cache.find_prim_index(&p("/A")).is_some());
	}

	#[test]
	fn rejects_invalid_requests() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let mut cache = cache_for(&root, &resolver);
		let mut errors = Vec::new();
		let mark = CodingErrorMark::new();
		assert!(!cache.compute_prim_index(&p("/A.x"), &mut errors).is_valid());
		assert!(!cache.compute_property_index(&p("/A"), &mut errors).is_valid());
		assert!(
			cache
				.find_site_dependencies(
					&cache.layer_stack().clone(),
					&p("/A"),
					enumset::enum_set!(DependencyType::Root),
					false,
					false,
					false,
				)
				.is_empty()
		);

		let mut usd = Cache::new(
			LayerStackIdentifier::new(root.clone()),
			resolver.clone(),
			CacheOptions::default().usd(true),
		);
		root.create_property_spec(&p("/A.x"));
		assert!(!usd.compute_property_index(&p("/A.x"), &mut errors).is_valid());
		assert_eq!(mark.messages().len(), 4);
		assert!(errors.is_empty());
	}

	#[test]
	fn root_and_direct_dependencies() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		root.define_prim("/Model/Geom");
		root.define_prim("/A");
		root.add_reference(&p("/A"), sdf::Reference::internal("/Model"));
		let mut cache = cache_for(&root, &resolver);
		let mut errors = Vec::new();
		cache.compute_prim_index(&p("/A/Geom"), &mut errors);
		cache.compute_prim_index(&p("/Model/Geom"), &mut errors);

		let layer_stack = cache.layer_stack().clone();
		let deps = cache.find_site_dependencies(
			&layer_stack,
			&p("/Model/Geom"),
			DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
			false,
			false,
			true,
		);
		assert_eq!(deps[0].index_path, p("/Model/Geom"));
		let index_paths: BTreeSet<String> = deps.iter().map(|dep| dep.index_path.to_string()).collect();
		assert_eq!(
			index_paths,
			BTreeSet::from(["/Model/Geom".to_string(), "/A/Geom".to_string()])
		);

		let recursed: BTreeSet<String> = cache
			.find_site_dependencies(
				&layer_stack,
				&p("/Model"),
				DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL,
				true,
				true,
				true,
			)
			.iter()
			.map(|dep| dep.index_path.to_string())
			.collect();
		assert!(recursed.contains("/A"));
		assert!(recursed.contains("/A/Geom"));
	}

	#[test]
	fn significant_change_invalidates_subtree() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		root.define_prim("/A/B/C");
		root.define_prim("/A/D");
		root.define_prim("/E");
		let mut cache = cache_for(&root, &resolver);
		let mut errors = Vec::new();
		for path in ["/A/B/C", "/A/D", "/E"] {
			cache.compute_prim_index(&p(path), &mut errors);
		}

		let mut changes = Changes::new();
		changes.did_change_significantly(&cache, &p("/A/B"));
		changes.apply(&mut cache);

		assert!(cache.find_prim_index(&p("/A/B")).is_none());
		assert!(cache.find_prim_index(&p("/A/B/C")).is_none());
		assert!(cache.find_prim_index(&p("/A")).is_some());
		assert!(cache.find_prim_index(&p("/A/D")).is_some());
		assert!(cache.find_prim_index(&p("/E")).is_some());
	}

	#[test]
	fn removing_last_spec_escalates() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		root.define_prim("/A/B");
		let mut cache = cache_for(&root, &resolver);
		let mut errors = Vec::new();
		cache.compute_prim_index(&p("/A/B"), &mut errors);

		root.remove_spec(&p("/A/B"));
		let mut changes = Changes::new();
		changes.did_change_spec_at_site(&cache, &root, &p("/A/B"));
		assert_eq!(
			changes.cache_changes(&cache).map(|c| c.did_change_significantly),
			Some(BTreeSet::from([p("/A/B")]))
		);
		changes.apply(&mut cache);
		assert!(cache.find_prim_index(&p("/A/B")).is_none());
	}

	#[test]
	fn payload_requests_invalidate() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let payload = resolver.create_layer("/payload.usda");
		payload.define_prim("/Heavy/Mesh");
		root.define_prim("/A");
		root.add_payload(&p("/A"), sdf::Payload::new("payload.usda", "/Heavy"));
		let mut cache = cache_for(&root, &resolver);
		let mut errors = Vec::new();

		let before = cache.compute_prim_index(&p("/A"), &mut errors).node_range().len();
		assert_eq!(before, 1);
		cache.request_payloads(&[p("/A")], &[], None);
		assert!(cache.find_prim_index(&p("/A")).is_none());
		let after = cache.compute_prim_index(&p("/A"), &mut errors).node_range().len();
		assert_eq!(after, 2);
		assert!(cache.is_payload_included(&p("/A")));
	}

	#[test]
	fn renames_move_included_payloads() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let mut cache = cache_for(&root, &resolver);
		cache.request_payloads(&[p("/A/B"), p("/C")], &[], None);

		let mut changes = Changes::new();
		changes.did_change_paths(&cache, &p("/A"), &p("/X"));
		changes.did_change_paths(&cache, &p("/C"), &p("/A"));
		changes.apply(&mut cache);
		assert_eq!(cache.included_payloads(), BTreeSet::from([p("/X/B"), p("/A")]));
	}

	#[test]
	fn layer_offsets_compose_into_map_functions() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let sub = resolver.create_layer("/sub.usda");
		sub.define_prim("/A");
		root.set_sub_layer_paths(vec!["sub.usda".to_string()].into());
		root.set_sub_layer_offsets(vec![sdf::Retiming::new(10.0, 1.0)].into());
		let mut cache = cache_for(&root, &resolver);
		cache.compute_prim_index(&p("/A"), &mut Vec::new());

		let deps = cache.find_site_dependencies_for_layer(
			&sub,
			&p("/A"),
			DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
			false,
			false,
			true,
		);
		assert_eq!(deps.len(), 1);
		assert_eq!(deps[0].map_func.time_offset(), sdf::Retiming::new(10.0, 1.0));
	}
}
