use super::errors::Error;
use crate::{ar, sdf};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Arguments that uniquely identify a layer stack.
#[derive(Debug, Clone)]
pub struct LayerStackIdentifier {
	pub root_layer: Arc<sdf::Layer>,
	pub session_layer: Option<Arc<sdf::Layer>>,
	pub resolver_context: ar::ResolverContext,
}

impl LayerStackIdentifier {
	pub fn new(root_layer: Arc<sdf::Layer>) -> Self {
		Self {
			root_layer,
			session_layer: None,
			resolver_context: ar::ResolverContext::default(),
		}
	}

	pub fn with_session_layer(mut self, session_layer: Arc<sdf::Layer>) -> Self {
		self.session_layer = Some(session_layer);
		self
	}

	pub fn with_resolver_context(mut self, context: ar::ResolverContext) -> Self {
		self.resolver_context = context;
		self
	}
}

impl PartialEq for LayerStackIdentifier {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.root_layer, &other.root_layer)
			&& match (&self.session_layer, &other.session_layer) {
				(Some(a), Some(b)) => Arc::ptr_eq(a, b),
				(None, None) => true,
				_ => false,
			} && self.resolver_context == other.resolver_context
	}
}

impl Eq for LayerStackIdentifier {}

impl std::hash::Hash for LayerStackIdentifier {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		Arc::as_ptr(&self.root_layer).hash(state);
		self.session_layer.as_ref().map(Arc::as_ptr).hash(state);
		self.resolver_context.hash(state);
	}
}

impl std::fmt::Display for LayerStackIdentifier {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "@{}@", self.root_layer.identifier())?;
		if let Some(session) = &self.session_layer {
			write!(f, " session @{}@", session.identifier())?;
		}
		Ok(())
	}
}

/// The inputs a layer stack computation needs besides its identifier.
pub(crate) struct LayerStackInputs<'a> {
	pub resolver: &'a dyn ar::Resolver,
	pub muted_layers: &'a BTreeSet<String>,
	pub file_format_target: &'a str,
	pub usd: bool,
}

/// Represents a stack of layers that contribute opinions to composition.
///
/// A layer stack is immutable once computed. When its inputs change, the
/// registry forgets it and a new one is computed in its place.
#[derive(Debug)]
pub struct LayerStack {
	identifier: LayerStackIdentifier,
	/// Layers in the stack, ordered from strongest (index 0) to weakest (last index).
	layers: Vec<Arc<sdf::Layer>>,
	layer_offsets: Vec<sdf::Retiming>,
	session_layer_count: usize,
	muted_layers: BTreeSet<String>,
	local_errors: Vec<Error>,
	relocates_source_to_target: BTreeMap<sdf::Path, sdf::Path>,
	relocates_target_to_source: BTreeMap<sdf::Path, sdf::Path>,
	paths_to_prims_with_relocates: Vec<sdf::Path>,
}

impl LayerStack {
	pub(crate) fn compute(identifier: LayerStackIdentifier, inputs: &LayerStackInputs) -> Self {
		let _binder = ar::ResolverContextBinder::new(&identifier.resolver_context);

		let mut stack = Self {
			identifier: identifier.clone(),
			layers: Vec::new(),
			layer_offsets: Vec::new(),
			session_layer_count: 0,
			muted_layers: BTreeSet::new(),
			local_errors: Vec::new(),
			relocates_source_to_target: BTreeMap::new(),
			relocates_target_to_source: BTreeMap::new(),
			paths_to_prims_with_relocates: Vec::new(),
		};

		let mut seen = Vec::new();
		if let Some(session_layer) = &identifier.session_layer {
			stack.build(session_layer.clone(), sdf::Retiming::identity(), &mut seen, inputs);
			stack.session_layer_count = stack.layers.len();
		}
		stack.build(identifier.root_layer.clone(), sdf::Retiming::identity(), &mut seen, inputs);

		if !inputs.usd {
			stack.compute_relocates();
		}
		stack
	}

	fn build(
		&mut self,
		layer: Arc<sdf::Layer>,
		offset: sdf::Retiming,
		seen: &mut Vec<String>,
		inputs: &LayerStackInputs,
	) {
		seen.push(layer.identifier().to_string());
		self.layers.push(layer.clone());
		self.layer_offsets.push(offset);

		let sub_layers = layer.sub_layer_paths();
		let sub_layer_offsets = layer.sub_layer_offsets();

		for (i, sub_layer_path) in sub_layers.iter().enumerate() {
			let sub_offset = sub_layer_offsets.get(i).copied().unwrap_or_default();
			let combined_offset = offset * sub_offset;

			let identifier = inputs
				.resolver
				.create_identifier(sub_layer_path, Some(layer.identifier()));
			if inputs.muted_layers.contains(&identifier) {
				self.muted_layers.insert(identifier);
				continue;
			}
			if seen.contains(&identifier) {
				self.local_errors.push(Error::SublayerCycle {
					layer: layer.identifier().to_string(),
					sublayer: identifier,
				});
				continue;
			}

			let open_identifier = ar::identifier_with_args(&identifier, &format_args(inputs.file_format_target));
			match inputs.resolver.open_layer(&open_identifier) {
				Some(sub_layer) => self.build(sub_layer, combined_offset, seen, inputs),
				None => self.local_errors.push(Error::InvalidSublayerPath {
					layer: layer.identifier().to_string(),
					sublayer_path: sub_layer_path.clone(),
				}),
			}
		}
		seen.pop();
	}

	fn compute_relocates(&mut self) {
		let relocations = Relocations::compute(&self.layers);
		self.relocates_source_to_target = relocations.source_to_target;
		self.relocates_target_to_source = relocations.target_to_source;
		self.paths_to_prims_with_relocates = relocations.prim_paths;
	}
}

/// The relocation tables composed from the `relocates` fields of a stack of
/// layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Relocations {
	pub source_to_target: BTreeMap<sdf::Path, sdf::Path>,
	pub target_to_source: BTreeMap<sdf::Path, sdf::Path>,
	pub prim_paths: Vec<sdf::Path>,
}

impl Relocations {
	/// The strongest layer wins when several relocate the same source.
	pub(crate) fn compute(layers: &[Arc<sdf::Layer>]) -> Self {
		let mut relocations = Self::default();
		let mut prims = BTreeSet::new();
		for layer in layers {
			for prim_path in layer.prims_with_relocates() {
				for relocate in layer.relocates(&prim_path) {
					if relocate.source.is_empty() || relocate.target.is_empty() {
						continue;
					}
					if !relocations
						.source_to_target
						.contains_key(&relocate.source)
					{
						relocations
							.source_to_target
							.insert(relocate.source.clone(), relocate.target.clone());
						relocations
							.target_to_source
							.insert(relocate.target, relocate.source);
					}
				}
				prims.insert(prim_path);
			}
		}
		relocations.prim_paths = prims.into_iter().collect();
		relocations
	}

	/// Paths whose relocation differs between `old` and `new`: both ends of
	/// every added, removed or retargeted relocation.
	pub(crate) fn affected_paths(
		old: &BTreeMap<sdf::Path, sdf::Path>,
		new: &BTreeMap<sdf::Path, sdf::Path>,
	) -> BTreeSet<sdf::Path> {
		let mut affected = BTreeSet::new();
		for (a, b) in [(old, new), (new, old)] {
			for (source, target) in a {
				let other = b.get(source);
				if other == Some(target) {
					continue;
				}
				affected.insert(source.clone());
				affected.insert(target.clone());
				affected.extend(other.cloned());
			}
		}
		affected
	}
}

/// File format arguments for opening layers with the given target.
pub(crate) fn format_args(file_format_target: &str) -> ar::FileFormatArguments {
	let mut args = ar::FileFormatArguments::new();
	if !file_format_target.is_empty() {
		args.insert("target".to_string(), file_format_target.to_string());
	}
	args
}

/// Accessors
impl LayerStack {
	pub fn identifier(&self) -> &LayerStackIdentifier {
		&self.identifier
	}

	pub fn layers(&self) -> &[Arc<sdf::Layer>] {
		&self.layers
	}

	pub fn root_layer(&self) -> &Arc<sdf::Layer> {
		&self.identifier.root_layer
	}

	/// The layers contributed by the session layer tree.
	pub fn session_layers(&self) -> &[Arc<sdf::Layer>] {
		&self.layers[..self.session_layer_count]
	}

	pub fn layer_offsets(&self) -> &[sdf::Retiming] {
		&self.layer_offsets
	}

	/// The offset mapping times in `layer` to times in the root layer.
	pub fn layer_offset_for_layer(&self, layer: &sdf::Layer) -> Option<sdf::Retiming> {
		self.layers
			.iter()
			.position(|l| std::ptr::eq(l.as_ref(), layer))
			.map(|i| self.layer_offsets[i])
	}

	pub fn has_layer(&self, layer: &sdf::Layer) -> bool {
		self.layers.iter().any(|l| std::ptr::eq(l.as_ref(), layer))
	}

	pub fn has_layer_identifier(&self, identifier: &str) -> bool {
		self.layers.iter().any(|l| l.identifier() == identifier)
	}

	/// Identifiers of sublayers that were skipped because they are muted.
	pub fn muted_layers(&self) -> &BTreeSet<String> {
		&self.muted_layers
	}

	pub fn local_errors(&self) -> &[Error] {
		&self.local_errors
	}

	pub fn relocates_source_to_target(&self) -> &BTreeMap<sdf::Path, sdf::Path> {
		&self.relocates_source_to_target
	}

	pub fn relocates_target_to_source(&self) -> &BTreeMap<sdf::Path, sdf::Path> {
		&self.relocates_target_to_source
	}

	/// Paths of every prim in this layer stack that authors relocates.
	pub fn paths_to_prims_with_relocates(&self) -> &[sdf::Path] {
		&self.paths_to_prims_with_relocates
	}

	/// Returns the layers of this stack that hold a prim spec at `path`.
	pub fn prim_sites(&self, path: &sdf::Path) -> Vec<sdf::Site> {
		self.layers
			.iter()
			.filter(|layer| layer.has_prim_spec(path))
			.map(|layer| sdf::Site::new(layer.clone(), path.clone()))
			.collect()
	}

	pub fn has_prim_specs(&self, path: &sdf::Path) -> bool {
		self.layers.iter().any(|layer| layer.has_prim_spec(path))
	}
}

impl std::fmt::Display for LayerStack {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.identifier)
	}
}

/// A layer stack compared and hashed by identity.
#[derive(Debug, Clone)]
pub struct LayerStackPtr(pub Arc<LayerStack>);

impl LayerStackPtr {
	fn addr(&self) -> usize {
		Arc::as_ptr(&self.0) as usize
	}
}

impl std::ops::Deref for LayerStackPtr {
	type Target = Arc<LayerStack>;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl PartialEq for LayerStackPtr {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
	}
}

impl Eq for LayerStackPtr {}

impl std::hash::Hash for LayerStackPtr {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		self.addr().hash(state);
	}
}

impl PartialOrd for LayerStackPtr {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for LayerStackPtr {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.0
			.root_layer()
			.identifier()
			.cmp(other.0.root_layer().identifier())
			.then_with(|| self.addr().cmp(&other.addr()))
	}
}

/// A path in a specific layer stack.
#[derive(Debug, Clone)]
pub struct LayerStackSite {
	pub layer_stack: Arc<LayerStack>,
	pub path: sdf::Path,
}

impl LayerStackSite {
	pub fn new(layer_stack: Arc<LayerStack>, path: sdf::Path) -> Self {
		Self { layer_stack, path }
	}
}

impl PartialEq for LayerStackSite {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.layer_stack, &other.layer_stack) && self.path == other.path
	}
}

impl Eq for LayerStackSite {}

impl std::hash::Hash for LayerStackSite {
	fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
		(Arc::as_ptr(&self.layer_stack) as usize).hash(state);
		self.path.hash(state);
	}
}

impl PartialOrd for LayerStackSite {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

/// Sites of one layer stack sort together, in path order.
impl Ord for LayerStackSite {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		LayerStackPtr(self.layer_stack.clone())
			.cmp(&LayerStackPtr(other.layer_stack.clone()))
			.then_with(|| self.path.cmp(&other.path))
	}
}

impl std::fmt::Display for LayerStackSite {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}<{}>", self.layer_stack, self.path)
	}
}
