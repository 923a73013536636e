use super::errors::Error;
use super::layer_stack::{LayerStack, LayerStackIdentifier, LayerStackInputs};
use crate::{ar, sdf};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct RegistryData {
	stacks: HashMap<LayerStackIdentifier, Weak<LayerStack>>,
	muted_layers: BTreeSet<String>,
}

/// Deduplicates layer stacks by identifier.
///
/// The registry holds layer stacks weakly: a layer stack lives as long as
/// some prim index node, dependency entry or lifeboat holds it. The muted
/// layer set lives here so every layer stack computed through the registry
/// honors it.
pub struct LayerStackRegistry {
	resolver: Arc<dyn ar::Resolver>,
	file_format_target: String,
	usd: bool,
	data: RwLock<RegistryData>,
}

impl std::fmt::Debug for LayerStackRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LayerStackRegistry")
			.field("file_format_target", &self.file_format_target)
			.field("usd", &self.usd)
			.finish_non_exhaustive()
	}
}

impl LayerStackRegistry {
	pub fn new(resolver: Arc<dyn ar::Resolver>, file_format_target: String, usd: bool) -> Self {
		Self {
			resolver,
			file_format_target,
			usd,
			data: RwLock::new(RegistryData::default()),
		}
	}

	pub fn resolver(&self) -> &Arc<dyn ar::Resolver> {
		&self.resolver
	}

	pub fn file_format_target(&self) -> &str {
		&self.file_format_target
	}

	pub fn is_usd(&self) -> bool {
		self.usd
	}

	/// Returns the layer stack for `identifier`, computing it if needed.
	/// Errors are reported only when the layer stack is newly computed.
	pub fn find_or_create(
		&self,
		identifier: &LayerStackIdentifier,
		all_errors: &mut Vec<Error>,
	) -> Arc<LayerStack> {
		if let Some(layer_stack) = self.find(identifier) {
			return layer_stack;
		}

		let muted_layers = self.data.read().muted_layers.clone();
		let computed = Arc::new(LayerStack::compute(
			identifier.clone(),
			&LayerStackInputs {
				resolver: self.resolver.as_ref(),
				muted_layers: &muted_layers,
				file_format_target: &self.file_format_target,
				usd: self.usd,
			},
		));

		let mut data = self.data.write();
		if let Some(existing) = data.stacks.get(identifier).and_then(Weak::upgrade) {
			return existing;
		}
		data.stacks.retain(|_, stack| stack.strong_count() > 0);
		data.stacks
			.insert(identifier.clone(), Arc::downgrade(&computed));
		drop(data);

		tracing::trace!("computed layer stack {}", computed);
		all_errors.extend(computed.local_errors().iter().cloned());
		computed
	}

	/// Returns the live layer stack for `identifier`, if any.
	pub fn find(&self, identifier: &LayerStackIdentifier) -> Option<Arc<LayerStack>> {
		self.data
			.read()
			.stacks
			.get(identifier)
			.and_then(Weak::upgrade)
	}

	/// Returns true if `layer_stack` is the registered stack for its identifier.
	pub fn contains(&self, layer_stack: &Arc<LayerStack>) -> bool {
		self.find(layer_stack.identifier())
			.is_some_and(|found| Arc::ptr_eq(&found, layer_stack))
	}

	/// Forgets `layer_stack` so the next request recomputes it.
	pub fn remove(&self, layer_stack: &Arc<LayerStack>) -> bool {
		let mut data = self.data.write();
		let registered = data
			.stacks
			.get(layer_stack.identifier())
			.is_some_and(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(layer_stack)));
		if registered {
			data.stacks.remove(layer_stack.identifier());
		}
		registered
	}

	/// Every live layer stack.
	pub fn all_layer_stacks(&self) -> Vec<Arc<LayerStack>> {
		self.data
			.read()
			.stacks
			.values()
			.filter_map(Weak::upgrade)
			.collect()
	}

	/// Every live layer stack that includes `layer`.
	pub fn find_all_using_layer(&self, layer: &sdf::Layer) -> Vec<Arc<LayerStack>> {
		self.all_layer_stacks()
			.into_iter()
			.filter(|stack| stack.has_layer(layer))
			.collect()
	}

	/// Every live layer stack that includes the layer `identifier` or skipped
	/// it because it is muted.
	pub fn find_all_using_layer_identifier(&self, identifier: &str) -> Vec<Arc<LayerStack>> {
		self.all_layer_stacks()
			.into_iter()
			.filter(|stack| {
				stack.has_layer_identifier(identifier) || stack.muted_layers().contains(identifier)
			})
			.collect()
	}
}

/// Muting
impl LayerStackRegistry {
	fn canonical_identifier(&self, anchor: &sdf::Layer, identifier: &str) -> String {
		self.resolver
			.create_identifier(identifier, Some(anchor.identifier()))
	}

	/// Mutes and unmutes layers, anchoring relative identifiers to `anchor`.
	///
	/// On return both lists hold the canonical identifiers whose state
	/// actually changed.
	pub fn mute_and_unmute(
		&self,
		anchor: &sdf::Layer,
		to_mute: &mut Vec<String>,
		to_unmute: &mut Vec<String>,
	) {
		let mut data = self.data.write();

		let mut muted = Vec::new();
		for identifier in to_mute.drain(..) {
			let canonical = self.canonical_identifier(anchor, &identifier);
			if data.muted_layers.insert(canonical.clone()) {
				muted.push(canonical);
			}
		}

		let mut unmuted = Vec::new();
		for identifier in to_unmute.drain(..) {
			let canonical = self.canonical_identifier(anchor, &identifier);
			if data.muted_layers.remove(&canonical) {
				unmuted.push(canonical);
			}
		}

		*to_mute = muted;
		*to_unmute = unmuted;
	}

	/// Returns the canonical identifier if `identifier` is muted.
	pub fn is_layer_muted(&self, anchor: &sdf::Layer, identifier: &str) -> Option<String> {
		let canonical = self.canonical_identifier(anchor, identifier);
		self.data
			.read()
			.muted_layers
			.contains(&canonical)
			.then_some(canonical)
	}

	pub fn muted_layers(&self) -> Vec<String> {
		self.data.read().muted_layers.iter().cloned().collect()
	}
}
