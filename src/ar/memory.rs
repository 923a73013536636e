use super::{Resolver, anchor_path, current_context, split_identifier};
use crate::sdf;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A resolver backed by an in-process asset store.
///
/// Assets are scene description snapshots keyed by identifier. Opening an
/// identifier returns the same layer for as long as the resolver lives.
/// Layers registered with [MemoryResolver::insert_layer] have no backing
/// asset and are left alone by reload.
#[derive(Default)]
pub struct MemoryResolver {
	assets: RwLock<HashMap<String, sdf::Data>>,
	layers: RwLock<HashMap<String, Arc<sdf::Layer>>>,
}

impl MemoryResolver {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Stores `data` as the contents of the asset `identifier`.
	pub fn write_asset(&self, identifier: &str, data: sdf::Data) {
		self.assets.write().insert(identifier.to_string(), data);
	}

	/// Removes the asset `identifier`. Layers already opened stay alive.
	pub fn remove_asset(&self, identifier: &str) {
		self.assets.write().remove(identifier);
	}

	/// Writes the current contents of `layer` to its backing asset.
	pub fn save(&self, layer: &sdf::Layer) {
		let (asset, _) = split_identifier(layer.identifier());
		self.write_asset(asset, layer.data());
	}

	/// Creates an empty asset and opens it.
	pub fn create_layer(&self, identifier: &str) -> Arc<sdf::Layer> {
		self.write_asset(identifier, sdf::Data::new());
		let layer = sdf::Layer::new(identifier);
		self.layers
			.write()
			.insert(identifier.to_string(), layer.clone());
		layer
	}

	/// Makes an in-memory layer resolvable under its identifier.
	pub fn insert_layer(&self, layer: Arc<sdf::Layer>) {
		self.layers
			.write()
			.insert(layer.identifier().to_string(), layer);
	}

	pub fn find_layer(&self, identifier: &str) -> Option<Arc<sdf::Layer>> {
		self.layers.read().get(identifier).cloned()
	}
}

impl Resolver for MemoryResolver {
	fn create_identifier(&self, asset_path: &str, anchor: Option<&str>) -> String {
		if asset_path.is_empty() {
			return String::new();
		}
		match anchor {
			Some(anchor) => anchor_path(asset_path, anchor),
			None => match current_context().and_then(|c| c.search_path().map(str::to_string)) {
				Some(search_path) if !asset_path.starts_with('/') => {
					anchor_path(asset_path, &format!("{}/", search_path.trim_end_matches('/')))
				}
				_ => asset_path.to_string(),
			},
		}
	}

	fn open_layer(&self, identifier: &str) -> Option<Arc<sdf::Layer>> {
		if let Some(layer) = self.layers.read().get(identifier) {
			return Some(layer.clone());
		}

		let (asset, _) = split_identifier(identifier);
		let data = self.assets.read().get(asset).cloned()?;

		let mut layers = self.layers.write();
		let layer = layers
			.entry(identifier.to_string())
			.or_insert_with(|| sdf::Layer::with_data(identifier, data));
		Some(layer.clone())
	}

	fn asset_exists(&self, identifier: &str) -> bool {
		let (asset, _) = split_identifier(identifier);
		self.assets.read().contains_key(asset) || self.layers.read().contains_key(identifier)
	}

	fn reload_layers(&self, layers: &[Arc<sdf::Layer>]) -> Vec<Arc<sdf::Layer>> {
		let assets = self.assets.read();
		layers
			.iter()
			.filter(|layer| {
				let (asset, _) = split_identifier(layer.identifier());
				match assets.get(asset) {
					Some(data) => layer.replace_data(data.clone()),
					None => false,
				}
			})
			.cloned()
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn open_returns_shared_layer() {
		let resolver = MemoryResolver::new();
		let mut data = sdf::Data::new();
		sdf::AbstractData::create_spec(&mut data, &sdf::Path::from("/A"), sdf::SpecType::Prim);
		resolver.write_asset("/a.usda", data);

		let a = resolver.open_layer("/a.usda").unwrap();
		let b = resolver.open_layer("/a.usda").unwrap();
		assert!(Arc::ptr_eq(&a, &b));
		assert!(a.has_spec(&sdf::Path::from("/A")));
		assert!(resolver.open_layer("/missing.usda").is_none());
	}

	#[test]
	fn reload_restores_saved_contents() {
		let resolver = MemoryResolver::new();
		let layer = resolver.create_layer("/a.usda");
		layer.define_prim("/A");
		assert!(layer.has_prim_spec(&sdf::Path::from("/A")));

		let changed = resolver.reload_layers(&[layer.clone()]);
		assert_eq!(changed.len(), 1);
		assert!(!layer.has_prim_spec(&sdf::Path::from("/A")));

		let in_memory = sdf::Layer::new("/mem.usda");
		resolver.insert_layer(in_memory.clone());
		in_memory.define_prim("/B");
		assert!(resolver.reload_layers(&[in_memory.clone()]).is_empty());
	}
}
