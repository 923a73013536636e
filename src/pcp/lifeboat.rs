use super::layer_stack::LayerStack;
use crate::sdf;
use std::sync::Arc;

/// Keeps layers and layer stacks released by cache invalidation alive
/// until it is dropped, so the caller decides when they are destroyed.
#[derive(Debug, Default)]
pub struct Lifeboat {
	layers: Vec<Arc<sdf::Layer>>,
	layer_stacks: Vec<Arc<LayerStack>>,
}

impl Lifeboat {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn retain_layer(&mut self, layer: Arc<sdf::Layer>) {
		if !self.layers.iter().any(|l| Arc::ptr_eq(l, &layer)) {
			self.layers.push(layer);
		}
	}

	pub fn retain_layer_stack(&mut self, layer_stack: Arc<LayerStack>) {
		if !self.layer_stacks.iter().any(|l| Arc::ptr_eq(l, &layer_stack)) {
			self.layer_stacks.push(layer_stack);
		}
	}

	pub fn layers(&self) -> &[Arc<sdf::Layer>] {
		&self.layers
	}

	pub fn layer_stacks(&self) -> &[Arc<LayerStack>] {
		&self.layer_stacks
	}

	pub fn is_empty(&self) -> bool {
		self.layers.is_empty() && self.layer_stacks.is_empty()
	}

	pub fn swap(&mut self, other: &mut Lifeboat) {
		std::mem::swap(self, other);
	}

	/// Moves everything `other` retains into this lifeboat.
	pub fn absorb(&mut self, other: Lifeboat) {
		for layer in other.layers {
			self.retain_layer(layer);
		}
		for layer_stack in other.layer_stacks {
			self.retain_layer_stack(layer_stack);
		}
	}
}
