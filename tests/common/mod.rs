#![allow(dead_code)]

use openusd_pcp::{ar, pcp, sdf};
use std::sync::Arc;

pub fn p(s: &str) -> sdf::Path {
	sdf::Path::from(s)
}

/// An in-memory scene rooted at `/root.usda`.
pub struct Scene {
	pub resolver: Arc<ar::MemoryResolver>,
	pub root: Arc<sdf::Layer>,
}

impl Scene {
	pub fn new() -> Self {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		Self { resolver, root }
	}

	pub fn layer(&self, identifier: &str) -> Arc<sdf::Layer> {
		self.resolver.create_layer(identifier)
	}

	pub fn cache(&self) -> pcp::Cache {
		self.cache_with(pcp::CacheOptions::default().culling(false))
	}

	pub fn usd_cache(&self) -> pcp::Cache {
		self.cache_with(pcp::CacheOptions::default().usd(true).culling(false))
	}

	pub fn cache_with(&self, options: pcp::CacheOptions) -> pcp::Cache {
		pcp::Cache::new(
			pcp::LayerStackIdentifier::new(self.root.clone()),
			self.resolver.clone(),
			options,
		)
	}
}

/// Computes the prim index at every path, panicking on composition errors.
pub fn compute_all(cache: &mut pcp::Cache, paths: &[&str]) {
	let mut errors = Vec::new();
	for path in paths {
		cache.compute_prim_index(&p(path), &mut errors);
	}
	assert!(errors.is_empty(), "unexpected errors: {errors:?}");
}

/// Paths with a cached prim index, in path order.
pub fn cached_paths(cache: &pcp::Cache) -> Vec<String> {
	let mut paths = Vec::new();
	cache.for_each_prim_index(|index| paths.push(index.path().to_string()));
	paths.sort();
	paths
}
