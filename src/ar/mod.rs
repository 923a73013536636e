//! Asset Resolution
//!
//! The composition engine never touches storage directly; it asks a
//! [Resolver] to turn authored asset paths into identifiers and to open
//! layers for them.

mod memory;

pub use memory::*;

use crate::sdf;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Separator between a layer identifier and its file format arguments.
pub const FORMAT_ARGS_SEPARATOR: &str = ":SDF_FORMAT_ARGS:";

/// Extra arguments that influence how a layer is opened.
pub type FileFormatArguments = BTreeMap<String, String>;

/// An opaque value that scopes asset resolution.
///
/// Contexts compare by value so that layer stacks opened under equal
/// contexts can be shared.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResolverContext {
	search_path: Option<String>,
}

impl ResolverContext {
	/// A context that resolves unanchored relative asset paths against `search_path`.
	pub fn with_search_path(search_path: impl Into<String>) -> Self {
		Self {
			search_path: Some(search_path.into()),
		}
	}

	pub fn search_path(&self) -> Option<&str> {
		self.search_path.as_deref()
	}

	pub fn is_empty(&self) -> bool {
		self.search_path.is_none()
	}
}

thread_local! {
	static BOUND_CONTEXTS: RefCell<Vec<ResolverContext>> = const { RefCell::new(Vec::new()) };
}

/// Binds a [ResolverContext] to the current thread for the lifetime of the binder.
///
/// Bindings nest; the most recent binding wins.
pub struct ResolverContextBinder {
	_not_send: std::marker::PhantomData<*const ()>,
}

impl ResolverContextBinder {
	pub fn new(context: &ResolverContext) -> Self {
		BOUND_CONTEXTS.with(|contexts| contexts.borrow_mut().push(context.clone()));
		Self {
			_not_send: std::marker::PhantomData,
		}
	}
}

impl Drop for ResolverContextBinder {
	fn drop(&mut self) {
		BOUND_CONTEXTS.with(|contexts| {
			contexts.borrow_mut().pop();
		});
	}
}

/// Returns the context most recently bound on this thread, if any.
pub fn current_context() -> Option<ResolverContext> {
	BOUND_CONTEXTS.with(|contexts| contexts.borrow().last().cloned())
}

/// Resolves asset paths and opens layers.
pub trait Resolver: Send + Sync {
	/// Returns the identifier for `asset_path` anchored to the layer
	/// identified by `anchor`, honoring the context bound on this thread.
	fn create_identifier(&self, asset_path: &str, anchor: Option<&str>) -> String;

	/// Opens the layer for `identifier`, which may carry file format
	/// arguments. Returns `None` if no such asset exists.
	fn open_layer(&self, identifier: &str) -> Option<Arc<sdf::Layer>>;

	/// Returns true if `identifier` currently refers to an existing asset.
	fn asset_exists(&self, identifier: &str) -> bool;

	/// Re-reads the given layers from their backing assets and returns the
	/// ones whose contents changed.
	fn reload_layers(&self, layers: &[Arc<sdf::Layer>]) -> Vec<Arc<sdf::Layer>>;
}

/// Joins `identifier` with file format arguments.
pub fn identifier_with_args(identifier: &str, args: &FileFormatArguments) -> String {
	if args.is_empty() {
		return identifier.to_string();
	}
	let encoded: Vec<String> = args.iter().map(|(k, v)| format!("{k}={v}")).collect();
	format!("{identifier}{FORMAT_ARGS_SEPARATOR}{}", encoded.join("&"))
}

/// Splits `identifier` into its asset identifier and file format arguments.
pub fn split_identifier(identifier: &str) -> (&str, FileFormatArguments) {
	match identifier.split_once(FORMAT_ARGS_SEPARATOR) {
		Some((asset, args)) => {
			let args = args
				.split('&')
				.filter_map(|kv| kv.split_once('='))
				.map(|(k, v)| (k.to_string(), v.to_string()))
				.collect();
			(asset, args)
		}
		None => (identifier, FileFormatArguments::new()),
	}
}

/// Anchors `asset_path` to the directory of `anchor`.
pub fn anchor_path(asset_path: &str, anchor: &str) -> String {
	if asset_path.starts_with('/') || asset_path.contains("://") {
		return asset_path.to_string();
	}
	let (anchor, _) = split_identifier(anchor);
	let dir = match anchor.rfind('/') {
		Some(index) => &anchor[..=index],
		None => "",
	};
	normalize(&format!("{dir}{asset_path}"))
}

fn normalize(path: &str) -> String {
	let absolute = path.starts_with('/');
	let mut parts: Vec<&str> = Vec::new();
	for part in path.split('/') {
		match part {
			"" | "." => {}
			".." => {
				parts.pop();
			}
			other => parts.push(other),
		}
	}
	let joined = parts.join("/");
	if absolute { format!("/{joined}") } else { joined }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn anchoring() {
		assert_eq!(anchor_path("b.usda", "/dir/a.usda"), "/dir/b.usda");
		assert_eq!(anchor_path("../b.usda", "/dir/sub/a.usda"), "/dir/b.usda");
		assert_eq!(anchor_path("/abs.usda", "/dir/a.usda"), "/abs.usda");
	}

	#[test]
	fn format_args_round_trip_through_identifier() {
		let mut args = FileFormatArguments::new();
		args.insert("target".into(), "usd".into());
		let id = identifier_with_args("/a.usda", &args);
		assert_eq!(split_identifier(&id), ("/a.usda", args));
	}

	#[test]
	fn binder_scopes_context() {
		assert!(current_context().is_none());
		{
			let _outer = ResolverContextBinder::new(&ResolverContext::with_search_path("/x"));
			{
				let _inner = ResolverContextBinder::new(&ResolverContext::with_search_path("/y"));
				assert_eq!(current_context().unwrap().search_path(), Some("/y"));
			}
			assert_eq!(current_context().unwrap().search_path(), Some("/x"));
		}
		assert!(current_context().is_none());
	}
}
