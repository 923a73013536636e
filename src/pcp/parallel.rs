use super::dependencies::{ConcurrentPopulationContext, Dependencies};
use super::errors::Error;
use super::indexer::{IncludePayloadPredicate, PayloadSet, PrimIndexInputs, compute_prim_index};
use super::layer_stack::LayerStack;
use super::prim_index::PrimIndex;
use crate::{ar, sdf};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Decides whether parallel indexing descends into a prim's children.
pub type ChildrenPredicate<'a> = &'a (dyn Fn(&PrimIndex) -> bool + Sync);

/// Commits results of parallel indexing to the cache tables.
///
/// Workers queue results and commit whenever the tables are uncontended.
/// Once `flush_threshold` results are queued a worker waits for the lock
/// instead of skipping it.
pub(crate) struct Publisher<'a> {
	pending: Mutex<Vec<(sdf::Path, PrimIndex)>>,
	prim_indexes: Mutex<&'a mut sdf::PathTable<PrimIndex>>,
	dependencies: ConcurrentPopulationContext<'a>,
	flush_threshold: usize,
}

impl<'a> Publisher<'a> {
	pub fn new(
		prim_indexes: &'a mut sdf::PathTable<PrimIndex>,
		dependencies: &'a mut Dependencies,
		flush_threshold: usize,
	) -> Self {
		Self {
			pending: Mutex::new(Vec::new()),
			prim_indexes: Mutex::new(prim_indexes),
			dependencies: ConcurrentPopulationContext::new(dependencies),
			flush_threshold: flush_threshold.max(1),
		}
	}

	/// A valid cached index for `path`, including ones still queued.
	pub fn find(&self, path: &sdf::Path) -> Option<PrimIndex> {
		if let Some(index) = self.pending.lock().iter().find(|(p, _)| p == path) {
			return Some(index.1.clone());
		}
		self.prim_indexes
			.lock()
			.get(path)
			.filter(|index| index.is_valid())
			.cloned()
	}

	pub fn publish(&self, path: sdf::Path, prim_index: PrimIndex) {
		let queued = {
			let mut pending = self.pending.lock();
			pending.push((path, prim_index));
			pending.len()
		};

		let tables = if queued >= self.flush_threshold {
			Some(self.prim_indexes.lock())
		} else {
			self.prim_indexes.try_lock()
		};
		if let Some(mut tables) = tables {
			let batch = std::mem::take(&mut *self.pending.lock());
			self.commit(&mut tables, batch);
		}
	}

	/// Commits everything still queued.
	pub fn flush(&self) {
		let mut tables = self.prim_indexes.lock();
		let batch = std::mem::take(&mut *self.pending.lock());
		self.commit(&mut tables, batch);
	}

	fn commit(&self, tables: &mut sdf::PathTable<PrimIndex>, batch: Vec<(sdf::Path, PrimIndex)>) {
		if batch.is_empty() {
			return;
		}
		tracing::trace!("publishing {} prim indexes", batch.len());
		for (path, prim_index) in batch {
			if tables.get(&path).is_some_and(PrimIndex::is_valid) {
				continue;
			}
			self.dependencies.add(&prim_index);
			tables.insert(path, prim_index);
		}
	}
}

/// Everything a parallel indexing task reads.
pub(crate) struct ParallelIndexer<'a> {
	pub layer_stack: &'a Arc<LayerStack>,
	pub inputs: PrimIndexInputs<'a>,
	pub included_payloads: &'a RwLock<PayloadSet>,
	pub children_predicate: ChildrenPredicate<'a>,
	pub payload_predicate: Option<IncludePayloadPredicate<'a>>,
	pub publisher: Publisher<'a>,
	pub errors: Mutex<Vec<Error>>,
	pub computations: &'a AtomicUsize,
}

impl ParallelIndexer<'_> {
	/// Indexes every root and, as the children predicate allows, their
	/// namespace descendants. Returns once every result is published.
	pub fn run(&self, roots: &[(sdf::Path, Option<PrimIndex>)]) {
		let _span = tracing::debug_span!("compute_prim_indexes_in_parallel", roots = roots.len()).entered();
		rayon::scope(|scope| {
			for (path, parent) in roots {
				let path = path.clone();
				let parent = parent.clone();
				scope.spawn(move |scope| self.index_subtree(scope, path, parent));
			}
		});
		self.publisher.flush();
	}

	fn index_subtree<'s>(&'s self, scope: &rayon::Scope<'s>, path: sdf::Path, parent: Option<PrimIndex>) {
		let prim_index = match self.publisher.find(&path) {
			Some(cached) => cached,
			None => {
				let _binder = ar::ResolverContextBinder::new(&self.layer_stack.identifier().resolver_context);
				let inputs = self
					.inputs
					.parent_index(parent.as_ref())
					.include_payload_predicate(self.payload_predicate);
				let outputs = compute_prim_index(&path, self.layer_stack, &inputs);
				self.computations.fetch_add(1, Ordering::Relaxed);
				if outputs.included_discovered_payload() {
					self.included_payloads.write().insert(path.clone());
				}
				if !outputs.all_errors.is_empty() {
					self.errors.lock().extend(outputs.all_errors);
				}
				self.publisher
					.publish(path.clone(), outputs.prim_index.clone());
				outputs.prim_index
			}
		};

		if !(self.children_predicate)(&prim_index) {
			return;
		}
		let (children, _) = prim_index.compute_prim_child_names();
		for name in children {
			let child = path.append_child(&name);
			let parent = prim_index.clone();
			scope.spawn(move |scope| self.index_subtree(scope, child, Some(parent)));
		}
	}
}
