use super::ArcType;
use crate::sdf;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

/// A composition error.
///
/// Composition errors are data: they are collected while computing layer
/// stacks and prim indexes and handed back to callers alongside results.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
	#[error("could not load sublayer @{sublayer_path}@ of layer @{layer}@")]
	InvalidSublayerPath { layer: String, sublayer_path: String },

	#[error("sublayer @{sublayer}@ of layer @{layer}@ forms a cycle")]
	SublayerCycle { layer: String, sublayer: String },

	#[error(
		"could not open asset @{asset_path}@ for {arc_type} on prim <{site_path}> authored in @{layer}@"
	)]
	InvalidAssetPath {
		site_path: sdf::Path,
		layer: String,
		asset_path: String,
		resolved_asset_path: String,
		arc_type: ArcType,
	},

	#[error("asset @{asset_path}@ for {arc_type} on prim <{site_path}> is muted")]
	MutedAssetPath {
		site_path: sdf::Path,
		layer: String,
		asset_path: String,
		resolved_asset_path: String,
		arc_type: ArcType,
	},

	#[error(
		"unresolved {arc_type} prim path <{unresolved_path}> on prim <{site_path}> in @{target_layer}@"
	)]
	UnresolvedPrimPath {
		site_path: sdf::Path,
		target_layer: String,
		unresolved_path: sdf::Path,
		arc_type: ArcType,
	},

	#[error("{arc_type} target <{target_path}> on prim <{site_path}> is not a prim path")]
	InvalidPrimPath {
		site_path: sdf::Path,
		target_path: sdf::Path,
		arc_type: ArcType,
	},

	#[error("{arc_type} on prim <{site_path}> to {target} would introduce a cycle")]
	ArcCycle {
		site_path: sdf::Path,
		target: String,
		arc_type: ArcType,
	},

	#[error("prim index for <{site_path}> exceeds the maximum number of nodes")]
	CapacityExceeded { site_path: sdf::Path },

	#[error(
		"property <{property_path}> is a {conflicting_type:?} in @{conflicting_layer}@ but a {defining_type:?} in @{defining_layer}@"
	)]
	InconsistentPropertyType {
		property_path: sdf::Path,
		defining_layer: String,
		defining_type: sdf::SpecType,
		conflicting_layer: String,
		conflicting_type: sdf::SpecType,
	},
}

impl Error {
	/// The layer whose sublayer could not be opened, for sublayer errors.
	pub fn invalid_sublayer(&self) -> Option<(&str, &str)> {
		match self {
			Self::InvalidSublayerPath {
				layer,
				sublayer_path,
			} => Some((layer, sublayer_path)),
			_ => None,
		}
	}

	/// The resolved asset path of an asset that could not be opened.
	pub fn invalid_asset(&self) -> Option<&str> {
		match self {
			Self::InvalidAssetPath {
				resolved_asset_path,
				..
			} => Some(resolved_asset_path),
			_ => None,
		}
	}
}

pub type ErrorVector = Vec<Error>;

/// Reports API misuse. The caller receives a harmless default instead.
///
/// Debug builds panic unless a [CodingErrorMark] on the current thread
/// captures the error.
macro_rules! coding_error {
	($($arg:tt)*) => {
		$crate::pcp::errors::report_coding_error(format_args!($($arg)*))
	};
}

thread_local! {
	static MARK_DEPTH: Cell<usize> = const { Cell::new(0) };
	static CAPTURED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

#[track_caller]
pub(crate) fn report_coding_error(args: std::fmt::Arguments) {
	let message = args.to_string();
	tracing::error!(target: "pcp::coding_error", "{message}");
	if MARK_DEPTH.get() > 0 {
		CAPTURED.with_borrow_mut(|captured| captured.push(message));
	} else if cfg!(debug_assertions) {
		panic!("coding error: {message}");
	}
}

/// Captures the coding errors reported on the current thread while it
/// lives, so callers that misuse the API on purpose can observe them.
///
/// Marks nest; an outer mark also sees the errors captured by inner ones.
pub struct CodingErrorMark {
	start: usize,
	_thread_bound: PhantomData<*const ()>,
}

impl CodingErrorMark {
	pub fn new() -> Self {
		MARK_DEPTH.set(MARK_DEPTH.get() + 1);
		Self {
			start: CAPTURED.with_borrow(Vec::len),
			_thread_bound: PhantomData,
		}
	}

	/// Whether no coding error was reported since the mark was set.
	pub fn is_clean(&self) -> bool {
		CAPTURED.with_borrow(|captured| captured.len() == self.start)
	}

	/// Messages of the coding errors reported since the mark was set.
	pub fn messages(&self) -> Vec<String> {
		CAPTURED.with_borrow(|captured| captured[self.start..].to_vec())
	}
}

impl Default for CodingErrorMark {
	fn default() -> Self {
		Self::new()
	}
}

impl Drop for CodingErrorMark {
	fn drop(&mut self) {
		let depth = MARK_DEPTH.get() - 1;
		MARK_DEPTH.set(depth);
		if depth == 0 {
			CAPTURED.with_borrow_mut(Vec::clear);
		}
	}
}

/// Checks an internal invariant, logging the violation and asserting in
/// debug builds. Evaluates to the condition.
macro_rules! verify {
	($cond:expr, $($arg:tt)*) => {{
		let ok: bool = $cond;
		if !ok {
			tracing::error!(target: "pcp::verify", $($arg)*);
			debug_assert!(ok, $($arg)*);
		}
		ok
	}};
}

pub(crate) use coding_error;
pub(crate) use verify;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn marks_capture_coding_errors() {
		let outer = CodingErrorMark::new();
		coding_error!("first {}", 1);
		{
			let inner = CodingErrorMark::new();
			assert!(inner.is_clean());
			coding_error!("second");
			assert_eq!(inner.messages(), vec!["second".to_string()]);
		}
		assert_eq!(outer.messages(), vec!["first 1".to_string(), "second".to_string()]);
	}

	#[test]
	#[cfg(debug_assertions)]
	#[should_panic(expected = "coding error: unmarked")]
	fn unmarked_coding_errors_are_fatal_in_debug() {
		coding_error!("unmarked");
	}
}
