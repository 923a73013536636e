use crate::{sdf, tf, vt};
use std::collections::BTreeMap;

/// Interface for scene description data storage.
pub trait AbstractData {
	/// Create a new spec at `path` with the given `spec_type`.
	/// If the spec already exists, the spec type will be changed.
	fn create_spec(&mut self, path: &sdf::Path, spec_type: sdf::SpecType);

	/// Erase the spec at `path` and its fields. Descendant specs are untouched.
	fn erase_spec(&mut self, path: &sdf::Path);

	/// Return the type of the spec at `path`.
	fn spec_type(&self, path: &sdf::Path) -> Option<sdf::SpecType>;

	/// Return the value of the given `path` and `field`.
	fn get(&self, path: &sdf::Path, field: &tf::Token) -> Option<vt::Value>;

	/// Set the value of the given `path` and `field`.
	fn set(&mut self, path: &sdf::Path, field: &tf::Token, value: &vt::Value);

	/// Remove the given `field` from the spec at `path`.
	fn erase(&mut self, path: &sdf::Path, field: &tf::Token);

	/// Return the names of all the fields that are set at `path`.
	fn list(&self, path: &sdf::Path) -> Vec<&tf::Token>;

	/// Visit every spec in this AbstractData object in path order.
	fn visit_specs(&self) -> Vec<&sdf::Path>;

	fn has_spec(&self, path: &sdf::Path) -> bool {
		self.spec_type(path).is_some()
	}
}

#[derive(Debug, Clone, PartialEq)]
struct SpecData {
	spec_type: sdf::SpecType,
	fields: BTreeMap<tf::Token, vt::Value>,
}

/// In-memory scene description storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
	specs: BTreeMap<sdf::Path, SpecData>,
}

impl Data {
	/// Creates storage holding only the pseudo-root spec.
	pub fn new() -> Self {
		let mut data = Self {
			specs: BTreeMap::new(),
		};
		data.create_spec(&sdf::Path::absolute_root_path(), sdf::SpecType::PseudoRoot);
		data
	}
}

impl Default for Data {
	fn default() -> Self {
		Self::new()
	}
}

impl AbstractData for Data {
	fn create_spec(&mut self, path: &sdf::Path, spec_type: sdf::SpecType) {
		self.specs
			.entry(path.clone())
			.and_modify(|spec| spec.spec_type = spec_type)
			.or_insert_with(|| SpecData {
				spec_type,
				fields: BTreeMap::new(),
			});
	}

	fn erase_spec(&mut self, path: &sdf::Path) {
		self.specs.remove(path);
	}

	fn spec_type(&self, path: &sdf::Path) -> Option<sdf::SpecType> {
		self.specs.get(path).map(|spec| spec.spec_type)
	}

	fn get(&self, path: &sdf::Path, field: &tf::Token) -> Option<vt::Value> {
		self.specs.get(path)?.fields.get(field).cloned()
	}

	fn set(&mut self, path: &sdf::Path, field: &tf::Token, value: &vt::Value) {
		if let Some(spec) = self.specs.get_mut(path) {
			spec.fields.insert(field.clone(), value.clone());
		}
	}

	fn erase(&mut self, path: &sdf::Path, field: &tf::Token) {
		if let Some(spec) = self.specs.get_mut(path) {
			spec.fields.remove(field);
		}
	}

	fn list(&self, path: &sdf::Path) -> Vec<&tf::Token> {
		self.specs
			.get(path)
			.map(|spec| spec.fields.keys().collect())
			.unwrap_or_default()
	}

	fn visit_specs(&self) -> Vec<&sdf::Path> {
		self.specs.keys().collect()
	}
}

/// Renders every spec and field of `data`, one spec per block.
pub fn debug_dump(data: &dyn sdf::AbstractData) -> String {
	use std::fmt::Write;

	let mut out = String::new();
	let specs = data.visit_specs();
	let _ = writeln!(out, "Spec count: {}", specs.len());
	for path in specs {
		let Some(spec_type) = data.spec_type(path) else {
			continue;
		};
		let _ = writeln!(out, "[{:?}] {}", spec_type, path);
		for field in data.list(path) {
			if let Some(value) = data.get(path, field) {
				let _ = writeln!(out, "    {} = {:?}", field, value);
			}
		}
	}
	out
}
