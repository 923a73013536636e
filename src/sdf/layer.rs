use crate::sdf::{self, AbstractData, CHILDREN_KEYS, FIELD_KEYS};
use crate::{tf, vt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

static ANONYMOUS_LAYER_COUNT: AtomicUsize = AtomicUsize::new(0);

/// A scene description container that can combine with other such containers
/// to form simple component assets, and successively larger aggregates.
/// The contents of a Layer adhere to the [sdf::AbstractData] data model.
///
/// Layers are shared behind `Arc` and identified by pointer; their contents
/// can be authored through `&self`.
pub struct Layer {
	identifier: String,
	data: RwLock<sdf::Data>,
}

impl std::fmt::Debug for Layer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Layer")
			.field("identifier", &self.identifier)
			.finish()
	}
}

impl Layer {
	/// Creates an empty layer with the given identifier.
	pub fn new(identifier: impl Into<String>) -> Arc<Self> {
		Self::with_data(identifier, sdf::Data::new())
	}

	pub fn with_data(identifier: impl Into<String>, data: sdf::Data) -> Arc<Self> {
		Arc::new(Self {
			identifier: identifier.into(),
			data: RwLock::new(data),
		})
	}

	/// Creates an empty layer with a unique anonymous identifier.
	pub fn anonymous(tag: &str) -> Arc<Self> {
		let n = ANONYMOUS_LAYER_COUNT.fetch_add(1, Ordering::Relaxed);
		Self::new(format!("anon:{n:04}:{tag}"))
	}

	pub fn identifier(&self) -> &str {
		&self.identifier
	}

	pub fn is_anonymous(&self) -> bool {
		self.identifier.starts_with("anon:")
	}

	/// Returns a copy of the layer contents.
	pub fn data(&self) -> sdf::Data {
		self.data.read().clone()
	}

	/// Replaces the layer contents, returning true if anything changed.
	pub fn replace_data(&self, data: sdf::Data) -> bool {
		let mut guard = self.data.write();
		if *guard == data {
			return false;
		}
		*guard = data;
		true
	}

	pub fn dump(&self) -> String {
		sdf::debug_dump(&*self.data.read())
	}
}

/// Specs and fields
impl Layer {
	pub fn has_spec(&self, path: &sdf::Path) -> bool {
		self.data.read().has_spec(path)
	}

	pub fn spec_type(&self, path: &sdf::Path) -> Option<sdf::SpecType> {
		self.data.read().spec_type(path)
	}

	/// Returns true if a prim or variant spec exists at `path`.
	pub fn has_prim_spec(&self, path: &sdf::Path) -> bool {
		matches!(
			self.spec_type(path),
			Some(sdf::SpecType::Prim) | Some(sdf::SpecType::Variant)
		)
	}

	pub fn field(&self, path: &sdf::Path, field: &tf::Token) -> Option<vt::Value> {
		self.data.read().get(path, field)
	}

	pub fn get<T: vt::ValueType>(&self, path: &sdf::Path, field: &tf::Token) -> Option<T> {
		self.field(path, field).and_then(|v| v.get::<T>())
	}

	pub fn has_field(&self, path: &sdf::Path, field: &tf::Token) -> bool {
		self.field(path, field).is_some()
	}

	/// Sets a field on an existing spec. Returns false if there is no spec at `path`.
	pub fn set_field(&self, path: &sdf::Path, field: &tf::Token, value: impl Into<vt::Value>) -> bool {
		let mut data = self.data.write();
		if !data.has_spec(path) {
			return false;
		}
		data.set(path, field, &value.into());
		true
	}

	pub fn clear_field(&self, path: &sdf::Path, field: &tf::Token) {
		self.data.write().erase(path, field);
	}

	/// Names of the prim children authored at `path`, in authored order.
	pub fn prim_children(&self, path: &sdf::Path) -> Vec<tf::Token> {
		self.get::<vt::Array<tf::Token>>(path, &CHILDREN_KEYS.prim_children)
			.unwrap_or_default()
	}

	/// Names of the properties authored at `path`, in authored order.
	pub fn property_children(&self, path: &sdf::Path) -> Vec<tf::Token> {
		self.get::<vt::Array<tf::Token>>(path, &CHILDREN_KEYS.property_children)
			.unwrap_or_default()
	}
}

/// Authoring
impl Layer {
	/// Creates a prim spec at `path`, creating missing ancestors as overs.
	/// Returns false if `path` cannot hold a prim spec.
	pub fn create_prim_spec(&self, path: &sdf::Path, specifier: sdf::Specifier) -> bool {
		if !path.is_prim_path() || !path.is_absolute_path() {
			return false;
		}
		let mut data = self.data.write();
		ensure_prim_spec(&mut data, path, Some(specifier));
		true
	}

	/// Shorthand for `create_prim_spec(path, Specifier::Def)`.
	pub fn define_prim(&self, path: impl Into<sdf::Path>) -> sdf::Path {
		let path = path.into();
		self.create_prim_spec(&path, sdf::Specifier::Def);
		path
	}

	/// Shorthand for `create_prim_spec(path, Specifier::Over)`.
	pub fn override_prim(&self, path: impl Into<sdf::Path>) -> sdf::Path {
		let path = path.into();
		self.create_prim_spec(&path, sdf::Specifier::Over);
		path
	}

	/// Creates an attribute spec at the property path `path`.
	pub fn create_property_spec(&self, path: &sdf::Path) -> bool {
		path.is_prim_property_path() && self.create_property(path, sdf::SpecType::Attribute)
	}

	/// Creates a relationship spec at the property path `path`.
	pub fn create_relationship_spec(&self, path: &sdf::Path) -> bool {
		path.is_prim_property_path() && self.create_property(path, sdf::SpecType::Relationship)
	}

	/// Creates an attribute spec on a relationship target, such as
	/// `/Prim.rel[/Target].attr`, along with its owning specs.
	pub fn create_relational_attribute_spec(&self, path: &sdf::Path) -> bool {
		if !path.is_relational_attribute_path() {
			return false;
		}
		let target = path.parent_path();
		let relationship = target.parent_path();
		if !self.create_relationship_spec(&relationship) {
			return false;
		}
		{
			let mut data = self.data.write();
			if !data.has_spec(&target) {
				data.create_spec(&target, sdf::SpecType::RelationshipTarget);
			}
		}
		self.create_property(path, sdf::SpecType::Attribute)
	}

	fn create_property(&self, path: &sdf::Path, spec_type: sdf::SpecType) -> bool {
		let mut data = self.data.write();
		let owner = path.parent_path();
		if owner.is_prim_path() {
			ensure_prim_spec(&mut data, &owner, None);
		}
		if !data.has_spec(path) {
			data.create_spec(path, spec_type);
			append_child_name(
				&mut data,
				&owner,
				&CHILDREN_KEYS.property_children,
				path.name_token(),
			);
		}
		true
	}

	/// Removes the spec at `path` and every spec below it.
	pub fn remove_spec(&self, path: &sdf::Path) {
		let mut data = self.data.write();
		let doomed: Vec<sdf::Path> = data
			.visit_specs()
			.into_iter()
			.filter(|p| p.has_prefix(path))
			.cloned()
			.collect();
		if doomed.is_empty() {
			return;
		}
		for p in &doomed {
			data.erase_spec(p);
		}
		let parent = path.parent_path();
		let key = if path.is_property_path() {
			&CHILDREN_KEYS.property_children
		} else {
			&CHILDREN_KEYS.prim_children
		};
		if let Some(mut names) = data
			.get(&parent, key)
			.and_then(|v| v.get::<vt::Array<tf::Token>>())
		{
			let name = path.name_token();
			names.retain(|n| *n != name);
			data.set(&parent, key, &vt::Value::new(names));
		}
	}

	/// Creates the variant spec `prim_path{variant_set=variant}`, registering
	/// the variant set on the prim.
	pub fn create_variant_spec(&self, prim_path: &sdf::Path, variant_set: &str, variant: &str) -> sdf::Path {
		let variant_path = prim_path.append_variant_selection(variant_set, variant);
		if variant_path.is_empty() {
			return variant_path;
		}
		let mut data = self.data.write();
		ensure_prim_spec(&mut data, &variant_path, None);
		variant_path
	}

	pub fn set_variant_selection(&self, path: &sdf::Path, variant_set: &str, variant: &str) {
		let mut selections = self
			.get::<sdf::VariantSelectionMap>(path, &FIELD_KEYS.variant_selection)
			.unwrap_or_default();
		selections.insert(variant_set.to_string(), variant.to_string());
		self.create_prim_spec_if_missing(path);
		self.set_field(path, &FIELD_KEYS.variant_selection, selections);
	}

	pub fn set_references(&self, path: &sdf::Path, references: sdf::ReferenceListOp) {
		self.create_prim_spec_if_missing(path);
		self.set_field(path, &FIELD_KEYS.references, references);
	}

	/// Prepends a reference to the references authored at `path`.
	pub fn add_reference(&self, path: &sdf::Path, reference: sdf::Reference) {
		let mut op = self
			.get::<sdf::ReferenceListOp>(path, &FIELD_KEYS.references)
			.unwrap_or_default();
		op.prepended_items.push(reference);
		self.set_references(path, op);
	}

	pub fn set_payloads(&self, path: &sdf::Path, payloads: sdf::PayloadListOp) {
		self.create_prim_spec_if_missing(path);
		self.set_field(path, &FIELD_KEYS.payload, payloads);
	}

	/// Prepends a payload to the payloads authored at `path`.
	pub fn add_payload(&self, path: &sdf::Path, payload: sdf::Payload) {
		let mut op = self
			.get::<sdf::PayloadListOp>(path, &FIELD_KEYS.payload)
			.unwrap_or_default();
		op.prepended_items.push(payload);
		self.set_payloads(path, op);
	}

	/// Prepends an inherit arc to the inherits authored at `path`.
	pub fn add_inherit_path(&self, path: &sdf::Path, inherit: sdf::Path) {
		self.add_path_list_item(path, &FIELD_KEYS.inherit_paths, inherit);
	}

	/// Prepends a specializes arc to the specializes authored at `path`.
	pub fn add_specializes(&self, path: &sdf::Path, specialize: sdf::Path) {
		self.add_path_list_item(path, &FIELD_KEYS.specializes, specialize);
	}

	fn add_path_list_item(&self, path: &sdf::Path, field: &tf::Token, item: sdf::Path) {
		let mut op = self
			.get::<sdf::PathListOp>(path, field)
			.unwrap_or_default();
		op.prepended_items.push(item);
		self.create_prim_spec_if_missing(path);
		self.set_field(path, field, op);
	}

	fn create_prim_spec_if_missing(&self, path: &sdf::Path) {
		if !self.has_spec(path) {
			let mut data = self.data.write();
			ensure_prim_spec(&mut data, path, None);
		}
	}
}

/// Metadata
impl Layer {
	/// Return this layer's 'defaultPrim' metadata.
	pub fn default_prim(&self) -> tf::Token {
		self.get::<tf::Token>(&sdf::Path::absolute_root_path(), &FIELD_KEYS.default_prim)
			.unwrap_or_default()
	}

	pub fn set_default_prim(&self, name: &str) {
		self.set_field(
			&sdf::Path::absolute_root_path(),
			&FIELD_KEYS.default_prim,
			tf::Token::new(name),
		);
	}

	/// Return this layer's 'defaultPrim' metadata interpreted as an absolute prim path.
	pub fn default_prim_as_path(&self) -> sdf::Path {
		let default_prim_token = self.default_prim();
		if default_prim_token.is_empty() {
			return sdf::Path::empty_path();
		}
		if default_prim_token.as_str().starts_with('/') {
			let path = sdf::Path::from(default_prim_token.as_str());
			if path.is_prim_path() {
				return path;
			}
			return sdf::Path::empty_path();
		}
		sdf::Path::absolute_root_path().append_child(&default_prim_token)
	}
}

/// Sublayers
impl Layer {
	pub fn sub_layer_paths(&self) -> vt::Array<String> {
		self.get::<vt::Array<String>>(&sdf::Path::absolute_root_path(), &FIELD_KEYS.sub_layers)
			.unwrap_or_default()
	}

	pub fn sub_layer_offsets(&self) -> vt::Array<sdf::Retiming> {
		self.get::<vt::Array<sdf::Retiming>>(
			&sdf::Path::absolute_root_path(),
			&FIELD_KEYS.sub_layer_offsets,
		)
		.unwrap_or_default()
	}

	pub fn set_sub_layer_paths(&self, paths: vt::Array<String>) {
		self.set_field(
			&sdf::Path::absolute_root_path(),
			&FIELD_KEYS.sub_layers,
			paths,
		);
	}

	/// Inserts a sublayer at `index`, or appends it when `index` is past the end.
	pub fn insert_sub_layer_path(&self, path: impl Into<String>, index: usize) {
		let mut paths = self.sub_layer_paths();
		let index = index.min(paths.len());
		paths.insert(index, path.into());
		self.set_sub_layer_paths(paths);
	}

	pub fn set_sub_layer_offsets(&self, offsets: vt::Array<sdf::Retiming>) {
		self.set_field(
			&sdf::Path::absolute_root_path(),
			&FIELD_KEYS.sub_layer_offsets,
			offsets,
		);
	}
}

/// Relocates
impl Layer {
	/// The relocates authored on the prim at `path`.
	pub fn relocates(&self, path: &sdf::Path) -> vt::Array<sdf::Relocate> {
		self.get::<vt::Array<sdf::Relocate>>(path, &FIELD_KEYS.relocates)
			.unwrap_or_default()
	}

	pub fn has_relocates(&self, path: &sdf::Path) -> bool {
		!self.relocates(path).is_empty()
	}

	pub fn set_relocates(&self, path: &sdf::Path, relocates: vt::Array<sdf::Relocate>) {
		self.create_prim_spec_if_missing(path);
		self.set_field(path, &FIELD_KEYS.relocates, relocates);
	}

	/// Paths of every prim spec in this layer that authors relocates.
	pub fn prims_with_relocates(&self) -> Vec<sdf::Path> {
		let data = self.data.read();
		data.visit_specs()
			.into_iter()
			.filter(|path| {
				data.get(path, &FIELD_KEYS.relocates)
					.and_then(|v| v.get::<vt::Array<sdf::Relocate>>())
					.is_some_and(|r| !r.is_empty())
			})
			.cloned()
			.collect()
	}
}

fn append_child_name(data: &mut sdf::Data, parent: &sdf::Path, key: &tf::Token, name: tf::Token) {
	let mut names = data
		.get(parent, key)
		.and_then(|v| v.get::<vt::Array<tf::Token>>())
		.unwrap_or_default();
	if !names.contains(&name) {
		names.push(name);
		data.set(parent, key, &vt::Value::new(names));
	}
}

fn ensure_prim_spec(data: &mut sdf::Data, path: &sdf::Path, specifier: Option<sdf::Specifier>) {
	if path.is_absolute_root_path() {
		return;
	}
	let parent = path.parent_path();
	if !data.has_spec(&parent) {
		ensure_prim_spec(data, &parent, None);
	}

	if path.is_prim_variant_selection_path() {
		if !data.has_spec(path) {
			data.create_spec(path, sdf::SpecType::Variant);
			let (set, _) = path.variant_selection();
			let mut op = data
				.get(&parent, &FIELD_KEYS.variant_set_names)
				.and_then(|v| v.get::<sdf::StringListOp>())
				.unwrap_or_default();
			if !op.ordered_elements().contains(&set) {
				op.prepended_items.push(set.clone());
				data.set(&parent, &FIELD_KEYS.variant_set_names, &vt::Value::new(op));
			}
			append_child_name(
				data,
				&parent,
				&CHILDREN_KEYS.variant_set_children,
				tf::Token::new(&set),
			);
		}
		return;
	}

	let existed = data.has_spec(path);
	if !existed {
		data.create_spec(path, sdf::SpecType::Prim);
		append_child_name(
			data,
			&parent,
			&CHILDREN_KEYS.prim_children,
			path.name_token(),
		);
	}
	if let Some(specifier) = specifier {
		data.set(path, &FIELD_KEYS.specifier, &vt::Value::new(specifier));
	} else if !existed {
		data.set(path, &FIELD_KEYS.specifier, &vt::Value::new(sdf::Specifier::Over));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	#[test]
	fn prim_specs_register_children() {
		let layer = Layer::new("/test.usda");
		layer.define_prim("/A/B");
		assert!(layer.has_prim_spec(&p("/A")));
		assert!(layer.has_prim_spec(&p("/A/B")));
		assert_eq!(layer.prim_children(&p("/A")), vec![tf::Token::new("B")]);

		layer.remove_spec(&p("/A/B"));
		assert!(!layer.has_spec(&p("/A/B")));
		assert!(layer.prim_children(&p("/A")).is_empty());
	}

	#[test]
	fn variant_specs() {
		let layer = Layer::new("/test.usda");
		layer.define_prim("/A");
		let variant = layer.create_variant_spec(&p("/A"), "look", "red");
		assert_eq!(variant, p("/A{look=red}"));
		layer.define_prim(variant.append_child(&tf::Token::new("Child")));
		assert!(layer.has_prim_spec(&p("/A{look=red}Child")));
		let sets = layer
			.get::<sdf::StringListOp>(&p("/A"), &FIELD_KEYS.variant_set_names)
			.unwrap();
		assert_eq!(sets.ordered_elements(), vec!["look".to_string()]);
	}

	#[test]
	fn replace_data_reports_changes() {
		let layer = Layer::new("/test.usda");
		let same = layer.data();
		assert!(!layer.replace_data(same));
		let other = Layer::new("/other.usda");
		other.define_prim("/X");
		assert!(layer.replace_data(other.data()));
		assert!(layer.has_prim_spec(&p("/X")));
	}
}
