use super::errors::{Error, coding_error};
use super::graph::{NodeRef, PrimIndexGraph};
use super::prim_index::PrimIndex;
use crate::sdf;
use std::sync::Arc;

/// A property spec contributing to a property, and the prim index node
/// whose site provides it.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
	pub layer: Arc<sdf::Layer>,
	pub path: sdf::Path,
	pub node_index: u16,
}

/// An index of all the property specs contributing to one property,
/// strongest first.
///
/// Property indexes are built from the prim index of the owning prim and
/// share its node graph.
#[derive(Debug, Clone, Default)]
pub struct PropertyIndex {
	graph: Option<Arc<PrimIndexGraph>>,
	property_stack: Vec<PropertyInfo>,
	local_errors: Vec<Error>,
}

impl PropertyIndex {
	/// Builds the index for the property at `path` from the prim index of
	/// the prim owning it.
	///
	/// This does not consult or fill any cache and works in every
	/// composition mode. Errors are appended to `all_errors`.
	pub fn build(path: &sdf::Path, prim_index: &PrimIndex, all_errors: &mut Vec<Error>) -> Self {
		if !path.is_property_path() {
			coding_error!("<{}> is not a property path", path);
			return Self::default();
		}
		if path.prim_path() != prim_index.path() {
			coding_error!(
				"prim index for <{}> does not own property <{}>",
				prim_index.path(),
				path
			);
			return Self::default();
		}

		let mut index = Self {
			graph: prim_index.graph().cloned(),
			..Self::default()
		};
		if path.is_relational_attribute_path() {
			index.build_relational_attribute(path, prim_index);
		} else {
			index.build_prim_property(path, prim_index);
		}
		all_errors.extend(index.local_errors.iter().cloned());
		index
	}

	fn build_prim_property(&mut self, path: &sdf::Path, prim_index: &PrimIndex) {
		let name = path.name_token();
		let mut defining: Option<(String, sdf::SpecType)> = None;
		for node in prim_index.node_range() {
			if !node.can_contribute_specs() {
				continue;
			}
			let site = node.path().append_property(&name);
			for layer in node.layer_stack().layers() {
				let Some(spec_type) = layer.spec_type(&site) else {
					continue;
				};
				if !self.check_type(path, layer, spec_type, &mut defining) {
					continue;
				}
				self.property_stack.push(PropertyInfo {
					layer: layer.clone(),
					path: site.clone(),
					node_index: node.index(),
				});
			}
		}
	}

	/// Attributes on relationship targets come from the sites of the owning
	/// relationship, with the target path mapped into each node's namespace.
	fn build_relational_attribute(&mut self, path: &sdf::Path, prim_index: &PrimIndex) {
		let target_path = path.parent_path();
		let relationship_path = target_path.parent_path();
		let target = target_path.target_path();
		let name = path.name_token();

		let mut relationship = Self {
			graph: self.graph.clone(),
			..Self::default()
		};
		relationship.build_prim_property(&relationship_path, prim_index);
		self.local_errors.append(&mut relationship.local_errors);
		let Some(graph) = self.graph.clone() else {
			return;
		};

		let mut defining: Option<(String, sdf::SpecType)> = None;
		for info in &relationship.property_stack {
			let local_target = graph.map_to_root(info.node_index).map_target_to_source(&target);
			if local_target.is_empty() {
				continue;
			}
			let site = info
				.path
				.append_target(&local_target)
				.append_relational_attribute(&name);
			let Some(spec_type) = info.layer.spec_type(&site) else {
				continue;
			};
			if !self.check_type(path, &info.layer, spec_type, &mut defining) {
				continue;
			}
			self.property_stack.push(PropertyInfo {
				layer: info.layer.clone(),
				path: site,
				node_index: info.node_index,
			});
		}
	}

	/// The strongest spec decides the property's type; weaker specs of
	/// another type are reported and skipped.
	fn check_type(
		&mut self,
		path: &sdf::Path,
		layer: &sdf::Layer,
		spec_type: sdf::SpecType,
		defining: &mut Option<(String, sdf::SpecType)>,
	) -> bool {
		match defining {
			None => {
				*defining = Some((layer.identifier().to_string(), spec_type));
				true
			}
			Some((_, defining_type)) if *defining_type == spec_type => true,
			Some((defining_layer, defining_type)) => {
				self.local_errors.push(Error::InconsistentPropertyType {
					property_path: path.clone(),
					defining_layer: defining_layer.clone(),
					defining_type: *defining_type,
					conflicting_layer: layer.identifier().to_string(),
					conflicting_type: spec_type,
				});
				false
			}
		}
	}
}

/// Queries
impl PropertyIndex {
	/// Returns true if any spec contributes to the property.
	pub fn is_valid(&self) -> bool {
		!self.property_stack.is_empty()
	}

	/// Contributing specs, strongest first.
	pub fn property_infos(&self) -> &[PropertyInfo] {
		&self.property_stack
	}

	/// Contributing specs with the nodes providing them, strongest first.
	pub fn property_stack(&self) -> Vec<(Arc<sdf::Layer>, sdf::Path, NodeRef<'_>)> {
		let Some(graph) = self.graph.as_deref() else {
			return Vec::new();
		};
		self.property_stack
			.iter()
			.map(|info| (info.layer.clone(), info.path.clone(), graph.node(info.node_index)))
			.collect()
	}

	/// Contributing specs from the root node's layer stack only.
	pub fn local_property_stack(&self) -> Vec<(Arc<sdf::Layer>, sdf::Path)> {
		let Some(graph) = self.graph.as_deref() else {
			return Vec::new();
		};
		let root_layer_stack = graph.root_node().layer_stack();
		self.property_stack
			.iter()
			.filter(|info| Arc::ptr_eq(graph.node(info.node_index).layer_stack(), root_layer_stack))
			.map(|info| (info.layer.clone(), info.path.clone()))
			.collect()
	}

	pub fn local_errors(&self) -> &[Error] {
		&self.local_errors
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ar;
	use crate::pcp::{CodingErrorMark, LayerStackIdentifier, LayerStackRegistry, PrimIndexInputs, compute_prim_index};
	use pretty_assertions::assert_eq;

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	fn prim_index(root: &Arc<sdf::Layer>, resolver: &Arc<ar::MemoryResolver>, path: &str) -> PrimIndex {
		let registry = LayerStackRegistry::new(resolver.clone(), String::new(), false);
		let layer_stack = registry.find_or_create(&LayerStackIdentifier::new(root.clone()), &mut Vec::new());
		compute_prim_index(&p(path), &layer_stack, &PrimIndexInputs::new(&registry)).prim_index
	}

	#[test]
	fn gathers_specs_across_references() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let model = resolver.create_layer("/model.usda");
		model.create_property_spec(&p("/Model.size"));
		root.define_prim("/A");
		root.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));
		root.create_property_spec(&p("/A.size"));

		let index = prim_index(&root, &resolver, "/A");
		let mut errors = Vec::new();
		let property = PropertyIndex::build(&p("/A.size"), &index, &mut errors);
		assert!(errors.is_empty());
		let stack: Vec<(String, String)> = property
			.property_stack()
			.into_iter()
			.map(|(layer, path, _)| (layer.identifier().to_string(), path.to_string()))
			.collect();
		assert_eq!(
			stack,
			vec![
				("/root.usda".to_string(), "/A.size".to_string()),
				("/model.usda".to_string(), "/Model.size".to_string()),
			]
		);
		assert_eq!(property.local_property_stack().len(), 1);
	}

	#[test]
	fn reports_inconsistent_types() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let model = resolver.create_layer("/model.usda");
		model.create_relationship_spec(&p("/Model.thing"));
		root.define_prim("/A");
		root.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));
		root.create_property_spec(&p("/A.thing"));

		let index = prim_index(&root, &resolver, "/A");
		let mut errors = Vec::new();
		let property = PropertyIndex::build(&p("/A.thing"), &index, &mut errors);
		assert_eq!(property.property_infos().len(), 1);
		assert!(matches!(
			errors[..],
			[Error::InconsistentPropertyType {
				defining_type: sdf::SpecType::Attribute,
				conflicting_type: sdf::SpecType::Relationship,
				..
			}]
		));
	}

	#[test]
	fn relational_attributes_map_targets() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		let model = resolver.create_layer("/model.usda");
		model.define_prim("/Model/Target");
		model.create_relational_attribute_spec(&p("/Model.rel[/Model/Target].weight"));
		root.define_prim("/A");
		root.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));

		let index = prim_index(&root, &resolver, "/A");
		let mut errors = Vec::new();
		let property = PropertyIndex::build(&p("/A.rel[/A/Target].weight"), &index, &mut errors);
		assert!(errors.is_empty());
		assert_eq!(
			property.property_infos()[0].path,
			p("/Model.rel[/Model/Target].weight")
		);
	}

	#[test]
	fn rejects_paths_outside_the_prim() {
		let resolver = ar::MemoryResolver::new();
		let root = resolver.create_layer("/root.usda");
		root.define_prim("/A");
		let index = prim_index(&root, &resolver, "/A");
		let mut errors = Vec::new();
		let mark = CodingErrorMark::new();
		assert!(!PropertyIndex::build(&p("/B.x"), &index, &mut errors).is_valid());
		assert!(!PropertyIndex::build(&p("/A"), &index, &mut errors).is_valid());
		assert_eq!(mark.messages().len(), 2);
	}
}
