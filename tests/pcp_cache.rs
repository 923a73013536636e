mod common;

use common::{Scene, cached_paths, compute_all, p};
use openusd_pcp::pcp::{self, Changes, Error};
use openusd_pcp::sdf;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use test_log::test;

#[test]
fn ancestors_are_cached_with_their_descendants() {
	let scene = Scene::new();
	scene.root.define_prim("/World/Set/Chair");
	scene.root.define_prim("/Other");
	let mut cache = scene.cache();

	compute_all(&mut cache, &["/World/Set/Chair", "/Other"]);
	assert_eq!(
		cached_paths(&cache),
		vec!["/", "/Other", "/World", "/World/Set", "/World/Set/Chair"]
	);

	let stats = cache.statistics();
	assert_eq!(stats.prim_indexes, 5);
	assert_eq!(stats.nodes, 5);
	assert_eq!(stats.layer_stacks, 1);
	assert_eq!(stats.prim_index_computations, 5);
}

#[test]
fn cached_indexes_are_shared() {
	let scene = Scene::new();
	let model = scene.layer("/model.usda");
	model.define_prim("/Model/Geom");
	scene.root.define_prim("/A");
	scene
		.root
		.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));
	let mut cache = scene.cache();

	let mut errors = Vec::new();
	let first = cache
		.compute_prim_index(&p("/A/Geom"), &mut errors)
		.graph()
		.cloned();
	let computations = cache.statistics().prim_index_computations;
	let second = cache
		.compute_prim_index(&p("/A/Geom"), &mut errors)
		.graph()
		.cloned();
	assert!(errors.is_empty());
	assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
	assert_eq!(cache.statistics().prim_index_computations, computations);
	assert_eq!(cache.statistics().layer_stacks, 2);
}

#[test]
fn composition_errors_are_reported_and_queryable() {
	let scene = Scene::new();
	scene.root.define_prim("/A");
	scene
		.root
		.add_reference(&p("/A"), sdf::Reference::new("missing.usda", "/X"));
	let mut cache = scene.cache();

	let mut errors = Vec::new();
	let index = cache.compute_prim_index(&p("/A"), &mut errors);
	assert!(index.is_valid());
	assert_eq!(index.node_range().len(), 1);
	assert!(matches!(errors[..], [Error::InvalidAssetPath { .. }]));

	assert_eq!(
		cache.invalid_asset_paths().get(&p("/A")),
		Some(&vec!["/missing.usda".to_string()])
	);
	assert!(cache.is_invalid_asset_path("/missing.usda"));
	assert!(!cache.is_invalid_asset_path("/root.usda"));
}

#[test]
fn property_indexes_follow_their_prims() {
	let scene = Scene::new();
	scene.root.define_prim("/A/B");
	scene.root.create_property_spec(&p("/A.size"));
	scene.root.create_property_spec(&p("/A/B.size"));
	let mut cache = scene.cache();

	let mut errors = Vec::new();
	let index = cache.compute_property_index(&p("/A.size"), &mut errors);
	assert!(index.is_valid());
	assert_eq!(index.local_property_stack().len(), 1);
	cache.compute_property_index(&p("/A/B.size"), &mut errors);
	assert_eq!(cache.statistics().property_indexes, 2);

	let mut changes = Changes::new();
	changes.did_change_significantly(&cache, &p("/A/B"));
	changes.apply(&mut cache);
	assert!(cache.find_property_index(&p("/A.size")).is_some());
	assert!(cache.find_property_index(&p("/A/B.size")).is_none());
}

#[test]
fn variant_fallbacks_invalidate_everything() {
	let scene = Scene::new();
	scene.root.define_prim("/A");
	scene.root.create_variant_spec(&p("/A"), "look", "red");
	scene.root.create_variant_spec(&p("/A"), "look", "blue");
	let mut cache = scene.cache();

	compute_all(&mut cache, &["/A"]);
	assert_eq!(
		cache
			.find_prim_index(&p("/A"))
			.and_then(|index| index.variant_selection("look")),
		None
	);

	let fallbacks = pcp::VariantFallbackMap::from([("look".to_string(), vec!["blue".to_string()])]);
	cache.set_variant_fallbacks(fallbacks.clone(), None);
	assert!(cache.find_prim_index(&p("/A")).is_none());
	assert_eq!(cache.variant_fallbacks(), &fallbacks);

	compute_all(&mut cache, &["/A"]);
	assert_eq!(
		cache
			.find_prim_index(&p("/A"))
			.and_then(|index| index.variant_selection("look")),
		Some("blue".to_string())
	);

	// Setting the same fallbacks again is not a change.
	cache.set_variant_fallbacks(fallbacks, None);
	assert!(cache.find_prim_index(&p("/A")).is_some());
}

#[test]
fn muting_a_referenced_layer() {
	let scene = Scene::new();
	let model = scene.layer("/model.usda");
	model.define_prim("/Model");
	scene.root.define_prim("/A");
	scene
		.root
		.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));
	let mut cache = scene.cache();
	compute_all(&mut cache, &["/A"]);

	let (muted, unmuted) = cache.request_layer_muting(&["model.usda".to_string()], &[], None);
	assert_eq!(muted, vec!["/model.usda".to_string()]);
	assert!(unmuted.is_empty());
	assert!(cache.find_prim_index(&p("/A")).is_none());

	let mut errors = Vec::new();
	let nodes = cache
		.compute_prim_index(&p("/A"), &mut errors)
		.node_range()
		.len();
	assert_eq!(nodes, 1);
	assert!(matches!(errors[..], [Error::MutedAssetPath { .. }]));

	let (muted, unmuted) = cache.request_layer_muting(&[], &["model.usda".to_string()], None);
	assert!(muted.is_empty());
	assert_eq!(unmuted, vec!["/model.usda".to_string()]);
	assert!(cache.find_prim_index(&p("/A")).is_none());
	compute_all(&mut cache, &["/A"]);
	assert_eq!(cache.find_prim_index(&p("/A")).map(|i| i.node_range().len()), Some(2));
}

#[test]
fn own_layers_cannot_be_muted() {
	let scene = Scene::new();
	scene.root.define_prim("/A");
	let mut cache = scene.cache();
	compute_all(&mut cache, &["/A"]);

	let mark = pcp::CodingErrorMark::new();
	let (muted, _) = cache.request_layer_muting(&["/root.usda".to_string()], &[], None);
	assert!(muted.is_empty());
	assert_eq!(mark.messages(), vec!["cannot mute the cache's own layer @/root.usda@".to_string()]);
	assert!(cache.find_prim_index(&p("/A")).is_some());
}

#[test]
fn used_layers_cover_every_dependency() {
	let scene = Scene::new();
	let model = scene.layer("/model.usda");
	let sub = scene.layer("/sub.usda");
	model.define_prim("/Model");
	sub.define_prim("/A");
	scene.root.set_sub_layer_paths(vec!["sub.usda".to_string()]);
	scene
		.root
		.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));
	let mut cache = scene.cache();
	compute_all(&mut cache, &["/A"]);

	let mut used: Vec<String> = cache
		.used_layers()
		.iter()
		.map(|layer| layer.identifier().to_string())
		.collect();
	used.sort();
	assert_eq!(used, vec!["/model.usda", "/root.usda", "/sub.usda"]);

	let mut roots: Vec<String> = cache
		.used_root_layers()
		.iter()
		.map(|layer| layer.identifier().to_string())
		.collect();
	roots.sort();
	assert_eq!(roots, vec!["/model.usda", "/root.usda"]);

	assert_eq!(cache.find_all_layer_stacks_using_layer(&sub).len(), 1);
	assert!(cache.find_all_layer_stacks_using_layer(&model)[0].has_layer(&model));
}
