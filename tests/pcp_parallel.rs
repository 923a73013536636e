mod common;

use common::{Scene, cached_paths, p};
use openusd_pcp::pcp::{self, PrimIndex};
use openusd_pcp::sdf;
use pretty_assertions::assert_eq;
use test_log::test;

fn everything(_: &PrimIndex) -> bool {
	true
}

fn build_scene() -> Scene {
	let scene = Scene::new();
	let model = scene.layer("/model.usda");
	model.define_prim("/Model/Geom/Mesh");
	model.define_prim("/Model/Looks");
	scene.root.define_prim("/World/Set/Chair");
	scene.root.define_prim("/World/Set/Table");
	scene.root.define_prim("/World/Lights");
	scene
		.root
		.add_reference(&p("/World/Set/Chair"), sdf::Reference::new("model.usda", "/Model"));
	scene
}

/// Each node of every cached index in strength order: arc type, layer
/// stack, site path and the strength position of its parent.
fn structure(cache: &pcp::Cache) -> Vec<(String, Vec<(String, String, String, Option<usize>)>)> {
	let mut indexes = Vec::new();
	cache.for_each_prim_index(|index| {
		let nodes = index.node_range();
		let described = nodes
			.iter()
			.map(|node| {
				let parent = node
					.parent_node()
					.and_then(|parent| nodes.iter().position(|n| n.index() == parent.index()));
				(
					node.arc_type().to_string(),
					node.layer_stack().to_string(),
					node.path().to_string(),
					parent,
				)
			})
			.collect();
		indexes.push((index.path().to_string(), described));
	});
	indexes.sort();
	indexes
}

fn sorted_messages(errors: &[pcp::Error]) -> Vec<String> {
	let mut messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
	messages.sort();
	messages
}

#[test]
fn parallel_indexing_matches_serial_indexing() {
	let scene = build_scene();
	scene.root.define_prim("/World/Broken");
	scene
		.root
		.add_reference(&p("/World/Broken"), sdf::Reference::new("missing.usda", "/Missing"));

	let mut serial = scene.usd_cache();
	let mut serial_errors = Vec::new();
	for path in [
		"/World/Set/Chair/Geom/Mesh",
		"/World/Set/Chair/Looks",
		"/World/Set/Table",
		"/World/Lights",
		"/World/Broken",
	] {
		serial.compute_prim_index(&p(path), &mut serial_errors);
	}
	assert_eq!(serial_errors.len(), 1);

	for threshold in [1, 64] {
		let mut parallel = scene.cache_with(
			pcp::CacheOptions::default()
				.usd(true)
				.culling(false)
				.flush_threshold(threshold),
		);
		let mut errors = Vec::new();
		parallel.compute_prim_indexes_in_parallel(&[sdf::Path::absolute_root_path()], &mut errors, &everything, None);
		assert_eq!(sorted_messages(&errors), sorted_messages(&serial_errors));
		assert_eq!(structure(&parallel), structure(&serial));
		assert_eq!(parallel.statistics().nodes, serial.statistics().nodes);
	}
}

#[test]
fn children_predicate_prunes_descent() {
	let scene = build_scene();
	let mut cache = scene.usd_cache();
	let stop_at_set = |index: &PrimIndex| index.path() != p("/World/Set");
	cache.compute_prim_indexes_in_parallel(&[p("/World")], &mut Vec::new(), &stop_at_set, None);

	assert_eq!(
		cached_paths(&cache),
		vec!["/", "/World", "/World/Lights", "/World/Set"]
	);
}

#[test]
fn payload_predicate_includes_discovered_payloads() {
	let scene = Scene::new();
	let heavy = scene.layer("/heavy.usda");
	heavy.define_prim("/Heavy/Mesh");
	scene.root.define_prim("/A");
	scene.root.define_prim("/B");
	scene
		.root
		.add_payload(&p("/A"), sdf::Payload::new("heavy.usda", "/Heavy"));
	scene
		.root
		.add_payload(&p("/B"), sdf::Payload::new("heavy.usda", "/Heavy"));
	let mut cache = scene.usd_cache();

	let only_a = |path: &sdf::Path| *path == p("/A");
	cache.compute_prim_indexes_in_parallel(
		&[sdf::Path::absolute_root_path()],
		&mut Vec::new(),
		&everything,
		Some(&only_a),
	);

	assert!(cache.is_payload_included(&p("/A")));
	assert!(!cache.is_payload_included(&p("/B")));
	assert!(cache.find_prim_index(&p("/A/Mesh")).is_some());
	assert!(cache.find_prim_index(&p("/B/Mesh")).is_none());
	assert_eq!(cache.find_prim_index(&p("/B")).map(|i| i.node_range().len()), Some(1));
}

#[test]
fn parallel_indexing_requires_usd_mode() {
	let scene = build_scene();
	let mut cache = scene.cache();
	let mark = pcp::CodingErrorMark::new();
	cache.compute_prim_indexes_in_parallel(&[sdf::Path::absolute_root_path()], &mut Vec::new(), &everything, None);
	assert_eq!(mark.messages().len(), 1);
	assert!(cached_paths(&cache).is_empty());
}
