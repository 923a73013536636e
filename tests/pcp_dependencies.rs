mod common;

use common::{Scene, compute_all, p};
use openusd_pcp::pcp::{
	Changes, CodingErrorMark, DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL, DEPENDENCY_TYPE_ANY_NON_VIRTUAL, DependencyType,
};
use openusd_pcp::sdf;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn index_paths(deps: &[openusd_pcp::pcp::Dependency]) -> BTreeSet<String> {
	deps.iter().map(|dep| dep.index_path.to_string()).collect()
}

#[test_log::test]
fn references_into_other_layer_stacks() {
	let scene = Scene::new();
	let model = scene.layer("/model.usda");
	model.define_prim("/Model/Geom");
	scene.root.define_prim("/A");
	scene.root.define_prim("/B");
	for prim in ["/A", "/B"] {
		scene
			.root
			.add_reference(&p(prim), sdf::Reference::new("model.usda", "/Model"));
	}
	let mut cache = scene.cache();
	compute_all(&mut cache, &["/A/Geom", "/B/Geom"]);

	let model_stack = cache.find_all_layer_stacks_using_layer(&model)[0].clone();
	assert!(cache.uses_layer_stack(&model_stack));

	let direct = cache.find_site_dependencies(
		&model_stack,
		&p("/Model"),
		DependencyType::PurelyDirect | DependencyType::PartlyDirect | DependencyType::NonVirtual,
		false,
		false,
		true,
	);
	assert_eq!(index_paths(&direct), BTreeSet::from(["/A".into(), "/B".into()]));
	for dep in &direct {
		assert_eq!(dep.site_path, p("/Model"));
		assert_eq!(
			dep.map_func.map_source_to_target(&p("/Model/Geom")),
			dep.index_path.append_child(&"Geom".into())
		);
	}

	// The children depend on /Model/Geom through their parents' arcs,
	// which are found by walking up from the site.
	let ancestral = cache.find_site_dependencies(
		&model_stack,
		&p("/Model/Geom"),
		DependencyType::PurelyDirect | DependencyType::Ancestral | DependencyType::NonVirtual,
		false,
		false,
		true,
	);
	assert_eq!(
		index_paths(&ancestral),
		BTreeSet::from(["/A/Geom".into(), "/B/Geom".into()])
	);
	for dep in &ancestral {
		assert_eq!(dep.site_path, p("/Model/Geom"));
	}
}

#[test_log::test]
fn recursing_on_the_index_adds_cached_descendants() {
	let scene = Scene::new();
	scene.root.define_prim("/Class/Child");
	scene.root.define_prim("/A");
	scene.root.add_inherit_path(&p("/A"), p("/Class"));
	let mut cache = scene.cache();
	compute_all(&mut cache, &["/A/Child", "/Class/Child"]);
	let layer_stack = cache.layer_stack().clone();

	let shallow = cache.find_site_dependencies(
		&layer_stack,
		&p("/Class"),
		DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
		false,
		false,
		true,
	);
	assert_eq!(index_paths(&shallow), BTreeSet::from(["/Class".into(), "/A".into()]));

	let deep = cache.find_site_dependencies(
		&layer_stack,
		&p("/Class"),
		DEPENDENCY_TYPE_ANY_NON_VIRTUAL,
		false,
		true,
		true,
	);
	assert_eq!(
		index_paths(&deep),
		BTreeSet::from([
			"/Class".into(),
			"/Class/Child".into(),
			"/A".into(),
			"/A/Child".into()
		])
	);
}

#[test_log::test]
fn invalid_masks_find_nothing() {
	let scene = Scene::new();
	scene.root.define_prim("/A");
	let mut cache = scene.cache();
	compute_all(&mut cache, &["/A"]);
	let layer_stack = cache.layer_stack().clone();

	let mark = CodingErrorMark::new();
	for mask in [
		DependencyType::Root | DependencyType::Virtual,
		enumset::enum_set!(DependencyType::NonVirtual),
	] {
		let deps = cache.find_site_dependencies(&layer_stack, &p("/A"), mask, false, false, true);
		assert!(deps.is_empty(), "{mask:?}");
	}
	assert_eq!(mark.messages().len(), 2);
	let root_only = cache.find_site_dependencies(
		&layer_stack,
		&p("/A"),
		DependencyType::Root | DependencyType::NonVirtual,
		false,
		false,
		true,
	);
	assert_eq!(index_paths(&root_only), BTreeSet::from(["/A".into()]));
}

#[test_log::test]
fn dump_lists_stored_sites() {
	let scene = Scene::new();
	let model = scene.layer("/model.usda");
	model.define_prim("/Model");
	scene.root.define_prim("/A");
	scene
		.root
		.add_reference(&p("/A"), sdf::Reference::new("model.usda", "/Model"));
	let mut cache = scene.cache();
	compute_all(&mut cache, &["/A"]);

	let dump = cache.dump_dependencies();
	assert!(dump.contains("</Model>: </A>"), "{dump}");
}

/// Prims `/P{i}`, each with a child `C` and optionally referencing a later
/// prim.
fn reference_scene(targets: &[Option<usize>]) -> (Scene, Vec<Option<usize>>) {
	let scene = Scene::new();
	let count = targets.len();
	let mut references = Vec::with_capacity(count);
	for (i, target) in targets.iter().enumerate() {
		scene.root.define_prim(format!("/P{i}/C").as_str());
		let target = target
			.filter(|_| i + 1 < count)
			.map(|t| i + 1 + t % (count - i - 1));
		if let Some(target) = target {
			scene
				.root
				.add_reference(&p(&format!("/P{i}")), sdf::Reference::internal(format!("/P{target}").as_str()));
		}
		references.push(target);
	}
	(scene, references)
}

fn reaches(references: &[Option<usize>], from: usize, to: usize) -> bool {
	let mut current = references[from];
	while let Some(next) = current {
		if next == to {
			return true;
		}
		current = references[next];
	}
	false
}

proptest! {
	#[test]
	fn invalidated_subtrees_leave_no_dependencies(
		targets in prop::collection::vec(prop::option::of(0usize..8), 1..6),
		pick in 0usize..8,
	) {
		let (scene, _) = reference_scene(&targets);
		let invalidated = pick % targets.len();
		let mut cache = scene.cache();
		let paths: Vec<String> = (0..targets.len()).map(|i| format!("/P{i}/C")).collect();
		compute_all(&mut cache, &paths.iter().map(String::as_str).collect::<Vec<_>>());

		let mut changes = Changes::new();
		changes.did_change_significantly(&cache, &p(&format!("/P{invalidated}")));
		changes.apply(&mut cache);

		let layer_stack = cache.layer_stack().clone();
		let deps = cache.find_site_dependencies(
			&layer_stack,
			&sdf::Path::absolute_root_path(),
			DEPENDENCY_TYPE_ANY_INCLUDING_VIRTUAL,
			true,
			false,
			false,
		);
		let removed = p(&format!("/P{invalidated}"));
		prop_assert!(deps.iter().all(|dep| !dep.index_path.has_prefix(&removed)));
		for i in (0..targets.len()).filter(|i| *i != invalidated) {
			let child = p(&format!("/P{i}/C"));
			prop_assert!(cache.find_prim_index(&child).is_some(), "<{}> was dropped", child);
		}
	}

	#[test]
	fn site_changes_reach_every_referencing_prim(
		targets in prop::collection::vec(prop::option::of(0usize..8), 1..6),
		pick in 0usize..8,
	) {
		let (scene, references) = reference_scene(&targets);
		let changed = pick % targets.len();
		let mut cache = scene.cache();
		let paths: Vec<String> = (0..targets.len()).map(|i| format!("/P{i}")).collect();
		compute_all(&mut cache, &paths.iter().map(String::as_str).collect::<Vec<_>>());

		let mut changes = Changes::new();
		changes.did_change_significantly_at_site(&cache, &scene.root, &p(&format!("/P{changed}")));
		changes.apply(&mut cache);

		for i in 0..targets.len() {
			let expect_invalid = i == changed || reaches(&references, i, changed);
			prop_assert_eq!(
				cache.find_prim_index(&p(&format!("/P{i}"))).is_none(),
				expect_invalid,
				"/P{} with references {:?}", i, references
			);
		}
	}
}
