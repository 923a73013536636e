use crate::sdf;

/// A function that maps paths between the namespaces of two nodes.
///
/// The mapping is a set of source-to-target path prefix pairs. A path maps
/// through the pair with the longest matching source prefix, and the result
/// is rejected if another pair claims a longer prefix of it on the target
/// side, since such a path could not map back. A map function also carries
/// the time offset between the two namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MapFunction {
	pairs: Vec<(sdf::Path, sdf::Path)>,
	time_offset: sdf::Retiming,
}

impl MapFunction {
	pub fn new(
		pairs: impl IntoIterator<Item = (sdf::Path, sdf::Path)>,
		time_offset: sdf::Retiming,
	) -> Self {
		let mut function = Self {
			pairs: pairs.into_iter().collect(),
			time_offset,
		};
		function.canonicalize();
		function
	}

	/// The map function that maps every path to itself.
	pub fn identity() -> Self {
		let root = sdf::Path::absolute_root_path();
		Self {
			pairs: vec![(root.clone(), root)],
			time_offset: sdf::Retiming::identity(),
		}
	}

	/// The null function maps nothing.
	pub fn is_null(&self) -> bool {
		self.pairs.is_empty()
	}

	pub fn is_identity(&self) -> bool {
		self.has_root_identity() && self.pairs.len() == 1 && self.time_offset.is_identity()
	}

	/// Whether the absolute root maps to itself, making paths outside every
	/// other pair pass through unchanged.
	pub fn has_root_identity(&self) -> bool {
		let root = sdf::Path::absolute_root_path();
		self.pairs.iter().any(|(s, t)| *s == root && *t == root)
	}

	pub fn time_offset(&self) -> sdf::Retiming {
		self.time_offset
	}

	pub fn source_to_target(&self) -> &[(sdf::Path, sdf::Path)] {
		&self.pairs
	}

	pub fn map_source_to_target(&self, path: &sdf::Path) -> sdf::Path {
		map_path(&self.pairs, path, false)
	}

	pub fn map_target_to_source(&self, path: &sdf::Path) -> sdf::Path {
		map_path(&self.pairs, path, true)
	}

	pub fn inverse(&self) -> Self {
		Self::new(
			self.pairs.iter().map(|(s, t)| (t.clone(), s.clone())),
			self.time_offset.inv(),
		)
	}

	/// Returns the function that applies `inner` and then `self`.
	pub fn compose(&self, inner: &MapFunction) -> Self {
		if self.is_identity() {
			return inner.clone();
		}
		if inner.is_identity() {
			return self.clone();
		}

		let mut pairs = Vec::new();
		for (source, target) in &inner.pairs {
			let mapped = self.map_source_to_target(target);
			if !mapped.is_empty() {
				pairs.push((source.clone(), mapped));
			}
		}
		for (source, target) in &self.pairs {
			let mapped = inner.map_target_to_source(source);
			if !mapped.is_empty() {
				pairs.push((mapped, target.clone()));
			}
		}
		Self::new(pairs, self.time_offset * inner.time_offset)
	}

	fn canonicalize(&mut self) {
		let mut unique: Vec<(sdf::Path, sdf::Path)> = Vec::with_capacity(self.pairs.len());
		for pair in self.pairs.drain(..) {
			if pair.0.is_empty() || pair.1.is_empty() {
				continue;
			}
			if !unique.iter().any(|(s, _)| *s == pair.0) {
				unique.push(pair);
			}
		}
		unique.sort();

		// A pair is implied when the remaining pairs already map its source
		// to its target and back.
		let implied = |index: usize, pairs: &[(sdf::Path, sdf::Path)]| -> bool {
			let (source, target) = &pairs[index];
			let others: Vec<(sdf::Path, sdf::Path)> = pairs
				.iter()
				.enumerate()
				.filter(|(i, _)| *i != index)
				.map(|(_, pair)| pair.clone())
				.collect();
			map_path(&others, source, false) == *target && map_path(&others, target, true) == *source
		};

		while let Some(index) = (0..unique.len()).find(|&i| implied(i, &unique)) {
			unique.remove(index);
		}
		self.pairs = unique;
	}
}

fn map_path(pairs: &[(sdf::Path, sdf::Path)], path: &sdf::Path, invert: bool) -> sdf::Path {
	if path.is_empty() {
		return sdf::Path::empty_path();
	}
	let side = |pair: &(sdf::Path, sdf::Path)| -> (sdf::Path, sdf::Path) {
		if invert {
			(pair.1.clone(), pair.0.clone())
		} else {
			pair.clone()
		}
	};

	let best = pairs
		.iter()
		.map(side)
		.filter(|(source, _)| path.has_prefix(source))
		.max_by_key(|(source, _)| source.element_count());
	let Some((source, target)) = best else {
		return sdf::Path::empty_path();
	};

	let result = path.replace_prefix_without_targets(&source, &target);

	let blocked = pairs.iter().map(side).any(|(other_source, other_target)| {
		other_source != source
			&& other_target.element_count() > target.element_count()
			&& result.has_prefix(&other_target)
	});
	if blocked {
		return sdf::Path::empty_path();
	}

	let targets = result.all_target_paths_recursively();
	if targets.is_empty() {
		return result;
	}
	let mut mapped = result.clone();
	for target_path in path.all_target_paths_recursively() {
		let mapped_target = map_path(pairs, &target_path, invert);
		if mapped_target.is_empty() {
			return sdf::Path::empty_path();
		}
		mapped = mapped.replace_prefix(&target_path, &mapped_target);
	}
	mapped
}

#[cfg(test)]
mod tests {
	use super::*;

	fn p(s: &str) -> sdf::Path {
		sdf::Path::from(s)
	}

	fn reference(source: &str, target: &str) -> MapFunction {
		MapFunction::new([(p(source), p(target))], sdf::Retiming::identity())
	}

	#[test]
	fn maps_by_longest_prefix() {
		let f = MapFunction::new(
			[(p("/Ref"), p("/A")), (p("/Ref/Special"), p("/A/Renamed"))],
			sdf::Retiming::identity(),
		);
		assert_eq!(f.map_source_to_target(&p("/Ref/X")), p("/A/X"));
		assert_eq!(f.map_source_to_target(&p("/Ref/Special/Y")), p("/A/Renamed/Y"));
		assert_eq!(f.map_source_to_target(&p("/Other")), sdf::Path::empty_path());
		assert_eq!(f.map_target_to_source(&p("/A/Renamed")), p("/Ref/Special"));
	}

	#[test]
	fn rejects_paths_claimed_by_another_pair() {
		let f = MapFunction::new(
			[(p("/Ref"), p("/A")), (p("/Ref/Special"), p("/A/Renamed"))],
			sdf::Retiming::identity(),
		);
		assert_eq!(f.map_source_to_target(&p("/Ref/Renamed")), sdf::Path::empty_path());
	}

	#[test]
	fn root_identity_passes_through() {
		let f = MapFunction::new(
			[
				(p("/Class"), p("/A")),
				(sdf::Path::absolute_root_path(), sdf::Path::absolute_root_path()),
			],
			sdf::Retiming::identity(),
		);
		assert!(f.has_root_identity());
		assert_eq!(f.map_source_to_target(&p("/Class/X")), p("/A/X"));
		assert_eq!(f.map_source_to_target(&p("/World")), p("/World"));
		assert_eq!(f.map_source_to_target(&p("/A")), sdf::Path::empty_path());
	}

	#[test]
	fn composes_and_inverts() {
		let inner = reference("/Model", "/Ref");
		let outer = reference("/Ref", "/World/Ref");
		let composed = outer.compose(&inner);
		assert_eq!(composed.map_source_to_target(&p("/Model/Geom")), p("/World/Ref/Geom"));
		assert_eq!(composed.inverse().map_source_to_target(&p("/World/Ref")), p("/Model"));
		assert_eq!(MapFunction::identity().compose(&inner), inner);
	}

	#[test]
	fn drops_implied_pairs() {
		let f = MapFunction::new(
			[(p("/A"), p("/B")), (p("/A/C"), p("/B/C"))],
			sdf::Retiming::identity(),
		);
		assert_eq!(f.source_to_target().len(), 1);
	}
}
