use super::Path;
use std::collections::BTreeMap;
use std::collections::btree_map;

/// An ordered path-keyed table.
///
/// Like the scene path table it mirrors, inserting a path implicitly
/// creates default-valued entries for all of its ancestors, so every
/// stored path's parent is also stored. Descendants of a path are
/// contiguous, which makes subtree iteration and erasure range operations.
#[derive(Debug, Clone)]
pub struct PathTable<V> {
	entries: BTreeMap<Path, V>,
}

impl<V> Default for PathTable<V> {
	fn default() -> Self {
		Self {
			entries: BTreeMap::new(),
		}
	}
}

impl<V> PathTable<V> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn get(&self, path: &Path) -> Option<&V> {
		self.entries.get(path)
	}

	pub fn get_mut(&mut self, path: &Path) -> Option<&mut V> {
		self.entries.get_mut(path)
	}

	pub fn contains(&self, path: &Path) -> bool {
		self.entries.contains_key(path)
	}

	pub fn iter(&self) -> btree_map::Iter<'_, Path, V> {
		self.entries.iter()
	}

	pub fn iter_mut(&mut self) -> btree_map::IterMut<'_, Path, V> {
		self.entries.iter_mut()
	}

	pub fn values(&self) -> btree_map::Values<'_, Path, V> {
		self.entries.values()
	}

	/// Iterates `path` (if present) and all of its stored descendants in order.
	pub fn subtree<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = (&'a Path, &'a V)> + 'a {
		self.entries
			.range(path.clone()..)
			.take_while(move |(key, _)| key.has_prefix(path))
	}

	/// Removes the entry for `path` only, leaving descendants in place.
	pub fn remove(&mut self, path: &Path) -> Option<V> {
		self.entries.remove(path)
	}

	/// Removes `path` and all of its descendants, returning them in order.
	pub fn erase_subtree(&mut self, path: &Path) -> Vec<(Path, V)> {
		let keys: Vec<Path> = self.subtree(path).map(|(key, _)| key.clone()).collect();
		keys.into_iter()
			.filter_map(|key| self.entries.remove_entry(&key))
			.collect()
	}

	pub fn clear(&mut self) {
		self.entries.clear();
	}
}

impl<V: Default> PathTable<V> {
	/// Returns the entry for `path`, creating it and any missing ancestors
	/// with default values.
	pub fn entry(&mut self, path: &Path) -> &mut V {
		if !self.entries.contains_key(path) {
			for ancestor in path.parent_path().ancestors_range() {
				if self.entries.contains_key(&ancestor) {
					break;
				}
				self.entries.insert(ancestor, V::default());
			}
			if path.is_absolute_path() && !path.is_absolute_root_path() {
				self.entries
					.entry(Path::absolute_root_path())
					.or_default();
			}
		}
		self.entries.entry(path.clone()).or_default()
	}

	/// Stores `value` at `path`, returning the previous value.
	pub fn insert(&mut self, path: Path, value: V) -> Option<V> {
		let existed = self.entries.contains_key(&path);
		let previous = std::mem::replace(self.entry(&path), value);
		existed.then_some(previous)
	}
}

impl<V> IntoIterator for PathTable<V> {
	type Item = (Path, V);
	type IntoIter = btree_map::IntoIter<Path, V>;

	fn into_iter(self) -> Self::IntoIter {
		self.entries.into_iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn p(s: &str) -> Path {
		Path::from(s)
	}

	#[test]
	fn insert_creates_ancestors() {
		let mut table = PathTable::<i32>::new();
		table.insert(p("/a/b/c"), 3);
		assert_eq!(table.get(&p("/a/b/c")), Some(&3));
		assert_eq!(table.get(&p("/a/b")), Some(&0));
		assert_eq!(table.get(&p("/a")), Some(&0));
		assert_eq!(table.get(&Path::absolute_root_path()), Some(&0));
		assert_eq!(table.len(), 4);
	}

	#[test]
	fn subtree_range() {
		let mut table = PathTable::<i32>::new();
		table.insert(p("/a/x"), 1);
		table.insert(p("/a.prop"), 2);
		table.insert(p("/ab"), 3);
		table.insert(p("/b"), 4);

		let keys: Vec<_> = table.subtree(&p("/a")).map(|(k, _)| k.clone()).collect();
		assert_eq!(keys, vec![p("/a"), p("/a/x"), p("/a.prop")]);

		let erased = table.erase_subtree(&p("/a"));
		assert_eq!(erased.len(), 3);
		assert!(table.contains(&p("/ab")));
		assert!(!table.contains(&p("/a/x")));
	}
}
