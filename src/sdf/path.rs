use super::path_parser;
use crate::tf;
use std::sync::Arc;

/// A single component of a [Path].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum PathElement {
	Prim(tf::Token),
	VariantSelection { set: tf::Token, variant: tf::Token },
	Property(tf::Token),
	Target(Path),
	RelationalAttribute(tf::Token),
}

impl PathElement {
	fn is_prim_like(&self) -> bool {
		matches!(self, Self::Prim(_) | Self::VariantSelection { .. })
	}
}

/// A path value used to locate objects in layers or scenegraphs.
///
/// Paths are immutable values; appending or replacing builds a new path.
/// Ordering is lexicographic over path elements, so all descendants of a
/// path sort contiguously right after it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
	absolute: bool,
	elements: Arc<[PathElement]>,
}

/// Constructors
impl Path {
	/// The empty path value, equivalent to `Path::default()`.
	pub fn empty_path() -> Self {
		Self {
			absolute: false,
			elements: Arc::from([]),
		}
	}

	/// The absolute path representing the top of the namespace hierarchy.
	pub fn absolute_root_path() -> Self {
		Self {
			absolute: true,
			elements: Arc::from([]),
		}
	}

	/// The relative path representing "self".
	pub fn reflexive_relative_path() -> Self {
		Self::empty_path()
	}

	pub(crate) fn from_elements(absolute: bool, elements: Vec<PathElement>) -> Self {
		Self {
			absolute,
			elements: Arc::from(elements),
		}
	}
}

/// Queries
impl Path {
	/// Whether `name` can name a prim: a letter or underscore followed by
	/// letters, digits and underscores.
	pub fn is_valid_identifier(name: &str) -> bool {
		let mut chars = name.chars();
		chars
			.next()
			.is_some_and(|c| c.is_alphabetic() || c == '_')
			&& chars.all(|c| c.is_alphanumeric() || c == '_')
	}

	/// Returns true if this is the empty path.
	pub fn is_empty(&self) -> bool {
		!self.absolute && self.elements.is_empty()
	}

	pub fn is_absolute_path(&self) -> bool {
		self.absolute
	}

	pub fn is_absolute_root_path(&self) -> bool {
		self.absolute && self.elements.is_empty()
	}

	/// Returns whether the path identifies a prim.
	pub fn is_prim_path(&self) -> bool {
		matches!(self.elements.last(), Some(PathElement::Prim(_)))
	}

	pub fn is_absolute_root_or_prim_path(&self) -> bool {
		self.is_absolute_root_path() || self.is_prim_path()
	}

	/// Returns whether the path identifies a root prim.
	pub fn is_root_prim_path(&self) -> bool {
		self.absolute && self.elements.len() == 1 && self.is_prim_path()
	}

	pub fn is_prim_variant_selection_path(&self) -> bool {
		matches!(
			self.elements.last(),
			Some(PathElement::VariantSelection { .. })
		)
	}

	pub fn is_prim_or_prim_variant_selection_path(&self) -> bool {
		self.is_prim_path() || self.is_prim_variant_selection_path()
	}

	/// Returns whether the path or any of its parent paths identifies a variant selection.
	pub fn contains_prim_variant_selection(&self) -> bool {
		self.elements
			.iter()
			.any(|e| matches!(e, PathElement::VariantSelection { .. }))
	}

	/// Returns whether the path identifies a property.
	pub fn is_property_path(&self) -> bool {
		matches!(
			self.elements.last(),
			Some(PathElement::Property(_)) | Some(PathElement::RelationalAttribute(_))
		)
	}

	/// Returns whether the path identifies a prim's property.
	pub fn is_prim_property_path(&self) -> bool {
		matches!(self.elements.last(), Some(PathElement::Property(_)))
	}

	pub fn is_relational_attribute_path(&self) -> bool {
		matches!(
			self.elements.last(),
			Some(PathElement::RelationalAttribute(_))
		)
	}

	pub fn is_target_path(&self) -> bool {
		matches!(self.elements.last(), Some(PathElement::Target(_)))
	}

	/// Returns the number of path elements in this path.
	pub fn element_count(&self) -> usize {
		self.elements.len()
	}

	/// Returns the name of the prim, property or relational attribute
	/// identified by the path.
	pub fn name(&self) -> String {
		self.name_token().as_str().to_string()
	}

	pub fn name_token(&self) -> tf::Token {
		match self.elements.last() {
			Some(PathElement::Prim(name))
			| Some(PathElement::Property(name))
			| Some(PathElement::RelationalAttribute(name)) => name.clone(),
			Some(PathElement::VariantSelection { variant, .. }) => variant.clone(),
			Some(PathElement::Target(_)) | None => tf::Token::empty(),
		}
	}

	/// Returns the (variant set, variant) selected by the last element,
	/// or a pair of empty strings.
	pub fn variant_selection(&self) -> (String, String) {
		match self.elements.last() {
			Some(PathElement::VariantSelection { set, variant }) => {
				(set.as_str().to_string(), variant.as_str().to_string())
			}
			_ => (String::new(), String::new()),
		}
	}

	/// Returns the target path of a target path element.
	pub fn target_path(&self) -> Path {
		match self.elements.last() {
			Some(PathElement::Target(target)) => target.clone(),
			_ => Path::empty_path(),
		}
	}

	/// Returns every target path embedded in this path, outermost first.
	pub fn all_target_paths_recursively(&self) -> Vec<Path> {
		let mut result = Vec::new();
		for element in self.elements.iter() {
			if let PathElement::Target(target) = element {
				result.push(target.clone());
				result.extend(target.all_target_paths_recursively());
			}
		}
		result
	}

	/// Returns true if `prefix` is this path or one of its ancestors.
	///
	/// The empty path is never a prefix and never has one.
	pub fn has_prefix(&self, prefix: &Path) -> bool {
		if self.is_empty() || prefix.is_empty() || self.absolute != prefix.absolute {
			return false;
		}
		self.elements.starts_with(&prefix.elements)
	}
}

/// Derivation
impl Path {
	/// Return the path that identifies this path's namespace parent.
	pub fn parent_path(&self) -> Path {
		if self.elements.is_empty() {
			return Path::empty_path();
		}
		Self::from_elements(
			self.absolute,
			self.elements[..self.elements.len() - 1].to_vec(),
		)
	}

	/// Creates a path by stripping all relational attributes, targets,
	/// and properties.
	pub fn prim_path(&self) -> Path {
		match self.elements.iter().position(|e| !e.is_prim_like()) {
			Some(index) => Self::from_elements(self.absolute, self.elements[..index].to_vec()),
			None => self.clone(),
		}
	}

	/// Like [Path::prim_path], but also strips any trailing variant selections.
	pub fn prim_or_absolute_root_path(&self) -> Path {
		let mut path = self.prim_path();
		while path.is_prim_variant_selection_path() {
			path = path.parent_path();
		}
		path
	}

	/// Returns a path with all variant selections stripped.
	pub fn strip_all_variant_selections(&self) -> Path {
		if !self.contains_prim_variant_selection() {
			return self.clone();
		}
		let elements = self
			.elements
			.iter()
			.filter(|e| !matches!(e, PathElement::VariantSelection { .. }))
			.cloned()
			.collect();
		Self::from_elements(self.absolute, elements)
	}

	fn append_element(&self, element: PathElement) -> Path {
		let mut elements = Vec::with_capacity(self.elements.len() + 1);
		elements.extend(self.elements.iter().cloned());
		elements.push(element);
		Self::from_elements(self.absolute, elements)
	}

	fn can_have_prim_children(&self) -> bool {
		!self.is_empty()
			&& (self.elements.is_empty()
				|| self.elements.last().is_some_and(PathElement::is_prim_like))
	}

	/// Creates a path by appending an element for `child_name` to this path.
	/// Returns the empty path if this path cannot have prim children.
	pub fn append_child(&self, child_name: &tf::Token) -> Path {
		if !self.can_have_prim_children() && !self.is_empty() {
			return Path::empty_path();
		}
		if child_name.is_empty() {
			return Path::empty_path();
		}
		self.append_element(PathElement::Prim(child_name.clone()))
	}

	/// Creates a path by appending an element for `prop_name` to this path.
	pub fn append_property(&self, prop_name: &tf::Token) -> Path {
		if prop_name.is_empty() || self.is_absolute_root_path() {
			return Path::empty_path();
		}
		if !self.is_empty() && !self.can_have_prim_children() {
			return Path::empty_path();
		}
		self.append_element(PathElement::Property(prop_name.clone()))
	}

	/// Creates a path by appending an element for `variant_set` and `variant`.
	pub fn append_variant_selection(&self, variant_set: &str, variant: &str) -> Path {
		if !self.is_prim_or_prim_variant_selection_path() {
			return Path::empty_path();
		}
		self.append_element(PathElement::VariantSelection {
			set: tf::Token::new(variant_set),
			variant: tf::Token::new(variant),
		})
	}

	/// Creates a path by appending a target path element to a property path.
	pub fn append_target(&self, target: &Path) -> Path {
		if !self.is_property_path() || target.is_empty() {
			return Path::empty_path();
		}
		self.append_element(PathElement::Target(target.clone()))
	}

	/// Creates a path by appending a relational attribute to a target path.
	pub fn append_relational_attribute(&self, attr_name: &tf::Token) -> Path {
		if !self.is_target_path() || attr_name.is_empty() {
			return Path::empty_path();
		}
		self.append_element(PathElement::RelationalAttribute(attr_name.clone()))
	}

	/// Returns the path with the last element renamed to `new_name`.
	pub fn replace_name(&self, new_name: &tf::Token) -> Path {
		let parent = self.parent_path();
		match self.elements.last() {
			Some(PathElement::Prim(_)) => parent.append_child(new_name),
			Some(PathElement::Property(_)) => parent.append_property(new_name),
			Some(PathElement::RelationalAttribute(_)) => {
				parent.append_relational_attribute(new_name)
			}
			_ => Path::empty_path(),
		}
	}

	/// Returns a copy of this path with `old_prefix` replaced by
	/// `new_prefix`, including inside embedded target paths.
	///
	/// Returns this path unchanged if it does not have `old_prefix`,
	/// and the empty path if `new_prefix` is empty.
	pub fn replace_prefix(&self, old_prefix: &Path, new_prefix: &Path) -> Path {
		self.replace_prefix_impl(old_prefix, new_prefix, true)
	}

	/// Same as [Path::replace_prefix] but leaves embedded target paths alone.
	pub fn replace_prefix_without_targets(&self, old_prefix: &Path, new_prefix: &Path) -> Path {
		self.replace_prefix_impl(old_prefix, new_prefix, false)
	}

	fn replace_prefix_impl(&self, old_prefix: &Path, new_prefix: &Path, fix_targets: bool) -> Path {
		if self.is_empty() || old_prefix == new_prefix {
			return self.clone();
		}
		if self.has_prefix(old_prefix) {
			if new_prefix.is_empty() {
				return Path::empty_path();
			}
			let mut elements: Vec<PathElement> = new_prefix.elements.to_vec();
			for element in &self.elements[old_prefix.elements.len()..] {
				elements.push(if fix_targets {
					fix_target_element(element, old_prefix, new_prefix)
				} else {
					element.clone()
				});
			}
			return Self::from_elements(new_prefix.absolute, elements);
		}
		if fix_targets && self.elements.iter().any(|e| matches!(e, PathElement::Target(_))) {
			let elements = self
				.elements
				.iter()
				.map(|e| fix_target_element(e, old_prefix, new_prefix))
				.collect();
			return Self::from_elements(self.absolute, elements);
		}
		self.clone()
	}

	/// Returns a range for iterating over the ancestors of this path.
	///
	/// The range provides iteration over the prefixes of a path, ordered
	/// from longest to shortest (the opposite of the order of the prefixes
	/// returned by the absolute root).
	pub fn ancestors_range(&self) -> PathAncestorsRange {
		PathAncestorsRange { path: self.clone() }
	}
}

fn fix_target_element(element: &PathElement, old_prefix: &Path, new_prefix: &Path) -> PathElement {
	match element {
		PathElement::Target(target) => {
			PathElement::Target(target.replace_prefix(old_prefix, new_prefix))
		}
		other => other.clone(),
	}
}

impl Default for Path {
	fn default() -> Self {
		Self::empty_path()
	}
}

impl std::str::FromStr for Path {
	type Err = path_parser::PathError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		path_parser::parse(s)
	}
}

impl From<&str> for Path {
	/// Parses `s`, producing the empty path if it is not a valid path.
	fn from(s: &str) -> Self {
		match path_parser::parse(s) {
			Ok(path) => path,
			Err(err) => {
				tracing::warn!("ill-formed path {s:?}: {err}");
				Path::empty_path()
			}
		}
	}
}

impl std::fmt::Display for Path {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.absolute {
			f.write_str("/")?;
		} else if self.elements.is_empty() {
			return Ok(());
		}
		let mut prev_prim = false;
		for element in self.elements.iter() {
			match element {
				PathElement::Prim(name) => {
					if prev_prim {
						f.write_str("/")?;
					}
					write!(f, "{name}")?;
					prev_prim = true;
				}
				PathElement::VariantSelection { set, variant } => {
					write!(f, "{{{set}={variant}}}")?;
					prev_prim = false;
				}
				PathElement::Property(name) | PathElement::RelationalAttribute(name) => {
					write!(f, ".{name}")?;
				}
				PathElement::Target(target) => {
					write!(f, "[{target}]")?;
				}
			}
		}
		Ok(())
	}
}

impl std::fmt::Debug for Path {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "Path({self})")
	}
}

/// Iterator over a path and its ancestors, excluding the absolute root.
pub struct PathAncestorsRange {
	path: Path,
}

impl std::iter::Iterator for PathAncestorsRange {
	type Item = Path;

	fn next(&mut self) -> Option<Self::Item> {
		if self.path.elements.is_empty() {
			return None;
		}

		let current_path = self.path.clone();
		self.path = self.path.parent_path();
		Some(current_path)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn p(s: &str) -> Path {
		Path::from(s)
	}

	fn t(s: &str) -> tf::Token {
		tf::Token::new(s)
	}

	#[test]
	fn identifiers() {
		assert!(Path::is_valid_identifier("World"));
		assert!(Path::is_valid_identifier("_a1"));
		assert!(!Path::is_valid_identifier(""));
		assert!(!Path::is_valid_identifier("1a"));
		assert!(!Path::is_valid_identifier("/World"));
	}

	#[test]
	fn append_child() {
		assert_eq!(p("/foo").append_child(&t("bar")), p("/foo/bar"));
		assert_eq!(p("foo").append_child(&t("bar")), p("foo/bar"));
		assert_eq!(p("/foo.prop").append_child(&t("bar")), Path::empty_path());
		assert_eq!(p("/foo{v=a}").append_child(&t("bar")), p("/foo{v=a}bar"));
	}

	#[test]
	fn append_property() {
		assert_eq!(p("/foo").append_property(&t("prop")), p("/foo.prop"));
		assert_eq!(
			p("/foo").append_property(&t("prop:foo:bar")),
			p("/foo.prop:foo:bar")
		);
		assert_eq!(
			p("/foo.prop").append_property(&t("prop2")),
			Path::empty_path()
		);
		assert_eq!(
			p("/foo.prop").append_property(&t("prop2:foo:bar")),
			Path::empty_path()
		);
	}

	#[test]
	fn parent_path() {
		assert_eq!(p("/foo").parent_path(), Path::absolute_root_path());
		assert_eq!(p("/foo/bar").parent_path(), p("/foo"));
		assert_eq!(p("foo/bar").parent_path(), p("foo"));
		assert_eq!(p("/foo.prop").parent_path(), p("/foo"));
		assert_eq!(p("foo.prop").parent_path(), p("foo"));
		assert_eq!(p("/foo.prop:bar").parent_path(), p("/foo"));
		assert_eq!(p("/foo{v=a}").parent_path(), p("/foo"));
		assert_eq!(Path::absolute_root_path().parent_path(), Path::empty_path());
	}

	#[test]
	fn ancestors_range() {
		let path = p("/foo/bar/baz");
		let mut ancestors = path.ancestors_range();
		assert_eq!(ancestors.next(), Some(p("/foo/bar/baz")));
		assert_eq!(ancestors.next(), Some(p("/foo/bar")));
		assert_eq!(ancestors.next(), Some(p("/foo")));
		assert_eq!(ancestors.next(), None);

		let path = p("/foo/bar/baz.prop");
		let mut ancestors = path.ancestors_range();
		assert_eq!(ancestors.next(), Some(p("/foo/bar/baz.prop")));
		assert_eq!(ancestors.next(), Some(p("/foo/bar/baz")));
		assert_eq!(ancestors.next(), Some(p("/foo/bar")));
		assert_eq!(ancestors.next(), Some(p("/foo")));
		assert_eq!(ancestors.next(), None);
	}

	#[test]
	fn print() {
		assert_eq!(p("/foo").to_string(), "/foo");
		assert_eq!(p("/foo/bar").to_string(), "/foo/bar");
		assert_eq!(p("foo/bar").to_string(), "foo/bar");
		assert_eq!(p("/foo.prop").to_string(), "/foo.prop");
		assert_eq!(p("/foo{v=a}bar").to_string(), "/foo{v=a}bar");
		assert_eq!(p("/foo.rel[/x/y].attr").to_string(), "/foo.rel[/x/y].attr");
		assert_eq!(Path::absolute_root_path().to_string(), "/");
	}

	#[test]
	fn prefixes() {
		assert!(p("/foo/bar").has_prefix(&p("/foo")));
		assert!(p("/foo/bar").has_prefix(&p("/foo/bar")));
		assert!(p("/foo/bar").has_prefix(&Path::absolute_root_path()));
		assert!(!p("/foobar").has_prefix(&p("/foo")));
		assert!(!p("/foo").has_prefix(&Path::empty_path()));
		assert!(p("/foo.prop").has_prefix(&p("/foo")));
	}

	#[test]
	fn replace_prefix() {
		assert_eq!(
			p("/foo/bar/baz").replace_prefix(&p("/foo"), &p("/qux")),
			p("/qux/bar/baz")
		);
		assert_eq!(
			p("/other").replace_prefix(&p("/foo"), &p("/qux")),
			p("/other")
		);
		assert_eq!(
			p("/foo/bar").replace_prefix(&p("/foo"), &Path::empty_path()),
			Path::empty_path()
		);
		assert_eq!(
			p("/a.rel[/foo/x]").replace_prefix(&p("/foo"), &p("/bar")),
			p("/a.rel[/bar/x]")
		);
		assert_eq!(
			p("/foo{v=a}bar").replace_prefix(&p("/foo{v=a}"), &p("/foo")),
			p("/foo/bar")
		);
	}

	#[test]
	fn descendants_sort_after_their_ancestor() {
		let mut paths = vec![p("/b"), p("/a/z"), p("/a.prop"), p("/a"), p("/a/b/c"), p("/ab")];
		paths.sort();
		let a = p("/a");
		let start = paths.iter().position(|x| *x == a).unwrap();
		let run: Vec<_> = paths[start..]
			.iter()
			.take_while(|x| x.has_prefix(&a))
			.collect();
		assert_eq!(run.len(), 4);
	}

	#[test]
	fn strip_variant_selections() {
		assert_eq!(
			p("/a{v=x}b{w=y}c").strip_all_variant_selections(),
			p("/a/b/c")
		);
		assert_eq!(p("/a{v=x}b.attr").prim_path(), p("/a{v=x}b"));
	}
}
