use crate::sdf;

/// Value type representing a list-edit operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ListOp<T> {
	pub is_explicit: bool,
	pub explicit_items: Vec<T>,
	pub added_items: Vec<T>,
	pub prepended_items: Vec<T>,
	pub appended_items: Vec<T>,
	pub deleted_items: Vec<T>,
	pub ordered_items: Vec<T>,
}

impl<T> Default for ListOp<T> {
	fn default() -> Self {
		Self {
			is_explicit: false,
			explicit_items: Vec::new(),
			added_items: Vec::new(),
			prepended_items: Vec::new(),
			appended_items: Vec::new(),
			deleted_items: Vec::new(),
			ordered_items: Vec::new(),
		}
	}
}

impl<T: Clone + PartialEq> ListOp<T> {
	pub fn explicit(items: impl IntoIterator<Item = T>) -> Self {
		Self {
			is_explicit: true,
			explicit_items: items.into_iter().collect(),
			..Default::default()
		}
	}

	pub fn prepended(items: impl IntoIterator<Item = T>) -> Self {
		Self {
			prepended_items: items.into_iter().collect(),
			..Default::default()
		}
	}

	pub fn appended(items: impl IntoIterator<Item = T>) -> Self {
		Self {
			appended_items: items.into_iter().collect(),
			..Default::default()
		}
	}

	pub fn deleted(items: impl IntoIterator<Item = T>) -> Self {
		Self {
			deleted_items: items.into_iter().collect(),
			..Default::default()
		}
	}

	/// Applies this operation to `items`, which holds the result of
	/// applying all weaker operations.
	pub fn apply_operations(&self, items: &mut Vec<T>) {
		if self.is_explicit {
			items.clear();
			for item in &self.explicit_items {
				if !items.contains(item) {
					items.push(item.clone());
				}
			}
			return;
		}

		items.retain(|item| !self.deleted_items.contains(item));

		for item in &self.added_items {
			if !items.contains(item) {
				items.push(item.clone());
			}
		}

		if !self.prepended_items.is_empty() {
			items.retain(|item| !self.prepended_items.contains(item));
			let mut prefix: Vec<T> = Vec::with_capacity(self.prepended_items.len());
			for item in &self.prepended_items {
				if !prefix.contains(item) {
					prefix.push(item.clone());
				}
			}
			prefix.append(items);
			*items = prefix;
		}

		if !self.appended_items.is_empty() {
			items.retain(|item| !self.appended_items.contains(item));
			for item in &self.appended_items {
				if !items.contains(item) {
					items.push(item.clone());
				}
			}
		}

		if !self.ordered_items.is_empty() {
			let mut ordered: Vec<T> = self
				.ordered_items
				.iter()
				.filter(|item| items.contains(item))
				.cloned()
				.collect();
			for item in items.iter() {
				if !ordered.contains(item) {
					ordered.push(item.clone());
				}
			}
			*items = ordered;
		}
	}

	/// Returns the list resulting from applying this operation to an empty list.
	pub fn ordered_elements(&self) -> Vec<T> {
		let mut items = Vec::new();
		self.apply_operations(&mut items);
		items
	}

	/// Returns a copy with every item passed through `f`.
	pub fn map<U>(&self, f: impl Fn(&T) -> U) -> ListOp<U> {
		ListOp {
			is_explicit: self.is_explicit,
			explicit_items: self.explicit_items.iter().map(&f).collect(),
			added_items: self.added_items.iter().map(&f).collect(),
			prepended_items: self.prepended_items.iter().map(&f).collect(),
			appended_items: self.appended_items.iter().map(&f).collect(),
			deleted_items: self.deleted_items.iter().map(&f).collect(),
			ordered_items: self.ordered_items.iter().map(&f).collect(),
		}
	}

	/// Whether any item is mentioned by any operation.
	pub fn has_keys(&self) -> bool {
		self.is_explicit
			|| !self.added_items.is_empty()
			|| !self.prepended_items.is_empty()
			|| !self.appended_items.is_empty()
			|| !self.deleted_items.is_empty()
			|| !self.ordered_items.is_empty()
	}
}

/// Composes a stack of list ops given strongest first.
pub fn compose_list_ops<'a, T: Clone + PartialEq + 'a>(
	ops: impl DoubleEndedIterator<Item = &'a ListOp<T>>,
) -> Vec<T> {
	let mut items = Vec::new();
	for op in ops.rev() {
		op.apply_operations(&mut items);
	}
	items
}

pub type StringListOp = ListOp<String>;
pub type PathListOp = ListOp<sdf::Path>;
pub type ReferenceListOp = ListOp<sdf::Reference>;
pub type PayloadListOp = ListOp<sdf::Payload>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stronger_ops_apply_last() {
		let weak = StringListOp::appended(["a".to_string(), "b".to_string()]);
		let strong = StringListOp {
			prepended_items: vec!["c".to_string()],
			deleted_items: vec!["a".to_string()],
			..Default::default()
		};
		assert_eq!(
			compose_list_ops([&strong, &weak].into_iter()),
			vec!["c".to_string(), "b".to_string()]
		);
	}

	#[test]
	fn explicit_discards_weaker() {
		let weak = StringListOp::appended(["a".to_string()]);
		let strong = StringListOp::explicit(["x".to_string()]);
		assert_eq!(
			compose_list_ops([&strong, &weak].into_iter()),
			vec!["x".to_string()]
		);
	}
}
