use crate::sdf::Path;
use crate::{tf, vt};
use enumset::{EnumSet, EnumSetType};
use std::collections::BTreeMap;

/// What happened to the object at one path of a layer.
#[derive(EnumSetType, Debug)]
pub enum ChangeFlag {
	DidChangeIdentifier,
	DidReplaceContent,
	DidRename,
	DidAddInertPrim,
	DidAddNonInertPrim,
	DidRemoveInertPrim,
	DidRemoveNonInertPrim,
	DidAddPropertyWithOnlyRequiredFields,
	DidAddProperty,
	DidRemovePropertyWithOnlyRequiredFields,
	DidRemoveProperty,
	DidChangePrimVariantSets,
	DidChangePrimInheritPaths,
	DidChangePrimSpecializes,
	DidChangePrimReferences,
	DidChangeAttributeConnection,
	DidChangeRelationshipTargets,
	DidAddTarget,
	DidRemoveTarget,
}

pub type ChangeFlags = EnumSet<ChangeFlag>;

/// How an entry of a layer's `subLayers` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubLayerChange {
	Added,
	Removed,
	Offset,
}

/// The changes recorded for one path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeEntry {
	pub flags: ChangeFlags,
	/// The path the object had before a rename or reparent.
	pub old_path: Path,
	/// Old and new values of changed fields.
	pub info_changed: BTreeMap<tf::Token, (vt::Value, vt::Value)>,
	pub sub_layer_changes: Vec<(String, SubLayerChange)>,
}

impl ChangeEntry {
	pub fn has_info_change(&self, field: &tf::Token) -> bool {
		self.info_changed.contains_key(field)
	}
}

/// The edits made to one layer, keyed by the path they affect.
///
/// Layer-wide changes such as sublayer edits are recorded on the absolute
/// root path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeList {
	entries: BTreeMap<Path, ChangeEntry>,
}

impl ChangeList {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> impl Iterator<Item = (&Path, &ChangeEntry)> {
		self.entries.iter()
	}

	pub fn entry(&self, path: &Path) -> Option<&ChangeEntry> {
		self.entries.get(path)
	}

	fn entry_mut(&mut self, path: &Path) -> &mut ChangeEntry {
		self.entries.entry(path.clone()).or_default()
	}

	pub fn set_flag(&mut self, path: &Path, flag: ChangeFlag) {
		self.entry_mut(path).flags.insert(flag);
	}

	/// A prim spec was added. Inert specs carry no composition arcs.
	pub fn did_add_prim(&mut self, path: &Path, inert: bool) {
		let flag = if inert {
			ChangeFlag::DidAddInertPrim
		} else {
			ChangeFlag::DidAddNonInertPrim
		};
		self.set_flag(path, flag);
	}

	pub fn did_remove_prim(&mut self, path: &Path, inert: bool) {
		let flag = if inert {
			ChangeFlag::DidRemoveInertPrim
		} else {
			ChangeFlag::DidRemoveNonInertPrim
		};
		self.set_flag(path, flag);
	}

	pub fn did_add_property(&mut self, path: &Path, only_required_fields: bool) {
		let flag = if only_required_fields {
			ChangeFlag::DidAddPropertyWithOnlyRequiredFields
		} else {
			ChangeFlag::DidAddProperty
		};
		self.set_flag(path, flag);
	}

	pub fn did_remove_property(&mut self, path: &Path, only_required_fields: bool) {
		let flag = if only_required_fields {
			ChangeFlag::DidRemovePropertyWithOnlyRequiredFields
		} else {
			ChangeFlag::DidRemoveProperty
		};
		self.set_flag(path, flag);
	}

	/// The object at `old_path` now lives at `new_path`.
	pub fn did_move(&mut self, old_path: &Path, new_path: &Path) {
		let entry = self.entry_mut(new_path);
		entry.flags.insert(ChangeFlag::DidRename);
		entry.old_path = old_path.clone();
	}

	pub fn did_change_info(&mut self, path: &Path, field: &tf::Token, old_value: vt::Value, new_value: vt::Value) {
		let entry = self.entry_mut(path);
		match entry.info_changed.get_mut(field) {
			// Keep the oldest value across repeated edits.
			Some((_, new)) => *new = new_value,
			None => {
				entry
					.info_changed
					.insert(field.clone(), (old_value, new_value));
			}
		}
	}

	pub fn did_add_sub_layer(&mut self, sub_layer_path: impl Into<String>) {
		self.sub_layer_change(sub_layer_path.into(), SubLayerChange::Added);
	}

	pub fn did_remove_sub_layer(&mut self, sub_layer_path: impl Into<String>) {
		self.sub_layer_change(sub_layer_path.into(), SubLayerChange::Removed);
	}

	pub fn did_change_sub_layer_offset(&mut self, sub_layer_path: impl Into<String>) {
		self.sub_layer_change(sub_layer_path.into(), SubLayerChange::Offset);
	}

	fn sub_layer_change(&mut self, sub_layer_path: String, change: SubLayerChange) {
		self.entry_mut(&Path::absolute_root_path())
			.sub_layer_changes
			.push((sub_layer_path, change));
	}

	pub fn did_replace_layer_content(&mut self) {
		self.set_flag(&Path::absolute_root_path(), ChangeFlag::DidReplaceContent);
	}

	pub fn did_change_layer_identifier(&mut self) {
		self.set_flag(&Path::absolute_root_path(), ChangeFlag::DidChangeIdentifier);
	}
}

impl std::fmt::Display for ChangeList {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		for (path, entry) in &self.entries {
			write!(f, "<{path}>")?;
			for flag in entry.flags {
				write!(f, " {flag:?}")?;
			}
			if entry.flags.contains(ChangeFlag::DidRename) {
				write!(f, " from <{}>", entry.old_path)?;
			}
			for field in entry.info_changed.keys() {
				write!(f, " {}", field.as_str())?;
			}
			for (sub_layer, change) in &entry.sub_layer_changes {
				write!(f, " {change:?}(@{sub_layer}@)")?;
			}
			writeln!(f)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sdf::FIELD_KEYS;

	#[test]
	fn entries_accumulate_per_path() {
		let mut changes = ChangeList::new();
		assert!(changes.is_empty());
		let path = Path::from("/A");
		changes.did_add_prim(&path, true);
		changes.did_change_info(&path, &FIELD_KEYS.references, vt::Value::empty(), vt::Value::empty());
		changes.did_move(&Path::from("/Old"), &Path::from("/B"));
		changes.did_add_sub_layer("sub.usda");

		let entry = changes.entry(&path).cloned().unwrap_or_default();
		assert_eq!(entry.flags, ChangeFlags::only(ChangeFlag::DidAddInertPrim));
		assert!(entry.has_info_change(&FIELD_KEYS.references));
		assert_eq!(
			changes.entry(&Path::from("/B")).map(|e| e.old_path.clone()),
			Some(Path::from("/Old"))
		);
		assert_eq!(
			changes.to_string(),
			"</> Added(@sub.usda@)\n</A> DidAddInertPrim references\n</B> DidRename from </Old>\n"
		);
	}

	#[test]
	fn repeated_info_changes_keep_the_first_old_value() {
		let mut changes = ChangeList::new();
		let root = Path::absolute_root_path();
		let key = &FIELD_KEYS.default_prim;
		changes.did_change_info(&root, key, tf::Token::new("A").into(), tf::Token::new("B").into());
		changes.did_change_info(&root, key, tf::Token::new("B").into(), tf::Token::new("C").into());
		let (old, new) = changes
			.entry(&root)
			.and_then(|entry| entry.info_changed.get(key).cloned())
			.unwrap_or_default();
		assert_eq!(old.get::<tf::Token>(), Some(tf::Token::new("A")));
		assert_eq!(new.get::<tf::Token>(), Some(tf::Token::new("C")));
	}
}
