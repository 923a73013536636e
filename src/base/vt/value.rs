use crate::{sdf, tf};
use std::collections::BTreeMap;

pub type Array<T> = Vec<T>;

/// A type-erased container for any of the field values scene description
/// stores.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
	store: ValueStore,
}

impl Value {
	pub fn new<T: ValueType>(value: T) -> Self {
		Value {
			store: value.store(),
		}
	}

	pub fn empty() -> Self {
		Value {
			store: ValueStore::Empty,
		}
	}

	pub fn is_empty(&self) -> bool {
		matches!(self.store, ValueStore::Empty)
	}

	pub fn get<T: ValueType>(&self) -> Option<T> {
		T::load(&self.store)
	}

	pub fn is<T: ValueType>(&self) -> bool {
		T::load(&self.store).is_some()
	}
}

impl Default for Value {
	fn default() -> Self {
		Self::empty()
	}
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueStore {
	Empty,

	Token(tf::Token),
	TokenArray(Array<tf::Token>),

	String(String),
	StringArray(Array<String>),

	StringListOp(sdf::StringListOp),
	PathListOp(sdf::PathListOp),
	ReferenceListOp(sdf::ReferenceListOp),
	PayloadListOp(sdf::PayloadListOp),

	Specifier(sdf::Specifier),
	VariantSelectionMap(sdf::VariantSelectionMap),
	Relocates(Array<sdf::Relocate>),
	LayerOffsets(Array<sdf::Retiming>),
}

pub trait ValueType {
	fn load(store: &ValueStore) -> Option<Self>
	where
		Self: Sized;
	fn store(self) -> ValueStore;
}

macro_rules! impl_value_type_clone {
	($type:ty, $store:ident) => {
		impl ValueType for $type {
			fn load(store: &ValueStore) -> Option<Self> {
				match store {
					ValueStore::$store(v) => Some(v.clone()),
					_ => None,
				}
			}

			fn store(self) -> ValueStore {
				ValueStore::$store(self)
			}
		}

		impl From<$type> for Value {
			fn from(value: $type) -> Self {
				Value {
					store: ValueStore::$store(value),
				}
			}
		}
	};
}

macro_rules! impl_value_type_deref {
	($type:ty, $store:ident) => {
		impl ValueType for $type {
			fn load(store: &ValueStore) -> Option<Self> {
				match store {
					ValueStore::$store(v) => Some(*v),
					_ => None,
				}
			}

			fn store(self) -> ValueStore {
				ValueStore::$store(self)
			}
		}

		impl From<$type> for Value {
			fn from(value: $type) -> Self {
				Value {
					store: ValueStore::$store(value),
				}
			}
		}
	};
}

impl_value_type_clone!(tf::Token, Token);
impl_value_type_clone!(Array<tf::Token>, TokenArray);

impl_value_type_clone!(String, String);
impl_value_type_clone!(Array<String>, StringArray);

impl_value_type_clone!(sdf::StringListOp, StringListOp);
impl_value_type_clone!(sdf::PathListOp, PathListOp);
impl_value_type_clone!(sdf::ReferenceListOp, ReferenceListOp);
impl_value_type_clone!(sdf::PayloadListOp, PayloadListOp);

impl_value_type_deref!(sdf::Specifier, Specifier);
impl_value_type_clone!(BTreeMap<String, String>, VariantSelectionMap);
impl_value_type_clone!(Array<sdf::Relocate>, Relocates);
impl_value_type_clone!(Array<sdf::Retiming>, LayerOffsets);
