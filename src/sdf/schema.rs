use crate::declare_public_tokens;

declare_public_tokens!(FieldKeys, FIELD_KEYS, [
	connection_paths: "connectionPaths",
	default: "default",
	default_prim: "defaultPrim",
	has_owned_sub_layers: "hasOwnedSubLayers",
	inherit_paths: "inheritPaths",
	instanceable: "instanceable",
	owner: "owner",
	payload: "payload",
	permission: "permission",
	references: "references",
	relocates: "relocates",
	session_owner: "sessionOwner",
	specializes: "specializes",
	specifier: "specifier",
	sub_layers: "subLayers",
	sub_layer_offsets: "subLayerOffsets",
	target_paths: "targetPaths",
	type_name: "typeName",
	variant_selection: "variantSelection",
	variant_set_names: "variantSetNames"
]);

declare_public_tokens!(ChildrenKeys, CHILDREN_KEYS, [
	prim_children: "primChildren",
	property_children: "properties",
	variant_children: "variantChildren",
	variant_set_children: "variantSetChildren"
]);
