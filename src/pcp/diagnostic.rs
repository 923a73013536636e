use super::ArcType;
use super::graph::NodeRef;
use super::prim_index::PrimIndex;
use std::fmt::Write as _;
use std::io::Write;

/// Writes the node graph of `index` in Graphviz dot format.
///
/// Culled and inert nodes are left out unless requested.
pub fn dump_dot_graph(
	index: &PrimIndex,
	writer: &mut dyn Write,
	include_inert: bool,
	include_culled: bool,
) -> std::io::Result<()> {
	writeln!(writer, "digraph PcpPrimIndex {{")?;
	if let Some(root) = index.root_node() {
		write_dot_node(writer, root, include_inert, include_culled)?;
	}
	writeln!(writer, "}}")?;
	Ok(())
}

fn layer_name(node: NodeRef) -> String {
	let identifier = node.layer_stack().root_layer().identifier();
	std::path::Path::new(identifier)
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_else(|| identifier.to_string())
}

fn write_dot_node(
	writer: &mut dyn Write,
	node: NodeRef,
	include_inert: bool,
	include_culled: bool,
) -> std::io::Result<()> {
	let style = match (node.is_culled(), node.is_inert()) {
		(true, _) => ", style=\"dotted\"",
		(false, true) => ", style=\"dashed\"",
		_ => "",
	};
	writeln!(
		writer,
		"\t{} [label=\"@{}@<{}> ({})\", shape=\"box\"{style}];",
		node.index(),
		layer_name(node),
		node.path(),
		node.index()
	)?;

	for child in node.children() {
		if (child.is_inert() && !include_inert) || (child.is_culled() && !include_culled) {
			continue;
		}
		let color = match child.arc_type() {
			ArcType::Root => "black",
			ArcType::LocalInherit | ArcType::GlobalInherit => "green",
			ArcType::Variant => "orange",
			ArcType::Reference => "red",
			ArcType::Relocate => "purple",
			ArcType::Payload => "indigo",
			ArcType::LocalSpecialize | ArcType::GlobalSpecialize => "sienna",
		};
		writeln!(
			writer,
			"\t{} -> {} [label=\"{}\", color={color}];",
			node.index(),
			child.index(),
			child.arc_type()
		)?;
		write_dot_node(writer, child, include_inert, include_culled)?;
	}

	// Implied arcs point back at the node they were implied from.
	let parent_index = node.parent_node().map(|parent| parent.index());
	if let Some(origin) = node
		.origin_node()
		.filter(|origin| Some(origin.index()) != parent_index)
	{
		writeln!(
			writer,
			"\t{} -> {} [style=dotted, label=\"origin\", constraint=\"false\"];",
			node.index(),
			origin.index()
		)?;
	}
	Ok(())
}

/// Describes `index` as indented text: one line per node in strength
/// order, followed by the prim stack and any errors.
pub fn dump(index: &PrimIndex) -> String {
	let mut out = String::new();
	let Some(root) = index.root_node() else {
		return "invalid prim index\n".to_string();
	};
	let _ = writeln!(out, "prim index for <{}>", index.path());
	dump_node(&mut out, root, 1);

	let prim_stack = index.prim_stack();
	if !prim_stack.is_empty() {
		let _ = writeln!(out, "prim stack:");
		for (layer, path, node) in prim_stack {
			let _ = writeln!(out, "\t@{}@<{}> from node {}", layer.identifier(), path, node.index());
		}
	}
	if !index.local_errors().is_empty() {
		let _ = writeln!(out, "errors:");
		for error in index.local_errors() {
			let _ = writeln!(out, "\t{error}");
		}
	}
	out
}

fn dump_node(out: &mut String, node: NodeRef, depth: usize) {
	let mut flags = Vec::new();
	if node.has_specs() {
		flags.push("has specs");
	}
	if node.is_due_to_ancestor() {
		flags.push("ancestral");
	}
	if node.is_inert() {
		flags.push("inert");
	}
	if node.is_culled() {
		flags.push("culled");
	}
	let _ = writeln!(
		out,
		"{}{} {} <{}> [{}]",
		"\t".repeat(depth),
		node.arc_type(),
		node.layer_stack(),
		node.path(),
		flags.join(", ")
	);
	for child in node.children() {
		dump_node(out, child, depth + 1);
	}
}
