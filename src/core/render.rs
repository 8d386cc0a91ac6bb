/// Plain-text rendering of what a reader would currently see.
use crate::core::stage::Stage;
use crate::schema::node::{ElementKind, NodeId, NodeKind};

/// Glyph drawn where a visible cursor sits.
pub const CURSOR_GLYPH: char = '█';

/// Tags that start on their own line.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "pre", "h1", "h2", "h3", "h4", "blockquote", "br", "section",
];

/// Visible text of the whole document.
pub fn render_text(stage: &Stage) -> String {
    render_node(stage, stage.document().root())
}

/// Visible text of the subtree at `node`. Hidden (empty) containers are
/// skipped, closed disclosures show only their summary, questions show their
/// label and current answer.
pub fn render_node(stage: &Stage, node: NodeId) -> String {
    let mut out = String::new();
    write_node(stage, node, &mut out);
    out
}

fn write_node(stage: &Stage, node: NodeId, out: &mut String) {
    let document = stage.document();
    let Some(current) = document.get(node) else {
        return;
    };
    let element = match &current.kind {
        NodeKind::Text(text) => {
            out.push_str(text);
            return;
        }
        NodeKind::Element(element) => element,
    };
    if element.empty {
        return;
    }

    match &element.kind {
        ElementKind::Block { tag } => {
            let block = BLOCK_TAGS.contains(&tag.as_str());
            if block {
                line_break(out);
            }
            write_children(stage, node, out);
            if block {
                line_break(out);
            }
        }
        ElementKind::Terminal(_) => {
            line_break(out);
            write_children(stage, node, out);
            line_break(out);
        }
        ElementKind::Form(attrs) => {
            line_break(out);
            out.push_str(attrs.label.as_deref().unwrap_or_default());
            if let Some(branch) = stage.form(node) {
                out.push_str(branch.value());
            }
            line_break(out);
        }
        ElementKind::Group(_) => {
            let selected = stage.group(node).is_some_and(|group| group.is_selected());
            line_break(out);
            for &child in document.children(node) {
                // A group with its answer hides the choices not taken.
                let closed = matches!(
                    document.element(child).map(|e| &e.kind),
                    Some(ElementKind::Details { open: false, .. })
                );
                if selected && closed {
                    continue;
                }
                write_node(stage, child, out);
            }
            line_break(out);
        }
        ElementKind::Details { open, .. } => {
            line_break(out);
            out.push_str(if *open { "▾ " } else { "▸ " });
            for &child in document.children(node) {
                let is_summary = document
                    .element(child)
                    .is_some_and(|e| e.kind == ElementKind::Summary);
                if is_summary {
                    write_children(stage, child, out);
                    line_break(out);
                } else if *open {
                    write_node(stage, child, out);
                }
            }
            line_break(out);
        }
        ElementKind::Summary => write_children(stage, node, out),
    }

    if element.cursor && cursor_shown(stage, node) {
        // Sit inside the line the cursor's container ended on.
        if out.ends_with('\n') {
            out.pop();
            out.push(CURSOR_GLYPH);
            out.push('\n');
        } else {
            out.push(CURSOR_GLYPH);
        }
    }
}

fn write_children(stage: &Stage, node: NodeId, out: &mut String) {
    for &child in stage.document().children(node) {
        write_node(stage, child, out);
    }
}

/// The terminal owning `node` currently displays its cursor.
fn cursor_shown(stage: &Stage, node: NodeId) -> bool {
    stage
        .document()
        .closest(node, |n| n.element().is_some_and(|e| e.is_terminal()))
        .and_then(|terminal| stage.terminal(terminal))
        .is_some_and(|terminal| terminal.cursor_visible())
}

fn line_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}
