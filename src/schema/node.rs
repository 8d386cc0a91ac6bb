use serde::{Deserialize, Serialize};

use super::markup::{FormAttrs, GroupAttrs, TerminalAttrs};

/// Newtype wrapper for arena indices of document nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Child indices leading from an ancestor down to a node.
///
/// Only meaningful against the tree it was computed on; any insertion above
/// the addressed node invalidates it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Path(pub Vec<usize>);

impl Path {
    pub fn child(&self, index: usize) -> Path {
        let mut steps = self.0.clone();
        steps.push(index);
        Path(steps)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

/// The structural capability of an element.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Block { tag: String },
    Terminal(TerminalAttrs),
    Form(FormAttrs),
    Group(GroupAttrs),
    Details {
        open: bool,
        global_command: Option<String>,
    },
    Summary,
}

/// A container node.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub kind: ElementKind,
    pub id: Option<String>,
    /// Hidden until a descendant text run receives its first character.
    pub empty: bool,
    /// Holds the blinking cursor.
    pub cursor: bool,
}

impl Element {
    pub fn new(kind: ElementKind, id: Option<String>) -> Self {
        Self {
            kind,
            id,
            empty: false,
            cursor: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ElementKind::Terminal(_))
    }

    pub fn terminal_attrs(&self) -> Option<&TerminalAttrs> {
        match &self.kind {
            ElementKind::Terminal(attrs) => Some(attrs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Live text of a text run. Emptied by serialization, refilled by playback.
    Text(String),
    Element(Element),
}

/// One arena slot. Parent links are set when the node is attached and are
/// never used for ownership.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn element(&self) -> Option<&Element> {
        match &self.kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    pub fn element_mut(&mut self) -> Option<&mut Element> {
        match &mut self.kind {
            NodeKind::Element(element) => Some(element),
            NodeKind::Text(_) => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Text(text) => Some(text),
            NodeKind::Element(_) => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, NodeKind::Text(_))
    }
}
