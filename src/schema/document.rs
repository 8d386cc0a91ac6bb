/// Document tree — an arena of content nodes with upward links.
use std::path::Path as FsPath;
use thiserror::Error;

use super::markup::Markup;
use super::node::{Element, ElementKind, Node, NodeId, NodeKind, Path};

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("node not found: {0:?}")]
    MissingNode(NodeId),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeId, child: NodeId },
    #[error("text node {0:?} cannot have children")]
    TextParent(NodeId),
}

/// The live content tree. Owns every node; everything else refers to nodes
/// by `NodeId` or by `Path`.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// An empty document with a bare root container.
    pub fn new() -> Self {
        let root = Node {
            kind: NodeKind::Element(Element::new(
                ElementKind::Block {
                    tag: "document".to_string(),
                },
                None,
            )),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Some(root)],
            root: NodeId(0),
        }
    }

    pub fn from_markup(items: &[Markup]) -> Self {
        let mut document = Self::new();
        let root = document.root;
        for item in items {
            document.build(item, root);
        }
        document
    }

    /// Load a document from a RON file containing a list of `Markup` nodes.
    pub fn load_from_ron(path: &FsPath) -> Result<Document, DocumentError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    pub fn parse_ron(input: &str) -> Result<Document, DocumentError> {
        let items: Vec<Markup> = ron::from_str(input)?;
        Ok(Self::from_markup(&items))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.get(id).and_then(Node::element)
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.get_mut(id).and_then(Node::element_mut)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.get(id).map(|node| node.children.as_slice()).unwrap_or(&[])
    }

    /// Instantiate `markup` as the last child of `parent`.
    pub fn append(&mut self, markup: &Markup, parent: NodeId) -> Result<NodeId, DocumentError> {
        self.insert(markup, parent, None)
    }

    /// Instantiate `markup` under `parent`, immediately before `before` when
    /// given, otherwise as the last child.
    pub fn insert(
        &mut self,
        markup: &Markup,
        parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<NodeId, DocumentError> {
        let parent_node = self.get(parent).ok_or(DocumentError::MissingNode(parent))?;
        if parent_node.is_text() {
            return Err(DocumentError::TextParent(parent));
        }
        let position = match before {
            Some(sibling) => Some(
                parent_node
                    .children
                    .iter()
                    .position(|child| *child == sibling)
                    .ok_or(DocumentError::NotAChild {
                        parent,
                        child: sibling,
                    })?,
            ),
            None => None,
        };

        let id = self.build(markup, parent);
        // `build` appended; move into place.
        if let Some(position) = position {
            if let Some(node) = self.get_mut(parent) {
                node.children.pop();
                node.children.insert(position, id);
            }
        }
        Ok(id)
    }

    fn build(&mut self, markup: &Markup, parent: NodeId) -> NodeId {
        let kind = match markup {
            Markup::Text(text) => NodeKind::Text(text.clone()),
            Markup::Block { tag, id, .. } => NodeKind::Element(Element::new(
                ElementKind::Block { tag: tag.clone() },
                id.clone(),
            )),
            Markup::Terminal { id, attrs, .. } => {
                NodeKind::Element(Element::new(ElementKind::Terminal(attrs.clone()), id.clone()))
            }
            Markup::Form { id, attrs, .. } => {
                NodeKind::Element(Element::new(ElementKind::Form(attrs.clone()), id.clone()))
            }
            Markup::Group { id, attrs, .. } => {
                NodeKind::Element(Element::new(ElementKind::Group(attrs.clone()), id.clone()))
            }
            Markup::Details {
                id,
                open,
                global_command,
                ..
            } => NodeKind::Element(Element::new(
                ElementKind::Details {
                    open: *open,
                    global_command: global_command.clone(),
                },
                id.clone(),
            )),
            Markup::Summary { .. } => NodeKind::Element(Element::new(ElementKind::Summary, None)),
        };

        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        }));
        if let Some(node) = self.get_mut(parent) {
            node.children.push(id);
        }
        for child in markup.children() {
            self.build(child, id);
        }
        id
    }

    /// Detach `id` and its subtree. Returns the removed ids in document order.
    pub fn remove(&mut self, id: NodeId) -> Vec<NodeId> {
        if id == self.root {
            return Vec::new();
        }
        let removed = self.descendants(id);
        if let Some(parent) = self.parent(id) {
            if let Some(node) = self.get_mut(parent) {
                node.children.retain(|child| *child != id);
            }
        }
        for node in &removed {
            self.nodes[node.0] = None;
        }
        removed
    }

    /// Capture the current state of a subtree as authoring markup.
    pub fn snapshot(&self, id: NodeId) -> Option<Markup> {
        let node = self.get(id)?;
        let children: Vec<Markup> = node
            .children
            .iter()
            .filter_map(|child| self.snapshot(*child))
            .collect();
        let markup = match &node.kind {
            NodeKind::Text(text) => Markup::Text(text.clone()),
            NodeKind::Element(element) => {
                let id = element.id.clone();
                match &element.kind {
                    ElementKind::Block { tag } => Markup::Block {
                        tag: tag.clone(),
                        id,
                        children,
                    },
                    ElementKind::Terminal(attrs) => Markup::Terminal {
                        id,
                        attrs: attrs.clone(),
                        children,
                    },
                    ElementKind::Form(attrs) => Markup::Form {
                        id,
                        attrs: attrs.clone(),
                        children,
                    },
                    ElementKind::Group(attrs) => Markup::Group {
                        id,
                        attrs: attrs.clone(),
                        children,
                    },
                    ElementKind::Details {
                        open,
                        global_command,
                    } => Markup::Details {
                        id,
                        open: *open,
                        global_command: global_command.clone(),
                        children,
                    },
                    ElementKind::Summary => Markup::Summary { children },
                }
            }
        };
        Some(markup)
    }

    /// `id` and everything beneath it, depth-first in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            out.push(current);
            for child in node.children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Child-index path from `ancestor` to `node`, if `node` lies beneath it.
    pub fn path_to(&self, ancestor: NodeId, node: NodeId) -> Option<Path> {
        let mut steps = Vec::new();
        let mut current = node;
        while current != ancestor {
            let parent = self.parent(current)?;
            let index = self.children(parent).iter().position(|c| *c == current)?;
            steps.push(index);
            current = parent;
        }
        steps.reverse();
        Some(Path(steps))
    }

    pub fn resolve(&self, ancestor: NodeId, path: &Path) -> Option<NodeId> {
        let mut current = ancestor;
        self.get(current)?;
        for index in &path.0 {
            current = *self.children(current).get(*index)?;
        }
        Some(current)
    }

    /// Concatenated text of the subtree.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let Some(text) = self.get(node).and_then(Node::text) {
                out.push_str(text);
            }
        }
        out
    }

    pub fn push_text(&mut self, id: NodeId, text: &str) -> bool {
        match self.get_mut(id).map(|node| &mut node.kind) {
            Some(NodeKind::Text(live)) => {
                live.push_str(text);
                true
            }
            _ => false,
        }
    }

    /// Nearest inclusive ancestor satisfying `predicate`.
    pub fn closest<F>(&self, id: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&Node) -> bool,
    {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id)?;
            if predicate(node) {
                return Some(node_id);
            }
            current = node.parent;
        }
        None
    }

    /// Nearest ancestor (or self) that is a disclosure.
    pub fn closest_details(&self, id: NodeId) -> Option<NodeId> {
        self.closest(id, |node| {
            matches!(
                node.element().map(|e| &e.kind),
                Some(ElementKind::Details { .. })
            )
        })
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|c| *c == id)?;
        index.checked_sub(1).map(|i| siblings[i])
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let index = siblings.iter().position(|c| *c == id)?;
        siblings.get(index + 1).copied()
    }

    /// First direct child element matching `predicate`.
    pub fn child_element<F>(&self, id: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.children(id)
            .iter()
            .copied()
            .find(|child| self.element(*child).is_some_and(&predicate))
    }

    /// All nodes of the document, depth-first.
    pub fn document_order(&self) -> Vec<NodeId> {
        self.descendants(self.root)
    }

    /// Elements of the whole document matching `predicate`, in document order.
    pub fn query<F>(&self, predicate: F) -> Vec<NodeId>
    where
        F: Fn(&Element) -> bool,
    {
        self.document_order()
            .into_iter()
            .filter(|id| self.element(*id).is_some_and(&predicate))
            .collect()
    }

    /// First element carrying `id`, in document order.
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.query(|element| element.id.as_deref() == Some(id))
            .into_iter()
            .next()
    }
}
