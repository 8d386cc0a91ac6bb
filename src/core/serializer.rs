/// Content serializer — flattens a terminal's subtree into reveal units.
use std::collections::VecDeque;

use crate::schema::document::Document;
use crate::schema::node::{NodeId, NodeKind, Path};

/// What a unit reveals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// A text run; `queue` holds the code points not yet revealed.
    Text { queue: VecDeque<char> },
    /// A container with no revealable text beneath it. Revealed as a whole
    /// once playback reaches it.
    Placeholder,
}

/// One atomic reveal unit, addressed by its path from the terminal root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealUnit {
    pub path: Path,
    pub kind: UnitKind,
}

impl RevealUnit {
    /// Code points still waiting to be revealed.
    pub fn remaining(&self) -> usize {
        match &self.kind {
            UnitKind::Text { queue } => queue.len(),
            UnitKind::Placeholder => 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.kind, UnitKind::Placeholder)
    }
}

/// Serialize the subtree under `root`, depth-first in document order.
///
/// Text runs are emptied in the live tree and their text moved into the
/// returned queues; containers other than `root` and nested terminals are
/// flagged empty. `trim` strips surrounding whitespace from every text run
/// (used by manual-cursor terminals).
pub fn serialize(document: &mut Document, root: NodeId, trim: bool) -> Vec<RevealUnit> {
    let mut units = Vec::new();
    walk(document, root, root, Path::default(), trim, &mut units);
    units
}

fn walk(
    document: &mut Document,
    root: NodeId,
    node: NodeId,
    path: Path,
    trim: bool,
    units: &mut Vec<RevealUnit>,
) {
    match document.get_mut(node).map(|current| &mut current.kind) {
        None => return,
        Some(NodeKind::Text(live)) => {
            let text = std::mem::take(live);
            let text = if trim { text.trim() } else { text.as_str() };
            units.push(RevealUnit {
                path,
                kind: UnitKind::Text {
                    queue: text.chars().collect(),
                },
            });
            return;
        }
        Some(NodeKind::Element(element)) => {
            if node != root && !element.is_terminal() {
                element.empty = true;
            }
        }
    }

    if document.text_content(node).trim().is_empty() {
        units.push(RevealUnit {
            path,
            kind: UnitKind::Placeholder,
        });
        return;
    }
    let children = document.children(node).to_vec();
    for (index, child) in children.into_iter().enumerate() {
        walk(document, root, child, path.child(index), trim, units);
    }
}

/// Total code points still queued across `units`.
pub fn remaining(units: &[RevealUnit]) -> usize {
    units.iter().map(RevealUnit::remaining).sum()
}
