/// Choice group controller — sibling choices sharing one persisted identity.
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::schema::document::{Document, DocumentError};
use crate::schema::markup::Markup;
use crate::schema::node::{ElementKind, NodeId};

#[derive(Debug, Error)]
pub enum GroupError {
    #[error("node {0:?} is not a choice group")]
    NotAGroup(NodeId),
    #[error("choice group {0:?} has no id to persist progress under")]
    MissingId(NodeId),
    #[error("global command {0:?} is not inside a disclosure")]
    MissingDisclosure(NodeId),
    #[error("could not find global command '{0}'")]
    UnknownGlobalCommand(String),
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
}

/// A global fragment eligible for an entry in choice groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalCommand {
    pub id: String,
    /// Summary text of the disclosure the fragment lives in.
    pub label: String,
}

/// Collect the global commands of the document in document order.
///
/// Every offered global fragment must sit inside a disclosure; its summary
/// becomes the entry label.
pub fn global_commands(document: &Document) -> Result<Vec<GlobalCommand>, GroupError> {
    let mut commands = Vec::new();
    let offered = document.query(|element| {
        element
            .terminal_attrs()
            .is_some_and(|attrs| attrs.global && attrs.show_button)
    });
    for node in offered {
        let Some(id) = document.element(node).and_then(|element| element.id.clone()) else {
            log::warn!("global command {:?} has no id; not offered", node);
            continue;
        };
        let details = document
            .parent(node)
            .and_then(|parent| document.closest_details(parent))
            .ok_or(GroupError::MissingDisclosure(node))?;
        let label = summary_of(document, details)
            .map(|summary| document.text_content(summary).trim().to_string())
            .unwrap_or_default();
        commands.push(GlobalCommand { id, label });
    }
    Ok(commands)
}

/// The `Summary` directly under a disclosure.
pub fn summary_of(document: &Document, details: NodeId) -> Option<NodeId> {
    document.child_element(details, |element| element.kind == ElementKind::Summary)
}

/// State of one choice group.
#[derive(Debug, Clone)]
pub struct ChoiceGroup {
    node: NodeId,
    id: String,
    /// Latched by the first ordinary choice; later choices are inert.
    selected: bool,
    /// Entries synthesized for global commands.
    entries: Vec<NodeId>,
}

impl ChoiceGroup {
    /// Build the group at `node` and append one entry per global command
    /// it does not skip.
    pub fn attach(
        document: &mut Document,
        node: NodeId,
        commands: &[GlobalCommand],
    ) -> Result<ChoiceGroup, GroupError> {
        let (id, attrs) = match document.element(node) {
            Some(element) => match &element.kind {
                ElementKind::Group(attrs) => (element.id.clone(), attrs.clone()),
                _ => return Err(GroupError::NotAGroup(node)),
            },
            None => return Err(GroupError::NotAGroup(node)),
        };
        let id = id.ok_or(GroupError::MissingId(node))?;
        let skip: FxHashSet<String> = attrs
            .skip_global_commands
            .into_iter()
            .filter(|entry| !entry.is_empty())
            .collect();

        let mut entries = Vec::new();
        for command in commands {
            if skip.contains(&command.id) {
                continue;
            }
            let entry = Markup::Details {
                id: Some(format!("{}-{}", id, command.id)),
                open: false,
                global_command: Some(command.id.clone()),
                children: vec![Markup::Summary {
                    children: vec![Markup::text(&command.label)],
                }],
            };
            entries.push(document.append(&entry, node)?);
        }

        Ok(ChoiceGroup {
            node,
            id,
            selected: false,
            entries,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn select(&mut self) {
        self.selected = true;
    }

    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::markup::{GroupAttrs, TerminalAttrs};

    fn global(id: &str, label: &str) -> Markup {
        Markup::choice(
            label,
            Markup::terminal(
                id,
                TerminalAttrs {
                    global: true,
                    show_button: true,
                    ..TerminalAttrs::default()
                },
                vec![Markup::text("...")],
            ),
        )
    }

    fn group(id: Option<&str>, skip: &[&str]) -> Markup {
        Markup::Group {
            id: id.map(str::to_string),
            attrs: GroupAttrs {
                skip_global_commands: skip.iter().map(|s| s.to_string()).collect(),
            },
            children: vec![Markup::choice("North", Markup::text("n"))],
        }
    }

    #[test]
    fn collects_globals_in_order() {
        let doc = Document::from_markup(&[global("help", " Help "), global("inv", "Inventory")]);
        let commands = global_commands(&doc).unwrap();
        assert_eq!(
            commands,
            vec![
                GlobalCommand {
                    id: "help".to_string(),
                    label: "Help".to_string()
                },
                GlobalCommand {
                    id: "inv".to_string(),
                    label: "Inventory".to_string()
                },
            ]
        );
    }

    #[test]
    fn global_without_disclosure_is_fatal() {
        let doc = Document::from_markup(&[Markup::terminal(
            "help",
            TerminalAttrs {
                global: true,
                show_button: true,
                ..TerminalAttrs::default()
            },
            Vec::new(),
        )]);
        assert!(matches!(
            global_commands(&doc),
            Err(GroupError::MissingDisclosure(_))
        ));
    }

    #[test]
    fn synthesizes_entries_minus_skipped() {
        let mut doc = Document::from_markup(&[
            global("help", "Help"),
            global("inv", "Inventory"),
            group(Some("menu"), &["inv"]),
        ]);
        let commands = global_commands(&doc).unwrap();
        let node = doc.children(doc.root())[2];
        let group = ChoiceGroup::attach(&mut doc, node, &commands).unwrap();

        assert_eq!(group.entries().len(), 1);
        let entry = group.entries()[0];
        let element = doc.element(entry).unwrap();
        assert_eq!(element.id.as_deref(), Some("menu-help"));
        assert_eq!(
            element.kind,
            ElementKind::Details {
                open: false,
                global_command: Some("help".to_string())
            }
        );
        assert_eq!(doc.text_content(entry), "Help");
        assert_eq!(doc.find_by_id("menu-inv"), None);
        assert!(!group.is_selected());
    }

    #[test]
    fn group_needs_an_id() {
        let mut doc = Document::from_markup(&[group(None, &[])]);
        let node = doc.children(doc.root())[0];
        assert!(matches!(
            ChoiceGroup::attach(&mut doc, node, &[]),
            Err(GroupError::MissingId(_))
        ));
    }
}
