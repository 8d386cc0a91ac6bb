/// Authoring format — the tree a writer hands to the engine, usually as RON.
use serde::{Deserialize, Serialize};

/// How a terminal displays its blinking cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CursorMode {
    /// No cursor.
    #[default]
    Off,
    /// Cursor shown while the terminal is playing.
    On,
    /// Cursor shown from attach, sitting on the terminal itself until
    /// playback moves it. Text runs are trimmed in this mode so the cursor
    /// lands exactly where the author put it.
    Manual,
}

/// Configuration flags of a reveal segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TerminalAttrs {
    /// Characters-per-tick multiplier; higher is faster, ~10 is the practical top.
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub cursor: CursorMode,
    /// Play as soon as the terminal becomes visible.
    #[serde(default)]
    pub autoplay: bool,
    /// Offer play/skip controls until playback starts.
    #[serde(default)]
    pub buttons: bool,
    /// Reusable sub-dialogue that can be invoked from any choice group.
    #[serde(default)]
    pub global: bool,
    /// A global fragment that choice groups offer as a selectable entry.
    #[serde(default)]
    pub show_button: bool,
    /// Saved progress at or after this point is discarded on load.
    #[serde(default)]
    pub disable_restore: bool,
    /// Ask the host to keep the pre-reveal height reserved.
    #[serde(default)]
    pub dimensions: bool,
    /// Location to navigate to once the terminal finishes.
    #[serde(default)]
    pub href: Option<String>,
}

/// Configuration of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FormAttrs {
    /// Prompt text. Required.
    #[serde(default)]
    pub label: Option<String>,
    /// Namespace the answer is resolved against. A form without a target has
    /// no input of its own and is driven by the choice group that follows it.
    #[serde(default)]
    pub target: Option<String>,
    /// Namespace for the `-default` lookup, when it differs from `target`.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Namespace for the `-invalid` lookup, when it differs from `target`.
    #[serde(default)]
    pub invalid: Option<String>,
    #[serde(default)]
    pub autofocus: bool,
}

/// Configuration of a choice group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GroupAttrs {
    /// Global fragment ids this group does not offer.
    #[serde(default)]
    pub skip_global_commands: Vec<String>,
}

/// One node of authored content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Markup {
    Text(String),
    /// Plain structural container (paragraph, span, list item...).
    Block {
        tag: String,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        children: Vec<Markup>,
    },
    /// A reveal segment.
    Terminal {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        attrs: TerminalAttrs,
        #[serde(default)]
        children: Vec<Markup>,
    },
    /// A question.
    Form {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        attrs: FormAttrs,
        #[serde(default)]
        children: Vec<Markup>,
    },
    /// A set of sibling choices answering the form right before it.
    Group {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        attrs: GroupAttrs,
        #[serde(default)]
        children: Vec<Markup>,
    },
    /// Collapsible disclosure; its first `Summary` child is the choice label.
    Details {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        open: bool,
        /// Set on entries synthesized for global commands.
        #[serde(default)]
        global_command: Option<String>,
        #[serde(default)]
        children: Vec<Markup>,
    },
    Summary {
        #[serde(default)]
        children: Vec<Markup>,
    },
}

impl Markup {
    pub fn text(value: &str) -> Markup {
        Markup::Text(value.to_string())
    }

    pub fn block(tag: &str, children: Vec<Markup>) -> Markup {
        Markup::Block {
            tag: tag.to_string(),
            id: None,
            children,
        }
    }

    pub fn terminal(id: &str, attrs: TerminalAttrs, children: Vec<Markup>) -> Markup {
        Markup::Terminal {
            id: Some(id.to_string()),
            attrs,
            children,
        }
    }

    pub fn form(attrs: FormAttrs) -> Markup {
        Markup::Form {
            id: None,
            attrs,
            children: Vec::new(),
        }
    }

    /// A disclosure with a text summary followed by `content`.
    pub fn choice(summary: &str, content: Markup) -> Markup {
        Markup::Details {
            id: None,
            open: false,
            global_command: None,
            children: vec![
                Markup::Summary {
                    children: vec![Markup::text(summary)],
                },
                content,
            ],
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Markup::Block { id, .. }
            | Markup::Terminal { id, .. }
            | Markup::Form { id, .. }
            | Markup::Group { id, .. }
            | Markup::Details { id, .. } => id.as_deref(),
            Markup::Text(_) | Markup::Summary { .. } => None,
        }
    }

    pub fn children(&self) -> &[Markup] {
        match self {
            Markup::Text(_) => &[],
            Markup::Block { children, .. }
            | Markup::Terminal { children, .. }
            | Markup::Form { children, .. }
            | Markup::Group { children, .. }
            | Markup::Details { children, .. }
            | Markup::Summary { children } => children,
        }
    }

    /// Total number of code points in all text beneath this node.
    pub fn char_count(&self) -> usize {
        match self {
            Markup::Text(text) => text.chars().count(),
            _ => self.children().iter().map(Markup::char_count).sum(),
        }
    }
}
