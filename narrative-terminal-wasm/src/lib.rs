//! WASM bindings for narrative-terminal — lets a web page host a stage.
//!
//! The page owns the animation clock (`requestAnimationFrame`), the DOM and
//! `localStorage`; it forwards ticks, answers and clicks, renders the text,
//! and applies the drained host effects.

use std::collections::BTreeMap;
use wasm_bindgen::prelude::*;

use narrative_terminal::core::branch::BranchState;
use narrative_terminal::core::config::StageConfig;
use narrative_terminal::core::render::{render_node, render_text};
use narrative_terminal::core::stage::{Activation, Resolution, Stage};
use narrative_terminal::core::store::{MemoryStore, Store};
use narrative_terminal::schema::document::Document;
use narrative_terminal::schema::node::NodeId;

// ---------------------------------------------------------------------------
// JSON helper types for communication across the WASM boundary
// ---------------------------------------------------------------------------
#[derive(serde::Serialize)]
struct OutcomeInfo {
    kind: &'static str,
    fragment: Option<String>,
    node: Option<usize>,
    next: Option<usize>,
}

#[derive(serde::Serialize)]
struct QuestionInfo {
    node: usize,
    label: String,
    value: String,
    editable: bool,
    active: bool,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------
fn resolution_info(resolution: Resolution) -> OutcomeInfo {
    match resolution {
        Resolution::Unresolved => OutcomeInfo {
            kind: "unresolved",
            fragment: None,
            node: None,
            next: None,
        },
        Resolution::Advanced {
            fragment,
            clone,
            next,
        } => OutcomeInfo {
            kind: "advanced",
            fragment: Some(fragment),
            node: Some(clone.0),
            next: next.map(|n| n.0),
        },
        Resolution::Detour { fragment, clone } => OutcomeInfo {
            kind: "detour",
            fragment: Some(fragment),
            node: Some(clone.0),
            next: None,
        },
    }
}

fn activation_info(activation: Activation) -> OutcomeInfo {
    match activation {
        Activation::Ignored => OutcomeInfo {
            kind: "ignored",
            fragment: None,
            node: None,
            next: None,
        },
        Activation::Toggled { details, open } => OutcomeInfo {
            kind: if open { "opened" } else { "closed" },
            fragment: None,
            node: Some(details.0),
            next: None,
        },
        Activation::Inert => OutcomeInfo {
            kind: "inert",
            fragment: None,
            node: None,
            next: None,
        },
        Activation::Global { fragment, clone } => OutcomeInfo {
            kind: "global",
            fragment: Some(fragment),
            node: Some(clone.0),
            next: None,
        },
        Activation::Selected { terminal, next } => OutcomeInfo {
            kind: "selected",
            fragment: None,
            node: terminal.map(|n| n.0),
            next: next.map(|n| n.0),
        },
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(|e| JsError::new(&format!("Serialization error: {e}")))
}

fn node(id: u32) -> NodeId {
    NodeId(id as usize)
}

// ---------------------------------------------------------------------------
// WebStage — the main exported struct
// ---------------------------------------------------------------------------
#[wasm_bindgen]
pub struct WebStage {
    stage: Stage,
}

#[wasm_bindgen]
impl WebStage {
    /// Build a stage from a RON script.
    ///
    /// `config` is an optional RON `StageConfig`; `saved` is an optional JSON
    /// object of previously persisted entries (what `savedEntries` returned).
    #[wasm_bindgen(constructor)]
    pub fn new(
        script: &str,
        config: Option<String>,
        location: Option<String>,
        saved: Option<String>,
        reduced_motion: bool,
    ) -> Result<WebStage, JsError> {
        let document = Document::parse_ron(script)
            .map_err(|e| JsError::new(&format!("Script parse error: {e}")))?;
        let mut config = match config {
            Some(source) => StageConfig::parse_ron(&source)
                .map_err(|e| JsError::new(&format!("Config parse error: {e}")))?,
            None => StageConfig::default(),
        };
        config.reduced_motion |= reduced_motion;
        if location.is_some() {
            config.location = location;
        }

        let entries: BTreeMap<String, String> = match saved {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| JsError::new(&format!("Saved entries error: {e}")))?,
            None => BTreeMap::new(),
        };

        let stage = Stage::builder()
            .config(config)
            .store(MemoryStore::with_entries(entries))
            .document(document)
            .build()
            .map_err(|e| JsError::new(&format!("Stage build error: {e}")))?;
        Ok(WebStage { stage })
    }

    /// Advance the clock to `now` (milliseconds). Returns the steps run.
    pub fn tick(&mut self, now: f64) -> usize {
        self.stage.tick(now.max(0.0) as u64)
    }

    #[wasm_bindgen(js_name = isIdle)]
    pub fn is_idle(&self) -> bool {
        self.stage.is_idle()
    }

    pub fn find(&self, id: &str) -> Option<u32> {
        self.stage.find(id).map(|n| n.0 as u32)
    }

    pub fn play(&mut self, terminal: u32) -> Result<(), JsError> {
        self.stage
            .play(node(terminal))
            .map_err(|e| JsError::new(&e.to_string()))
    }

    pub fn pause(&mut self, terminal: u32) -> Result<(), JsError> {
        self.stage
            .pause(node(terminal))
            .map_err(|e| JsError::new(&e.to_string()))
    }

    pub fn skip(&mut self, terminal: u32) -> Result<(), JsError> {
        self.stage
            .skip(node(terminal))
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// The page saw an element scroll into view.
    #[wasm_bindgen(js_name = setVisible)]
    pub fn set_visible(&mut self, terminal: u32, visible: bool) -> Result<(), JsError> {
        self.stage
            .set_visible(node(terminal), visible)
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Type and submit an answer. Returns the outcome as JSON.
    pub fn answer(&mut self, form: u32, value: &str) -> Result<String, JsError> {
        let resolution = self
            .stage
            .answer(node(form), value)
            .map_err(|e| JsError::new(&e.to_string()))?;
        to_json(&resolution_info(resolution))
    }

    /// A click on `target`. Returns the outcome as JSON.
    pub fn click(&mut self, target: u32) -> Result<String, JsError> {
        let activation = self
            .stage
            .click(node(target))
            .map_err(|e| JsError::new(&e.to_string()))?;
        to_json(&activation_info(activation))
    }

    /// Questions in document order, as JSON.
    pub fn questions(&self) -> Result<String, JsError> {
        let questions: Vec<QuestionInfo> = self
            .stage
            .forms()
            .into_iter()
            .filter_map(|form| {
                self.stage.form(form).map(|branch| QuestionInfo {
                    node: form.0,
                    label: branch.label().to_string(),
                    value: branch.value().to_string(),
                    editable: branch.accepts_typing() && branch.state() == BranchState::Editable,
                    active: branch.active,
                })
            })
            .collect();
        to_json(&questions)
    }

    pub fn render(&self) -> String {
        render_text(&self.stage)
    }

    #[wasm_bindgen(js_name = renderNode)]
    pub fn render_node(&self, target: u32) -> String {
        render_node(&self.stage, node(target))
    }

    /// Pending host effects as JSON; the page applies them in order.
    #[wasm_bindgen(js_name = drainEffects)]
    pub fn drain_effects(&mut self) -> Result<String, JsError> {
        to_json(&self.stage.drain_effects())
    }

    #[wasm_bindgen(js_name = drainSignals)]
    pub fn drain_signals(&mut self) -> Result<String, JsError> {
        to_json(&self.stage.drain_signals())
    }

    /// Everything the stage persisted, as a JSON object for `localStorage`.
    #[wasm_bindgen(js_name = savedEntries)]
    pub fn saved_entries(&self) -> Result<String, JsError> {
        let store = self.stage.store();
        let entries: BTreeMap<String, String> = store
            .keys()
            .into_iter()
            .filter_map(|key| store.get(&key).map(|value| (key, value)))
            .collect();
        to_json(&entries)
    }
}
