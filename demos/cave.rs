//! A scripted walk through a tiny cave scene.
//!
//! Run with `cargo run --example cave`; set `RUST_LOG=debug` to watch the
//! engine's decisions.

use narrative_terminal::core::render::render_text;
use narrative_terminal::core::stage::{HostEffect, Stage, StageError};
use narrative_terminal::core::store::{MemoryStore, Store};
use narrative_terminal::schema::document::Document;

const SCRIPT: &str = r#"[
    Terminal(
        id: Some("intro"),
        attrs: (autoplay: true, cursor: On),
        children: [Block(tag: "p", children: [Text("You wake in a cave. Somewhere, water drips.")])],
    ),
    Form(attrs: (label: Some("What do you do? "), target: Some("cmd"))),
    Group(
        id: Some("cave"),
        children: [
            Details(children: [
                Summary(children: [Text("Look")]),
                Terminal(id: Some("cmd-look"), children: [Text("Moss glows faintly on the walls.")]),
            ]),
            Details(children: [
                Summary(children: [Text("Listen")]),
                Terminal(id: Some("cmd-listen"), children: [Text("Footsteps. Far away, but coming closer.")]),
            ]),
        ],
    ),
    Block(tag: "div", children: [
        Details(children: [
            Summary(children: [Text("Help")]),
            Terminal(
                id: Some("cmd-help"),
                attrs: (global: true, show_button: true),
                children: [Text("Try LOOK or LISTEN.")],
            ),
        ]),
        Terminal(id: Some("cmd-invalid"), children: [Text("That does nothing useful.")]),
    ]),
    Form(attrs: (label: Some("And then? "), target: Some("next"))),
]"#;

fn build(store: MemoryStore) -> Result<Stage, StageError> {
    Stage::builder()
        .seed(7)
        .visibility_sensing(false)
        .store(store)
        .document(Document::parse_ron(SCRIPT)?)
        .build()
}

fn main() -> Result<(), StageError> {
    env_logger::init();

    let mut stage = build(MemoryStore::new())?;
    stage.run_until_idle(16);

    let question = stage.forms()[0];
    println!("> ?");
    stage.answer(question, "?")?;
    stage.run_until_idle(16);

    println!("> xyzzy");
    stage.answer(question, "xyzzy")?;
    stage.run_until_idle(16);

    println!("{}", render_text(&stage));
    for effect in stage.drain_effects() {
        if let HostEffect::Focus(node) = effect {
            println!("[focus {:?}]", node);
        }
    }

    // A second visit resumes where a reader left off.
    let saved = MemoryStore::with_entries([(
        stage.config().storage_key("cave"),
        "cmd-listen".to_string(),
    )]);
    let mut resumed = build(saved)?;
    resumed.run_until_idle(16);
    println!("--- after reload ---");
    println!("{}", render_text(&resumed));
    println!("saved: {:?}", resumed.store().keys());
    Ok(())
}
