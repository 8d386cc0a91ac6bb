/// Preview — play a script in the terminal, typing and choosing as a reader would.
///
/// Usage: preview <script.ron> [--config <path>] [--store <path>] [--seed <n>]
///                [--location <url>] [--instant]
///
/// Commands:
///   answer <text>   — answer the current question
///   choose <label>  — pick a choice (or global command) by its label
///   play <id>       — play a terminal
///   skip <id>       — reveal a terminal at once
///   reset <id>      — put a terminal back to its authored content
///   show            — print everything currently visible
///   status          — list terminals, questions and groups
///   help            — list commands
///   quit            — exit

use narrative_terminal::core::branch::BranchState;
use narrative_terminal::core::config::StageConfig;
use narrative_terminal::core::group::summary_of;
use narrative_terminal::core::render::render_text;
use narrative_terminal::core::stage::{Activation, HostEffect, Resolution, Stage};
use narrative_terminal::core::store::{FileStore, MemoryStore};
use narrative_terminal::schema::document::Document;
use narrative_terminal::schema::node::{ElementKind, NodeId};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let script_path = args[1].clone();
    let mut config_path = None;
    let mut store_path = None;
    let mut seed = None;
    let mut location = None;
    let mut instant = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--store" if i + 1 < args.len() => {
                i += 1;
                store_path = Some(args[i].clone());
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse::<u64>().ok();
            }
            "--location" if i + 1 < args.len() => {
                i += 1;
                location = Some(args[i].clone());
            }
            "--instant" => instant = true,
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let document = match Document::load_from_ron(Path::new(&script_path)) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("ERROR: Failed to load script: {}", e);
            std::process::exit(1);
        }
    };

    let mut config = match config_path {
        Some(ref path) => match StageConfig::load_from_ron(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ERROR: Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => StageConfig::default(),
    };
    // Nothing reports visibility here: autoplay terminals start right away.
    config.visibility_sensing = false;
    if instant {
        config.reduced_motion = true;
    }

    let mut builder = Stage::builder().config(config).document(document);
    if let Some(seed) = seed {
        builder = builder.seed(seed);
    }
    if let Some(ref location) = location {
        builder = builder.location(location);
    }
    builder = match store_path {
        Some(ref path) => match FileStore::open(Path::new(path)) {
            Ok(store) => builder.store(store),
            Err(e) => {
                eprintln!("ERROR: Failed to open store: {}", e);
                std::process::exit(1);
            }
        },
        None => builder.store(MemoryStore::new()),
    };

    let mut stage = match builder.build() {
        Ok(stage) => stage,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "Loaded {} terminals, {} questions, {} choice groups",
        stage.terminals().len(),
        stage.forms().len(),
        stage.groups().len()
    );
    println!("Type 'help' for commands.\n");

    let mut shown = String::new();
    run(&mut stage, &mut shown);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "answer" | "a" => {
                let Some(form) = current_question(&stage) else {
                    println!("No question is waiting for an answer.");
                    continue;
                };
                match stage.answer(form, rest) {
                    Ok(Resolution::Unresolved) => println!("(nothing happens)"),
                    Ok(_) => run(&mut stage, &mut shown),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "choose" | "c" => {
                let Some(summary) = find_choice(&stage, rest) else {
                    println!("No choice labelled '{}'.", rest);
                    continue;
                };
                match stage.click(summary) {
                    Ok(Activation::Inert) => println!("(already chosen)"),
                    Ok(Activation::Ignored) => println!("(nothing to choose)"),
                    Ok(_) => run(&mut stage, &mut shown),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "play" | "skip" | "reset" => {
                let Some(node) = stage.find(rest) else {
                    println!("No terminal with id '{}'.", rest);
                    continue;
                };
                let result = match cmd.as_str() {
                    "play" => stage.play(node),
                    "skip" => stage.skip(node),
                    _ => stage.reset_terminal(node),
                };
                match result {
                    Ok(()) => run(&mut stage, &mut shown),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "show" => {
                shown = render_text(&stage);
                println!("{}", shown);
            }
            "status" => print_status(&stage),
            _ => println!("Unknown command '{}'. Type 'help' for commands.", cmd),
        }
    }
}

/// Drive the stage in real time until nothing is scheduled, printing text
/// as it appears.
fn run(stage: &mut Stage, shown: &mut String) {
    let started = Instant::now();
    let offset = stage.now();
    let mut stdout = io::stdout();

    while let Some(due) = stage.next_due() {
        let elapsed = offset + started.elapsed().as_millis() as u64;
        if due > elapsed {
            std::thread::sleep(Duration::from_millis(due - elapsed));
        }
        stage.tick(due.max(elapsed));

        let rendered = render_text(stage);
        match rendered.strip_prefix(shown.as_str()) {
            Some(fresh) => print!("{}", fresh),
            None => print!("\n{}", rendered),
        }
        stdout.flush().ok();
        *shown = rendered;
    }

    for effect in stage.drain_effects() {
        match effect {
            HostEffect::Navigate(href) => println!("\n[navigate to {}]", href),
            HostEffect::Reload(location) => println!("\n[reload {}]", location),
            _ => {}
        }
    }
    stage.drain_signals();
    println!();
}

/// The last editable question that takes typed answers.
fn current_question(stage: &Stage) -> Option<NodeId> {
    stage.forms().into_iter().rev().find(|form| {
        stage.form(*form).is_some_and(|branch| {
            branch.accepts_typing() && branch.state() == BranchState::Editable
        })
    })
}

/// The summary of the first choice labelled `label` in any choice group.
fn find_choice(stage: &Stage, label: &str) -> Option<NodeId> {
    let document = stage.document();
    stage.groups().into_iter().find_map(|group| {
        document.children(group).iter().find_map(|child| {
            let is_details = matches!(
                document.element(*child).map(|e| &e.kind),
                Some(ElementKind::Details { .. })
            );
            if !is_details {
                return None;
            }
            summary_of(document, *child)
                .filter(|summary| document.text_content(*summary).trim().eq_ignore_ascii_case(label))
        })
    })
}

fn print_status(stage: &Stage) {
    println!("Terminals:");
    for node in stage.terminals() {
        if let Some(terminal) = stage.terminal(node) {
            let id = stage
                .document()
                .element(node)
                .and_then(|e| e.id.clone())
                .unwrap_or_else(|| format!("{:?}", node));
            println!(
                "  {:<24} {:?} ({} of {} left)",
                id,
                terminal.state(),
                terminal.remaining(),
                terminal.total_chars()
            );
        }
    }
    println!("Questions:");
    for node in stage.forms() {
        if let Some(branch) = stage.form(node) {
            println!(
                "  {:<24} {:?} '{}'",
                branch.label(),
                branch.state(),
                branch.value()
            );
        }
    }
    println!("Choice groups:");
    for node in stage.groups() {
        if let Some(group) = stage.group(node) {
            println!(
                "  {:<24} selected={} globals={}",
                group.id(),
                group.is_selected(),
                group.entries().len()
            );
        }
    }
}

fn print_usage() {
    println!("Usage: preview <script.ron> [--config <path>] [--store <path>] [--seed <n>]");
    println!("               [--location <url>] [--instant]");
    println!();
    println!("Options:");
    println!("  --config <path>    Stage configuration (RON)");
    println!("  --store <path>     Keep choices in a RON file between runs");
    println!("  --seed <n>         RNG seed for chunk sizes");
    println!("  --location <url>   Page address; add ?reset to forget saved choices");
    println!("  --instant          Reveal everything at once (reduced motion)");
}

fn print_help() {
    println!("Commands:");
    println!("  answer <text>   — answer the current question");
    println!("  choose <label>  — pick a choice (or global command) by its label");
    println!("  play <id>       — play a terminal");
    println!("  skip <id>       — reveal a terminal at once");
    println!("  reset <id>      — put a terminal back to its authored content");
    println!("  show            — print everything currently visible");
    println!("  status          — list terminals, questions and groups");
    println!("  help            — list commands");
    println!("  quit            — exit");
}
