//! Narrative Terminal — typewriter reveals and branching dialogue.
//!
//! Reveals structured content character by character on a cooperative
//! timer, and chains those reveals into a choice-driven dialogue whose
//! progress survives a reload. The host owns the clock, the screen and the
//! input; the engine owns the document and decides what happens next.

pub mod core;
pub mod schema;
