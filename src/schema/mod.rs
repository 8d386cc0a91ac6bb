//! Content model: authoring markup and the live document tree.

pub mod document;
pub mod markup;
pub mod node;
