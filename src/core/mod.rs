pub mod branch;
pub mod config;
pub mod cursor;
pub mod group;
pub mod registry;
pub mod render;
pub mod serializer;
pub mod signal;
pub mod stage;
pub mod store;
pub mod terminal;
pub mod timeline;
