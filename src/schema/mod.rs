//! Schema definitions for the browsed knowledge graph
//!
//! Typed records for characters, plays, actors, scenes and quotes. Producers
//! return these; the cache stores them as JSON.

pub mod types;

pub use types::{Actor, Character, ChatReply, Entity, Play, Quote, Scene};
