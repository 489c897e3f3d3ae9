// LogRelay - core/mod.rs
//
// Core logic layer: record model, line decoding, domain registry, offset
// tracking, log directory listing.
// Must NOT depend on: app or platform. Spawns no threads.

pub mod discovery;
pub mod model;
pub mod offsets;
pub mod parser;
pub mod registry;
