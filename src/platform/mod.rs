// LogRelay - platform/mod.rs
//
// Platform abstraction layer: config file location and loading, ranged file
// reads with deadlines.
// Must NOT depend on: core, app.

pub mod config;
pub mod fs;
