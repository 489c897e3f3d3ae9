// LogRelay - lib.rs
//
// Library entry point, exposing every module for integration testing and
// for embedding the engine in another process.
//
// The command-line front end lives in `main.rs` and is not part of the
// library surface.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;

pub use app::engine::{Engine, EngineCore};
pub use platform::config::AppConfig;
