// LogRelay - app/mod.rs
//
// Application layer: change detection, tailing, distribution, history and
// the subscription transport.
// Dependencies: core, platform, util.

pub mod dispatch;
pub mod engine;
pub mod fanout;
pub mod history;
pub mod poller;
pub mod server;
pub mod tail;
pub mod watcher;
