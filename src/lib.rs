//! AutoTidy engine: periodic folder scanning, rule matching, collision-safe
//! file actions, an append-only JSONL history log, and undo.
//!
//! The engine is headless. It reports everything over an outbound event
//! channel ([`events::WorkerEvent`]); the bundled CLI is one consumer, a GUI
//! or a test harness would be another.

pub mod cli;
pub mod config;
pub mod events;
pub mod executor;
pub mod history;
pub mod pattern;
pub mod rules;
pub mod undo;
pub mod worker;
