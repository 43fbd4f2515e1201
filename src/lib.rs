//! SQLsaber - a natural-language SQL assistant.
//!
//! A user submits an English question; a coordinating agent backed by an LLM
//! discovers the relevant tables, composes SQL, executes it read-only against
//! a live database, and streams an explanation with results back to the
//! caller. This library exposes the agent orchestrator, the streaming LLM
//! client, the safe SQL execution layer, and the knowledge/memory stores.

pub mod agent;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod schema;
pub mod tools;
pub mod viz;
