//! Core engines for a Discord-style music and AI chat bot.
//!
//! The crate owns the two stateful subsystems of the bot: the per-guild
//! playback orchestration ([`playback::PlaybackEngine`]) and the streaming
//! text-generation pipeline ([`generation::GenerationPipeline`]). The
//! platform front-end (gateway socket, command parsing, slash schemas)
//! lives outside this crate and talks to the engines through the
//! collaborator traits in [`transport`] and the plain-data results in
//! [`messaging`].

pub mod common;
pub mod configs;
pub mod generation;
pub mod messaging;
pub mod playback;
pub mod sources;
pub mod stats;
pub mod transport;

pub use common::errors::{GenerationError, PlaybackError};
pub use generation::GenerationPipeline;
pub use messaging::{CommandOutcome, MessageContent};
pub use playback::PlaybackEngine;
