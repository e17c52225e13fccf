//! Collaborator boundaries the engines talk through: the voice transport,
//! text channels, and the subprocess runners for download/transcode.
//!
//! The host platform adapter implements these traits; [`memory`] ships an
//! in-process implementation used by tests and offline runs.

pub mod context;
pub mod memory;
pub mod process;
pub mod text;
pub mod voice;

pub use context::*;
pub use process::{AudioTranscoder, FfmpegTranscoder, SongDownloader, YtDlpDownloader};
pub use text::TextChannel;
pub use voice::*;
