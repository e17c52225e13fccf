pub mod base;
pub mod generation;
pub mod logging;
pub mod player;

pub use base::*;
pub use generation::*;
pub use logging::*;
pub use player::*;
