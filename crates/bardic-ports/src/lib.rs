pub mod input;
pub mod metronome;
pub mod playback;
pub mod settings;
pub mod types;

pub use input::*;
pub use metronome::*;
pub use playback::*;
pub use settings::*;
pub use types::*;
