use crate::types::NoteName;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("signal unavailable: {0}")]
    Unavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Receives the externally observed "active note". Pitch 0 means no note.
/// Pitches are relative to the game's default octave window.
pub type NotePressCallback = Arc<dyn Fn(u8) + Send + Sync + 'static>;

pub trait NotePressSource: Send {
    /// Implementation may invoke cb from another thread.
    fn subscribe(&mut self, cb: NotePressCallback) -> Result<(), InputError>;
    fn unsubscribe(&mut self);
}

/// Polled key state, in game-relative pitches.
pub trait KeyStateReader: Send {
    fn is_pitch_held(&self, pitch: u8) -> bool;
}

/// Human-readable key binding for a note. `octave_offset` is relative to the
/// game's middle octave (-1, 0, +1 in basic mode).
pub trait BindingDescriptionSource: Send {
    fn describe(&self, note: NoteName, octave_offset: i32) -> Option<String>;
}
