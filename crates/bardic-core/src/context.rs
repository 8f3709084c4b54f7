use bardic_ports::input::{BindingDescriptionSource, KeyStateReader, NotePressSource};
use bardic_ports::metronome::MetronomeLink;
use bardic_ports::playback::SoundOutputPort;

/// Collaborators handed to the assistant once at construction. Every slot
/// is optional; a missing collaborator disables its feature.
#[derive(Default)]
pub struct AssistContext {
    pub sound_output: Option<Box<dyn SoundOutputPort>>,
    pub metronome: Option<Box<dyn MetronomeLink>>,
    pub note_presses: Option<Box<dyn NotePressSource>>,
    pub key_state: Option<Box<dyn KeyStateReader>>,
    pub bindings: Option<Box<dyn BindingDescriptionSource>>,
}

impl AssistContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sound_output(mut self, port: Box<dyn SoundOutputPort>) -> Self {
        self.sound_output = Some(port);
        self
    }

    pub fn with_metronome(mut self, link: Box<dyn MetronomeLink>) -> Self {
        self.metronome = Some(link);
        self
    }

    pub fn with_note_presses(mut self, source: Box<dyn NotePressSource>) -> Self {
        self.note_presses = Some(source);
        self
    }

    pub fn with_key_state(mut self, reader: Box<dyn KeyStateReader>) -> Self {
        self.key_state = Some(reader);
        self
    }

    pub fn with_bindings(mut self, source: Box<dyn BindingDescriptionSource>) -> Self {
        self.bindings = Some(source);
        self
    }
}
