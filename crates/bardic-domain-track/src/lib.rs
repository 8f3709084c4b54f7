pub mod midi_import;
pub mod model;
pub mod stats;
pub mod tempo_map;
pub mod transform;

pub use midi_import::*;
pub use model::*;
pub use stats::*;
pub use tempo_map::*;
pub use transform::*;
