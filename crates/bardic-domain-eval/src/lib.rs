pub mod score_tracker;

pub use score_tracker::*;
