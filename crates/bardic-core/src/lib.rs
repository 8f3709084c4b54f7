pub mod app;
pub mod bindings;
pub mod clock;
pub mod context;
pub mod diagnostics;
pub mod input;
pub mod ipc;
pub mod viewer;

pub use app::*;
pub use bindings::*;
pub use clock::*;
pub use context::*;
pub use diagnostics::*;
pub use input::*;
pub use ipc::*;
pub use viewer::*;
