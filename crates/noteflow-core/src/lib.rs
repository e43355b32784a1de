pub mod clock;
pub mod ipc;
pub mod live_notes;
pub mod selection;
pub mod session;

pub use clock::*;
pub use ipc::*;
pub use live_notes::*;
pub use selection::*;
pub use session::*;
