pub mod midi;
pub mod storage;
pub mod time;
pub mod types;

pub use midi::*;
pub use storage::*;
pub use time::*;
pub use types::*;
