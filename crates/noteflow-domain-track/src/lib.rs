pub mod bar_lines;
pub mod events;
pub mod midi_import;
pub mod model;
pub mod tempo;
pub mod weights;

pub use bar_lines::*;
pub use events::*;
pub use midi_import::*;
pub use model::*;
pub use tempo::*;
pub use weights::*;
