pub mod icons;
pub mod preview;
pub mod progress;

pub use preview::{preview_width, render_draft, render_topics};
pub use progress::FlowUI;
