//! Sliding-window statistics and the per-node/global stats shapes built on
//! top of them.

pub mod cycle;
pub mod load;
pub mod window;

pub use load::{LoadStats, NodeStats, ServerLoadStats};
pub use window::SlidingWindow;
