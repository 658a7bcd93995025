pub mod manager;

pub use manager::{LinkConfig, LinkManager, PassAction};
