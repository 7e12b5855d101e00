//! Request handlers.

pub mod artifacts;
pub mod health;
pub mod tasks;

pub use artifacts::*;
pub use health::*;
pub use tasks::*;
