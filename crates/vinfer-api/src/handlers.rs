//! Request handlers.

pub mod computations;
pub mod health;
pub mod videos;

pub use computations::*;
pub use health::*;
pub use videos::*;
