//! # Types
//!
//! Plain value types shared by the frame cache, the unwinders that feed it and
//! the targets it reads from.

pub mod address;
pub mod arch;
pub mod registers;

pub use address::Address;
pub use arch::Architecture;
pub use registers::{Cached, RegisterContents, RegisterLocation, RegisterValue};
