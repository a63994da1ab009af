//! Wire and domain types shared by MultiDB Academy clients.

pub mod types;

pub use types::*;
