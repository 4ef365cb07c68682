//! Shared mocks and fixtures for the crate's tests.

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
