//! Test support: in-memory mock implementations of the ports.

pub mod mocks;
