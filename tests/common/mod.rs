//! Common test utilities for condense-dispatch integration tests

#[allow(dead_code)]
pub mod condensers;
#[allow(dead_code)]
pub mod fixtures;

#[allow(unused_imports)]
pub use condensers::*;
#[allow(unused_imports)]
pub use fixtures::*;
