//! the test_utils folder here shares helpers between the unit tests of
//! every module
mod common;

pub use common::*;
