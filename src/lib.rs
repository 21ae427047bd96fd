#![forbid(unsafe_code)]

pub mod buffer;
pub mod bus;
pub mod config;
pub mod datamodel;
pub mod ingestors;
pub mod parsing;
pub mod publisher;
pub mod scheduler;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
