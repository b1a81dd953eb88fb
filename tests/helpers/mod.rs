//! Shared fixtures for chunked processing tests

#![allow(dead_code)]

pub mod fastq_fixture;
pub mod log_capture;
pub mod processors;

pub use fastq_fixture::*;
pub use log_capture::*;
pub use processors::*;
