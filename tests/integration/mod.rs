//! Integration tests for querybatch.

pub mod batch_test;
pub mod config_test;
pub mod postgres_test;
pub mod script_test;
