pub mod common;
mod deep_tests;
mod record_tests;
mod source_tests;
