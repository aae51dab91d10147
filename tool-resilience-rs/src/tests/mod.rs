//! Cross-component tests for the resilience layer
//!
//! Unit tests live next to the code they cover; these drive several
//! components together through a scripted tool registry.

pub mod support;

pub mod degradation_tests;
pub mod layer_tests;
