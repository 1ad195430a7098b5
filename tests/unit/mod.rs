//! Integration test tree, routed through a single test target.

mod coordinator_tests;
mod logger_tests;
mod property_tests;
mod replay_tests;
mod support;
