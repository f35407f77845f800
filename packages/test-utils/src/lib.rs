//! Test utilities for the live engine
//!
//! [`MockTradeSite`] runs an in-process trading site (search, live delta and
//! push socket endpoints) with scripted responses, and records what the
//! engine sent so tests can assert on it.

pub mod fixtures;
pub mod server;

pub use fixtures::{delta_body, item, removed, search_body, wait_for};
pub use server::{MockTradeSite, RecordedRequest};
