//! Hive Test - Shared test utilities for the DeviceHive message platform.
//!
//! Mock collaborators and fixtures used across crates as a dev-dependency.
//!
//! ```rust,ignore
//! use hive_test::{MockPollTransport, RecordingHandler, at, notification_at};
//!
//! let transport = MockPollTransport::new().with_batch(vec![notification_at("d1", "temp", at(10))]);
//! let handler = RecordingHandler::new();
//! // hand both to PollingSubscriptions, then:
//! let seen = handler.wait_for_notifications(1, Duration::from_secs(1)).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
