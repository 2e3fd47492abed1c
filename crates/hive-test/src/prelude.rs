//! Prelude module - commonly used test utilities.
//!
//! Use `use hive_test::prelude::*;` in test modules.

pub use crate::fixtures::{at, command, command_at, init_test_logging, notification, notification_at};
pub use crate::mocks::{
    FlakyStore, MockPollTransport, RecordingDispatcher, RecordingHandler, StaticAuthenticator,
};
