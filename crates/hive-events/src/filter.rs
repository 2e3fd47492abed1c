//! Subscription-creation descriptor.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hive_core::{DeviceScope, EventKind};

use crate::error::{EventBusError, EventBusResult};
use crate::subscriber::Subscription;

/// What a subscribe request asks for, before it is expanded into rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    /// Device scope. Required; use [`DeviceScope::Any`] for every device.
    pub device: Option<DeviceScope>,
    /// Names to match; absent or empty matches every name.
    pub names: Option<BTreeSet<String>>,
    /// Cursor: replay stored items newer than this.
    pub since: Option<DateTime<Utc>>,
}

impl Filter {
    /// Filter for one device scope.
    #[must_use]
    pub fn new(device: DeviceScope) -> Self {
        Self {
            device: Some(device),
            names: None,
            since: None,
        }
    }

    /// Restrict to these names.
    #[must_use]
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set the starting cursor.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// Expand into one row per name.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::MissingEntity`] when no device scope is set.
    pub fn expand(&self, kind: EventKind) -> EventBusResult<Vec<Subscription>> {
        let device = self.device.as_ref().ok_or(EventBusError::MissingEntity)?;
        Ok(Subscription::expand(kind, device, self.names.as_ref()))
    }
}
