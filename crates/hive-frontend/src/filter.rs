//! What a subscription or poll covers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hive_core::{DeviceScope, SearchQuery, WILDCARD};

use crate::error::{FrontendError, FrontendResult};

/// Devices, names and starting cursor of a subscription.
///
/// `device_ids: None` covers every device and becomes a single
/// [`DeviceScope::Any`] registration. `names: None` covers every name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Devices to cover.
    pub device_ids: Option<Vec<String>>,
    /// Names to cover.
    pub names: Option<BTreeSet<String>>,
    /// Replay stored items newer than this.
    pub since: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// Every device, every name, live items only.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only the given devices.
    #[must_use]
    pub fn devices<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            device_ids: Some(devices.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Restrict to the given names.
    #[must_use]
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Replay stored items newer than `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// One scope per distinct device, or the wildcard.
    ///
    /// # Errors
    ///
    /// Returns [`FrontendError::Validation`] for an empty device list, an
    /// empty device id, or the wildcard sentinel used as a device id.
    pub fn scopes(&self) -> FrontendResult<Vec<DeviceScope>> {
        let Some(devices) = &self.device_ids else {
            return Ok(vec![DeviceScope::Any]);
        };
        if devices.is_empty() {
            return Err(FrontendError::Validation("device list is empty".to_owned()));
        }
        if devices.iter().any(String::is_empty) {
            return Err(FrontendError::Validation("device id is empty".to_owned()));
        }
        if devices.iter().any(|id| id == WILDCARD) {
            return Err(FrontendError::Validation(format!(
                "{WILDCARD:?} is not a device id; omit the device list to cover every device"
            )));
        }
        let distinct: BTreeSet<&String> = devices.iter().collect();
        Ok(distinct.into_iter().map(DeviceScope::device).collect())
    }

    /// Names to send, with an empty set treated as "every name".
    #[must_use]
    pub fn name_set(&self) -> Option<BTreeSet<String>> {
        self.names.clone().filter(|names| !names.is_empty())
    }

    /// Store query for items newer than `since`.
    #[must_use]
    pub fn search_since(&self, since: DateTime<Utc>) -> SearchQuery {
        SearchQuery {
            device_ids: self
                .device_ids
                .as_ref()
                .map(|devices| devices.iter().cloned().collect()),
            names: self.name_set(),
            since: Some(since),
            ..SearchQuery::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_devices_is_wildcard() {
        assert_eq!(EventFilter::all().scopes().unwrap(), vec![DeviceScope::Any]);
    }

    #[test]
    fn test_duplicate_devices_collapse() {
        let scopes = EventFilter::devices(["d2", "d1", "d2"]).scopes().unwrap();
        assert_eq!(
            scopes,
            vec![DeviceScope::device("d1"), DeviceScope::device("d2")]
        );
    }

    #[test]
    fn test_empty_device_list_rejected() {
        let err = EventFilter::devices(Vec::<String>::new()).scopes().unwrap_err();
        assert!(matches!(err, FrontendError::Validation(_)));
        assert!(EventFilter::devices([""]).scopes().is_err());
    }

    #[test]
    fn test_wildcard_sentinel_is_not_a_device() {
        let err = EventFilter::devices(["d1", "*"]).scopes().unwrap_err();
        assert!(matches!(err, FrontendError::Validation(_)));
    }

    #[test]
    fn test_search_since() {
        let since = Utc::now();
        let filter = EventFilter::devices(["d1"]).with_names(Vec::<String>::new());
        let query = filter.search_since(since);
        assert_eq!(query.device_ids, Some(BTreeSet::from(["d1".to_owned()])));
        assert_eq!(query.names, None);
        assert_eq!(query.since, Some(since));
    }
}
