use std::collections::{HashMap, HashSet};

use crate::message::{ConsumerId, Format};

/// Decides whether a consumer may be assigned a format.
///
/// Implemented for closures, so `|format, consumer| ...` works wherever an approver is expected.
pub trait Approver: Send + Sync {
    /// True if `consumer_id` may write `format`.
    fn is_approved(&self, format: Format, consumer_id: &ConsumerId) -> bool;
}

impl<F> Approver for F
where
    F: Fn(Format, &ConsumerId) -> bool + Send + Sync,
{
    fn is_approved(&self, format: Format, consumer_id: &ConsumerId) -> bool {
        self(format, consumer_id)
    }
}

/// Approves every consumer for every format.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApproveAll;

impl Approver for ApproveAll {
    fn is_approved(&self, _format: Format, _consumer_id: &ConsumerId) -> bool {
        true
    }
}

/// Per-format allow-list.
///
/// A format without an entry accepts any consumer; a format with an entry accepts only the
/// listed consumers.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    allowed: HashMap<Format, HashSet<ConsumerId>>,
}

impl AllowList {
    /// Creates an empty allow-list (approves everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts `format` to the given consumers (accumulates across calls).
    pub fn allow(
        mut self,
        format: Format,
        consumers: impl IntoIterator<Item = ConsumerId>,
    ) -> Self {
        self.allowed.entry(format).or_default().extend(consumers);
        self
    }
}

impl Approver for AllowList {
    fn is_approved(&self, format: Format, consumer_id: &ConsumerId) -> bool {
        self.allowed
            .get(&format)
            .is_none_or(|consumers| consumers.contains(consumer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_restricts_only_listed_formats() {
        let list = AllowList::new().allow(Format::Png, [ConsumerId::new("graphics")]);
        assert!(list.is_approved(Format::Png, &ConsumerId::new("graphics")));
        assert!(!list.is_approved(Format::Png, &ConsumerId::new("other")));
        assert!(list.is_approved(Format::Csv, &ConsumerId::new("other")));
    }

    #[test]
    fn test_closure_approver() {
        let approver = |format: Format, consumer: &ConsumerId| {
            format != Format::Netcdf || consumer.as_str() == "grid"
        };
        assert!(approver.is_approved(Format::Netcdf, &ConsumerId::new("grid")));
        assert!(!approver.is_approved(Format::Netcdf, &ConsumerId::new("tab")));
    }
}
