//! Configuration for live collection views.

use serde::{Deserialize, Serialize};

use crate::change::EventFilter;
use crate::source::ListenOptions;

/// Tuning shared by every view opened from one `LiveCollection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveQueryConfig {
    /// Ask the store for metadata-only notifications and surface documents
    /// whose sync state changed as in-place modifications.
    pub include_metadata_changes: bool,
    /// Filter used when a view is requested with an empty filter.
    pub default_events: EventFilter,
}

impl Default for LiveQueryConfig {
    fn default() -> Self {
        Self {
            include_metadata_changes: true,
            default_events: EventFilter::all(),
        }
    }
}

impl LiveQueryConfig {
    /// Resolves the filter a view should apply.
    ///
    /// Absent and empty requests are treated the same on every view.
    #[must_use]
    pub const fn resolve_events(&self, requested: EventFilter) -> EventFilter {
        if requested.is_empty() {
            self.default_events.normalized()
        } else {
            requested
        }
    }

    /// Listener options derived from this configuration.
    #[must_use]
    pub const fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            include_metadata_changes: self.include_metadata_changes,
        }
    }
}
