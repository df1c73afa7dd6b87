use crate::events::EventRecord;

pub const UNKNOWN: &str = "unknown";

const KEY_SEPARATOR: &str = " | ";

/// Sticky origin/profile context carried across a linear scan.
///
/// Log streams set `ip` and `profile_type` once and let them implicitly
/// apply to everything after, so the resolver keeps the last seen value
/// until a record overrides it. Threaded as a value through each ingestion
/// step rather than held as ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanContext {
    pub origin: String,
    pub profile: String,
}

impl Default for ScanContext {
    fn default() -> Self {
        Self {
            origin: UNKNOWN.to_string(),
            profile: UNKNOWN.to_string(),
        }
    }
}

impl ScanContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the context as it stands after this record. Missing fields
    /// keep their previous value; there is no error path.
    pub fn absorb(&self, record: &EventRecord) -> ScanContext {
        ScanContext {
            origin: record
                .origin
                .clone()
                .unwrap_or_else(|| self.origin.clone()),
            profile: record
                .profile
                .clone()
                .unwrap_or_else(|| self.profile.clone()),
        }
    }

    /// Composite grouping key. Not normalized; distinct runs from the same
    /// origin and profile are meant to collide into one group.
    pub fn session_key(&self) -> String {
        format!("{}{}{}", self.origin, KEY_SEPARATOR, self.profile)
    }
}
