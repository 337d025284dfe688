//! Board-level view over a build manifest

use super::BuildIdentityRecord;
use super::{BASEBAND_COMPONENT, ResolveError, SEP_COMPONENT};

/// Component paths for one board configuration
///
/// Paths are archive-relative entry names. `None` means the board has no such
/// component, which is normal for Wi-Fi-only devices and their baseband.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdentity {
    /// Board identifier as written in the manifest (e.g. `D83AP`)
    pub board_id: String,
    /// Path of the Secure Enclave firmware image
    pub sep_path: Option<String>,
    /// Path of the baseband firmware
    pub baseband_path: Option<String>,
}

impl BuildIdentity {
    /// Identity of a record already matched by device class
    pub(super) fn from_record(record: &BuildIdentityRecord) -> Result<Self, ResolveError> {
        Ok(Self {
            board_id: record.device_class().unwrap_or_default().to_string(),
            sep_path: record.component_path(SEP_COMPONENT)?,
            baseband_path: record.component_path(BASEBAND_COMPONENT)?,
        })
    }

    /// Whether two identities name the same components
    pub fn same_components(&self, other: &Self) -> bool {
        self.sep_path == other.sep_path && self.baseband_path == other.baseband_path
    }

    /// Paths of every present component, SEP first
    pub fn component_paths(&self) -> impl Iterator<Item = &str> {
        self.sep_path
            .as_deref()
            .into_iter()
            .chain(self.baseband_path.as_deref())
    }
}
