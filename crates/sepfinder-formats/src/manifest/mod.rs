//! Build manifest parsing and board resolution
//!
//! A build manifest is a property list (binary or XML) shaped like:
//!
//! ```text
//! BuildIdentities: [
//!     {
//!         Info: { DeviceClass: "d83ap", RestoreBehavior: "Erase", ... },
//!         Manifest: {
//!             RestoreSEP:       { Info: { Path: "Firmware/all_flash/sep-firmware.d83.RELEASE.im4p" } },
//!             BasebandFirmware: { Info: { Path: "Firmware/Mav21-1.60.00.Release.bbfw" } },
//!             ...
//!         },
//!     },
//!     ...
//! ]
//! ```
//!
//! Boards usually appear twice, once per restore behavior, with identical
//! component paths. Resolution treats such pairs as one identity.

mod error;
mod identity;

pub use error::{ManifestError, ManifestFormatError, ResolveError};
pub use identity::BuildIdentity;

use serde::Deserialize;
use std::collections::BTreeMap;

/// Component key of the Secure Enclave firmware
pub const SEP_COMPONENT: &str = "RestoreSEP";
/// Component key of the baseband firmware
pub const BASEBAND_COMPONENT: &str = "BasebandFirmware";
/// File name of the manifest, both inside archives and next to them
pub const BUILD_MANIFEST_FILE: &str = "BuildManifest.plist";

/// Parsed build manifest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BuildManifest {
    build_identities: Vec<BuildIdentityRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct BuildIdentityRecord {
    #[serde(default)]
    info: IdentityInfo,
    manifest: Option<BTreeMap<String, ManifestComponent>>,
}

impl BuildIdentityRecord {
    fn device_class(&self) -> Option<&str> {
        self.info.device_class.as_deref()
    }

    /// Path of `component`; `None` when the identity does not list it
    fn component_path(&self, component: &str) -> Result<Option<String>, ResolveError> {
        let incomplete = |detail: String| ResolveError::IncompleteIdentity {
            board: self.device_class().unwrap_or_default().to_string(),
            detail,
        };

        let manifest = self
            .manifest
            .as_ref()
            .ok_or_else(|| incomplete("no Manifest dictionary".to_string()))?;
        let Some(entry) = manifest.get(component) else {
            return Ok(None);
        };
        let path = entry
            .info
            .as_ref()
            .and_then(|info| info.path.as_deref())
            .ok_or_else(|| incomplete(format!("{component} has no Info.Path")))?;

        let path = path.trim();
        Ok((!path.is_empty()).then(|| path.to_string()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdentityInfo {
    #[serde(default)]
    device_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ManifestComponent {
    #[serde(default)]
    info: Option<ComponentInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ComponentInfo {
    #[serde(default)]
    path: Option<String>,
}

impl BuildManifest {
    /// Parse a binary or XML property list
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestFormatError> {
        Ok(plist::from_bytes(bytes)?)
    }

    /// Resolve component paths for `board`, ignoring ASCII case
    ///
    /// Matching identities with identical component paths collapse to the
    /// first one. Matches that disagree are reported rather than guessed, and
    /// a matching identity whose listed components lack a path is an error.
    pub fn resolve(&self, board: &str) -> Result<BuildIdentity, ResolveError> {
        let mut matches = self
            .build_identities
            .iter()
            .filter(|record| {
                record
                    .device_class()
                    .is_some_and(|class| class.eq_ignore_ascii_case(board))
            })
            .map(BuildIdentity::from_record);

        let first = matches.next().ok_or_else(|| ResolveError::BoardNotFound {
            board: board.to_string(),
        })??;

        let rest = matches.collect::<Result<Vec<_>, _>>()?;
        if rest.iter().all(|other| other.same_components(&first)) {
            return Ok(first);
        }

        Err(ResolveError::AmbiguousBoard {
            board: board.to_string(),
            count: rest.len() + 1,
        })
    }
}

/// Parse manifest bytes and resolve `board` in one step
pub fn resolve(bytes: &[u8], board: &str) -> Result<BuildIdentity, ManifestError> {
    Ok(BuildManifest::from_bytes(bytes)?.resolve(board)?)
}
