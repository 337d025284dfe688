//! Device and firmware catalog
//!
//! The catalog is a read-only collaborator: it lists devices, returns a
//! device's boards and released firmwares, and separately lists beta
//! firmwares. [`IpswCatalog`] talks to the public JSON services; tests and
//! embedders can supply their own [`Catalog`].

mod ipsw;

pub use ipsw::{DeviceListCache, IpswCatalog};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::CatalogError;

/// Catalog result type
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Read-only device catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Every known device
    async fn list_devices(&self) -> Result<Arc<[DeviceSummary]>>;

    /// Full record of one device, including released firmwares
    async fn get_device(&self, identifier: &str) -> Result<DeviceRecord>;

    /// Beta firmwares of one device
    async fn get_beta_firmwares(&self, identifier: &str) -> Result<Vec<FirmwareRecord>>;
}

/// One hardware board configuration of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// Board identifier, e.g. `D17AP`
    pub boardconfig: String,
    /// SoC platform, e.g. `t8110`
    #[serde(default)]
    pub platform: Option<String>,
    /// Chip ID
    #[serde(default)]
    pub cpid: Option<u64>,
    /// Board ID
    #[serde(default)]
    pub bdid: Option<u64>,
}

impl Board {
    /// Board with only an identifier
    pub fn new(boardconfig: impl Into<String>) -> Self {
        Self {
            boardconfig: boardconfig.into(),
            platform: None,
            cpid: None,
            bdid: None,
        }
    }

    /// Whether this is a production board (`...AP`), not a development one
    pub fn is_release(&self) -> bool {
        is_release_board(&self.boardconfig)
    }
}

/// Whether a board identifier names a production board
pub fn is_release_board(boardconfig: &str) -> bool {
    boardconfig.to_ascii_lowercase().ends_with("ap")
}

/// Entry of the device list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    /// Marketing name, e.g. `iPhone 13`
    pub name: String,
    /// Product type, e.g. `iPhone14,5`
    pub identifier: String,
    /// Board configurations
    #[serde(default)]
    pub boards: Vec<Board>,
}

/// One firmware build offered for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareRecord {
    /// Version label, e.g. `16.5` or `17.0 beta 2`
    pub version: String,
    /// Build identifier, e.g. `20F66`
    pub buildid: String,
    /// Archive download URL
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    /// Whether the build is currently signed
    #[serde(default, deserialize_with = "null_as_default")]
    pub signed: bool,
    /// Archive size in bytes, when known
    #[serde(default)]
    pub filesize: Option<u64>,
}

/// Full device record with boards and firmwares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Marketing name
    pub name: String,
    /// Product type
    pub identifier: String,
    /// Board configurations
    #[serde(default)]
    pub boards: Vec<Board>,
    /// Released (and after merging, beta) firmwares
    #[serde(default)]
    pub firmwares: Vec<FirmwareRecord>,
}

impl DeviceRecord {
    /// Stand-in record when the catalog has no firmware data for a device
    pub fn from_summary(summary: &DeviceSummary) -> Self {
        Self {
            name: summary.name.clone(),
            identifier: summary.identifier.clone(),
            boards: summary.boards.clone(),
            firmwares: Vec::new(),
        }
    }

    /// Append firmwares whose build id is not yet listed
    ///
    /// Returns the number of records added. Existing records always win.
    pub fn merge_firmwares(&mut self, extra: impl IntoIterator<Item = FirmwareRecord>) -> usize {
        let mut seen: HashSet<String> = self.firmwares.iter().map(|f| f.buildid.clone()).collect();
        let before = self.firmwares.len();
        for firmware in extra {
            if seen.insert(firmware.buildid.clone()) {
                self.firmwares.push(firmware);
            }
        }
        self.firmwares.len() - before
    }

    /// Production board identifiers, in catalog order
    pub fn release_boards(&self) -> Vec<String> {
        self.boards
            .iter()
            .filter(|b| b.is_release())
            .map(|b| b.boardconfig.clone())
            .collect()
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
