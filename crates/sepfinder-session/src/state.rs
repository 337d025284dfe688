//! Selection state
//!
//! Each variant carries exactly the data collected so far, so a state such
//! as "board chosen but no device" cannot be represented.

use bytes::Bytes;
use sepfinder_protocol::{DeviceRecord, DeviceSummary, FirmwareRecord};

/// Device families offered at the first step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    IPhone,
    IPad,
    IPodTouch,
    AppleTv,
}

impl DeviceType {
    /// Every device type, in menu order
    pub const ALL: [Self; 4] = [Self::IPhone, Self::IPad, Self::IPodTouch, Self::AppleTv];

    /// Label shown to the user
    pub fn label(self) -> &'static str {
        match self {
            Self::IPhone => "iPhone",
            Self::IPad => "iPad",
            Self::IPodTouch => "iPod touch",
            Self::AppleTv => "Apple TV",
        }
    }

    /// Product type prefix of devices in this family
    pub fn identifier_prefix(self) -> &'static str {
        match self {
            Self::IPhone => "iPhone",
            Self::IPad => "iPad",
            Self::IPodTouch => "iPod",
            Self::AppleTv => "AppleTV",
        }
    }

    /// Look a device type up by its exact label
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.label() == label)
    }

    /// Whether a product type belongs to this family
    pub fn matches(self, identifier: &str) -> bool {
        identifier.starts_with(self.identifier_prefix())
    }
}

/// Firmware choices offered for one device and board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareMenu {
    pub device: DeviceRecord,
    pub board: String,
    /// Signed firmwares, oldest first
    pub firmwares: Vec<FirmwareRecord>,
}

impl FirmwareMenu {
    /// Firmware whose label is exactly `version`
    pub fn find(&self, version: &str) -> Option<&FirmwareRecord> {
        self.firmwares.iter().find(|f| f.version == version)
    }

    /// Labels in menu order
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.firmwares.iter().map(|f| f.version.as_str())
    }
}

/// A firmware whose manifest has been fetched and resolved for a board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBuild {
    pub device_name: String,
    pub board: String,
    pub firmware: FirmwareRecord,
    /// Raw manifest bytes, bundled unchanged
    pub manifest: Bytes,
    pub sep_path: Option<String>,
    pub baseband_path: Option<String>,
}

impl ResolvedBuild {
    /// File name of the output bundle
    pub fn bundle_name(&self) -> String {
        format!("sepbb_{}_{}.zip", self.board, self.firmware.buildid)
    }

    /// Summary shown once the build is resolved
    pub fn summary(&self) -> String {
        format!(
            "{} ({}) - {} ({})\n\nSEP: {}\nBaseband: {}",
            self.device_name,
            self.board,
            self.firmware.version,
            self.firmware.buildid,
            self.sep_path.as_deref().unwrap_or("None"),
            self.baseband_path.as_deref().unwrap_or("None"),
        )
    }
}

/// Where a session stands in the selection flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SelectionState {
    /// No selection in progress
    #[default]
    Idle,
    AwaitingDeviceType,
    AwaitingDeviceModel {
        devices: Vec<DeviceSummary>,
    },
    AwaitingBoardConfig {
        device: DeviceRecord,
        boards: Vec<String>,
    },
    AwaitingFirmwareVersion(FirmwareMenu),
    /// A build is ready to download; another version may still be picked
    Resolved {
        menu: FirmwareMenu,
        build: ResolvedBuild,
    },
}

impl SelectionState {
    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingDeviceType => "awaiting device type",
            Self::AwaitingDeviceModel { .. } => "awaiting device model",
            Self::AwaitingBoardConfig { .. } => "awaiting board config",
            Self::AwaitingFirmwareVersion(_) => "awaiting firmware version",
            Self::Resolved { .. } => "resolved",
        }
    }

    /// Resolved build, if any
    pub fn resolved(&self) -> Option<&ResolvedBuild> {
        match self {
            Self::Resolved { build, .. } => Some(build),
            _ => None,
        }
    }
}
