//! Selection state machine
//!
//! [`SelectionSession::advance`] takes the current [`SelectionState`] and one
//! line of user input and returns the next state with the replies to send.
//! It never fails: collaborator errors become replies, and the state only
//! moves when a step succeeds.

use sepfinder_formats::BuildManifest;
use sepfinder_protocol::{
    Catalog, DeviceRecord, DeviceSummary, FirmwareRecord, ManifestOrigin, ManifestSource,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bundle::{self, DownloadOutcome};
use crate::error::{Result, SessionStateError};
use crate::reply::{Reply, messages};
use crate::state::{DeviceType, FirmwareMenu, ResolvedBuild, SelectionState};
use crate::version::signed_firmwares;

/// Commands that restart the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Sep,
    SepBb,
}

impl Command {
    /// Recognize a command line such as `/start` or `/sep@somebot`
    pub fn parse(input: &str) -> Option<Self> {
        let name = input.trim().strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _)| name);
        match name {
            "start" => Some(Self::Start),
            "sep" => Some(Self::Sep),
            "sepbb" => Some(Self::SepBb),
            _ => None,
        }
    }
}

/// Next state and the replies produced on the way there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SelectionState,
    pub replies: Vec<Reply>,
}

impl Transition {
    fn to(state: SelectionState, replies: Vec<Reply>) -> Self {
        Self { state, replies }
    }

    fn single(state: SelectionState, reply: Reply) -> Self {
        Self {
            state,
            replies: vec![reply],
        }
    }
}

/// Stateless driver of the selection flow
#[derive(Clone)]
pub struct SelectionSession {
    catalog: Arc<dyn Catalog>,
    manifests: ManifestSource,
}

impl SelectionSession {
    pub fn new(catalog: Arc<dyn Catalog>, manifests: ManifestSource) -> Self {
        Self { catalog, manifests }
    }

    /// Begin a new selection, discarding any previous state
    pub fn start() -> Transition {
        Transition::single(
            SelectionState::AwaitingDeviceType,
            Reply::with_options(
                messages::SELECT_DEVICE_TYPE,
                DeviceType::ALL.iter().map(|t| t.label()),
            ),
        )
    }

    /// Apply one line of input to `state`
    pub async fn advance(&self, state: SelectionState, input: &str) -> Transition {
        if let Some(command) = Command::parse(input) {
            debug!("Restarting selection on {:?}", command);
            return Self::start();
        }

        match state {
            SelectionState::Idle => {
                Transition::single(SelectionState::Idle, Reply::removing(messages::INVALID_STATE))
            }
            SelectionState::AwaitingDeviceType => self.on_device_type(input).await,
            SelectionState::AwaitingDeviceModel { devices } => {
                self.on_device_model(devices, input).await
            }
            SelectionState::AwaitingBoardConfig { device, boards } => {
                Self::on_board_config(device, boards, input)
            }
            SelectionState::AwaitingFirmwareVersion(menu) => {
                self.on_firmware(menu, None, input).await
            }
            // Another version may be picked from the same menu
            SelectionState::Resolved { menu, build } => {
                self.on_firmware(menu, Some(build), input).await
            }
        }
    }

    /// Extract the resolved components and bundle them
    pub async fn download(&self, state: &SelectionState) -> Result<DownloadOutcome> {
        let build = state.resolved().ok_or(SessionStateError {
            operation: "download",
            state: state.name(),
        })?;
        Ok(bundle::assemble(Arc::clone(self.manifests.fetcher()), build).await?)
    }

    async fn on_device_type(&self, input: &str) -> Transition {
        let Some(device_type) = DeviceType::from_label(input) else {
            return Transition::single(
                SelectionState::AwaitingDeviceType,
                Reply::text(messages::INVALID_INPUT),
            );
        };

        let devices = match self.catalog.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Device list unavailable: {}", e);
                return Transition::single(
                    SelectionState::AwaitingDeviceType,
                    Reply::text(messages::CATALOG_UNAVAILABLE),
                );
            }
        };

        let devices: Vec<DeviceSummary> = devices
            .iter()
            .filter(|d| device_type.matches(&d.identifier))
            .cloned()
            .collect();
        debug!("{} devices of type {}", devices.len(), device_type.label());

        if devices.is_empty() {
            return Transition::single(SelectionState::Idle, Reply::removing(messages::NO_DEVICES));
        }

        let reply = Reply::with_options(
            messages::SELECT_DEVICE,
            devices.iter().map(|d| d.name.clone()),
        );
        Transition::single(SelectionState::AwaitingDeviceModel { devices }, reply)
    }

    async fn on_device_model(&self, devices: Vec<DeviceSummary>, input: &str) -> Transition {
        let Some(summary) = devices.iter().find(|d| d.name == input).cloned() else {
            return Transition::single(
                SelectionState::AwaitingDeviceModel { devices },
                Reply::text(messages::INVALID_INPUT),
            );
        };

        let (primary, betas) = tokio::join!(
            self.catalog.get_device(&summary.identifier),
            self.catalog.get_beta_firmwares(&summary.identifier),
        );

        let mut replies = Vec::new();
        let (mut device, primary_failed) = match primary {
            Ok(device) => (device, false),
            Err(e) => {
                warn!("Device record for {} unavailable: {}", summary.identifier, e);
                replies.push(Reply::text(messages::DEVICE_RECORD_UNAVAILABLE));
                (DeviceRecord::from_summary(&summary), true)
            }
        };

        match betas {
            Ok(betas) => {
                let added = device.merge_firmwares(betas);
                debug!("Merged {} beta firmwares for {}", added, summary.identifier);
            }
            Err(e) => {
                warn!("Beta firmwares for {} unavailable: {}", summary.identifier, e);
                replies.push(Reply::text(messages::BETA_UNAVAILABLE));
                if primary_failed {
                    replies.push(Reply::removing(messages::TRY_AGAIN_LATER));
                    return Transition::to(SelectionState::AwaitingDeviceModel { devices }, replies);
                }
            }
        }

        let boards = device.release_boards();
        if boards.is_empty() {
            replies.push(Reply::removing(messages::NO_BOARDS));
            return Transition::to(SelectionState::Idle, replies);
        }
        if let [board] = boards.as_slice() {
            let board = board.clone();
            return Self::firmware_menu(device, board, replies);
        }

        replies.push(Reply::with_options(messages::SELECT_BOARD, boards.clone()));
        Transition::to(SelectionState::AwaitingBoardConfig { device, boards }, replies)
    }

    fn on_board_config(device: DeviceRecord, boards: Vec<String>, input: &str) -> Transition {
        // Any production board id is accepted, listed or not
        if !sepfinder_protocol::catalog::is_release_board(input) {
            return Transition::single(
                SelectionState::AwaitingBoardConfig { device, boards },
                Reply::text(messages::INVALID_INPUT),
            );
        }
        Self::firmware_menu(device, input.to_string(), Vec::new())
    }

    fn firmware_menu(device: DeviceRecord, board: String, mut replies: Vec<Reply>) -> Transition {
        let firmwares = signed_firmwares(&device.firmwares);
        if firmwares.is_empty() {
            replies.push(Reply::removing(messages::NO_FIRMWARES));
            return Transition::to(SelectionState::Idle, replies);
        }

        replies.push(Reply::with_options(
            messages::SELECT_VERSION,
            firmwares.iter().map(|f| f.version.clone()),
        ));
        Transition::to(
            SelectionState::AwaitingFirmwareVersion(FirmwareMenu {
                device,
                board,
                firmwares,
            }),
            replies,
        )
    }

    /// Pick a firmware from `menu`; failures keep the `previous` build, if any
    async fn on_firmware(
        &self,
        menu: FirmwareMenu,
        previous: Option<ResolvedBuild>,
        input: &str,
    ) -> Transition {
        let keep = |menu: FirmwareMenu, previous: Option<ResolvedBuild>| match previous {
            Some(build) => SelectionState::Resolved { menu, build },
            None => SelectionState::AwaitingFirmwareVersion(menu),
        };

        let Some(firmware) = menu.find(input).cloned() else {
            return Transition::single(keep(menu, previous), Reply::text(messages::INVALID_INPUT));
        };

        match self.resolve(&menu, firmware).await {
            Ok((build, mut replies)) => {
                info!(
                    "Resolved {} {} ({}) for {}",
                    build.device_name, build.firmware.version, build.firmware.buildid, build.board
                );
                replies.push(Reply::with_download(build.summary()));
                Transition::to(SelectionState::Resolved { menu, build }, replies)
            }
            Err(replies) => Transition::to(keep(menu, previous), replies),
        }
    }

    /// Fetch and resolve the manifest of `firmware` for the menu's board
    ///
    /// Either way the returned replies are to be sent as they are.
    async fn resolve(
        &self,
        menu: &FirmwareMenu,
        firmware: FirmwareRecord,
    ) -> std::result::Result<(ResolvedBuild, Vec<Reply>), Vec<Reply>> {
        const NAME: &str = "BuildManifest";

        let fetched = match self.manifests.fetch(&firmware.url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("Manifest for {} unavailable: {}", firmware.url, e);
                return Err(vec![
                    Reply::text(messages::extracting(NAME)),
                    Reply::text(messages::extract_failed(NAME)),
                ]);
            }
        };

        let mut replies = Vec::new();
        if fetched.origin == ManifestOrigin::Archive {
            replies.push(Reply::text(messages::extracting(NAME)));
        }

        let manifest = match BuildManifest::from_bytes(&fetched.bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                error!("Manifest for {} does not parse: {}", firmware.url, e);
                replies.push(Reply::text(messages::MANIFEST_PARSE_FAILED));
                return Err(replies);
            }
        };

        let identity = match manifest.resolve(&menu.board) {
            Ok(identity) => identity,
            Err(e) => {
                error!("Manifest for {} has no usable identity: {}", firmware.url, e);
                replies.push(Reply::text(messages::MANIFEST_RESOLVE_FAILED));
                return Err(replies);
            }
        };

        let build = ResolvedBuild {
            device_name: menu.device.name.clone(),
            board: menu.board.clone(),
            firmware,
            manifest: fetched.bytes,
            sep_path: identity.sep_path,
            baseband_path: identity.baseband_path,
        };
        Ok((build, replies))
    }
}
