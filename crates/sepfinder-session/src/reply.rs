//! Replies produced by session transitions

/// Fixed reply texts
pub mod messages {
    pub const SELECT_DEVICE_TYPE: &str = "Please select a device type.";
    pub const SELECT_DEVICE: &str = "Please select a device.";
    pub const SELECT_BOARD: &str = "Please select your board config.\n\nYou can get this using the System Info tweak or AIDA64 from the App Store.";
    pub const SELECT_VERSION: &str =
        "Please select a version.\n(Only currently signed versions are shown.)";
    pub const INVALID_INPUT: &str = "Invalid input.";
    pub const INVALID_STATE: &str = "Invalid state. Please start over using /start.";
    pub const START_OVER: &str = "Please start over using /start.";
    pub const NO_DEVICES: &str = "No devices found. Please start over using /start.";
    pub const NO_BOARDS: &str = "No boardconfigs found for this device.";
    pub const NO_FIRMWARES: &str = "No signed firmwares found for this device.";
    pub const CATALOG_UNAVAILABLE: &str =
        "Unable to communicate with ipsw.me API, please try again later.";
    pub const DEVICE_RECORD_UNAVAILABLE: &str = "Unable to communicate with ipsw.me API.";
    pub const BETA_UNAVAILABLE: &str = "Unable to communicate with the beta API.";
    pub const TRY_AGAIN_LATER: &str = "Please try again later.";
    pub const MANIFEST_PARSE_FAILED: &str =
        "Unable to parse BuildManifest, please try again later.";
    pub const MANIFEST_RESOLVE_FAILED: &str =
        "Unable to get data from BuildManifest, please try again later.";
    pub const DOWNLOAD: &str = "Download";

    /// Progress notice for a component pulled from an archive
    pub fn extracting(name: &str) -> String {
        format!("Extracting {name}, please wait...")
    }

    /// Failure notice for a component pulled from an archive
    pub fn extract_failed(name: &str) -> String {
        format!("Unable to extract {name} for the selected firmware, please try again later.")
    }
}

/// Keyboard directive attached to a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keyboard {
    /// Leave whatever keyboard is shown
    Keep,
    /// Offer these options, laid out in rows
    Options(Vec<Vec<String>>),
    /// Hide the option keyboard
    Remove,
    /// Offer the download action for a resolved build
    Download,
}

/// One message to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Keyboard,
}

impl Reply {
    /// Plain text, keyboard unchanged
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::Keep,
        }
    }

    /// Text with an option keyboard, two options per row
    pub fn with_options<I, S>(text: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            text: text.into(),
            keyboard: Keyboard::Options(option_rows(options)),
        }
    }

    /// Text that hides the option keyboard
    pub fn removing(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::Remove,
        }
    }

    /// Text offering the download action
    pub fn with_download(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Keyboard::Download,
        }
    }
}

/// Lay options out two per row
pub fn option_rows<I, S>(options: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let options: Vec<String> = options.into_iter().map(Into::into).collect();
    options.chunks(2).map(<[String]>::to_vec).collect()
}
