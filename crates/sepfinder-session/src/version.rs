//! Firmware version ordering
//!
//! Catalog version labels look like `16.5`, `17.0 beta 2`, `14.3 RC` or
//! `15.1 Update`. They are ordered by release number first (missing trailing
//! components count as zero), then by stage: pre-releases come before the
//! final release and updates come after it. A qualifier without a number
//! counts as number 1, so `14.3 beta` and `14.3 beta 1` are the same build.

use std::cmp::Ordering;
use std::fmt;

use sepfinder_protocol::FirmwareRecord;

/// Kind of pre-release
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

/// Position of a build relative to its final release
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Before the final release
    Pre(PreRelease, u64),
    /// The final release itself
    Final,
    /// A later build of the same release
    Update(u64),
}

/// Parsed firmware version label
#[derive(Debug, Clone)]
pub struct FirmwareVersion {
    release: Vec<u64>,
    stage: Stage,
}

impl FirmwareVersion {
    /// Parse a version label, `None` when it does not look like a version
    pub fn parse(label: &str) -> Option<Self> {
        let compact: String = strip_brackets(label)
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();

        let split = compact
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(compact.len());
        let (numbers, qualifier) = compact.split_at(split);

        let numbers = numbers.strip_suffix('.').unwrap_or(numbers);
        if numbers.is_empty() {
            return None;
        }
        let release = numbers
            .split('.')
            .map(|part| part.parse().ok())
            .collect::<Option<Vec<u64>>>()?;

        Some(Self {
            release,
            stage: parse_stage(qualifier)?,
        })
    }

    /// Release numbers, e.g. `[16, 5]`
    pub fn release(&self) -> &[u64] {
        &self.release
    }

    /// Stage relative to the final release
    pub fn stage(&self) -> Stage {
        self.stage
    }

    fn release_at(&self, index: usize) -> u64 {
        self.release.get(index).copied().unwrap_or(0)
    }
}

/// Qualifier tags, longest first so "beta" is not read as "b" + "eta".
/// `None` marks an update.
const TAGS: &[(&str, Option<PreRelease>)] = &[
    ("preview", Some(PreRelease::Rc)),
    ("update", None),
    ("alpha", Some(PreRelease::Alpha)),
    ("beta", Some(PreRelease::Beta)),
    ("pre", Some(PreRelease::Rc)),
    ("rc", Some(PreRelease::Rc)),
    ("a", Some(PreRelease::Alpha)),
    ("b", Some(PreRelease::Beta)),
    ("c", Some(PreRelease::Rc)),
];

fn parse_stage(qualifier: &str) -> Option<Stage> {
    if qualifier.is_empty() {
        return Some(Stage::Final);
    }

    let (rest, kind) = TAGS
        .iter()
        .find_map(|(tag, kind)| qualifier.strip_prefix(tag).map(|rest| (rest, *kind)))?;

    let number = if rest.is_empty() {
        1
    } else {
        rest.strip_prefix('.').unwrap_or(rest).parse().ok()?
    };

    Some(match kind {
        Some(pre) => Stage::Pre(pre, number),
        None => Stage::Update(number),
    })
}

/// Remove the cosmetic brackets some catalogs put around version labels
pub fn strip_brackets(label: &str) -> String {
    label.replace(['[', ']'], "")
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.release.len().max(other.release.len());
        (0..width)
            .map(|i| self.release_at(i).cmp(&other.release_at(i)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
            .then(self.stage.cmp(&other.stage))
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FirmwareVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FirmwareVersion {}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let release: Vec<String> = self.release.iter().map(ToString::to_string).collect();
        write!(f, "{}", release.join("."))?;
        match self.stage {
            Stage::Pre(PreRelease::Alpha, n) => write!(f, " alpha {n}"),
            Stage::Pre(PreRelease::Beta, n) => write!(f, " beta {n}"),
            Stage::Pre(PreRelease::Rc, n) => write!(f, " RC {n}"),
            Stage::Final => Ok(()),
            Stage::Update(n) => write!(f, " Update {n}"),
        }
    }
}

/// Signed firmwares with cleaned labels, oldest first
///
/// Labels that cannot be parsed sort before all others and keep their
/// catalog order.
pub fn signed_firmwares(firmwares: &[FirmwareRecord]) -> Vec<FirmwareRecord> {
    let mut signed: Vec<(Option<FirmwareVersion>, FirmwareRecord)> = firmwares
        .iter()
        .filter(|f| f.signed)
        .map(|f| {
            let mut firmware = f.clone();
            firmware.version = strip_brackets(&firmware.version);
            (FirmwareVersion::parse(&firmware.version), firmware)
        })
        .collect();

    signed.sort_by(|(a, _), (b, _)| a.cmp(b));
    signed.into_iter().map(|(_, firmware)| firmware).collect()
}
