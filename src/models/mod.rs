//! Data models for gallery images, traversal outcomes and run reporting

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A photo in the source gallery, identified by the opaque token in its
/// canonical address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GalleryImage {
    pub id: String,
    pub extension: String,
}

/// Layout rectangle of an element in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Which locator strategy produced a hit, with its score
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocateStrategyKind {
    ActiveMarker,
    /// Horizontal distance to the viewport centre
    Centered { distance: f64 },
    /// Rendered width of the winner
    Largest { width: f64 },
}

impl fmt::Display for LocateStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ActiveMarker => write!(f, "active"),
            Self::Centered { distance } => write!(f, "centered ({distance:.0}px)"),
            Self::Largest { width } => write!(f, "largest ({width:.0}px)"),
        }
    }
}

/// The element address believed to be the photo currently on screen
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedImage {
    pub address: String,
    pub strategy: LocateStrategyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceMethod {
    Keyboard,
    Button,
    Script,
}

impl fmt::Display for AdvanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyboard => write!(f, "keyboard"),
            Self::Button => write!(f, "button"),
            Self::Script => write!(f, "script"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Disabled,
    Missing,
    Unreachable,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Missing => write!(f, "missing"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Result of a single attempt to move the carousel forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Advanced {
        via: AdvanceMethod,
        /// Whether an enabled "next" control was present on the page
        with_control: bool,
    },
    Blocked(BlockReason),
}

/// How the ledger sees an identity on this step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    New,
    DuplicateThisSession,
    AlreadyOnDisk,
}

/// Why a traversal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// No active image could be located
    LocatorExhausted,
    /// The number of distinct ids reached the expected total
    AllSeen,
    DuplicateStreak,
    /// The next control reported disabled: last image reached
    LastImage,
    ControlMissing,
    /// Every activation method failed on an enabled control
    Unreachable,
    StepLimit,
    Interrupted,
}

impl StopReason {
    /// `Unreachable` is the only stop that indicates a failed run
    pub fn is_clean(self) -> bool {
        !matches!(self, Self::Unreachable)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::LocatorExhausted => "no active image found",
            Self::AllSeen => "all expected images seen",
            Self::DuplicateStreak => "duplicate threshold reached",
            Self::LastImage => "next arrow disabled",
            Self::ControlMissing => "next control missing",
            Self::Unreachable => "unable to navigate further",
            Self::StepLimit => "step limit reached",
            Self::Interrupted => "interrupted",
        };
        f.write_str(text)
    }
}

/// Gallery facts announced by the page's inline warm-up data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryMetadata {
    pub total: Option<usize>,
    pub gallery_id: Option<String>,
}

/// Counters reported once a run ends
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: usize,
    pub saved: usize,
    pub already_on_disk: usize,
    pub duplicates: usize,
    pub failed_downloads: usize,
    pub unparseable: usize,
    pub unique_seen: usize,
    pub stop_reason: Option<StopReason>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            steps: 0,
            saved: 0,
            already_on_disk: 0,
            duplicates: 0,
            failed_downloads: 0,
            unparseable: 0,
            unique_seen: 0,
            stop_reason: None,
        }
    }

    pub fn finish(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
        self.finished_at = Some(Utc::now());
    }
}
