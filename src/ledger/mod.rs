//! Session dedup and persistence ledger
//!
//! The output directory doubles as the ledger's index: every saved photo is
//! named `<prefix>_<sequence:03>_<id>.<ext>`, and a startup scan of those
//! names recovers which ids are already on disk and the highest sequence
//! number used so far. Sequence numbers only ever grow and files are never
//! renamed or removed, so repeated runs against the same directory are
//! additive.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::models::{BlockReason, Classification, GalleryImage, NavigationOutcome, StopReason};

/// Builds and parses output filenames for one prefix
#[derive(Debug, Clone)]
pub struct FileNameCodec {
    prefix: String,
    regex: Regex,
}

impl FileNameCodec {
    pub fn new(prefix: &str) -> Result<Self> {
        let regex = Regex::new(&format!(
            r"^{}_(\d+)_([A-Za-z0-9]+)\.([A-Za-z0-9]+)$",
            regex::escape(prefix)
        ))?;

        Ok(Self {
            prefix: prefix.to_string(),
            regex,
        })
    }

    pub fn file_name(&self, sequence: u64, image: &GalleryImage) -> String {
        format!(
            "{}_{sequence:03}_{}.{}",
            self.prefix, image.id, image.extension
        )
    }

    pub fn parse(&self, file_name: &str) -> Option<(u64, GalleryImage)> {
        let captures = self.regex.captures(file_name)?;
        // Digits beyond u64 still name a saved file; they pin the mark at the top
        let sequence = captures.get(1)?.as_str().parse().unwrap_or(u64::MAX);
        let image = GalleryImage {
            id: captures.get(2)?.as_str().to_string(),
            extension: captures.get(3)?.as_str().to_string(),
        };
        Some((sequence, image))
    }
}

/// Duplicate streaks that end a run
#[derive(Debug, Clone, Copy)]
pub struct DuplicateThresholds {
    /// Once a "next" control has been seen, a disabled arrow marks the end
    /// and duplicates are unambiguous
    pub with_control: usize,
    /// Keyboard-only galleries re-show images before wrapping for good
    pub keyboard_only: usize,
}

/// Per-run traversal bookkeeping
#[derive(Debug, Default)]
pub struct TraversalState {
    pub consecutive_duplicates: usize,
    /// Grows monotonically within a run
    pub session_seen: HashSet<String>,
    pub expected_total: usize,
}

pub struct Ledger {
    output_dir: PathBuf,
    codec: FileNameCodec,
    on_disk: HashMap<String, PathBuf>,
    high_water_mark: u64,
    state: TraversalState,
    thresholds: DuplicateThresholds,
    control_seen: bool,
    blocked: Option<BlockReason>,
}

impl Ledger {
    /// Ensure `output_dir` exists and recover previously saved files
    pub async fn open(
        output_dir: &Path,
        codec: FileNameCodec,
        thresholds: DuplicateThresholds,
        expected_total: usize,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .with_context(|| format!("Failed to create {}", output_dir.display()))?;

        let mut on_disk = HashMap::new();
        let mut high_water_mark = 0;

        let mut entries = tokio::fs::read_dir(output_dir)
            .await
            .with_context(|| format!("Failed to list {}", output_dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some((sequence, image)) = file_name.to_str().and_then(|name| codec.parse(name))
            else {
                continue;
            };

            high_water_mark = high_water_mark.max(sequence);
            if let Some(previous) = on_disk.insert(image.id.clone(), entry.path()) {
                warn!(
                    "Image {} saved more than once: {} and {}",
                    image.id,
                    previous.display(),
                    entry.path().display()
                );
            }
        }

        if !on_disk.is_empty() {
            info!(
                "Found {} images already saved locally (highest sequence {})",
                on_disk.len(),
                high_water_mark
            );
        }

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            codec,
            on_disk,
            high_water_mark,
            state: TraversalState {
                expected_total,
                ..TraversalState::default()
            },
            thresholds,
            control_seen: false,
            blocked: None,
        })
    }

    pub fn high_water_mark(&self) -> u64 {
        self.high_water_mark
    }

    pub fn existing_path(&self, id: &str) -> Option<&Path> {
        self.on_disk.get(id).map(PathBuf::as_path)
    }

    pub fn on_disk_count(&self) -> usize {
        self.on_disk.len()
    }

    pub fn state(&self) -> &TraversalState {
        &self.state
    }

    pub fn set_expected_total(&mut self, expected_total: usize) {
        self.state.expected_total = expected_total;
    }

    pub fn classify(&mut self, id: &str) -> Classification {
        if self.state.session_seen.contains(id) {
            self.state.consecutive_duplicates += 1;
            return Classification::DuplicateThisSession;
        }

        self.state.consecutive_duplicates = 0;
        self.state.session_seen.insert(id.to_string());

        if self.on_disk.contains_key(id) {
            Classification::AlreadyOnDisk
        } else {
            Classification::New
        }
    }

    /// Feed a navigation result into the termination decision
    pub fn observe_navigation(&mut self, outcome: NavigationOutcome) {
        match outcome {
            NavigationOutcome::Advanced { with_control, .. } => {
                self.control_seen |= with_control;
            }
            NavigationOutcome::Blocked(reason) => {
                if reason == BlockReason::Disabled {
                    self.control_seen = true;
                }
                self.blocked = Some(reason);
            }
        }
    }

    pub fn duplicate_threshold(&self) -> usize {
        if self.control_seen {
            self.thresholds.with_control
        } else {
            self.thresholds.keyboard_only
        }
    }

    pub fn termination(&self) -> Option<StopReason> {
        if let Some(reason) = self.blocked {
            return Some(match reason {
                BlockReason::Disabled => StopReason::LastImage,
                BlockReason::Missing => StopReason::ControlMissing,
                BlockReason::Unreachable => StopReason::Unreachable,
            });
        }

        if self.state.session_seen.len() >= self.state.expected_total {
            return Some(StopReason::AllSeen);
        }

        let streak = self.state.consecutive_duplicates;
        if streak > 0 && streak >= self.duplicate_threshold() {
            return Some(StopReason::DuplicateStreak);
        }

        None
    }

    /// Sequence number and path a new save of `image` should use
    pub async fn next_destination(&self, image: &GalleryImage) -> Result<(u64, PathBuf)> {
        let mut sequence = self.high_water_mark;
        loop {
            sequence = sequence
                .checked_add(1)
                .with_context(|| format!("No sequence number left after {sequence}"))?;
            let path = self.output_dir.join(self.codec.file_name(sequence, image));
            if !tokio::fs::try_exists(&path).await? {
                return Ok((sequence, path));
            }
            warn!("{} already exists, skipping sequence {}", path.display(), sequence);
        }
    }

    /// Register a completed save
    pub fn record_saved(&mut self, image: &GalleryImage, sequence: u64, path: PathBuf) {
        self.high_water_mark = self.high_water_mark.max(sequence);
        self.on_disk.insert(image.id.clone(), path);
    }
}
