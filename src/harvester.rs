use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::ledger::{DuplicateThresholds, FileNameCodec, Ledger};
use crate::locator::Locator;
use crate::models::{Classification, GalleryImage, NavigationOutcome, RunSummary, StopReason};
use crate::navigator::Navigator;
use crate::sites::pro_gallery::{UrlPattern, parse_gallery_metadata};
use crate::traits::{GalleryPage, HarvestConfig, ImageFetcher};

/// Walks a gallery carousel and saves each distinct photo once
pub struct GalleryHarvester {
    page: Arc<dyn GalleryPage>,
    fetcher: Arc<dyn ImageFetcher>,
    config: HarvestConfig,
    locator: Locator,
    navigator: Navigator,
    pattern: UrlPattern,
    ledger: Ledger,
    summary: RunSummary,
}

impl GalleryHarvester {
    pub async fn new(
        page: Arc<dyn GalleryPage>,
        fetcher: Arc<dyn ImageFetcher>,
        config: HarvestConfig,
    ) -> Result<Self> {
        let pattern = UrlPattern::new(&config.media_owner)?;
        let codec = FileNameCodec::new(&config.file_prefix)?;
        let thresholds = DuplicateThresholds {
            with_control: config.arrow_duplicate_threshold,
            keyboard_only: config.keyboard_duplicate_threshold,
        };
        let ledger = Ledger::open(
            &config.output_dir,
            codec,
            thresholds,
            config.expected_total_cap,
        )
        .await?;

        Ok(Self {
            page,
            fetcher,
            locator: Locator::from_config(&config),
            navigator: Navigator::new(&config.selectors),
            pattern,
            ledger,
            config,
            summary: RunSummary::start(),
        })
    }

    /// Load the gallery page, open the viewer and learn the expected total.
    ///
    /// Failing to load the page is the only fatal error of a run.
    pub async fn prepare(&mut self) -> Result<()> {
        info!("Loading {}", self.config.gallery_url);
        self.page
            .navigate(&self.config.gallery_url, self.config.navigation_timeout)
            .await
            .with_context(|| format!("Failed to load {}", self.config.gallery_url))?;
        tokio::time::sleep(self.config.render_delay).await;
        info!("Page loaded");

        if let Some(selector) = self.config.entry_selector.clone() {
            self.open_viewer(&selector).await?;
        }

        let fullscreen = self
            .page
            .query_all(&self.config.selectors.fullscreen_wrapper)
            .await
            .map(|elements| !elements.is_empty())
            .unwrap_or(false);
        if fullscreen {
            info!("Fullscreen gallery viewer is open");
        } else {
            warn!("Fullscreen gallery viewer not found, continuing anyway");
        }

        self.navigator.focus_gallery(self.page.as_ref()).await;
        self.learn_expected_total().await;

        info!(
            "{} images on disk, highest sequence {}",
            self.ledger.on_disk_count(),
            self.ledger.high_water_mark()
        );

        Ok(())
    }

    /// Homepage entry: scroll the gallery into view and open its first item
    async fn open_viewer(&self, selector: &str) -> Result<()> {
        if let Err(e) = self
            .page
            .evaluate("window.scrollTo(0, document.body.scrollHeight / 2)")
            .await
        {
            warn!("Could not scroll to gallery: {}", e);
        }
        tokio::time::sleep(self.config.settle_delay).await;

        let items = self.page.query_all(selector).await?;
        info!("Found {} gallery entries", items.len());

        let first = items
            .first()
            .with_context(|| format!("No gallery entry matches {selector}"))?;
        first.click().await.context("Failed to open gallery viewer")?;

        tokio::time::sleep(self.config.render_delay).await;
        Ok(())
    }

    async fn learn_expected_total(&mut self) {
        let html = match self.page.content().await {
            Ok(html) => html,
            Err(e) => {
                warn!("Could not read page content: {}", e);
                String::new()
            }
        };

        let metadata = parse_gallery_metadata(
            &html,
            &self.config.selectors.warmup_script,
            &self.config.component_id,
        );

        match metadata.total.filter(|total| *total > 0) {
            Some(total) => {
                info!(
                    "Gallery ID: {} (expects {} images)",
                    metadata.gallery_id.as_deref().unwrap_or("unknown"),
                    total
                );
                self.ledger.set_expected_total(total);
            }
            None => info!(
                "Gallery metadata unavailable, defaulting to {} images",
                self.config.expected_total_cap
            ),
        }
    }

    pub async fn run(&mut self) -> StopReason {
        let reason = self.traverse().await;
        self.finish(reason);
        reason
    }

    pub fn finish(&mut self, reason: StopReason) {
        self.summary.unique_seen = self.ledger.state().session_seen.len();
        self.summary.finish(reason);
    }

    #[cfg(test)]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    async fn traverse(&mut self) -> StopReason {
        for step in 1..=self.config.max_steps {
            self.summary.steps = step;

            let Some(located) = self.locator.locate(self.page.as_ref()).await else {
                info!(step, "No image found");
                return StopReason::LocatorExhausted;
            };
            info!(step, strategy = %located.strategy, "Selected image");

            match self.pattern.parse(&located.address) {
                Some(image) => {
                    self.process(&image).await;
                    if let Some(reason) = self.ledger.termination() {
                        return reason;
                    }
                }
                None => {
                    warn!(step, address = %located.address, "Could not parse image address");
                    self.summary.unparseable += 1;
                }
            }

            let outcome = self.navigator.advance(self.page.as_ref()).await;
            self.ledger.observe_navigation(outcome);
            match outcome {
                NavigationOutcome::Advanced { via, .. } => info!(step, %via, "Next"),
                NavigationOutcome::Blocked(reason) => warn!(step, %reason, "Navigation blocked"),
            }

            if let Some(reason) = self.ledger.termination() {
                return reason;
            }

            tokio::time::sleep(self.config.settle_delay).await;
        }

        StopReason::StepLimit
    }

    async fn process(&mut self, image: &GalleryImage) {
        match self.ledger.classify(&image.id) {
            Classification::DuplicateThisSession => {
                self.summary.duplicates += 1;
                info!(
                    id = %image.id,
                    streak = self.ledger.state().consecutive_duplicates,
                    "Already seen this run"
                );
            }
            Classification::AlreadyOnDisk => {
                self.summary.already_on_disk += 1;
                info!(
                    id = %image.id,
                    path = ?self.ledger.existing_path(&image.id),
                    "Skipping download (already on disk)"
                );
            }
            Classification::New => self.save(image).await,
        }
    }

    async fn save(&mut self, image: &GalleryImage) {
        let url = self.pattern.canonical_url(image);

        let (sequence, path) = match self.ledger.next_destination(image).await {
            Ok(destination) => destination,
            Err(e) => {
                error!(id = %image.id, "Cannot pick an output file: {:#}", e);
                self.summary.failed_downloads += 1;
                return;
            }
        };

        info!(id = %image.id, "Downloading {}", url);
        match self.fetcher.fetch_to_file(&url, &path).await {
            Ok(bytes) => {
                #[allow(clippy::cast_precision_loss)]
                let size_mb = bytes as f64 / 1024.0 / 1024.0;
                info!(path = %path.display(), "Saved ({:.2} MB)", size_mb);
                self.ledger.record_saved(image, sequence, path);
                self.summary.saved += 1;
            }
            Err(e) => {
                warn!(id = %image.id, "Download failed: {}", e);
                self.summary.failed_downloads += 1;
            }
        }
    }

    pub fn log_summary(&self) {
        let summary = &self.summary;
        let reason = summary
            .stop_reason
            .map_or_else(|| "unknown".to_string(), |r| r.to_string());

        info!(
            "Downloaded {} new images, {} unique seen ({} already on disk, {} failed) in {} steps; stopped: {}",
            summary.saved,
            summary.unique_seen,
            summary.already_on_disk,
            summary.failed_downloads,
            summary.steps,
            reason
        );

        if let Some(finished_at) = summary.finished_at {
            let elapsed = finished_at - summary.started_at;
            info!("Run took {}s", elapsed.num_seconds());
        }

        match serde_json::to_string(summary) {
            Ok(json) => debug!("Run summary: {}", json),
            Err(e) => debug!("Could not serialize run summary: {}", e),
        }

        if summary.stop_reason.is_some_and(|reason| !reason.is_clean()) {
            error!(
                "Navigation failed at step {}; images saved so far are kept",
                summary.steps
            );
        }
    }
}
