//! Active-item locator
//!
//! The gallery keeps many full-size images loaded at once, so finding "the"
//! photo on screen is a ranked guess. Strategies are tried in order and the
//! first hit wins:
//!
//! 1. [`ActiveMarker`]: an image inside the item the widget flags as current
//! 2. [`Centered`]: the wide, visible gallery image nearest the viewport centre
//! 3. [`LargestVisible`]: the widest visible image with a media address
//!
//! Queries are read-only. A failure on one element only drops that element.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::models::{BoundingBox, LocateStrategyKind, LocatedImage};
use crate::traits::{GalleryPage, HarvestConfig, PageElement};

/// One way of picking the current photo out of the page
#[async_trait]
pub trait LocateStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn locate(&self, page: &dyn GalleryPage) -> Option<LocatedImage>;
}

/// Image address of an element, preferring the rendered `src` over the
/// lazy-load `data-src`
async fn image_address(element: &dyn PageElement) -> Result<Option<String>> {
    if let Some(src) = element.attribute("src").await?.filter(|s| !s.is_empty()) {
        return Ok(Some(src));
    }
    Ok(element
        .attribute("data-src")
        .await?
        .filter(|s| !s.is_empty()))
}

async fn visible_address(element: &dyn PageElement) -> Result<Option<String>> {
    if !element.is_visible().await? {
        return Ok(None);
    }
    image_address(element).await
}

async fn query(page: &dyn GalleryPage, selector: &str) -> Vec<Box<dyn PageElement>> {
    match page.query_all(selector).await {
        Ok(elements) => elements,
        Err(e) => {
            debug!("Query failed for {}: {}", selector, e);
            Vec::new()
        }
    }
}

/// Geometry and address of a visible image wider than `min_width`
async fn wide_candidate(
    element: &dyn PageElement,
    min_width: f64,
) -> Result<Option<(BoundingBox, String)>> {
    if !element.is_visible().await? {
        return Ok(None);
    }
    let Some(bbox) = element.bounding_box().await? else {
        return Ok(None);
    };
    if bbox.width <= min_width {
        return Ok(None);
    }
    Ok(image_address(element).await?.map(|address| (bbox, address)))
}

pub struct ActiveMarker {
    selectors: Vec<String>,
}

impl ActiveMarker {
    pub fn new(selectors: Vec<String>) -> Self {
        Self { selectors }
    }
}

#[async_trait]
impl LocateStrategy for ActiveMarker {
    fn name(&self) -> &'static str {
        "active"
    }

    async fn locate(&self, page: &dyn GalleryPage) -> Option<LocatedImage> {
        for selector in &self.selectors {
            for element in query(page, selector).await {
                match visible_address(element.as_ref()).await {
                    Ok(Some(address)) => {
                        return Some(LocatedImage {
                            address,
                            strategy: LocateStrategyKind::ActiveMarker,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => debug!("Skipping active candidate: {}", e),
                }
            }
        }
        None
    }
}

pub struct Centered {
    selector: String,
    min_width: f64,
    fallback_viewport_width: f64,
}

impl Centered {
    pub fn new(selector: String, min_width: f64, fallback_viewport_width: f64) -> Self {
        Self {
            selector,
            min_width,
            fallback_viewport_width,
        }
    }
}

#[async_trait]
impl LocateStrategy for Centered {
    fn name(&self) -> &'static str {
        "centered"
    }

    async fn locate(&self, page: &dyn GalleryPage) -> Option<LocatedImage> {
        let elements = query(page, &self.selector).await;
        if elements.is_empty() {
            return None;
        }

        let viewport_width = match page.viewport_width().await {
            Ok(width) if width > 0.0 => width,
            _ => self.fallback_viewport_width,
        };
        let viewport_center = viewport_width / 2.0;
        debug!("Found {} gallery images", elements.len());

        let mut best: Option<(f64, String)> = None;
        for element in &elements {
            match wide_candidate(element.as_ref(), self.min_width).await {
                Ok(Some((bbox, address))) => {
                    let distance = (bbox.center().0 - viewport_center).abs();
                    if best.as_ref().is_none_or(|(closest, _)| distance < *closest) {
                        best = Some((distance, address));
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping gallery image: {}", e),
            }
        }

        best.map(|(distance, address)| LocatedImage {
            address,
            strategy: LocateStrategyKind::Centered { distance },
        })
    }
}

pub struct LargestVisible {
    selector: String,
    min_width: f64,
}

impl LargestVisible {
    pub fn new(selector: String, min_width: f64) -> Self {
        Self {
            selector,
            min_width,
        }
    }
}

#[async_trait]
impl LocateStrategy for LargestVisible {
    fn name(&self) -> &'static str {
        "largest"
    }

    async fn locate(&self, page: &dyn GalleryPage) -> Option<LocatedImage> {
        let mut best: Option<(f64, String)> = None;

        for element in query(page, &self.selector).await {
            match wide_candidate(element.as_ref(), self.min_width).await {
                Ok(Some((bbox, address))) => {
                    if best.as_ref().is_none_or(|(widest, _)| bbox.width > *widest) {
                        best = Some((bbox.width, address));
                    }
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping media image: {}", e),
            }
        }

        best.map(|(width, address)| LocatedImage {
            address,
            strategy: LocateStrategyKind::Largest { width },
        })
    }
}

/// Runs the strategies in priority order, retrying the whole chain
pub struct Locator {
    strategies: Vec<Box<dyn LocateStrategy>>,
    attempts: usize,
    retry_delay: Duration,
}

impl Locator {
    pub fn new(strategies: Vec<Box<dyn LocateStrategy>>, attempts: usize, retry_delay: Duration) -> Self {
        Self {
            strategies,
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &HarvestConfig) -> Self {
        let selectors = &config.selectors;
        let strategies: Vec<Box<dyn LocateStrategy>> = vec![
            Box::new(ActiveMarker::new(selectors.active_image.clone())),
            Box::new(Centered::new(
                selectors.gallery_image.clone(),
                config.min_image_width,
                f64::from(config.viewport.0),
            )),
            Box::new(LargestVisible::new(
                selectors.media_image.clone(),
                config.min_image_width,
            )),
        ];

        Self::new(strategies, config.locate_attempts, config.settle_delay)
    }

    /// `None` means no strategy found anything on any attempt
    pub async fn locate(&self, page: &dyn GalleryPage) -> Option<LocatedImage> {
        for attempt in 1..=self.attempts {
            for strategy in &self.strategies {
                if let Some(found) = strategy.locate(page).await {
                    return Some(found);
                }
                debug!("Strategy {} found nothing", strategy.name());
            }

            if attempt < self.attempts {
                debug!("No image located on attempt {}, retrying", attempt);
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        None
    }
}
