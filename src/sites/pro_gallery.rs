//! Wix "Pro Gallery" widget profile
//!
//! Default selectors, the media address pattern used to derive canonical
//! full-resolution addresses, and the reader for the inline warm-up data the
//! widget ships with every page.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::models::{GalleryImage, GalleryMetadata};
use crate::traits::{GallerySelectors, HarvestConfig};

const MEDIA_BASE: &str = "https://static.wixstatic.com/media";

/// Profile for the Sardine School gallery on soniafriedrichphotography.com
pub fn sardine_school() -> HarvestConfig {
    HarvestConfig {
        gallery_url: "https://www.soniafriedrichphotography.com/?pgid=mizbkpxe-07b7c362-d9d3-4778-a29b-1a5f3e355a1c"
            .to_string(),
        entry_selector: None,
        output_dir: PathBuf::from("sharks-sardines"),
        file_prefix: "sardine".to_string(),
        expected_total_cap: 50,
        max_steps: 200,
        arrow_duplicate_threshold: 1,
        keyboard_duplicate_threshold: 10,
        min_image_width: 500.0,
        viewport: (1920, 1080),
        navigation_timeout: Duration::from_secs(60),
        download_timeout: Duration::from_secs(30),
        render_delay: Duration::from_secs(3),
        settle_delay: Duration::from_millis(1500),
        locate_attempts: 2,
        media_owner: "dd09ca".to_string(),
        component_id: "comp-mizbkpxe".to_string(),
        selectors: default_selectors(),
    }
}

pub fn default_selectors() -> GallerySelectors {
    GallerySelectors {
        active_image: vec![
            r#"#pro-gallery-pro-gallery-fullscreen-wrapper [data-hook="item-container"][aria-hidden="false"] img[data-hook="gallery-item-image-img"]"#.to_string(),
            r#"#pro-gallery-pro-gallery-fullscreen-wrapper [data-hook="item-container"]:not([aria-hidden="true"]) img[data-hook="gallery-item-image-img"]"#.to_string(),
        ],
        gallery_image: r#"img[data-hook="gallery-item-image-img"]"#.to_string(),
        media_image: r#"img[src*="wixstatic.com/media/"]"#.to_string(),
        next_control: vec![
            r#"#pro-gallery-pro-gallery-fullscreen-wrapper button[data-hook="nav-arrow-next"]"#.to_string(),
            r#"button[data-hook="nav-arrow-next"]"#.to_string(),
            "#pro-gallery-pro-gallery-fullscreen-wrapper .nav-arrows-container button:last-of-type".to_string(),
            ".pro-gallery-parent-container button.slideshow-arrow:last-of-type".to_string(),
        ],
        focus_target: vec![
            "#pro-gallery-pro-gallery-fullscreen-wrapper".to_string(),
            ".pro-gallery-parent-container".to_string(),
        ],
        fullscreen_wrapper: "#pro-gallery-pro-gallery-fullscreen-wrapper".to_string(),
        warmup_script: "script#wix-warmup-data".to_string(),
    }
}

/// Recognises media addresses of one site owner and maps every size or
/// quality variant onto the original asset.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    owner: String,
    regex: Regex,
}

impl UrlPattern {
    pub fn new(owner: &str) -> Result<Self> {
        let regex = Regex::new(&format!(
            r"{}/{}_([a-f0-9]+)~mv2\.(jpeg|jpg|png)",
            regex::escape(MEDIA_BASE),
            regex::escape(owner)
        ))?;

        Ok(Self {
            owner: owner.to_string(),
            regex,
        })
    }

    /// Extract the image identity from any variant address
    pub fn parse(&self, address: &str) -> Option<GalleryImage> {
        let captures = self.regex.captures(address)?;
        Some(GalleryImage {
            id: captures.get(1)?.as_str().to_string(),
            extension: captures.get(2)?.as_str().to_string(),
        })
    }

    /// Address of the unscaled original
    pub fn canonical_url(&self, image: &GalleryImage) -> String {
        format!(
            "{MEDIA_BASE}/{}_{}~mv2.{}",
            self.owner, image.id, image.extension
        )
    }
}

/// Read gallery metadata from the inline warm-up JSON in `html`.
///
/// Missing or malformed data yields an empty result.
pub fn parse_gallery_metadata(
    html: &str,
    script_selector: &str,
    component_id: &str,
) -> GalleryMetadata {
    let Ok(selector) = Selector::parse(script_selector) else {
        debug!("Invalid warm-up script selector: {}", script_selector);
        return GalleryMetadata::default();
    };

    let document = Html::parse_document(html);
    let Some(script) = document.select(&selector).next() else {
        debug!("No warm-up script on page");
        return GalleryMetadata::default();
    };

    let text = script.text().collect::<String>();
    let data: Value = match serde_json::from_str(&text) {
        Ok(data) => data,
        Err(e) => {
            debug!("Warm-up script is not valid JSON: {}", e);
            return GalleryMetadata::default();
        }
    };

    let Some(payloads) = data.get("appsWarmupData").and_then(Value::as_object) else {
        return GalleryMetadata::default();
    };

    let data_key = format!("{component_id}_galleryData");
    let settings_key = format!("{component_id}_appSettings");

    for payload in payloads.values() {
        let Some(gallery_data) = payload.get(&data_key) else {
            continue;
        };

        let total = gallery_data
            .get("totalItemsCount")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok());
        let gallery_id = payload
            .get(&settings_key)
            .and_then(|settings| settings.get("galleryId"))
            .and_then(Value::as_str)
            .map(str::to_string);

        return GalleryMetadata { total, gallery_id };
    }

    GalleryMetadata::default()
}
