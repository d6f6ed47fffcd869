//! Capability interfaces consumed by the traversal engine, and its configuration

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::download::DownloadError;
use crate::models::BoundingBox;

/// Configuration for one harvesting run
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Page that hosts the gallery
    pub gallery_url: String,
    /// Clicked after load to open the fullscreen viewer, if set
    pub entry_selector: Option<String>,
    pub output_dir: PathBuf,
    /// Leading token of every saved filename
    pub file_prefix: String,
    /// Used when the page does not announce how many items it holds
    pub expected_total_cap: usize,
    pub max_steps: usize,
    /// Duplicate streak that ends a run once a "next" control has been seen
    pub arrow_duplicate_threshold: usize,
    /// Duplicate streak that ends a keyboard-only run
    pub keyboard_duplicate_threshold: usize,
    /// Narrower images are thumbnails, not the viewer's photo
    pub min_image_width: f64,
    pub viewport: (u32, u32),
    pub navigation_timeout: Duration,
    pub download_timeout: Duration,
    /// Pause after initial load before touching the widget
    pub render_delay: Duration,
    /// Pause after each navigation action
    pub settle_delay: Duration,
    pub locate_attempts: usize,
    /// Host-side owner token embedded in every media address
    pub media_owner: String,
    /// Widget component id used to find metadata in the warm-up script
    pub component_id: String,
    pub selectors: GallerySelectors,
}

/// CSS selectors for the parts of the gallery widget the engine touches
#[derive(Debug, Clone)]
pub struct GallerySelectors {
    /// Images flagged by the widget as the current, non-hidden item
    pub active_image: Vec<String>,
    /// Every loaded full-size gallery image
    pub gallery_image: String,
    /// Any image whose address matches the media pattern
    pub media_image: String,
    /// "Next" controls, most stable selector first
    pub next_control: Vec<String>,
    /// Containers clicked so key input reaches the widget
    pub focus_target: Vec<String>,
    /// Present while the fullscreen viewer is open
    pub fullscreen_wrapper: String,
    /// Inline JSON with gallery metadata
    pub warmup_script: String,
}

impl HarvestConfig {
    /// Apply environment overrides on top of a site profile
    pub fn from_env(defaults: Self) -> Result<Self> {
        let mut config = defaults;

        if let Ok(url) = std::env::var("GALLERY_URL") {
            config.gallery_url = url;
        }
        if let Ok(selector) = std::env::var("ENTRY_SELECTOR") {
            config.entry_selector = Some(selector).filter(|s| !s.trim().is_empty());
        }
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Ok(prefix) = std::env::var("FILE_PREFIX") {
            config.file_prefix = prefix;
        }
        if let Ok(owner) = std::env::var("MEDIA_OWNER") {
            config.media_owner = owner;
        }

        config.expected_total_cap = env_or("EXPECTED_TOTAL_CAP", config.expected_total_cap)?;
        config.max_steps = env_or("MAX_STEPS", config.max_steps)?;
        config.arrow_duplicate_threshold =
            env_or("ARROW_DUPLICATE_THRESHOLD", config.arrow_duplicate_threshold)?;
        config.keyboard_duplicate_threshold = env_or(
            "KEYBOARD_DUPLICATE_THRESHOLD",
            config.keyboard_duplicate_threshold,
        )?;
        config.min_image_width = env_or("MIN_IMAGE_WIDTH", config.min_image_width)?;
        config.viewport = (
            env_or("VIEWPORT_WIDTH", config.viewport.0)?,
            env_or("VIEWPORT_HEIGHT", config.viewport.1)?,
        );
        config.locate_attempts = env_or("LOCATE_ATTEMPTS", config.locate_attempts)?;
        config.navigation_timeout = Duration::from_secs(env_or(
            "NAVIGATION_TIMEOUT_SECS",
            config.navigation_timeout.as_secs(),
        )?);
        config.download_timeout = Duration::from_secs(env_or(
            "DOWNLOAD_TIMEOUT_SECS",
            config.download_timeout.as_secs(),
        )?);
        config.render_delay = Duration::from_millis(env_or(
            "RENDER_DELAY_MS",
            duration_millis(config.render_delay),
        )?);
        config.settle_delay = Duration::from_millis(env_or(
            "SETTLE_DELAY_MS",
            duration_millis(config.settle_delay),
        )?);

        if config.file_prefix.is_empty() {
            anyhow::bail!("FILE_PREFIX must not be empty");
        }

        Ok(config)
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

/// A loaded page in a scriptable browser
#[async_trait]
pub trait GalleryPage: Send + Sync {
    /// Load `url` and wait for the load event
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// All elements currently matching `selector`
    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn PageElement>>>;

    /// Dispatch a key down/up pair to the focused element
    async fn press_key(&self, key: &str) -> Result<()>;

    /// Mouse click at viewport coordinates
    async fn click_at(&self, x: f64, y: f64) -> Result<()>;

    /// Evaluate a JavaScript expression in the page
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    /// Serialized DOM of the current document
    async fn content(&self) -> Result<String>;

    /// Layout viewport width in CSS pixels
    async fn viewport_width(&self) -> Result<f64>;
}

/// A handle to a single DOM element
///
/// Every operation may fail on its own, e.g. when the widget has detached
/// the node between query and use; callers treat such failures as local.
#[async_trait]
pub trait PageElement: Send + Sync {
    async fn is_visible(&self) -> Result<bool>;

    /// `None` when the element is not rendered
    async fn bounding_box(&self) -> Result<Option<BoundingBox>>;

    async fn attribute(&self, name: &str) -> Result<Option<String>>;

    /// Trusted mouse click on the element
    async fn click(&self) -> Result<()>;

    /// Call a JavaScript function declaration with the element as `this`
    async fn evaluate(&self, function: &str) -> Result<serde_json::Value>;

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn PageElement>>>;
}

/// Fetch-and-save primitive for image bytes
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// On error nothing is left at `dest`.
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError>;
}
