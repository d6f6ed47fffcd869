//! Scripted browser and fetcher doubles shared by the unit tests

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use crate::download::DownloadError;
use crate::models::BoundingBox;
use crate::navigator::{CONTROL_STATE_FN, FORCE_CLICK_FN};
use crate::traits::{GallerySelectors, GalleryPage, HarvestConfig, ImageFetcher, PageElement};

pub type ActionLog = Arc<Mutex<Vec<String>>>;

pub fn media_url(id: &str) -> String {
    format!("https://static.wixstatic.com/media/dd09ca_{id}~mv2.jpg/v1/fill/w_1200,h_800,q_90/{id}.jpg")
}

pub fn test_config(output_dir: &Path) -> HarvestConfig {
    let mut config = crate::sites::pro_gallery::sardine_school();
    config.output_dir = output_dir.to_path_buf();
    config.file_prefix = "photo".to_string();
    config.render_delay = Duration::ZERO;
    config.settle_delay = Duration::ZERO;
    config.locate_attempts = 1;
    config
}

#[derive(Clone, Default)]
pub struct FakeElement {
    pub visible: bool,
    pub bbox: Option<BoundingBox>,
    pub attributes: HashMap<String, String>,
    /// Answer to the control-state probe
    pub control_state: Option<Value>,
    pub children: HashMap<String, Vec<FakeElement>>,
    /// Every read fails, like a node detached mid-query
    pub broken: bool,
    pub click_fails: bool,
    pub script_click_fails: bool,
    pub on_activate: Option<Arc<dyn Fn() + Send + Sync>>,
    pub log: ActionLog,
}

impl FakeElement {
    pub fn image(src: &str, x: f64, width: f64) -> Self {
        Self {
            visible: true,
            bbox: Some(BoundingBox {
                x,
                y: 100.0,
                width,
                height: width * 0.66,
            }),
            attributes: HashMap::from([("src".to_string(), src.to_string())]),
            ..Self::default()
        }
    }

    pub fn control(hidden: bool, disabled: bool) -> Self {
        Self {
            visible: !hidden,
            bbox: Some(BoundingBox {
                x: 1850.0,
                y: 500.0,
                width: 40.0,
                height: 40.0,
            }),
            control_state: Some(json!({ "hidden": hidden, "disabled": disabled })),
            ..Self::default()
        }
    }

    pub fn container() -> Self {
        Self {
            visible: true,
            bbox: Some(BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 1920.0,
                height: 1080.0,
            }),
            ..Self::default()
        }
    }

    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::default()
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn without_src(mut self) -> Self {
        self.attributes.clear();
        self
    }

    pub fn with_log(mut self, log: &ActionLog) -> Self {
        self.log = Arc::clone(log);
        self
    }

    fn record(&self, action: &str) {
        self.log.lock().unwrap().push(action.to_string());
    }

    fn check(&self) -> Result<()> {
        if self.broken {
            Err(anyhow!("node is detached from the document"))
        } else {
            Ok(())
        }
    }

    fn activate(&self) {
        if let Some(on_activate) = &self.on_activate {
            on_activate();
        }
    }
}

fn boxed(elements: &[FakeElement]) -> Vec<Box<dyn PageElement>> {
    elements
        .iter()
        .cloned()
        .map(|el| Box::new(el) as Box<dyn PageElement>)
        .collect()
}

#[async_trait]
impl PageElement for FakeElement {
    async fn is_visible(&self) -> Result<bool> {
        self.check()?;
        Ok(self.visible)
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>> {
        self.check()?;
        Ok(self.bbox)
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.attributes.get(name).cloned())
    }

    async fn click(&self) -> Result<()> {
        self.check()?;
        self.record("click");
        if self.click_fails {
            return Err(anyhow!("element is covered by another element"));
        }
        self.activate();
        Ok(())
    }

    async fn evaluate(&self, function: &str) -> Result<Value> {
        self.check()?;
        if function == FORCE_CLICK_FN {
            self.record("script-click");
            if self.script_click_fails {
                return Err(anyhow!("script click threw"));
            }
            self.activate();
            return Ok(Value::Null);
        }
        if function == CONTROL_STATE_FN {
            return self
                .control_state
                .clone()
                .ok_or_else(|| anyhow!("not a control"));
        }
        Err(anyhow!("unexpected script"))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn PageElement>>> {
        self.check()?;
        Ok(self
            .children
            .get(selector)
            .map(|children| boxed(children))
            .unwrap_or_default())
    }
}

/// A page whose DOM never changes
#[derive(Default)]
pub struct StaticPage {
    pub elements: HashMap<String, Vec<FakeElement>>,
    pub failing_selectors: HashSet<String>,
    pub key_fails: bool,
    pub log: ActionLog,
}

impl StaticPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, selector: &str, elements: Vec<FakeElement>) -> Self {
        self.elements.insert(selector.to_string(), elements);
        self
    }

    pub fn failing(mut self, selector: &str) -> Self {
        self.failing_selectors.insert(selector.to_string());
        self
    }

    pub fn actions(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl GalleryPage for StaticPage {
    async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn PageElement>>> {
        if self.failing_selectors.contains(selector) {
            return Err(anyhow!("query failed: {selector}"));
        }
        Ok(self
            .elements
            .get(selector)
            .map(|elements| boxed(elements))
            .unwrap_or_default())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.log.lock().unwrap().push(format!("key:{key}"));
        if self.key_fails {
            return Err(anyhow!("key dispatch failed"));
        }
        Ok(())
    }

    async fn click_at(&self, _x: f64, _y: f64) -> Result<()> {
        self.log.lock().unwrap().push("click_at".to_string());
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn content(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn viewport_width(&self) -> Result<f64> {
        Ok(1920.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarouselMode {
    /// A "next" arrow that turns disabled on the last slide
    Arrows,
    /// No arrows; the right arrow key wraps from the last slide to the first
    KeyboardWrap,
}

#[derive(Debug)]
pub struct CarouselState {
    pub slides: Vec<String>,
    pub position: usize,
    pub mode: CarouselMode,
    pub key_presses: usize,
    pub arrow_clicks: usize,
    pub locate_queries: usize,
}

impl CarouselState {
    fn advance(&mut self) {
        let last = self.slides.len().saturating_sub(1);
        self.position = match self.mode {
            CarouselMode::Arrows => (self.position + 1).min(last),
            CarouselMode::KeyboardWrap => (self.position + 1) % self.slides.len().max(1),
        };
    }

    fn at_last(&self) -> bool {
        self.position + 1 >= self.slides.len()
    }
}

/// A gallery widget model that reacts to keys and arrow clicks
pub struct CarouselPage {
    selectors: GallerySelectors,
    pub state: Arc<Mutex<CarouselState>>,
    pub html: String,
    pub keys_work: bool,
    pub arrow_clicks_fail: bool,
    pub navigate_fails: bool,
}

impl CarouselPage {
    pub fn new(selectors: &GallerySelectors, slides: Vec<String>, mode: CarouselMode) -> Self {
        Self {
            selectors: selectors.clone(),
            state: Arc::new(Mutex::new(CarouselState {
                slides,
                position: 0,
                mode,
                key_presses: 0,
                arrow_clicks: 0,
                locate_queries: 0,
            })),
            html: String::new(),
            keys_work: true,
            arrow_clicks_fail: false,
            navigate_fails: false,
        }
    }

    pub fn snapshot(&self) -> (usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (state.locate_queries, state.key_presses, state.arrow_clicks)
    }

    fn arrow(&self) -> FakeElement {
        let state = Arc::clone(&self.state);
        let disabled = self.state.lock().unwrap().at_last();
        let mut arrow = FakeElement::control(false, disabled);
        arrow.click_fails = self.arrow_clicks_fail;
        arrow.script_click_fails = self.arrow_clicks_fail;
        arrow.on_activate = Some(Arc::new(move || {
            let mut state = state.lock().unwrap();
            state.arrow_clicks += 1;
            state.advance();
        }));
        arrow
    }
}

#[async_trait]
impl GalleryPage for CarouselPage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        if self.navigate_fails {
            return Err(anyhow!("net::ERR_NAME_NOT_RESOLVED at {url}"));
        }
        Ok(())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<Box<dyn PageElement>>> {
        let elements = if selector == self.selectors.active_image[0] {
            let mut state = self.state.lock().unwrap();
            state.locate_queries += 1;
            state
                .slides
                .get(state.position)
                .map(|src| vec![FakeElement::image(src, 360.0, 1200.0)])
                .unwrap_or_default()
        } else if selector == self.selectors.next_control[0] {
            let mode = self.state.lock().unwrap().mode;
            match mode {
                CarouselMode::Arrows => vec![self.arrow()],
                CarouselMode::KeyboardWrap => Vec::new(),
            }
        } else if selector == self.selectors.focus_target[0]
            || selector == self.selectors.fullscreen_wrapper
        {
            vec![FakeElement::container()]
        } else {
            Vec::new()
        };

        Ok(boxed(&elements))
    }

    async fn press_key(&self, _key: &str) -> Result<()> {
        if !self.keys_work {
            return Err(anyhow!("key dispatch failed"));
        }
        let mut state = self.state.lock().unwrap();
        state.key_presses += 1;
        state.advance();
        Ok(())
    }

    async fn click_at(&self, _x: f64, _y: f64) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn content(&self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn viewport_width(&self) -> Result<f64> {
        Ok(1920.0)
    }
}

/// Writes the requested URL into the destination file
#[derive(Default)]
pub struct RecordingFetcher {
    pub fetched: Mutex<Vec<String>>,
    pub failing: HashSet<String>,
}

impl RecordingFetcher {
    pub fn failing_on(urls: &[String]) -> Self {
        Self {
            fetched: Mutex::default(),
            failing: urls.iter().cloned().collect(),
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageFetcher for RecordingFetcher {
    async fn fetch_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.failing.contains(url) {
            return Err(DownloadError::Status(StatusCode::NOT_FOUND));
        }
        tokio::fs::write(dest, url.as_bytes())
            .await
            .map_err(|source| DownloadError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        Ok(url.len() as u64)
    }
}
