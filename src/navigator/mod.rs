//! Traversal controller: find the "next" control and move the carousel

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::models::{AdvanceMethod, BlockReason, NavigationOutcome};
use crate::traits::{GallerySelectors, GalleryPage, PageElement};

/// Key that moves the gallery viewer to the next item
pub const NEXT_KEY: &str = "ArrowRight";

/// Reports whether `this` is hidden by style/layout or disabled for input
pub const CONTROL_STATE_FN: &str = r#"function() {
    const style = window.getComputedStyle(this);
    const hidden = style.display === 'none' ||
        style.visibility === 'hidden' ||
        parseFloat(style.opacity || '1') === 0 ||
        this.offsetParent === null;
    const disabled = this.hasAttribute('disabled') ||
        this.getAttribute('aria-disabled') === 'true' ||
        style.pointerEvents === 'none';
    return { hidden, disabled };
}"#;

/// Activates `this` without going through input dispatch
pub const FORCE_CLICK_FN: &str = "function() { this.click(); }";

#[derive(Debug, Default, Deserialize)]
struct ControlState {
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    disabled: bool,
}

/// What the page offers for moving forward
pub enum ControlProbe {
    Enabled(Box<dyn PageElement>),
    Disabled,
    Missing,
}

impl ControlProbe {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Enabled(_) => "enabled",
            Self::Disabled => "disabled",
            Self::Missing => "missing",
        }
    }
}

async fn control_state(element: &dyn PageElement) -> ControlState {
    match element.evaluate(CONTROL_STATE_FN).await {
        Ok(value) => serde_json::from_value(value).unwrap_or_default(),
        Err(e) => {
            debug!("Control state probe failed: {}", e);
            ControlState::default()
        }
    }
}

fn first_of(
    result: Result<Vec<Box<dyn PageElement>>>,
    selector: &str,
) -> Option<Box<dyn PageElement>> {
    match result {
        Ok(elements) => elements.into_iter().next(),
        Err(e) => {
            debug!("Query failed for {}: {}", selector, e);
            None
        }
    }
}

async fn click_center(page: &dyn GalleryPage, target: &dyn PageElement) -> Result<bool> {
    if !target.is_visible().await? {
        return Ok(false);
    }
    let Some(bbox) = target.bounding_box().await? else {
        return Ok(false);
    };
    let (x, y) = bbox.center();
    page.click_at(x, y).await?;
    Ok(true)
}

pub struct Navigator {
    next_selectors: Vec<String>,
    focus_selectors: Vec<String>,
}

impl Navigator {
    pub fn new(selectors: &GallerySelectors) -> Self {
        Self {
            next_selectors: selectors.next_control.clone(),
            focus_selectors: selectors.focus_target.clone(),
        }
    }

    /// Inspect the "next" controls in selector order.
    ///
    /// The first control that is not hidden decides the result; hidden
    /// controls are passed over.
    pub async fn probe(&self, page: &dyn GalleryPage) -> ControlProbe {
        for selector in &self.next_selectors {
            let Some(control) = first_of(page.query_all(selector).await, selector) else {
                continue;
            };

            let state = control_state(control.as_ref()).await;
            if state.hidden {
                debug!("Next control for {} is hidden", selector);
                continue;
            }

            let mut disabled = state.disabled;
            if let Some(inner) = first_of(control.query_all("button").await, "button") {
                let inner_state = control_state(inner.as_ref()).await;
                if inner_state.hidden {
                    continue;
                }
                disabled |= inner_state.disabled;
            }

            disabled |= !self.is_rendered(control.as_ref()).await;

            return if disabled {
                ControlProbe::Disabled
            } else {
                ControlProbe::Enabled(control)
            };
        }

        ControlProbe::Missing
    }

    async fn is_rendered(&self, control: &dyn PageElement) -> bool {
        let visible = control.is_visible().await.unwrap_or(false);
        let has_area = matches!(control.bounding_box().await, Ok(Some(bbox)) if bbox.has_area());
        visible && has_area
    }

    /// Click the centre of the gallery container so key input reaches it
    pub async fn focus_gallery(&self, page: &dyn GalleryPage) -> bool {
        for selector in &self.focus_selectors {
            let Some(target) = first_of(page.query_all(selector).await, selector) else {
                continue;
            };

            match click_center(page, target.as_ref()).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => debug!("Could not focus {}: {}", selector, e),
            }
        }
        false
    }

    pub async fn advance(&self, page: &dyn GalleryPage) -> NavigationOutcome {
        let probe = self.probe(page).await;
        debug!("Next control is {}", probe.label());

        match probe {
            ControlProbe::Disabled => NavigationOutcome::Blocked(BlockReason::Disabled),
            ControlProbe::Missing => {
                // Keyboard-only galleries render no arrows at all
                self.focus_gallery(page).await;
                match page.press_key(NEXT_KEY).await {
                    Ok(()) => NavigationOutcome::Advanced {
                        via: AdvanceMethod::Keyboard,
                        with_control: false,
                    },
                    Err(e) => {
                        warn!("No next control and key input failed: {}", e);
                        NavigationOutcome::Blocked(BlockReason::Missing)
                    }
                }
            }
            ControlProbe::Enabled(control) => {
                self.focus_gallery(page).await;

                for method in [AdvanceMethod::Keyboard, AdvanceMethod::Button, AdvanceMethod::Script] {
                    match self.activate(page, control.as_ref(), method).await {
                        Ok(()) => {
                            return NavigationOutcome::Advanced {
                                via: method,
                                with_control: true,
                            };
                        }
                        Err(e) => debug!("Advancing via {} failed: {}", method, e),
                    }
                }

                NavigationOutcome::Blocked(BlockReason::Unreachable)
            }
        }
    }

    async fn activate(
        &self,
        page: &dyn GalleryPage,
        control: &dyn PageElement,
        method: AdvanceMethod,
    ) -> Result<()> {
        match method {
            AdvanceMethod::Keyboard => page.press_key(NEXT_KEY).await,
            AdvanceMethod::Button => control.click().await,
            AdvanceMethod::Script => control.evaluate(FORCE_CLICK_FN).await.map(|_| ()),
        }
    }
}
