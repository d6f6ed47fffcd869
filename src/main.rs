use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod browser;
mod download;
mod harvester;
mod ledger;
mod locator;
mod models;
mod navigator;
mod sites;
#[cfg(test)]
mod testing;
mod traits;

use browser::ChromeBrowser;
use download::HttpFetcher;
use harvester::GalleryHarvester;
use models::StopReason;
use traits::HarvestConfig;

#[derive(Parser, Debug)]
#[command(name = "gallery-harvester", about = "Save every photo of a gallery carousel once")]
struct Cli {
    /// Run Chromium without a window
    #[arg(long)]
    headless: bool,
}

/// Drive `work` to completion unless `interrupt` fires first
async fn unless_interrupted<T, I>(work: impl Future<Output = T>, interrupt: Pin<&mut I>) -> Option<T>
where
    I: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        output = work => Some(output),
        _ = interrupt => None,
    }
}

async fn open_harvester(browser: &ChromeBrowser, config: HarvestConfig) -> Result<GalleryHarvester> {
    let fetcher = Arc::new(HttpFetcher::new(config.download_timeout)?);
    let page = Arc::new(browser.new_page().await?);
    GalleryHarvester::new(page, fetcher, config).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = HarvestConfig::from_env(sites::pro_gallery::sardine_school())?;

    info!("Starting gallery harvester");
    info!("Output directory: {}", config.output_dir.display());

    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let launched = unless_interrupted(
        ChromeBrowser::launch(cli.headless, config.viewport, config.navigation_timeout),
        interrupt.as_mut(),
    )
    .await;
    let Some(browser) = launched.transpose()? else {
        warn!("Interrupted while launching the browser");
        return Ok(());
    };

    let opened = unless_interrupted(open_harvester(&browser, config), interrupt.as_mut()).await;
    let mut harvester = match opened {
        Some(Ok(harvester)) => harvester,
        Some(Err(e)) => {
            browser.close().await;
            return Err(e);
        }
        None => {
            warn!("Interrupted before the gallery was opened");
            browser.close().await;
            return Ok(());
        }
    };

    let prepared = unless_interrupted(harvester.prepare(), interrupt.as_mut()).await;
    let completed = match prepared {
        Some(Ok(())) => unless_interrupted(harvester.run(), interrupt.as_mut()).await,
        Some(Err(e)) => {
            browser.close().await;
            return Err(e);
        }
        None => None,
    };

    if completed.is_none() {
        warn!("Interrupted, stopping after saved images");
        harvester.finish(StopReason::Interrupted);
    }

    harvester.log_summary();
    browser.close().await;

    Ok(())
}
