//! One pass of scrape, archive and publish.

use crate::notify::Notifier;
use crate::scraper::Scraper;
use crate::storer::Storer;
use crate::target::Target;
use anyhow::Context;
use log::{error, info, warn};
use serde::Serialize;
use serde_json::json;
use std::future::Future;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub scraped: usize,
    pub storer: Option<String>,
    pub targets: Vec<String>,
    pub published: usize,
    pub failed: usize,
}

pub struct Pipeline {
    scraper: Box<dyn Scraper>,
    storer: Option<(String, Box<dyn Storer>)>,
    targets: Vec<(String, Box<dyn Target>)>,
}

impl Pipeline {
    pub fn new(
        scraper: Box<dyn Scraper>,
        storer: Option<(String, Box<dyn Storer>)>,
        targets: Vec<(String, Box<dyn Target>)>,
    ) -> Self {
        Self {
            scraper,
            storer,
            targets,
        }
    }

    pub fn has_storer(&self) -> bool {
        self.storer.is_some()
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|(name, _)| name.as_str())
    }

    /// Runs every phase in order and stops at the first fatal error. Staged
    /// files live in a temporary directory removed when the pass ends, however it ends.
    pub async fn run(&mut self) -> anyhow::Result<RunSummary> {
        let staging = tempfile::Builder::new()
            .prefix("twit2imgs")
            .tempdir()
            .context("Unable to create staging directory")?;
        let mut summary = RunSummary::default();

        let records = self.scraper.scrape().await.context("Scrape failed")?;
        info!("Scraped {} records", records.len());
        summary.scraped = records.len();

        if let Some((name, storer)) = &self.storer {
            storer
                .store(&records, staging.path())
                .await
                .with_context(|| format!("Storer {name} failed"))?;
            info!("Stored {} records with {}", records.len(), name);
            summary.storer = Some(name.clone());
        }

        for (name, target) in self.targets.iter_mut() {
            info!("Updating target {}", name);
            target
                .preprocess()
                .await
                .with_context(|| format!("Target {name} failed to prepare"))?;
            let report = target
                .post_tweets(&records)
                .await
                .with_context(|| format!("Target {name} failed to publish"))?;
            target
                .postprocess()
                .await
                .with_context(|| format!("Target {name} failed to finish"))?;
            if report.failed > 0 {
                warn!(
                    "Target {}: {} of {} images failed",
                    name,
                    report.failed,
                    records.len()
                );
            }
            summary.published += report.published;
            summary.failed += report.failed;
            summary.targets.push(name.clone());
        }

        staging
            .close()
            .context("Unable to remove staging directory")?;
        Ok(summary)
    }
}

/// Awaits a whole pass and reports its outcome. The pass's own result is
/// returned untouched; a notification that cannot be delivered is only logged.
pub async fn report<F>(notifier: Option<&dyn Notifier>, pass: F) -> anyhow::Result<RunSummary>
where
    F: Future<Output = anyhow::Result<RunSummary>>,
{
    let outcome = pass.await;
    let Some(notifier) = notifier else {
        return outcome;
    };
    let message = match &outcome {
        Ok(summary) => json!(summary),
        Err(e) => json!({ "ERROR": format!("{e:?}"), "MESSAGE": format!("{e:#}") }),
    };
    if let Err(e) = notifier.post(&message).await {
        error!("Unable to send notification: {:#}", e);
    }
    outcome
}
