use crate::config::{ComponentConfig, ConfigError, PipelineConfig};
use crate::pipeline::Pipeline;
use crate::scraper::{HashtagScraper, Scraper, UserScraper};
use crate::storer::{GcsStorer, Storer};
use crate::target::{GooglePhotosTarget, Target};
use anyhow::Context;
use log::debug;
use std::collections::HashMap;

type Factory<T> = fn(&ComponentConfig) -> anyhow::Result<Box<T>>;

/// Closed table of the component implementations a config document may name.
pub struct Registry {
    scrapers: HashMap<&'static str, Factory<dyn Scraper>>,
    storers: HashMap<&'static str, Factory<dyn Storer>>,
    targets: HashMap<&'static str, Factory<dyn Target>>,
}

fn user_scraper(component: &ComponentConfig) -> anyhow::Result<Box<dyn Scraper>> {
    Ok(Box::new(UserScraper::from_config(component)?))
}

fn hashtag_scraper(component: &ComponentConfig) -> anyhow::Result<Box<dyn Scraper>> {
    Ok(Box::new(HashtagScraper::from_config(component)?))
}

fn gcs_storer(component: &ComponentConfig) -> anyhow::Result<Box<dyn Storer>> {
    Ok(Box::new(GcsStorer::from_config(component)?))
}

fn google_photos_target(component: &ComponentConfig) -> anyhow::Result<Box<dyn Target>> {
    Ok(Box::new(GooglePhotosTarget::from_config(component)?))
}

fn resolve<'a, T: ?Sized>(
    table: &'a HashMap<&'static str, Factory<T>>,
    kind: &'static str,
    component: &ComponentConfig,
) -> Result<&'a Factory<T>, ConfigError> {
    table
        .get(component.key())
        .ok_or_else(|| ConfigError::UnknownComponent {
            kind,
            cls: component.cls.clone(),
        })
}

impl Registry {
    pub fn builtin() -> Self {
        let mut scrapers: HashMap<_, Factory<dyn Scraper>> = HashMap::new();
        scrapers.insert("UserScraper", user_scraper);
        scrapers.insert("HashtagScraper", hashtag_scraper);

        let mut storers: HashMap<_, Factory<dyn Storer>> = HashMap::new();
        storers.insert("GcsStorer", gcs_storer);

        let mut targets: HashMap<_, Factory<dyn Target>> = HashMap::new();
        targets.insert("GooglePhotosTarget", google_photos_target);

        Self {
            scrapers,
            storers,
            targets,
        }
    }

    /// Checks every component name first, then constructs them in document order.
    /// Nothing here talks to the network.
    pub fn build(&self, config: &PipelineConfig) -> anyhow::Result<Pipeline> {
        let scraper_factory = resolve(&self.scrapers, "scraper", &config.scraper)?;
        let storer_factory = config
            .storer
            .as_ref()
            .map(|storer| resolve(&self.storers, "storer", storer))
            .transpose()?;
        let target_factories = config
            .targets
            .iter()
            .map(|(name, target)| Ok((name, target, resolve(&self.targets, "target", target)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let scraper = scraper_factory(&config.scraper)
            .with_context(|| format!("Unable to build scraper {}", config.scraper.cls))?;
        let storer = match (storer_factory, &config.storer) {
            (Some(factory), Some(component)) => {
                let storer = factory(component)
                    .with_context(|| format!("Unable to build storer {}", component.cls))?;
                Some((component.key().to_string(), storer))
            }
            _ => None,
        };
        let mut targets = Vec::with_capacity(target_factories.len());
        for (name, component, factory) in target_factories {
            debug!("Building target {} ({})", name, component.cls);
            let target = factory(component)
                .with_context(|| format!("Unable to build target {name} ({})", component.cls))?;
            targets.push((name.clone(), target));
        }
        Ok(Pipeline::new(scraper, storer, targets))
    }
}
