mod annotate;
mod config;
mod download;
mod model;
mod notify;
mod photos;
mod pipeline;
mod registry;
mod scraper;
mod storer;
mod target;
mod twitter;

use crate::notify::{Notifier, SlackBot};
use crate::registry::Registry;
use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use log::info;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one pass of the named pipeline
    Dag {
        /// Config name, read from <CONF_DIR>/<NAME>.yaml
        name: String,
        /// Directory holding pipeline configs
        #[clap(long, default_value = "conf")]
        conf_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    if let Err(e) = main2().await {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "{}|{}|{}",
                Local::now().format("%Y%m%d%H%M%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}

async fn main2() -> anyhow::Result<()> {
    let args: Args = Args::parse();
    match args.command {
        Command::Dag { name, conf_dir } => run_dag(&name, &conf_dir).await,
    }
}

async fn run_dag(name: &str, conf_dir: &Path) -> anyhow::Result<()> {
    let notifier = match SlackBot::from_env(name) {
        Ok(bot) => Some(bot),
        Err(e) => {
            info!("Notifications disabled: {}", e);
            None
        }
    };
    let summary = pipeline::report(notifier.as_ref().map(|bot| bot as &dyn Notifier), async {
        let config = config::load(conf_dir, name)
            .with_context(|| format!("Unable to load pipeline {name}"))?;
        let mut pipeline = Registry::builtin().build(&config)?;
        info!(
            "Running pipeline {} (storer: {}, targets: [{}])",
            name,
            pipeline.has_storer(),
            pipeline.target_names().collect::<Vec<_>>().join(", ")
        );
        pipeline.run().await
    })
    .await?;
    info!(
        "Pipeline {} finished: {} scraped, {} published, {} failed",
        name, summary.scraped, summary.published, summary.failed
    );
    Ok(())
}
