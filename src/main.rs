use std::io::Read;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod semantic;
mod tabs;
#[cfg(test)]
mod tests;
mod web;
use config::Config;
use semantic::GroupingService;
use tabs::TabDescriptor;

fn read_tabs(input: Option<&std::path::Path>) -> anyhow::Result<Vec<TabDescriptor>> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read stdin")?;
            buf
        }
    };

    serde_json::from_str(&raw).context("input must be a JSON array of tabs")
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    match args.command {
        #[cfg(feature = "markdown-docs")]
        cli::Command::MarkdownDocs {} => {
            clap_markdown::print_help_markdown::<cli::Args>();
            Ok(())
        }

        cli::Command::Daemon { listen } => {
            let config = Config::load()?;
            web::start_daemon(config, listen)
        }

        cli::Command::Group {
            input,
            threshold,
            domain_only,
        } => {
            let tabs = read_tabs(input.as_deref())?;
            let config = Config::load()?;

            let runtime = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
            let result = runtime.block_on(async {
                let service = GroupingService::from_config(config)?;
                let result = service.group_tabs(tabs, threshold, domain_only).await?;
                anyhow::Ok(result)
            })?;

            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }

        cli::Command::Status {} => {
            let config = Config::load()?;

            let runtime = tokio::runtime::Runtime::new().context("failed to build tokio runtime")?;
            let status = runtime.block_on(async {
                let service = GroupingService::from_config(config)?;
                if let Err(e) = service.initialize().await {
                    log::error!("{e}");
                }
                anyhow::Ok(service.status())
            })?;

            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
    }
}
