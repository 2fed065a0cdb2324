//! Crossrank scoring entrypoint.
//!
//! `crossrank [--config PATH] <query> <doc>...` loads the best artifact from the configured
//! save directory and prints one relevance score per document as a JSON array.

use std::path::PathBuf;

use anyhow::{Context, bail};
use mimalloc::MiMalloc;

use crossrank::config::Config;
use crossrank::scoring::Reranker;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const USAGE: &str = "usage: crossrank [--config PATH] <query> <doc>...";

#[derive(Debug)]
struct Invocation {
    config_path: Option<PathBuf>,
    query: String,
    docs: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Invocation> {
    let mut config_path = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config requires a path")?;
                config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => bail!("{USAGE}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let Some(query) = positional.next() else {
        bail!("{USAGE}");
    };

    Ok(Invocation {
        config_path,
        query,
        docs: positional.collect(),
    })
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env_overrides()?;
            config
        }
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let invocation = parse_args(std::env::args().skip(1))?;
    let config = load_config(invocation.config_path.as_ref())?;

    tracing::info!(
        save_dir = %config.logging.save_dir.display(),
        model_type = %config.model_type,
        num_docs = invocation.docs.len(),
        "Crossrank scoring"
    );

    let reranker = Reranker::from_config(&config)
        .with_context(|| format!("loading artifact from {}", config.logging.save_dir.display()))?;

    let docs: Vec<&str> = invocation.docs.iter().map(String::as_str).collect();
    let scores = reranker.rerank(&invocation.query, &docs)?;

    println!("{}", serde_json::to_string(&scores)?);
    Ok(())
}
