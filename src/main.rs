//! `hybrid-embed`: embed texts from the command line.
//!
//! ```bash
//! hybrid-embed --config config/hybrid-embed.yaml --context realtime "emergency fund"
//! echo "retirement planning" | hybrid-embed --provider local
//! hybrid-embed --health
//! ```
//!
//! Results, health and metrics are printed to stdout as JSON. Logs go to
//! stderr; set `HYBRID_EMBED_LOG_JSON=1` for JSON log lines and `RUST_LOG`
//! to change the level.

use std::env;
use std::io::{self, BufRead};

use anyhow::{Context, bail};
use hybrid_embed::{EmbedOptions, EmbeddingContext, HybridConfig, HybridEmbeddingService, ProviderKind};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: hybrid-embed [--config <path>] [--context <realtime|batch|quality_sensitive|default>] \
[--provider <local|remote>] [--fresh] [--health] [--metrics] [TEXT...]";

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    options: EmbedOptions,
    health: bool,
    metrics: bool,
    texts: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                parsed.config = Some(args.next().context("--config needs a path")?);
            }
            "--context" => {
                let raw = args.next().context("--context needs a value")?;
                let context: EmbeddingContext = raw.parse().map_err(anyhow::Error::msg)?;
                parsed.options.context = context;
            }
            "--provider" => {
                let raw = args.next().context("--provider needs a value")?;
                let provider: ProviderKind = raw.parse().map_err(anyhow::Error::msg)?;
                parsed.options.preferred = Some(provider);
            }
            "--fresh" => parsed.options.force_fresh = true,
            "--health" => parsed.health = true,
            "--metrics" => parsed.metrics = true,
            "--help" | "-h" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            _ => parsed.texts.push(arg),
        }
    }
    Ok(parsed)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = env::var("HYBRID_EMBED_LOG_JSON").is_ok_and(|v| v == "1");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let mut args = parse_args(env::args().skip(1))?;

    let config = match &args.config {
        Some(path) => HybridConfig::from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => {
            let mut config = HybridConfig::default();
            config.apply_env_overrides(|name| env::var(name).ok())?;
            config.validate()?;
            config
        }
    };
    let service = HybridEmbeddingService::new(config).await?;

    if args.health {
        println!("{}", serde_json::to_string_pretty(&service.health_check().await)?);
    }

    if args.texts.is_empty() && !args.health && !args.metrics {
        for line in io::stdin().lock().lines() {
            let line = line?;
            if !line.trim().is_empty() {
                args.texts.push(line);
            }
        }
    }
    if !args.texts.is_empty() {
        let results = service.embed(&args.texts, &args.options).await?;
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    if args.metrics {
        println!("{}", serde_json::to_string_pretty(&service.get_metrics().await)?);
    }

    service.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_flags_and_texts() {
        let parsed = args(&[
            "--config",
            "embed.yaml",
            "--context",
            "quality",
            "--provider",
            "remote",
            "--fresh",
            "credit score",
            "net worth",
        ])
        .unwrap();
        assert_eq!(parsed.config.as_deref(), Some("embed.yaml"));
        assert_eq!(parsed.options.context, EmbeddingContext::QualitySensitive);
        assert_eq!(parsed.options.preferred, Some(ProviderKind::Remote));
        assert!(parsed.options.force_fresh);
        assert_eq!(parsed.texts, vec!["credit score", "net worth"]);
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(args(&["--context", "urgent"]).is_err());
        assert!(args(&["--provider", "cohere"]).is_err());
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["--config"]).is_err());
    }
}
