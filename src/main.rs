use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sanctions_tracer::{
    Chain, DesignatedSetHandle, EuEntry, EuNormalizer, InMemoryGraph, NetworkTracer, OfacEntry,
    OfacNormalizer, RawRecord, SanctionsAggregator, SanctionsFeed, SanctionsSource, Settings,
    SourceNormalizer, StaticFeed, UkNormalizer,
};

const USAGE: &str = "\
usage:
  sanctions-tracer aggregate <feed>...
  sanctions-tracer trace (<seed> | --seed <seed>) --graph <graph.json> [--hops N] [--chain CHAIN] <feed>...

feeds:
  ofac:<entries.json>  eu:<entries.json>  uk:<list.csv>  records:<raw.json>

env:
  TRACER_SETTINGS=<settings.json>, TRACER_* overrides, RUST_LOG";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let settings = load_settings()?;

    match args.first().map(String::as_str) {
        Some("aggregate") => run_aggregate(&args[1..], &settings).await,
        Some("trace") => run_trace(&args[1..], &settings).await,
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn load_settings() -> Result<Settings> {
    match env::var("TRACER_SETTINGS") {
        Ok(path) => {
            let mut settings = Settings::from_file(&path)?;
            settings.apply_env()?;
            settings.validate()?;
            Ok(settings)
        }
        Err(_) => Settings::from_env(),
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

async fn run_aggregate(args: &[String], settings: &Settings) -> Result<()> {
    if args.is_empty() {
        bail!("aggregate needs at least one feed\n\n{}", USAGE);
    }

    let feeds = load_feeds(args, settings)?;
    let report = SanctionsAggregator::new(settings.aggregator.clone())
        .collect(&feeds)
        .await;

    eprintln!("✓ {}", report.summary());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Parsed `trace` command line
#[derive(Debug, PartialEq)]
struct TraceArgs<'a> {
    seed: &'a str,
    graph_path: &'a str,
    hops: Option<i64>,
    chain: Chain,
    feed_args: Vec<String>,
}

/// `--seed` takes any address; a positional seed must not look like `kind:path`
fn parse_trace_args(args: &[String]) -> Result<TraceArgs<'_>> {
    let mut seed: Option<&str> = None;
    let mut graph_path: Option<&str> = None;
    let mut hops: Option<i64> = None;
    let mut chain = Chain::Unknown;
    let mut feed_args = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seed" => {
                let value = flag_value(&mut iter, "--seed")?;
                if seed.replace(value).is_some() {
                    bail!("trace takes a single seed\n\n{}", USAGE);
                }
            }
            "--graph" => graph_path = Some(flag_value(&mut iter, "--graph")?),
            "--hops" => {
                let raw = flag_value(&mut iter, "--hops")?;
                hops = Some(raw.parse().with_context(|| format!("invalid --hops value: {}", raw))?);
            }
            "--chain" => {
                let raw = flag_value(&mut iter, "--chain")?;
                chain = raw.parse().map_err(|e: String| anyhow!(e))?;
            }
            other if seed.is_none() && !other.contains(':') => seed = Some(other),
            _ => feed_args.push(arg.clone()),
        }
    }

    Ok(TraceArgs {
        seed: seed.ok_or_else(|| anyhow!("trace needs a seed address\n\n{}", USAGE))?,
        graph_path: graph_path.ok_or_else(|| anyhow!("trace needs --graph\n\n{}", USAGE))?,
        hops,
        chain,
        feed_args,
    })
}

async fn run_trace(args: &[String], settings: &Settings) -> Result<()> {
    let TraceArgs {
        seed,
        graph_path,
        hops,
        chain,
        feed_args,
    } = parse_trace_args(args)?;

    let feeds = load_feeds(&feed_args, settings)?;
    let report = SanctionsAggregator::new(settings.aggregator.clone())
        .collect(&feeds)
        .await;
    eprintln!("✓ {}", report.summary());

    let designated = Arc::new(DesignatedSetHandle::default());
    designated.refresh(&report.entities);

    let graph = Arc::new(InMemoryGraph::from_file(graph_path)?);
    let tracer = NetworkTracer::new(graph.clone(), graph, designated, settings);

    let request = tracer.request(seed, chain, hops)?;
    let result = tracer.trace(&request).await?;

    eprintln!("✓ {}", result.summary());
    eprintln!("  fingerprint {}", result.fingerprint()?);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn flag_value<'a>(iter: &mut std::slice::Iter<'a, String>, flag: &str) -> Result<&'a str> {
    iter.next()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

// ============================================================================
// FEEDS
// ============================================================================

/// Turn `kind:path` arguments into in-memory feeds
fn load_feeds(args: &[String], settings: &Settings) -> Result<Vec<Arc<dyn SanctionsFeed>>> {
    let mut feeds: Vec<Arc<dyn SanctionsFeed>> = Vec::new();

    for arg in args {
        let (kind, path) = arg
            .split_once(':')
            .ok_or_else(|| anyhow!("feed must look like kind:path, got {:?}", arg))?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read feed file: {:?}", path))?;

        match kind {
            "ofac" => {
                let entries: Vec<OfacEntry> =
                    serde_json::from_str(&content).context("Failed to parse OFAC entries JSON")?;
                let normalizer = OfacNormalizer::new(&settings.aggregator);
                feeds.push(Arc::new(StaticFeed::new(
                    normalizer.source(),
                    normalizer.normalize_all(&entries),
                )));
            }
            "eu" => {
                let entries: Vec<EuEntry> =
                    serde_json::from_str(&content).context("Failed to parse EU entries JSON")?;
                let normalizer = EuNormalizer::new(&settings.aggregator);
                feeds.push(Arc::new(StaticFeed::new(
                    normalizer.source(),
                    normalizer.normalize_all(&entries),
                )));
            }
            "uk" => {
                let normalizer = UkNormalizer::new(&settings.aggregator);
                feeds.push(Arc::new(StaticFeed::new(
                    normalizer.source(),
                    normalizer.normalize_csv(&content)?,
                )));
            }
            "records" => {
                let records: Vec<RawRecord> =
                    serde_json::from_str(&content).context("Failed to parse raw records JSON")?;

                // One feed per source so feed-level logging stays per source
                let mut by_source: BTreeMap<SanctionsSource, Vec<RawRecord>> = BTreeMap::new();
                for record in records {
                    by_source.entry(record.source).or_default().push(record);
                }
                for (source, records) in by_source {
                    feeds.push(Arc::new(StaticFeed::new(source, records)));
                }
            }
            other => bail!("unknown feed kind {:?} (expected ofac, eu, uk or records)", other),
        }
    }

    Ok(feeds)
}

// ============================================================================
// TESTS
// ============================================================================
