use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use rp_analysis::config::{slot_to_timestamp, AnalysisConfig, PENALTY_START_SLOT};
use rp_analysis::distribution::BidDistributions;
use rp_analysis::pipeline::{self, AnalysisInput, AnalysisReport};
use rp_data::beaconchain::{BeaconchainClient, DEFAULT_BEACONCHAIN_URL};
use rp_data::loader::{load_distributor_map, load_ledger, load_snapshots};
use rp_data::relay_cache::RelayCache;
use rp_data::store::ResultsStore;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct AppContext {
    db_path: String,
}

#[derive(Parser, Debug)]
#[command(name = "rp-losses")]
#[command(about = "Reward losses from wrong fee recipients and vanilla blocks in a staking pool")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/losses.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the loss analysis over a directory of slot snapshots.
    Analyze(AnalyzeArgs),
    /// Show stored results and relay cache state.
    Status(StatusArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Directory of `*_slot-<start>-to-<end>.csv` snapshot files.
    #[arg(long, default_value = "data/slots")]
    data_dir: PathBuf,

    /// JSON-lines exchange-rate ledger.
    #[arg(long, default_value = "data/balances.jsonl")]
    ledger: PathBuf,

    /// JSON object mapping node addresses to fee distributors.
    #[arg(long, default_value = "data/fee_distributors.json")]
    distributors: PathBuf,

    #[arg(long, default_value = "data/relay_cache.json")]
    relay_cache: PathBuf,

    #[arg(long, default_value_t = PENALTY_START_SLOT)]
    penalty_start_slot: u64,

    #[arg(long, env = "BEACONCHAIN_URL", default_value = DEFAULT_BEACONCHAIN_URL)]
    beaconchain_url: String,

    #[arg(long, env = "BEACONCHAIN_API_KEY", hide_env_values = true)]
    beaconchain_api_key: Option<String>,

    /// Hide the relay lookup progress bar.
    #[arg(long)]
    no_progress: bool,

    #[arg(long, value_enum, default_value = "table")]
    output: OutputFormat,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[arg(long, default_value = "data/relay_cache.json")]
    relay_cache: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        db_path: cli.db_path,
    };

    match cli.command {
        Commands::Analyze(args) => handle_analyze(&ctx, args).await,
        Commands::Status(args) => handle_status(&ctx, args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

async fn handle_analyze(ctx: &AppContext, args: AnalyzeArgs) -> Result<()> {
    let snapshots = load_snapshots(&args.data_dir)?;
    let ledger = load_ledger(&args.ledger)?;
    let distributors = load_distributor_map(&args.distributors)?;

    let mut config = AnalysisConfig {
        penalty_start_slot: args.penalty_start_slot,
        ..AnalysisConfig::default()
    };
    config.relay_filter.show_progress = !args.no_progress;

    let mut cache = RelayCache::open(&args.relay_cache)?;
    let client = BeaconchainClient::new(&args.beaconchain_url, args.beaconchain_api_key)?;

    let input = AnalysisInput {
        records: snapshots.records,
        start_slot: snapshots.start_slot,
        end_slot: snapshots.end_slot,
        ledger,
        distributors,
    };
    let report = pipeline::run(input, &config, &mut cache, &client).await?;

    persist_report(ctx, &report)?;

    match args.output {
        OutputFormat::Table => print_report_table(&report),
        OutputFormat::Json => print_report_json(&report)?,
    }

    info!(
        files = snapshots.files.len(),
        db_path = %ctx.db_path,
        "analyze command completed"
    );
    Ok(())
}

fn persist_report(ctx: &AppContext, report: &AnalysisReport) -> Result<()> {
    let store = ResultsStore::new(&ctx.db_path)
        .wrap_err_with(|| format!("failed to open results database {}", ctx.db_path))?;

    store.replace_mev_recipient_losses(&report.mev_losses.wrong)?;
    store.replace_vanilla_losses(&report.vanilla_losses.records)?;
    store.replace_removed_slots(&report.relay_filter.removed)?;
    for dist in &report.distributions {
        store.replace_unplotted_slots(dist.variant.as_str(), &dist.unplotted)?;
    }
    Ok(())
}

fn slot_date(slot: u64) -> String {
    chrono::DateTime::from_timestamp(slot_to_timestamp(slot) as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

fn format_losses(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{v:.4}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_report_table(report: &AnalysisReport) {
    let coverage = &report.coverage;

    let mut overview = Table::new();
    overview.load_preset(UTF8_BORDERS_ONLY);
    overview.set_header(vec!["Metric", "Value"]);
    overview.add_row(vec![
        "Slot Range".to_string(),
        format!(
            "{} - {} ({} to {})",
            coverage.start_slot,
            coverage.end_slot,
            slot_date(coverage.start_slot),
            slot_date(coverage.end_slot)
        ),
    ]);
    overview.add_row(vec![
        "Coverage".to_string(),
        format!("{:.2} weeks, {:.2}% of range", coverage.weeks, coverage.pct_of_range),
    ]);
    overview.add_row(vec![
        "Bid-to-Reward Ratio".to_string(),
        format!(
            "{:.4} (median {:.4}, {} samples)",
            report.bid_ratio.mean, report.bid_ratio.median, report.bid_ratio.samples
        ),
    ]);
    overview.add_row(vec![
        "Imputed Bids".to_string(),
        format!(
            "{} ({} from gap-prone relays, {} missing and {} low bids anomalous)",
            report.imputation.imputed,
            report.imputation.known_relay_gap,
            report.imputation.anomalous_missing.len(),
            report.imputation.anomalous_low_bid.len()
        ),
    ]);
    overview.add_row(vec![
        "Malformed Records".to_string(),
        report.normalize.malformed.len().to_string(),
    ]);
    overview.add_row(vec![
        "Relay-Tagged Slots Removed".to_string(),
        format!(
            "{} ({:.4} ETH lost to wrong recipients, not in totals)",
            report.relay_filter.removed.len(),
            report.relay_filter.removed_wrong_recipient_eth
        ),
    ]);
    overview.add_row(vec![
        "No-Bid Cross Check".to_string(),
        format!(
            "neighbor {:.4} ETH vs average {:.4} ETH",
            report.nobid_cross_check.neighbor_estimate_eth,
            report.nobid_cross_check.avg_estimate_eth
        ),
    ]);
    overview.add_row(vec![
        "Actual APY".to_string(),
        format!("{:.4}%", report.window.apy()),
    ]);
    println!("\n{overview}\n");

    let mut losses = Table::new();
    losses.load_preset(UTF8_BORDERS_ONLY);
    losses.set_header(vec![
        "Category",
        "Slots",
        "Lost ETH",
        "ETH / Week",
        "Counterfactual APY",
        "Perf. Hit",
        "Top Losses",
    ]);
    for summary in &report.summaries {
        losses.add_row(vec![
            summary.category.clone(),
            summary.slots.to_string(),
            format!("{:.4}", summary.total_eth),
            format!("{:.4}", summary.eth_per_week),
            format!("{:.4}%", summary.impact.counterfactual_apy),
            format!("{:.3}%", summary.impact.performance_hit_pct),
            format_losses(&summary.top_losses),
        ]);
    }
    println!("{losses}\n");

    let issues = &report.node_issues;
    let mut nodes = Table::new();
    nodes.load_preset(UTF8_BORDERS_ONLY);
    nodes.set_header(vec!["Node Issue", "Nodes", "Slots"]);
    let node_row = |label: &str, counts: &BTreeMap<String, usize>| {
        vec![
            label.to_string(),
            counts.len().to_string(),
            counts.values().sum::<usize>().to_string(),
        ]
    };
    nodes.add_row(node_row("Wrong recipient, MEV-boost", &issues.mev_wrong_recipient));
    nodes.add_row(node_row("Wrong recipient, vanilla", &issues.vanilla_wrong_recipient));
    nodes.add_row(node_row("Wrong recipient, removed slots", &issues.removed_wrong_recipient));
    nodes.add_row(node_row("Vanilla, correct recipient", &issues.vanilla_correct_recipient));
    nodes.add_row(node_row("No bid", &issues.no_bid));
    println!("{nodes}\n");

    for dist in &report.distributions {
        print_distribution_table(dist);
    }
}

fn print_distribution_table(dist: &BidDistributions) {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        format!("Bids ({})", dist.variant.as_str()),
        "Samples".to_string(),
        "Median Bid".to_string(),
    ]);
    for curve in &dist.curves {
        // first x at or past the 50% survival point
        let median = curve
            .x
            .iter()
            .zip(&curve.y)
            .skip(1)
            .find(|(_, y)| **y <= 0.5)
            .map(|(x, _)| format!("{x:.4}"))
            .unwrap_or_else(|| "N/A".to_string());
        table.add_row(vec![
            curve.category.label().to_string(),
            curve.samples.to_string(),
            median,
        ]);
    }
    println!("{table}");
    println!("unplotted pool slots: {}\n", dist.unplotted.len());
}

fn print_report_json(report: &AnalysisReport) -> Result<()> {
    let json_str = serde_json::to_string_pretty(report).wrap_err("failed to serialize JSON")?;
    println!("{json_str}");
    Ok(())
}

struct CacheStatus {
    path: String,
    working_file_present: bool,
    resolved_slots: usize,
    relay_tags: BTreeMap<String, usize>,
}

fn handle_status(ctx: &AppContext, args: StatusArgs) -> Result<()> {
    let store = ResultsStore::new(&ctx.db_path)
        .wrap_err_with(|| format!("failed to open results database {}", ctx.db_path))?;
    let cache = RelayCache::open(&args.relay_cache)?;

    let mut relay_tags = BTreeMap::new();
    for (_, resolution) in cache.iter() {
        let tag = resolution.relay_tag().unwrap_or("no relay").to_string();
        *relay_tags.entry(tag).or_insert(0usize) += 1;
    }
    let cache_status = CacheStatus {
        path: cache.path().display().to_string(),
        working_file_present: cache.working_path().exists(),
        resolved_slots: cache.len(),
        relay_tags,
    };

    let db_size_str = if ctx.db_path == ":memory:" {
        "N/A (in-memory)".to_string()
    } else {
        match std::fs::metadata(&ctx.db_path) {
            Ok(metadata) => format!("{} KB", metadata.len() / 1_000),
            Err(_) => "N/A (file not found)".to_string(),
        }
    };

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Database Path", ctx.db_path.as_str()]);
    table.add_row(vec!["DB Size", &db_size_str]);
    for name in [
        "mev_recipient_losses",
        "vanilla_losses",
        "removed_slots",
        "unplotted_slots",
    ] {
        let count = store.count_rows(name)?;
        table.add_row(vec![name, &count.to_string()]);
    }
    table.add_row(vec!["Relay Cache", cache_status.path.as_str()]);
    table.add_row(vec![
        "Unfinished Lookup Batch",
        if cache_status.working_file_present { "yes" } else { "no" },
    ]);
    table.add_row(vec!["Resolved Slots", &cache_status.resolved_slots.to_string()]);
    for (tag, count) in &cache_status.relay_tags {
        table.add_row(vec![format!("  {tag}").as_str(), &count.to_string()]);
    }

    println!("\n{}\n", table);

    info!(
        resolved_slots = cache_status.resolved_slots,
        db_path = %ctx.db_path,
        "status command completed"
    );
    Ok(())
}
