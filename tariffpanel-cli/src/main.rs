//! Tariff panel CLI: one command per pipeline stage.
//!
//! Commands:
//! - `acquire`: fetch the SEC ticker map and companyfacts for the vendor universe
//! - `build-panel`: reconcile extracted facts into the firm-year income panel
//! - `merge`: join the income panel with vendor financials and tariff exposure
//! - `analyze`: regression variables, main model, bootstrap, event study, robustness
//! - `report`: data dictionary, summary statistics and data checks
//! - `pipeline`: offline end-to-end run from already-acquired artifacts

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tariffpanel_core::artifacts::{self, names};
use tariffpanel_core::crosswalk::select_targets;
use tariffpanel_core::data::{acquire_facts, EdgarProvider, FactsProvider, TracingProgress};
use tariffpanel_core::tariff::load_tariff_exposure;
use tariffpanel_core::vendor::{load_firm_universe, load_vendor_dir};
use tariffpanel_core::{build_panel, merge_panel, Crosswalk, MergeInputs, PipelineConfig};
use tariffpanel_runner::{construct_variables, run_analysis, save_reports, save_results};

#[derive(Parser)]
#[command(
    name = "tariffpanel",
    about = "Tariff exposure and effective tax rates: firm-year panel and DiD analysis"
)]
struct Cli {
    /// TOML run configuration. Defaults reproduce the published constants.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the ticker map and companyfacts for every firm in the vendor universe.
    Acquire {
        /// Vendor firm-universe CSV.
        #[arg(long)]
        universe: PathBuf,

        /// Directory for the crosswalk and raw-facts CSVs.
        #[arg(long, default_value = "data/raw")]
        output_dir: PathBuf,

        /// Stop after this many firms (for smoke runs).
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Build the firm-year income panel from raw facts.
    BuildPanel {
        #[arg(long, default_value = "data/raw/sec_raw_facts.csv")]
        facts: PathBuf,

        #[arg(long, default_value = "data/raw/sec_ticker_cik_mapping.csv")]
        crosswalk: PathBuf,

        #[arg(long, default_value = "data/processed/sec_pretax_income_panel.csv")]
        output: PathBuf,
    },
    /// Merge the income panel with vendor financials and tariff exposure.
    Merge {
        #[arg(long, default_value = "data/processed/sec_pretax_income_panel.csv")]
        income: PathBuf,

        #[arg(long, default_value = "data/raw/sec_ticker_cik_mapping.csv")]
        crosswalk: PathBuf,

        /// Directory holding the firm universe and one CSV per vendor sheet.
        #[arg(long, default_value = "data/raw/vendor")]
        vendor_dir: PathBuf,

        #[arg(long, default_value = "data/raw/tariff_exposure_naics3.csv")]
        tariffs: PathBuf,

        #[arg(long, default_value = "data/processed/merged_panel.csv")]
        output: PathBuf,
    },
    /// Fit the main model, wild bootstrap, event study and robustness suite.
    Analyze {
        #[arg(long, default_value = "data/processed/merged_panel.csv")]
        panel: PathBuf,

        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Write the data dictionary, summary statistics and data checks.
    Report {
        #[arg(long, default_value = "data/processed/merged_panel.csv")]
        panel: PathBuf,

        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Offline end-to-end run: build-panel, merge, report, analyze.
    Pipeline {
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,

        #[arg(long, default_value = "data/raw/vendor")]
        vendor_dir: PathBuf,

        #[arg(long, default_value = "data/processed")]
        processed_dir: PathBuf,

        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Acquire {
            universe,
            output_dir,
            limit,
        } => run_acquire(&config, &universe, &output_dir, limit),
        Commands::BuildPanel {
            facts,
            crosswalk,
            output,
        } => run_build_panel(&config, &facts, &crosswalk, &output),
        Commands::Merge {
            income,
            crosswalk,
            vendor_dir,
            tariffs,
            output,
        } => run_merge(&config, &income, &crosswalk, &vendor_dir, &tariffs, &output),
        Commands::Analyze { panel, output_dir } => run_analyze(&config, &panel, &output_dir),
        Commands::Report { panel, output_dir } => run_report(&panel, &output_dir),
        Commands::Pipeline {
            raw_dir,
            vendor_dir,
            processed_dir,
            output_dir,
        } => run_pipeline(&config, &raw_dir, &vendor_dir, &processed_dir, &output_dir),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let config = match path {
        Some(p) => PipelineConfig::from_file(p)
            .with_context(|| format!("failed to load config {}", p.display()))?,
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn run_acquire(
    config: &PipelineConfig,
    universe: &Path,
    output_dir: &Path,
    limit: Option<usize>,
) -> Result<()> {
    let provider = EdgarProvider::new(&config.acquisition)?;
    if !provider.is_available() {
        bail!(
            "acquisition.user_agent {:?} carries no contact address; SEC rejects such requests",
            config.acquisition.user_agent
        );
    }

    let entries = provider.ticker_map().context("failed to fetch the SEC ticker map")?;
    let crosswalk_path = output_dir.join(names::CROSSWALK);
    artifacts::write_crosswalk(&crosswalk_path, &entries)?;
    info!(entries = entries.len(), path = %crosswalk_path.display(), "saved ticker crosswalk");

    let firms = load_firm_universe(universe, config)?;
    let crosswalk = Crosswalk::from_entries(&entries);
    let mut targets = select_targets(&firms, &crosswalk);
    if let Some(n) = limit {
        targets.truncate(n);
    }
    info!(firms = firms.len(), targets = targets.len(), "acquiring companyfacts");

    let summary = acquire_facts(&provider, &targets, config, &TracingProgress::default());
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        without_facts = summary.without_facts,
        not_found = summary.not_found,
        facts = summary.facts.len(),
        errors = summary.error_count(),
        "acquisition complete"
    );

    let facts_path = output_dir.join(names::RAW_FACTS);
    artifacts::write_facts(&facts_path, &summary.facts)?;
    info!(path = %facts_path.display(), "saved raw facts");
    Ok(())
}

fn run_build_panel(
    config: &PipelineConfig,
    facts: &Path,
    crosswalk: &Path,
    output: &Path,
) -> Result<()> {
    let facts = artifacts::read_facts(facts)?;
    let company_names: HashMap<_, _> =
        Crosswalk::from_entries(&artifacts::read_crosswalk(crosswalk)?)
            .names()
            .clone();
    let build = build_panel(&facts, &company_names, config);
    artifacts::write_income_panel(output, &build.records)?;
    info!(
        rows = build.report.rows_out,
        identity_failures = build.report.identity_failures,
        path = %output.display(),
        "saved income panel"
    );
    Ok(())
}

fn run_merge(
    config: &PipelineConfig,
    income: &Path,
    crosswalk: &Path,
    vendor_dir: &Path,
    tariffs: &Path,
    output: &Path,
) -> Result<()> {
    let income = artifacts::read_income_panel(income)?;
    let crosswalk = Crosswalk::from_entries(&artifacts::read_crosswalk(crosswalk)?);
    let vendor = load_vendor_dir(vendor_dir, config)?;
    let tariffs = load_tariff_exposure(tariffs)?;

    let outcome = merge_panel(
        &MergeInputs {
            income: &income,
            crosswalk: &crosswalk,
            vendor: &vendor,
            tariffs: &tariffs,
        },
        config,
    )
    .context("merge aborted")?;

    artifacts::write_merged_panel(output, &outcome.rows)?;
    for join in &outcome.report.joins {
        join.log();
    }
    info!(rows = outcome.rows.len(), path = %output.display(), "saved merged panel");
    Ok(())
}

fn run_analyze(config: &PipelineConfig, panel: &Path, output_dir: &Path) -> Result<()> {
    let rows = artifacts::read_merged_panel(panel)?;
    if rows.is_empty() {
        bail!("merged panel {} has no rows", panel.display());
    }
    let vars = construct_variables(&rows, config);
    let results = run_analysis(&vars, config)?;
    let written = save_results(&results, output_dir)?;
    for path in &written {
        info!(path = %path.display(), "wrote result");
    }
    if results.failures() > 0 {
        warn!(failures = results.failures(), "some robustness specifications failed");
    }
    Ok(())
}

fn run_report(panel: &Path, output_dir: &Path) -> Result<()> {
    let rows = artifacts::read_merged_panel(panel)?;
    for path in save_reports(&rows, output_dir)? {
        info!(path = %path.display(), "wrote report");
    }
    Ok(())
}

fn run_pipeline(
    config: &PipelineConfig,
    raw_dir: &Path,
    vendor_dir: &Path,
    processed_dir: &Path,
    output_dir: &Path,
) -> Result<()> {
    let crosswalk = raw_dir.join(names::CROSSWALK);
    let income = processed_dir.join(names::INCOME_PANEL);
    let merged = processed_dir.join(names::MERGED_PANEL);

    run_build_panel(config, &raw_dir.join(names::RAW_FACTS), &crosswalk, &income)?;
    run_merge(
        config,
        &income,
        &crosswalk,
        vendor_dir,
        &raw_dir.join(names::TARIFF_EXPOSURE),
        &merged,
    )?;
    run_report(&merged, output_dir)?;
    run_analyze(config, &merged, output_dir)
}
