//! Plantwise - Feedback-driven plant recommender
//!
//! Command-line entry point: recommendations with feedback, rule mining,
//! knowledge base maintenance and feedback log housekeeping.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use plantwise_core::{
    config::RecommenderConfig,
    kb::{KbUpdater, KnowledgeBaseStore},
    mining::{read_feedback_csv, MiningParams, RuleMiner},
    retrain::{PipelineRun, RetrainOutcome},
    synthetic::{seed_feedback, SyntheticGenerator},
    Attribute, CatalogItem, CatalogProvider, CondSet, FeedbackMaintenance, FeedbackRecord,
    FeedbackStore, Polarity, RecommendationSession, Recommender, SqliteStore,
};
use std::path::{Path, PathBuf};
use tracing::{debug, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "plantwise")]
#[command(about = "Feedback-driven plant recommender", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides paths.database)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Mine association rules from the feedback log
    Mine {
        /// Minimum itemset support
        #[arg(long)]
        min_support: Option<f64>,

        /// Minimum rule confidence
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Parsed-rules output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Mine a feedback export (`.csv`, or JSON records) instead of the
        /// database window
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Merge parsed rules into the knowledge base
    Merge {
        /// Parsed-rules file
        #[arg(long)]
        parsed: Option<PathBuf>,

        /// Knowledge base file
        #[arg(long)]
        kb: Option<PathBuf>,
    },

    /// Recommend a plant for the given preferences
    Recommend {
        #[command(flatten)]
        preferences: Preferences,

        /// Record feedback for the recommendation
        #[arg(long)]
        feedback: Option<Answer>,
    },

    /// Retrain the model and refresh the knowledge base now
    Retrain,

    /// Catalog management
    Catalog {
        #[command(subcommand)]
        action: CatalogCommands,
    },

    /// Append synthetic feedback to bootstrap the log
    Seed {
        /// Number of records to generate
        #[arg(short = 'n', long, default_value = "100")]
        count: usize,
    },

    /// Prune and rebalance the feedback log
    Maintain {
        /// Keep only the newest N records
        #[arg(long)]
        keep_latest: Option<usize>,

        /// Delete random majority-class records until polarities are equal
        #[arg(long)]
        balance: bool,
    },

    /// Knowledge base inspection
    Kb {
        #[command(subcommand)]
        action: KbCommands,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Import catalog items from a JSON array
    Import {
        /// File with `[{"plant_name": ..., "description": ..., "image_url": ...}]`
        file: PathBuf,
    },
    /// List catalog items
    List,
}

#[derive(Subcommand)]
enum KbCommands {
    /// Show rule counts and the strongest rules
    Stats {
        /// Knowledge base file
        #[arg(long)]
        kb: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Answer {
    Yes,
    No,
}

#[derive(clap::Args)]
struct Preferences {
    #[arg(long)]
    area_size: Option<String>,
    #[arg(long)]
    sunlight_need: Option<String>,
    #[arg(long)]
    environment_type: Option<String>,
    #[arg(long)]
    climate_type: Option<String>,
    #[arg(long)]
    watering_frequency: Option<String>,
    #[arg(long)]
    fertilizer_frequency: Option<String>,
    #[arg(long)]
    pesticide_frequency: Option<String>,
    #[arg(long)]
    has_pet: Option<String>,
    #[arg(long)]
    has_child: Option<String>,
}

impl Preferences {
    fn to_conditions(&self) -> Result<CondSet> {
        let values = [
            (Attribute::AreaSize, &self.area_size),
            (Attribute::SunlightNeed, &self.sunlight_need),
            (Attribute::EnvironmentType, &self.environment_type),
            (Attribute::ClimateType, &self.climate_type),
            (Attribute::WateringFrequency, &self.watering_frequency),
            (Attribute::FertilizerFrequency, &self.fertilizer_frequency),
            (Attribute::PesticideFrequency, &self.pesticide_frequency),
            (Attribute::HasPet, &self.has_pet),
            (Attribute::HasChild, &self.has_child),
        ];

        let mut conditions = CondSet::new();
        for (attr, value) in values {
            if let Some(value) = value {
                conditions.insert(attr, value).with_context(|| {
                    format!("Allowed values for {}: {}", attr, attr.domain().join(", "))
                })?;
            }
        }
        if conditions.is_empty() {
            bail!("At least one preference flag is required (e.g. --environment-type Indoor)");
        }
        Ok(conditions)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::new(format!("plantwise={}", level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Plantwise v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config =
        RecommenderConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.paths.database = Some(db);
    }

    match cli.command {
        Commands::Mine {
            min_support,
            min_confidence,
            output,
            input,
        } => mine(&config, min_support, min_confidence, output, input).await,
        Commands::Merge { parsed, kb } => merge(&config, parsed, kb).await,
        Commands::Recommend {
            preferences,
            feedback,
        } => recommend(config, &preferences, feedback).await,
        Commands::Retrain => {
            let (recommender, _store) = Recommender::open(config)
                .await
                .context("Failed to open recommender")?;
            let run = recommender.retrain_now().await;
            print_run(&run);
            match run.error() {
                Some(e) => Err(e).context("Retrain failed"),
                None => Ok(()),
            }
        }
        Commands::Catalog { action } => catalog(&config, action).await,
        Commands::Seed { count } => seed(&config, count).await,
        Commands::Maintain {
            keep_latest,
            balance,
        } => maintain(&config, keep_latest, balance).await,
        Commands::Kb {
            action: KbCommands::Stats { kb },
        } => kb_stats(&config, kb),
    }
}

async fn open_store(config: &RecommenderConfig) -> Result<SqliteStore> {
    let path = config.paths.database_path();
    SqliteStore::open(&path)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))
}

async fn mine(
    config: &RecommenderConfig,
    min_support: Option<f64>,
    min_confidence: Option<f64>,
    output: Option<PathBuf>,
    input: Option<PathBuf>,
) -> Result<()> {
    let mut params = MiningParams::from(&config.mining);
    if let Some(s) = min_support {
        params.min_support = s;
    }
    if let Some(c) = min_confidence {
        params.min_confidence = c;
    }
    if !(params.min_support > 0.0 && params.min_support <= 1.0) {
        bail!("--min-support must be in (0, 1]");
    }

    let output = output.unwrap_or_else(|| config.paths.parsed_rules_path());
    let miner = RuleMiner::new(&config.mining, config.paths.mining_cursor_path(), &output)
        .with_params(params);

    let report = match input {
        Some(path) => {
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            let records = if is_csv {
                read_feedback_csv(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?
            } else {
                read_json::<Vec<FeedbackRecord>>(&path)?
            };
            miner.mine_records(records).await?
        }
        None => {
            let store = open_store(config).await?;
            miner.mine_log(&store).await?
        }
    };

    if let Some(span) = &report.window {
        println!(
            "Mined records [{} - {}) of {}",
            span.offset,
            span.end(),
            span.total
        );
    }
    println!(
        "Positive: {} records -> {} rules",
        report.positive_records, report.positive_rules
    );
    println!(
        "Negative: {} records -> {} rules",
        report.negative_records, report.negative_rules
    );
    println!("Wrote {}", report.output.display());
    Ok(())
}

async fn merge(
    config: &RecommenderConfig,
    parsed: Option<PathBuf>,
    kb: Option<PathBuf>,
) -> Result<()> {
    let parsed = parsed.unwrap_or_else(|| config.paths.parsed_rules_path());
    let kb = kb.unwrap_or_else(|| config.paths.knowledge_base_path());

    let store = KnowledgeBaseStore::with_attempts(&kb, config.kb.max_write_attempts)
        .with_context(|| format!("Failed to open knowledge base {}", kb.display()))?;
    let report = KbUpdater::new(config.kb.conflict_key)
        .apply(&parsed, &store)
        .await
        .context("Knowledge base merge failed")?;

    println!(
        "Added {} positive, {} negative rules ({} invalid, {} conflicts, {} duplicates)",
        report.added_positive,
        report.added_negative,
        report.skipped_invalid,
        report.conflicts_resolved,
        report.duplicates_dropped
    );
    println!(
        "Knowledge base: {} positive, {} negative",
        report.total_positive, report.total_negative
    );
    Ok(())
}

async fn recommend(
    config: RecommenderConfig,
    preferences: &Preferences,
    feedback: Option<Answer>,
) -> Result<()> {
    let user = preferences.to_conditions()?;
    let (recommender, _store) = Recommender::open(config)
        .await
        .context("Failed to open recommender")?;

    let mut session = RecommendationSession::new();
    let rec = recommender
        .recommend(&mut session, &user)
        .await
        .context("Recommendation failed")?;

    println!("{} (score {:.3}, {})", rec.item, rec.score, rec.path);
    if !rec.entry.description.is_empty() {
        println!("  {}", rec.entry.description);
    }
    if let Some(image) = &rec.entry.image_ref {
        println!("  {}", image);
    }

    let Some(answer) = feedback else {
        return Ok(());
    };

    let outcome = recommender
        .submit_feedback(&mut session, matches!(answer, Answer::Yes))
        .await
        .context("Failed to record feedback")?;
    println!("Feedback recorded (id {})", outcome.record_id);

    match outcome.retrain {
        Some(RetrainOutcome::Completed(run)) => print_run(&run),
        Some(RetrainOutcome::Scheduled { accepted })
        | Some(RetrainOutcome::Coalesced { accepted }) => {
            println!("Retraining after {} accepted recommendations...", accepted);
            // Let the background run finish before the process exits
            recommender.orchestrator().wait_idle().await;
            if let Some(run) = recommender.orchestrator().last_run() {
                print_run(&run);
            }
        }
        Some(RetrainOutcome::NotDue { .. }) | None => {}
    }
    Ok(())
}

fn print_run(run: &PipelineRun) {
    println!("Retrain run {}:", run.id);
    for stage in &run.stages {
        let detail = stage
            .report
            .as_ref()
            .and_then(|r| r.detail.clone())
            .or_else(|| stage.error.clone())
            .unwrap_or_default();
        println!("  {:<14} {:?} {}", stage.name, stage.status, detail);
    }
}

async fn catalog(config: &RecommenderConfig, action: CatalogCommands) -> Result<()> {
    let store = open_store(config).await?;
    match action {
        CatalogCommands::Import { file } => {
            let items = read_json::<Vec<CatalogItem>>(&file)?;
            let imported = store.import_items(items).await?;
            println!("Imported {} catalog items", imported);
        }
        CatalogCommands::List => {
            let items = store.load_items().await?;
            for item in &items {
                println!("{}", item.item_id);
            }
            println!("{} items", items.len());
        }
    }
    Ok(())
}

async fn seed(config: &RecommenderConfig, count: usize) -> Result<()> {
    let store = open_store(config).await?;
    let catalog = store.load_items().await?;
    let existing = store.fetch_all().await?;

    let records = SyntheticGenerator::default()
        .generate(&catalog, &existing, count, &mut rand::thread_rng())
        .context("Run `plantwise catalog import` first")?;
    let seeded = seed_feedback(&store, records).await?;

    println!(
        "Seeded {} records ({} accepted in log)",
        seeded,
        store.count(Some(true)).await?
    );
    Ok(())
}

async fn maintain(
    config: &RecommenderConfig,
    keep_latest: Option<usize>,
    balance: bool,
) -> Result<()> {
    let store = open_store(config).await?;

    let keep = keep_latest.unwrap_or(config.maintenance.keep_latest);
    let pruned = store.prune_to_latest(keep).await?;
    println!("Pruned {} records (keeping newest {})", pruned, keep);

    if balance {
        let removed = store.balance_polarity().await?;
        println!("Removed {} records to balance polarity", removed);
    }

    println!(
        "Feedback log: {} accepted, {} rejected",
        store.count(Some(true)).await?,
        store.count(Some(false)).await?
    );
    Ok(())
}

fn kb_stats(config: &RecommenderConfig, kb: Option<PathBuf>) -> Result<()> {
    let path = kb.unwrap_or_else(|| config.paths.knowledge_base_path());
    let store = KnowledgeBaseStore::open(&path)
        .with_context(|| format!("Failed to open knowledge base {}", path.display()))?;
    let snapshot = store.snapshot();

    println!("Knowledge base: {}", path.display());
    for polarity in [Polarity::Positive, Polarity::Negative] {
        let rules = snapshot.rules(polarity);
        let mut items: Vec<&str> = rules.iter().map(|r| r.suggested_item.as_str()).collect();
        items.sort_unstable();
        items.dedup();
        println!(
            "  {}: {} rules over {} items",
            polarity,
            rules.len(),
            items.len()
        );

        let mut strongest: Vec<_> = rules.iter().collect();
        strongest.sort_by(|a, b| b.lift.total_cmp(&a.lift));
        for rule in strongest.iter().take(5) {
            let conditions: Vec<String> = rule
                .conditions
                .iter()
                .map(|(attr, value)| format!("{}={}", attr, value))
                .collect();
            println!(
                "    {} <- {} (lift {:.2}, confidence {:.2})",
                rule.suggested_item,
                conditions.join(", "),
                rule.lift,
                rule.confidence
            );
        }
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}
