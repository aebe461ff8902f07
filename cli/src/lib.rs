//! Command-line interface for the Knot movie search.
//!
//! `knot build` embeds a catalog into a store file, `knot query` searches it
//! with free text and `knot similar` finds neighbours of a stored movie.
//! Results are written to stdout as JSON lines; logs go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use knot_embeddings::EmbeddingStore;
use knot_retrieval::{
    Dataset, DocumentMatch, EmbeddingProviderType, Granularity, RankedResult, RetrievalConfig,
    RetrievalPipeline,
};

#[derive(Parser, Debug)]
#[command(
    name = "knot",
    version,
    about = "Sentence-embedding search over a movie catalog"
)]
pub struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(long, global = true, env = "KNOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Embed every description of a dataset into a store
    Build(BuildArgs),
    /// Find the sentences, or movies, closest to a free-text query
    Query(QueryArgs),
    /// Find movies similar to one already in the store
    Similar(SimilarArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Dataset CSV with an identifier and a description column
    #[arg(long, env = "KNOT_INPUT")]
    pub input: PathBuf,

    /// Where to write the embedding store
    #[arg(long, env = "KNOT_STORE", default_value = "embeddings.csv")]
    pub output: PathBuf,

    /// Embed whole descriptions (`document`) or single sentences (`sentence`)
    #[arg(long)]
    pub granularity: Option<Granularity>,

    /// Number of units encoded at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    #[command(flatten)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Free-text query
    pub text: String,

    /// Embedding store written by `knot build`
    #[arg(long, env = "KNOT_STORE", default_value = "embeddings.csv")]
    pub store: PathBuf,

    /// Dataset CSV; when given, each hit carries its original row
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Number of results
    #[arg(short)]
    pub k: Option<usize>,

    /// Rank movies by their best sentence instead of listing sentences
    #[arg(long, default_value_t = false)]
    pub documents: bool,

    /// Drop results scoring below this similarity
    #[arg(long)]
    pub min_score: Option<f32>,

    #[command(flatten)]
    pub columns: DatasetArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

#[derive(Args, Debug)]
pub struct SimilarArgs {
    /// Identifier of the movie to start from
    #[arg(long)]
    pub document: String,

    /// Embedding store written by `knot build`
    #[arg(long, env = "KNOT_STORE", default_value = "embeddings.csv")]
    pub store: PathBuf,

    /// Dataset CSV; when given, each hit carries its original row
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Number of results
    #[arg(short)]
    pub k: Option<usize>,

    #[command(flatten)]
    pub columns: DatasetArgs,

    #[command(flatten)]
    pub embedding: EmbeddingArgs,
}

/// Dataset column overrides.
#[derive(Args, Debug, Default)]
pub struct DatasetArgs {
    /// Identifier column of the dataset
    #[arg(long)]
    pub id_column: Option<String>,

    /// Description column of the dataset
    #[arg(long)]
    pub text_column: Option<String>,
}

impl DatasetArgs {
    fn apply(&self, config: &mut RetrievalConfig) {
        if let Some(column) = &self.id_column {
            config.dataset.id_column = column.clone();
        }
        if let Some(column) = &self.text_column {
            config.dataset.text_column = column.clone();
        }
    }
}

/// Embedding provider overrides. Queries must use the provider the store
/// was built with.
#[derive(Args, Debug, Default)]
pub struct EmbeddingArgs {
    /// Embedding provider: hashing, openai or local
    #[arg(long, env = "KNOT_PROVIDER")]
    pub provider: Option<EmbeddingProviderType>,

    /// Embedding model identifier
    #[arg(long, env = "KNOT_MODEL")]
    pub model: Option<String>,

    /// Output dimension
    #[arg(long)]
    pub dimensions: Option<usize>,

    /// Base URL for an OpenAI-compatible API
    #[arg(long, env = "KNOT_OPENAI_BASE")]
    pub base_url: Option<String>,
}

impl EmbeddingArgs {
    fn apply(&self, config: &mut RetrievalConfig) {
        let embedding = &mut config.embedding;
        if let Some(provider) = self.provider {
            embedding.provider = provider;
        }
        if let Some(model) = &self.model {
            embedding.model = Some(model.clone());
        }
        if let Some(dimensions) = self.dimensions {
            embedding.dimensions = Some(dimensions);
        }
        if let Some(base_url) = &self.base_url {
            embedding.base_url = Some(base_url.clone());
        }
    }
}

/// Install the stderr log subscriber.
pub fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,knot_cli={level},knot_retrieval={level},knot_embeddings={level}"
        ))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run a parsed command, writing results to `out`.
pub async fn run<W: Write>(cli: Cli, out: &mut W) -> Result<()> {
    let config = match &cli.config {
        Some(path) => RetrievalConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => RetrievalConfig::default(),
    };

    match cli.command {
        Command::Build(args) => build(args, config, out).await,
        Command::Query(args) => query(args, config, out).await,
        Command::Similar(args) => similar(args, config, out),
    }
}

async fn build<W: Write>(args: BuildArgs, mut config: RetrievalConfig, out: &mut W) -> Result<()> {
    args.dataset.apply(&mut config);
    args.embedding.apply(&mut config);
    if let Some(granularity) = args.granularity {
        config.granularity = granularity;
    }
    if let Some(concurrency) = args.concurrency {
        config.embedding.concurrency = concurrency;
    }

    let dataset = Dataset::from_path(&args.input, &config.dataset)
        .with_context(|| format!("failed to read dataset {}", args.input.display()))?;
    let mut pipeline = RetrievalPipeline::from_config(&config)?;

    let report = pipeline.build(&dataset.documents()).await?;
    pipeline
        .persist(&args.output)
        .with_context(|| format!("failed to write store {}", args.output.display()))?;
    info!("Wrote {} units to {}", report.units, args.output.display());

    emit(out, &report)
}

async fn query<W: Write>(args: QueryArgs, mut config: RetrievalConfig, out: &mut W) -> Result<()> {
    args.columns.apply(&mut config);
    args.embedding.apply(&mut config);
    if let Some(min_score) = args.min_score {
        config.query.min_score = min_score;
    }

    let pipeline = open_pipeline(&args.store, &config)?;
    let dataset = read_dataset(args.dataset.as_deref(), &config)?;
    let k = args.k.unwrap_or(config.query.default_k);

    if args.documents {
        for hit in pipeline.query_documents(&args.text, k).await? {
            emit(out, &DocumentHit::new(&hit, dataset.as_ref())?)?;
        }
    } else {
        for hit in pipeline.query(&args.text, k).await? {
            emit(out, &UnitHit::new(&hit, dataset.as_ref())?)?;
        }
    }
    Ok(())
}

fn similar<W: Write>(args: SimilarArgs, mut config: RetrievalConfig, out: &mut W) -> Result<()> {
    args.columns.apply(&mut config);
    args.embedding.apply(&mut config);

    let pipeline = open_pipeline(&args.store, &config)?;
    let dataset = read_dataset(args.dataset.as_deref(), &config)?;
    let k = args.k.unwrap_or(config.query.default_k);

    for hit in pipeline.similar_to(&args.document, k)? {
        emit(out, &DocumentHit::new(&hit, dataset.as_ref())?)?;
    }
    Ok(())
}

fn open_pipeline(store_path: &Path, config: &RetrievalConfig) -> Result<RetrievalPipeline> {
    let store = EmbeddingStore::load(store_path)
        .with_context(|| format!("failed to load store {}", store_path.display()))?;
    let mut pipeline = RetrievalPipeline::from_config(config)?;
    pipeline.load_store(store);
    pipeline
        .ready_for_query()
        .with_context(|| format!("store {} cannot be queried", store_path.display()))?;
    Ok(pipeline)
}

fn read_dataset(path: Option<&Path>, config: &RetrievalConfig) -> Result<Option<Dataset>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let dataset = Dataset::from_path(path, &config.dataset)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    Ok(Some(dataset))
}

fn dataset_row(dataset: Option<&Dataset>, document_id: &str) -> Result<Option<serde_json::Value>> {
    let Some(dataset) = dataset else {
        return Ok(None);
    };
    match dataset.row(document_id) {
        Some(row) => Ok(Some(serde_json::to_value(row)?)),
        None => {
            warn!("Document {document_id} is not in the dataset");
            Ok(None)
        }
    }
}

fn emit<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// One sentence hit.
#[derive(Debug, Serialize)]
struct UnitHit<'a> {
    rank: usize,
    id: &'a str,
    score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sentence: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row: Option<serde_json::Value>,
}

impl<'a> UnitHit<'a> {
    fn new(hit: &'a RankedResult, dataset: Option<&Dataset>) -> Result<Self> {
        let provenance = hit.provenance.as_ref();
        let document_id = provenance.map(|p| p.document_id.as_str());
        Ok(Self {
            rank: hit.rank,
            id: &hit.id,
            score: hit.score,
            document_id,
            sentence: provenance.map(|p| p.text.as_str()),
            row: dataset_row(dataset, document_id.unwrap_or(&hit.id))?,
        })
    }
}

/// One movie hit.
#[derive(Debug, Serialize)]
struct DocumentHit<'a> {
    rank: usize,
    document_id: &'a str,
    score: f32,
    best_unit_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    row: Option<serde_json::Value>,
}

impl<'a> DocumentHit<'a> {
    fn new(hit: &'a DocumentMatch, dataset: Option<&Dataset>) -> Result<Self> {
        Ok(Self {
            rank: hit.rank,
            document_id: &hit.document_id,
            score: hit.score,
            best_unit_id: &hit.best_unit_id,
            row: dataset_row(dataset, &hit.document_id)?,
        })
    }
}
