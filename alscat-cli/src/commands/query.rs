use clap::{Args, ValueEnum};

use alscat_core::error::CatalogError;
use alscat_core::query::{CatalogQuery, DocumentFilter, FileFilter};
use alscat_core::types::{FileKind, IssueKind, ScopeSelector};

use super::{CatalogArgs, OutputFormat, print_json, print_rows};

/// What a query returns.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    Documents,
    Files,
    Devices,
    Chains,
    Pairs,
    Recent,
    Hotspots,
    Health,
    Issues,
    Storage,
    Activity,
    Largest,
    Footprint,
    Unreferenced,
    Stats,
}

#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct QueryArgs {
    /// Result shape
    #[arg(value_enum)]
    pub shape: QueryShape,

    #[command(flatten)]
    pub catalog: CatalogArgs,

    /// Substring to match in paths and names
    #[arg(long)]
    pub term: Option<String>,

    /// Scope to read, or `all`
    #[arg(long, default_value = "all")]
    pub scope: ScopeSelector,

    /// File kind: document, artifact, media, other
    #[arg(long, value_parser = parse_kind)]
    pub kind: Option<FileKind>,

    /// Only documents with missing references
    #[arg(long)]
    pub missing_only: bool,

    #[arg(long)]
    pub min_devices: Option<u32>,

    #[arg(long)]
    pub min_samples: Option<u32>,

    /// Keep backup copies in the results
    #[arg(long)]
    pub include_backups: bool,

    /// Maximum rows (default from config)
    #[arg(long)]
    pub limit: Option<usize>,

    /// Chain length for `chains`
    #[arg(long)]
    pub chain_len: Option<u32>,

    /// Window in days for `recent`
    #[arg(long)]
    pub window: Option<u32>,

    /// Issue kind for `issues`: parse_error, missing_refs, zero_tracks, zero_clips
    #[arg(long, value_parser = parse_issue)]
    pub issue: Option<IssueKind>,

    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

fn parse_kind(s: &str) -> Result<FileKind, String> {
    FileKind::parse(s).ok_or_else(|| format!("unknown file kind '{s}'"))
}

fn parse_issue(s: &str) -> Result<IssueKind, String> {
    IssueKind::parse(s).ok_or_else(|| format!("unknown issue kind '{s}'"))
}

pub fn run(args: &QueryArgs) -> anyhow::Result<()> {
    let config = args.catalog.load_config()?;
    let db_path = args.catalog.existing_db(&config)?;
    let query = CatalogQuery::open(&db_path)
        .and_then(|q| q.with_default_limit(config.query.default_limit))
        .map_err(CatalogError::from)?;

    let scope = &args.scope;
    let limit = args.limit;
    let format = args.format;
    match args.shape {
        QueryShape::Documents => {
            let filter = DocumentFilter {
                term: args.term.clone(),
                scope: scope.clone(),
                missing_only: args.missing_only,
                min_devices: args.min_devices,
                min_samples: args.min_samples,
                include_backups: args.include_backups,
                limit,
            };
            print_rows(&run_query(query.documents(&filter))?, format)
        }
        QueryShape::Files => {
            let filter = FileFilter {
                term: args.term.clone(),
                kind: args.kind,
                scope: scope.clone(),
                include_backups: args.include_backups,
                limit,
            };
            print_rows(&run_query(query.files(&filter))?, format)
        }
        QueryShape::Devices => print_rows(&run_query(query.top_devices(scope, limit))?, format),
        QueryShape::Chains => print_rows(
            &run_query(query.top_chains(scope, args.chain_len, limit))?,
            format,
        ),
        QueryShape::Pairs => print_rows(&run_query(query.device_pairs(scope, limit))?, format),
        QueryShape::Recent => print_rows(
            &run_query(query.recent_devices(scope, args.window, limit))?,
            format,
        ),
        QueryShape::Hotspots => {
            print_rows(&run_query(query.missing_hotspots(scope, limit))?, format)
        }
        QueryShape::Health => print_rows(&run_query(query.worst_health(scope, limit))?, format),
        QueryShape::Issues => print_rows(
            &run_query(query.quality_issues(scope, args.issue, limit))?,
            format,
        ),
        QueryShape::Storage => print_rows(&run_query(query.storage_summary(scope))?, format),
        QueryShape::Activity => print_rows(&run_query(query.activity(scope))?, format),
        QueryShape::Largest => print_rows(&run_query(query.largest_sets(scope, limit))?, format),
        QueryShape::Footprint => print_rows(&run_query(query.audio_footprint(scope))?, format),
        QueryShape::Unreferenced => {
            print_rows(&run_query(query.unreferenced_audio(scope, limit))?, format)
        }
        QueryShape::Stats => {
            let stats = run_query(query.stats(scope))?;
            match format {
                OutputFormat::Json => print_json(&stats),
                OutputFormat::Text => print_rows(std::slice::from_ref(&stats), format),
            }
        }
    }
}

fn run_query<T>(result: Result<T, alscat_core::error::QueryError>) -> anyhow::Result<T> {
    result.map_err(|e| CatalogError::from(e).into())
}
