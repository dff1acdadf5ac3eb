use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use vna_retriever::anonymize::DicomAnonymizer;
use vna_retriever::app::App;
use vna_retriever::archive::ArchiveHttpClient;
use vna_retriever::config::{ConfigLoader, Credentials, RunOptions, parse_terms, read_terms_file};
use vna_retriever::domain::{DateRange, Modality, SearchKind, StudyDate, split_terms};
use vna_retriever::error::RetrieverError;
use vna_retriever::layout::OutputLayout;
use vna_retriever::output::{
    JsonOutput, LogSink, OutputMode, print_report_summary, print_retrieve_summary,
};
use vna_retriever::report::{DEFAULT_REPORT_LIMIT, ReportHttpClient, ReportQuery, export_reports};
use vna_retriever::tui;

#[derive(Parser)]
#[command(name = "vna-query")]
#[command(about = "Download imaging studies from the VNA or export matching radiology reports")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(short, long, global = true, help = "Debug-level logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Search studies and download them as per-series folders")]
    Fetch(FetchArgs),
    #[command(about = "Search the report service and save matches to CSV")]
    Report(ReportArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(value_enum, help = "What the query terms identify")]
    search_type: SearchKind,

    #[arg(short = 'q', long = "query", num_args = 1..)]
    query: Vec<String>,

    #[arg(short = 'p', long = "query-file", help = "Text file with terms")]
    query_file: Option<PathBuf>,

    #[arg(short, long = "save-dir", default_value = ".")]
    save_dir: Utf8PathBuf,

    #[arg(short, long = "exclude", num_args = 1.., help = "Skip series whose name contains a term")]
    exclude: Vec<String>,

    #[arg(short, long)]
    modality: Option<Modality>,

    #[arg(long = "d1", help = "Only studies on or after this date (YYYYMMDD)")]
    start_date: Option<StudyDate>,

    #[arg(long = "d2", help = "Only studies on or before this date (YYYYMMDD)")]
    end_date: Option<StudyDate>,

    #[arg(short, long, help = "Maximum studies per mrn/keyword term")]
    limit: Option<usize>,

    #[arg(short, long)]
    overwrite: bool,

    #[arg(short, long, help = "Select studies before downloading")]
    review: bool,

    #[arg(short = 'k', long, help = "Do not anonymize downloaded files")]
    keep_phi: bool,

    #[arg(long, help = "Only write metadata.xml per series")]
    metadata_only: bool,

    #[arg(long)]
    region: Option<String>,

    #[arg(short, long)]
    user: Option<String>,

    #[arg(short = 'y', long, help = "Skip the download confirmation")]
    yes: bool,
}

#[derive(Args)]
struct ReportArgs {
    #[arg(short = 'q', long = "query", num_args = 1.., conflicts_with_all = ["accession", "mrn"])]
    query: Vec<String>,

    #[arg(short = 'a', long = "accession", num_args = 1.., conflicts_with = "mrn")]
    accession: Vec<String>,

    #[arg(short = 'm', long = "mrn", num_args = 1..)]
    mrn: Vec<String>,

    #[arg(short, long = "save-path", default_value = "results.csv")]
    save_path: PathBuf,

    #[arg(short, long, default_value_t = DEFAULT_REPORT_LIMIT)]
    limit: usize,

    #[arg(short, long)]
    user: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<RetrieverError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RetrieverError) -> u8 {
    match error {
        RetrieverError::InvalidTerm(_)
        | RetrieverError::InvalidModality(_)
        | RetrieverError::InvalidDate(_)
        | RetrieverError::InvalidDateRange { .. }
        | RetrieverError::NoQueryTerms
        | RetrieverError::MissingCredentials(_)
        | RetrieverError::ConfigRead(_)
        | RetrieverError::ConfigParse(_)
        | RetrieverError::UnknownRegion(_)
        | RetrieverError::InvalidCsvPath(_) => 2,
        RetrieverError::AuthenticationFailed { .. } => 3,
        RetrieverError::ArchiveHttp(_)
        | RetrieverError::ArchiveStatus { .. }
        | RetrieverError::ArchiveParse(_)
        | RetrieverError::ReportHttp(_)
        | RetrieverError::ReportStatus { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, cli.config.as_deref(), output_mode),
        Commands::Report(args) => run_report(args, cli.config.as_deref(), output_mode),
    }
}

fn run_fetch(args: FetchArgs, config: Option<&str>, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(config)?;
    let dates = DateRange::new(args.start_date, args.end_date)?;
    let terms = fetch_terms(&args, output_mode)?;
    let credentials = resolve_credentials(args.user.clone(), output_mode)?;

    let archive = ArchiveHttpClient::new(
        resolved.archive_url(args.region.as_deref())?,
        credentials,
        resolved.timeout,
    )?;

    let mut options = RunOptions::new(args.search_type, terms, args.save_dir.clone());
    options.exclude_terms = args.exclude.clone();
    options.modality = args.modality.clone();
    options.dates = dates;
    options.limit = args.limit;
    options.overwrite = args.overwrite;
    options.review = args.review;
    options.anonymize = resolved.anonymize && !args.keep_phi;
    options.metadata_only = args.metadata_only;
    options.delete_timeout = resolved.delete_timeout;

    let app = App::new(
        archive,
        DicomAnonymizer::default(),
        OutputLayout::new(options.save_dir.clone()),
    );

    match output_mode {
        OutputMode::NonInteractive => {
            if options.review {
                tracing::warn!("--review needs a terminal; downloading every match");
            }
            let result = app.run(&options, &JsonOutput)?;
            JsonOutput::print_retrieve(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            tracing::info!(terms = options.terms.len(), "searching archive");
            let mut collection = app.collect(&options, &LogSink)?;

            if options.review {
                let Some(selected) = tui::review_studies(&collection.plans)? else {
                    return Err(miette::Report::new(RetrieverError::Cancelled));
                };
                collection.retain_selected(&selected);
            }

            if !args.yes && !collection.plans.is_empty() {
                let series: usize = collection.plans.iter().map(|p| p.series.len()).sum();
                let images: usize = collection.plans.iter().map(|p| p.instance_count()).sum();
                let lines = vec![
                    format!(
                        "{} studies, {series} series, {images} images",
                        collection.plans.len()
                    ),
                    format!("Save to {}", options.save_dir),
                ];
                if !tui::confirm("Download", &lines)? {
                    return Err(miette::Report::new(RetrieverError::Cancelled));
                }
            }

            let result = app.retrieve(collection, &options, &LogSink)?;
            print_retrieve_summary(&result);
        }
    }
    Ok(())
}

fn fetch_terms(args: &FetchArgs, output_mode: OutputMode) -> miette::Result<Vec<String>> {
    let kind = args.search_type;
    let mut terms = match kind {
        SearchKind::Keyword if !args.query.is_empty() => vec![args.query.join(" ")],
        SearchKind::Keyword => Vec::new(),
        SearchKind::Accnum | SearchKind::Mrn => {
            args.query.iter().flat_map(|q| split_terms(q)).collect()
        }
    };
    if let Some(path) = &args.query_file {
        terms.extend(read_terms_file(path, kind)?);
    }

    if terms.is_empty() && matches!(output_mode, OutputMode::Interactive) {
        let line = tui::prompt_line(&format!("{}: ", kind.prompt()))?;
        terms = parse_terms(&line, kind);
    }
    if terms.is_empty() {
        return Err(miette::Report::new(RetrieverError::NoQueryTerms));
    }
    Ok(terms)
}

fn run_report(args: ReportArgs, config: Option<&str>, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(config)?;

    let mut queries: Vec<ReportQuery> = if !args.accession.is_empty() {
        args.accession
            .iter()
            .flat_map(|acc| split_terms(acc))
            .map(ReportQuery::Accession)
            .collect()
    } else if !args.mrn.is_empty() {
        args.mrn
            .iter()
            .flat_map(|mrn| split_terms(mrn))
            .map(ReportQuery::Patient)
            .collect()
    } else if !args.query.is_empty() {
        vec![ReportQuery::Text(args.query.join(" ").replace(',', ""))]
    } else {
        Vec::new()
    };

    if queries.is_empty() && matches!(output_mode, OutputMode::Interactive) {
        let words = tui::prompt_line("Enter report search words: ")?.replace(',', " ");
        if !words.trim().is_empty() {
            queries.push(ReportQuery::Text(words.trim().to_string()));
        }
    }
    if queries.is_empty() {
        return Err(miette::Report::new(RetrieverError::NoQueryTerms));
    }

    let credentials = resolve_credentials(args.user.clone(), output_mode)?;
    let client = ReportHttpClient::new(&resolved.report_url, credentials, resolved.timeout)?;
    let result = export_reports(&client, &queries, args.limit, &args.save_path)?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_report(&result).into_diagnostic()?,
        OutputMode::Interactive => print_report_summary(&result),
    }
    Ok(())
}

fn resolve_credentials(user: Option<String>, output_mode: OutputMode) -> miette::Result<Credentials> {
    let user = user
        .or_else(|| env::var("VNA_USER").ok())
        .filter(|user| !user.trim().is_empty());
    let password = env::var("VNA_PASSWORD")
        .ok()
        .filter(|password| !password.is_empty());

    match output_mode {
        OutputMode::NonInteractive => {
            let user = user.ok_or_else(|| RetrieverError::MissingCredentials("user".to_string()))?;
            let password = password
                .ok_or_else(|| RetrieverError::MissingCredentials("password".to_string()))?;
            Ok(Credentials::new(user, password))
        }
        OutputMode::Interactive => {
            let user = match user {
                Some(user) => user,
                None => tui::prompt_line("Username: ")?,
            };
            let password = match password {
                Some(password) => password,
                None => tui::prompt_password("Password: ")?,
            };
            Ok(Credentials::new(user, password))
        }
    }
}
