use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgGroup, Parser};
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use amplicon_aggregator::app::{Pipeline, ReclassifyOptions};
use amplicon_aggregator::classifier::SystemClassifier;
use amplicon_aggregator::config::{ClassifierEnv, ConfigLoader, NameRemap};
use amplicon_aggregator::domain::{ArchiveBundle, ReferenceGenome};
use amplicon_aggregator::error::AggregatorError;
use amplicon_aggregator::output::{JsonOutput, LogSink, OutputMode};
use amplicon_aggregator::upload::{self, HttpUploadClient, Server};
use amplicon_aggregator::workspace::Workspace;

const LICENSE_URL: &str =
    "https://raw.githubusercontent.com/AmpliconSuite/AmpliconRepository/main/licenses/CCv4-BY.txt";

#[derive(Parser)]
#[command(name = "amplicon-agg")]
#[command(about = "Aggregate AmpliconSuite result bundles into one archive with a merged manifest")]
#[command(version, author)]
#[command(group(ArgGroup::new("inputs").required(true).args(["files", "filelist"])))]
struct Cli {
    /// Archives (.tar.gz, .tar, .zip) or directories to aggregate
    #[arg(long, num_args = 1..)]
    files: Vec<PathBuf>,

    /// Text file listing one input per line
    #[arg(long, visible_alias = "flist")]
    filelist: Option<PathBuf>,

    /// Output prefix, also the project name on upload
    #[arg(short, long, default_value = "output")]
    output_name: String,

    /// AmpliconRepository account email; setting it triggers an upload
    #[arg(short, long)]
    username: Option<String>,

    /// Upload the inputs as already-aggregated bundles
    #[arg(long)]
    upload_only: bool,

    /// Two-column file mapping sample names to display names
    #[arg(long)]
    name_map: Option<PathBuf>,

    /// Drop classification outputs from the inputs and re-run the classifier
    #[arg(short = 'c', long)]
    run_classifier: bool,

    #[arg(short, long, value_enum)]
    server: Option<Server>,

    /// Reference genome the samples were aligned to
    #[arg(long = "ref", value_enum)]
    reference: Option<ReferenceGenome>,

    #[arg(long, default_value = "python3")]
    python3_path: PathBuf,

    /// Accept the CC BY 4.0 license required for upload
    #[arg(long)]
    accept_license: bool,

    /// Keep scratch and intermediate directories
    #[arg(long)]
    no_clean: bool,

    /// JSON file overriding layout tokens and exclusion lists
    #[arg(long)]
    config: Option<String>,

    /// Print a JSON run summary on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<AggregatorError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &AggregatorError) -> u8 {
    match error {
        AggregatorError::InvalidInput(_)
        | AggregatorError::ConfigRead(_)
        | AggregatorError::ConfigParse(_)
        | AggregatorError::NameMap(_)
        | AggregatorError::MissingEnvironment(_)
        | AggregatorError::NotAggregated(_) => 2,
        AggregatorError::InputPreparation(_)
        | AggregatorError::ClassifierFailed(_)
        | AggregatorError::ReferenceHttp(_)
        | AggregatorError::ReferenceStatus { .. }
        | AggregatorError::UploadHttp(_)
        | AggregatorError::UploadStatus { .. } => 3,
        AggregatorError::NoResults | AggregatorError::MultipleReferenceGenomes(_) => 4,
        _ => 1,
    }
}

fn validate(cli: &Cli) -> Result<(), AggregatorError> {
    if cli.run_classifier && cli.reference.is_none() {
        return Err(AggregatorError::InvalidInput(
            "--ref must be specified if -c/--run-classifier is set".to_string(),
        ));
    }
    if cli.upload_only && cli.username.is_none() {
        return Err(AggregatorError::InvalidInput(
            "-u/--username must be specified if --upload-only is set".to_string(),
        ));
    }
    if cli.username.is_some() && cli.server.is_none() {
        return Err(AggregatorError::InvalidInput(
            "-s/--server must be specified if -u/--username is set".to_string(),
        ));
    }
    Ok(())
}

fn read_filelist(path: &Path) -> Result<Vec<PathBuf>, AggregatorError> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| AggregatorError::InvalidInput(format!("{}: {err}", path.display())))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    validate(&cli)?;
    let output_mode = if cli.json { OutputMode::Json } else { OutputMode::Log };
    info!("amplicon-agg version {}", env!("CARGO_PKG_VERSION"));

    let inputs = match &cli.filelist {
        Some(list) => read_filelist(list)?,
        None => cli.files.clone(),
    };

    let mut summary = None;
    let bundles = if cli.upload_only {
        for input in &inputs {
            upload::validate_aggregated(input)?;
        }
        inputs
    } else {
        let config = ConfigLoader::resolve(cli.config.as_deref())?;
        let workspace = Workspace::in_current_dir(cli.output_name.clone())?.with_no_clean(cli.no_clean);
        let mut pipeline = Pipeline::<SystemClassifier>::new(config, workspace);
        if let Some(path) = &cli.name_map {
            pipeline = pipeline.with_name_map(NameRemap::load(path)?);
        }
        if let (true, Some(reference)) = (cli.run_classifier, cli.reference) {
            let classifier = SystemClassifier::new(ClassifierEnv::from_env()?)?;
            pipeline = pipeline.with_classifier(
                classifier,
                ReclassifyOptions {
                    reference,
                    python3: cli.python3_path.clone(),
                },
            );
        }
        let bundles = inputs.iter().map(ArchiveBundle::new).collect::<Vec<_>>();
        let result = pipeline.run(&bundles, &LogSink)?;
        let deliverable = pipeline.workspace().deliverable_path().into_std_path_buf();
        summary = Some(result);
        vec![deliverable]
    };

    let mut receipts = Vec::new();
    if let (Some(username), Some(server)) = (&cli.username, cli.server) {
        if cli.accept_license {
            let cwd = std::env::current_dir().into_diagnostic()?;
            let description = upload::describe_origin(&cwd, &upload::hostname());
            let client = HttpUploadClient::new(server)?;
            receipts = upload::upload_bundles(&client, &bundles, &cli.output_name, username, &description)?;
            info!("upload completed; the site will unpack and register the files");
        } else {
            warn!(
                "uploading requires accepting the Creative Commons v4 license ({LICENSE_URL}); re-run with --accept-license"
            );
        }
    }

    if matches!(output_mode, OutputMode::Json) {
        match summary {
            Some(mut summary) => {
                summary.uploads = receipts;
                JsonOutput::print_summary(&summary).into_diagnostic()?;
            }
            None => JsonOutput::print_uploads(&receipts).into_diagnostic()?,
        }
    }
    Ok(())
}
