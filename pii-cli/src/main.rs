//! Linha de comando do pipeline de anonimização: JSON na entrada, JSON na saída.
//!
//! ```text
//! pii-cli redact --input request.json
//! pii-cli detect --input request.json
//! pii-cli document --input document.json --language pt
//! pii-cli mask-pattern --pattern '\d{3}-\d{4}' "call 555-1234"
//! ```
//!
//! Falhas saem em stdout como `{kind, stage, message}` com código de saída 1.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pii_core::error::ErrorKind;
use pii_core::masker::DEFAULT_PATTERN_REPLACEMENT;
use pii_core::pipeline::FailureReport;
use pii_core::{
    mask_with_pattern, Anonymizer, DetectorConfig, PipelineConfig, PipelineEvent, RedactionError,
    RedactionRequest, RequestFailure, RunControl, SourceDocument, Stage,
};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pii-cli")]
#[command(version, about = "Detecção e mascaramento de PII", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Arquivo JSON de configuração do pipeline
    #[arg(long, global = true, env = "PII_CONFIG")]
    config: Option<PathBuf>,

    /// Escreve os eventos do pipeline em stderr, um JSON por linha
    #[arg(long, global = true)]
    events: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Requisição com unidades já extraídas → resposta mascarada (ou reescrita)
    Redact {
        /// Arquivo da requisição; stdin se omitido
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Mesma requisição do `redact`, mas devolve só as entidades com offsets
    Detect {
        /// Arquivo da requisição; stdin se omitido
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Documento estruturado (texto, parágrafos ou páginas) → documento mascarado
    Document(DocumentArgs),
    /// Substituição regex direta, sem detectores
    MaskPattern {
        #[arg(long)]
        pattern: String,
        #[arg(long, default_value = DEFAULT_PATTERN_REPLACEMENT)]
        replacement: String,
        /// Texto a mascarar; stdin se omitido
        text: Option<String>,
    },
}

#[derive(Args)]
struct DocumentArgs {
    /// Arquivo do documento; stdin se omitido
    #[arg(long)]
    input: Option<PathBuf>,
    /// Código do idioma (ex: "en", "pt")
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    no_statistical: bool,
    #[arg(long)]
    no_pattern: bool,
    /// Reescrita integral em vez de mascaramento por trechos
    #[arg(long)]
    generative: bool,
}

impl DocumentArgs {
    fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            use_statistical: !self.no_statistical,
            use_pattern: !self.no_pattern,
            use_generative: self.generative,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let report = failure_report(&err);
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(_) => eprintln!("{err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::MaskPattern {
            pattern,
            replacement,
            text,
        } => {
            let text = match text {
                Some(t) => t.clone(),
                None => read_input(None)?,
            };
            let masked = mask_with_pattern(&text, pattern, replacement)?;
            println!("{masked}");
            Ok(())
        }
        Commands::Redact { input } => {
            let anonymizer = build_anonymizer(cli.config.as_deref())?;
            let request = read_request(input.as_deref())?;
            let response = with_events(cli.events, |control| anonymizer.redact_with(&request, control))?;
            print_json(&response)
        }
        Commands::Detect { input } => {
            let anonymizer = build_anonymizer(cli.config.as_deref())?;
            let request = read_request(input.as_deref())?;
            let response = with_events(cli.events, |control| anonymizer.detect_with(&request, control))?;
            print_json(&response)
        }
        Commands::Document(args) => {
            let anonymizer = build_anonymizer(cli.config.as_deref())?;
            let raw = read_input(args.input.as_deref())?;
            let document = SourceDocument::from_json_str(&raw)
                .map_err(|e| RequestFailure::new(Stage::Extracting, e))?;
            info!(format = ?document.format_kind(), "documento recebido");

            let detector_config = args.detector_config();
            let output = with_events(cli.events, |control| {
                anonymizer.rewrite_document_with(
                    document,
                    &detector_config,
                    args.language.as_deref(),
                    control,
                )
            })?;
            print_json(&output)
        }
    }
}

fn build_anonymizer(config_path: Option<&Path>) -> Result<Anonymizer> {
    let config = match config_path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("falha ao carregar configuração {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    Ok(Anonymizer::from_config(config)?)
}

/// Executa `f` e, se pedido, despeja os eventos emitidos em stderr.
fn with_events<T>(
    enabled: bool,
    f: impl FnOnce(&RunControl) -> std::result::Result<T, RequestFailure>,
) -> std::result::Result<T, RequestFailure> {
    if !enabled {
        return f(&RunControl::default());
    }
    let (tx, rx) = mpsc::channel::<PipelineEvent>();
    let result = f(&RunControl::with_events(tx));
    for event in rx.try_iter() {
        if let Ok(line) = serde_json::to_string(&event) {
            eprintln!("{line}");
        }
    }
    result
}

fn read_request(path: Option<&Path>) -> Result<RedactionRequest> {
    let raw = read_input(path)?;
    let request: RedactionRequest = serde_json::from_str(&raw).map_err(|e| {
        RequestFailure::new(Stage::Extracting, RedactionError::Extraction(e.to_string()))
    })?;
    Ok(request)
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("falha ao ler {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("falha ao ler stdin")?;
            Ok(buf)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Converte qualquer erro da borda na falha estruturada `{kind, stage, message}`.
fn failure_report(err: &anyhow::Error) -> FailureReport {
    if let Some(failure) = err.downcast_ref::<RequestFailure>() {
        return failure.report();
    }
    let kind = err
        .downcast_ref::<RedactionError>()
        .map(RedactionError::kind)
        .unwrap_or(ErrorKind::IoError);
    FailureReport {
        kind,
        stage: Stage::Received,
        message: format!("{err:#}"),
    }
}
