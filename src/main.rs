//! Blind Review Backend - Command-line Interface
//! Author: kartik4091
//! Created: 2025-06-06
//!
//! Operator commands for uploading manuscripts, toggling anonymisation
//! and inspecting the redaction ledger.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Arg, ArgMatches, Command, ValueEnum};
use serde::Serialize;
use tracing::{error, info};

use blindreview::config::{LoggingConfig, ServiceConfig};
use blindreview::pdf::{DisabledOcr, LopdfParser, OcrEngine, TesseractOcr};
use blindreview::storage::{FileStore, LocalFileStore, MemoryStore, SqliteStore};
use blindreview::workflow::{ReviewDesk, Submission};
use blindreview::{init_logging, Category, EncryptedField, Error, Result, TrackingCode};

const MEMORY_DATABASE: &str = "memory:";

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Info, warning, and error messages (default)
    Info,
    /// Debug and all messages
    Debug,
    /// Trace and all messages (most verbose)
    Trace,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let config = match load_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(2);
        }
    };

    let logging = match matches.get_one::<LogLevel>("verbose") {
        Some(level) => LoggingConfig {
            level: level.as_filter().to_string(),
            ..config.logging.clone()
        },
        None => config.logging.clone(),
    };
    init_logging(&logging);

    if let Err(e) = run(&matches, &config).await {
        error!("{}", e);
        process::exit(if e.is_recoverable() { 75 } else { 1 });
    }
}

fn build_cli() -> Command {
    let code = || {
        Arg::new("code")
            .value_name("TRACKING_CODE")
            .help("Eight-digit tracking code")
            .required(true)
    };
    let category = || {
        Arg::new("category")
            .value_name("CATEGORY")
            .help("email, authors or institution")
            .required(true)
    };

    Command::new("blindreview")
        .version(env!("CARGO_PKG_VERSION"))
        .author("kartik4091")
        .about("Blind review backend: encrypted manuscripts and reversible PDF anonymisation")
        .subcommand_required(true)
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .global(true)
            .help("Configuration file (YAML)"))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .value_parser(clap::value_parser!(LogLevel))
            .global(true)
            .help("Set logging verbosity"))
        .subcommand(Command::new("upload")
            .about("Store a new manuscript and print its tracking code")
            .arg(Arg::new("file").long("file").value_name("PDF").required(true))
            .arg(Arg::new("email").long("email").required(true))
            .arg(Arg::new("title").long("title").required(true))
            .arg(Arg::new("authors").long("authors").default_value(""))
            .arg(Arg::new("institution").long("institution").default_value("")))
        .subcommand(Command::new("status")
            .about("Show a manuscript as its author sees it")
            .arg(code())
            .arg(Arg::new("email").long("email").required(true)))
        .subcommand(Command::new("blur")
            .about("Anonymise one category in the current revision")
            .arg(code())
            .arg(category()))
        .subcommand(Command::new("unblur")
            .about("Restore one category from the redaction ledger")
            .arg(code())
            .arg(category()))
        .subcommand(Command::new("ledger")
            .about("List redaction records and revision history")
            .arg(code()))
        .subcommand(Command::new("encrypt")
            .about("Seal a value with the field key")
            .arg(Arg::new("value").required(true)))
        .subcommand(Command::new("decrypt")
            .about("Open a token sealed with the field key")
            .arg(Arg::new("token").required(true)))
}

fn load_config(matches: &ArgMatches) -> Result<ServiceConfig> {
    match matches.get_one::<String>("config") {
        Some(path) => ServiceConfig::from_yaml_file(path),
        None => ServiceConfig::from_env(),
    }
}

async fn build_desk(config: &ServiceConfig) -> Result<ReviewDesk> {
    let codec = config.field_codec()?;
    let files: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&config.storage.upload_root));
    let ocr: Arc<dyn OcrEngine> = if config.ocr.enabled {
        Arc::new(
            TesseractOcr::new(config.ocr.tesseract_binary.clone(), config.ocr.languages.clone())
                .with_timeout(config.redaction.document_timeout()),
        )
    } else {
        Arc::new(DisabledOcr)
    };
    let parser = Arc::new(LopdfParser);

    let desk = if config.storage.database_url == MEMORY_DATABASE {
        ReviewDesk::new(Arc::new(MemoryStore::new()), files, parser, ocr, codec, config)
    } else {
        let store =
            SqliteStore::connect(&config.storage.database_url, config.storage.max_connections)
                .await?;
        ReviewDesk::new(Arc::new(store), files, parser, ocr, codec, config)
    };
    Ok(desk)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(Error::internal)?;
    println!("{}", rendered);
    Ok(())
}

fn code_arg(matches: &ArgMatches) -> Result<TrackingCode> {
    matches
        .get_one::<String>("code")
        .ok_or_else(|| Error::ValidationError("tracking code is required".into()))?
        .parse()
}

fn category_arg(matches: &ArgMatches) -> Result<Category> {
    matches
        .get_one::<String>("category")
        .ok_or_else(|| Error::ValidationError("category is required".into()))?
        .parse()
}

fn string_arg<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches.get_one::<String>(name).map(String::as_str).unwrap_or_default()
}

async fn run(matches: &ArgMatches, config: &ServiceConfig) -> Result<()> {
    let (command, args) = matches
        .subcommand()
        .ok_or_else(|| Error::ValidationError("no command given".into()))?;

    // field codec commands work without touching storage
    match command {
        "encrypt" => {
            let token = config.field_codec()?.encrypt(string_arg(args, "value"))?;
            println!("{}", token.as_str());
            return Ok(());
        }
        "decrypt" => {
            let token = EncryptedField::from_stored(string_arg(args, "token"));
            println!("{}", config.field_codec()?.decrypt(&token)?);
            return Ok(());
        }
        _ => {}
    }

    let desk = build_desk(config).await?;
    match command {
        "upload" => {
            let path = PathBuf::from(string_arg(args, "file"));
            let bytes = tokio::fs::read(&path).await?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let code = desk
                .submit(Submission {
                    email: string_arg(args, "email").to_string(),
                    title: string_arg(args, "title").to_string(),
                    authors: string_arg(args, "authors").to_string(),
                    institution: string_arg(args, "institution").to_string(),
                    filename,
                    bytes,
                })
                .await?;
            println!("{}", code);
        }
        "status" => {
            let view = desk.status(code_arg(args)?, string_arg(args, "email")).await?;
            print_json(&view)?;
        }
        "blur" => {
            let outcome = desk.blur(code_arg(args)?, category_arg(args)?).await?;
            info!(
                "Applied {} of {} redaction(s)",
                outcome.applied_count, outcome.expected_count
            );
            println!("{}", outcome.new_path);
        }
        "unblur" => {
            let outcome = desk.unblur(code_arg(args)?, category_arg(args)?).await?;
            info!("Restored {} region(s)", outcome.restored_count);
            println!("{}", outcome.new_path);
        }
        "ledger" => {
            let code = code_arg(args)?;
            #[derive(Serialize)]
            struct LedgerReport<T, U> {
                records: T,
                revisions: U,
            }
            print_json(&LedgerReport {
                records: desk.ledger(code).await?,
                revisions: desk.history(code).await?,
            })?;
        }
        other => {
            return Err(Error::ValidationError(format!("unknown command {:?}", other)));
        }
    }
    Ok(())
}
