use logsieve::cache::CacheLayer;
use logsieve::cli::{CacheAction, Cli, Commands, ConfigAction, ModelAction};
use logsieve::config::{Config, ConfigValidator, DEFAULT_CONFIG_TOML};
use logsieve::error::{Result, SieveError};
use logsieve::patterns::DEFAULT_RULES_TOML;
use logsieve::{ClassificationResult, HybridClassifier, LogEntry};
use serde::Serialize;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Classify {
            input,
            output,
            profile,
        } => {
            cmd_classify(cli.config, input, output, profile)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
        Commands::Cache { action } => {
            cmd_cache(cli.config, action)?;
        }
        Commands::Model { action } => {
            cmd_model(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "logsieve=debug" } else { "logsieve=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Logs go to stderr so JSONL output on stdout stays clean
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// One JSONL output line
#[derive(Serialize)]
struct ClassifiedLine<'a> {
    source: &'a str,
    message: &'a str,
    #[serde(flatten)]
    result: &'a ClassificationResult,
}

fn cmd_classify(
    config_path: Option<PathBuf>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    profile: Option<String>,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let entries = read_entries(input.as_deref())?;
    tracing::info!("Read {} log entries", entries.len());

    let classifier = HybridClassifier::from_config(&config)?;
    let runtime = tokio::runtime::Runtime::new().map_err(|e| SieveError::Io {
        source: e,
        context: "Failed to start async runtime".to_string(),
    })?;
    let outcome = runtime.block_on(classifier.classify(&entries, None))?;

    let sink: Box<dyn Write> = match &output {
        Some(path) => Box::new(std::fs::File::create(path).map_err(|e| SieveError::Io {
            source: e,
            context: format!("Failed to create output file: {:?}", path),
        })?),
        None => Box::new(std::io::stdout().lock()),
    };
    let mut writer = BufWriter::new(sink);

    for (entry, result) in entries.iter().zip(&outcome.results) {
        let line = ClassifiedLine {
            source: &entry.source,
            message: &entry.message,
            result,
        };
        let json = serde_json::to_string(&line).map_err(|e| SieveError::Json {
            source: e,
            context: "Failed to serialize result".to_string(),
        })?;
        writeln!(writer, "{}", json).map_err(|e| SieveError::Io {
            source: e,
            context: "Failed to write result".to_string(),
        })?;
    }
    writer.flush().map_err(|e| SieveError::Io {
        source: e,
        context: "Failed to flush output".to_string(),
    })?;

    let stats = serde_json::to_string_pretty(&outcome.stats).map_err(|e| SieveError::Json {
        source: e,
        context: "Failed to serialize statistics".to_string(),
    })?;
    eprintln!("{}", stats);
    eprintln!(
        "Processing time: {} ms (rules {} ms, model {} ms, LLM {} ms)",
        outcome.processing_time_ms,
        outcome.timings.rule_ms,
        outcome.timings.model_ms,
        outcome.timings.llm_ms
    );

    Ok(())
}

fn read_entries(input: Option<&Path>) -> Result<Vec<LogEntry>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(std::fs::File::open(path).map_err(|e| {
            SieveError::Io {
                source: e,
                context: format!("Failed to open input file: {:?}", path),
            }
        })?)),
        None => Box::new(BufReader::new(std::io::stdin())),
    };

    LogEntry::read_jsonl(reader)
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { profile } => {
            let config = load_config(config_path, profile)?;
            let toml = toml::to_string_pretty(&config)?;
            println!("{}", toml);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            for name in config.profiles.keys() {
                let mut profiled = config.clone();
                profiled.apply_profile(name)?;
                ConfigValidator::validate(&profiled)?;
            }
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Profiles: {}", config.profiles.len());
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let config_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&config_dir).map_err(|e| SieveError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", config_dir),
            })?;

            write_template(&path, DEFAULT_CONFIG_TOML)?;
            println!("✓ Configuration initialized at: {}", path.display());

            let rules_path = config_dir.join("rules.toml");
            if force || !rules_path.exists() {
                write_template(&rules_path, DEFAULT_RULES_TOML)?;
                println!("✓ Classification rules installed at: {}", rules_path.display());
            }
        }
    }

    Ok(())
}

fn cmd_cache(config_path: Option<PathBuf>, action: CacheAction) -> Result<()> {
    let mut config = load_config(config_path, None)?;
    config.expand_paths()?;
    let cache = CacheLayer::from_config(&config.cache);

    match action {
        CacheAction::Stats => {
            let json = serde_json::to_string_pretty(&cache.stats()).map_err(|e| {
                SieveError::Json {
                    source: e,
                    context: "Failed to serialize cache statistics".to_string(),
                }
            })?;
            println!("{}", json);
        }
        CacheAction::Clear => {
            cache.clear()?;
            println!("✓ Cache cleared");
        }
    }

    Ok(())
}

fn cmd_model(config_path: Option<PathBuf>, action: ModelAction) -> Result<()> {
    match action {
        ModelAction::Info => {
            let config = load_config(config_path, None)?;
            let classifier = HybridClassifier::from_config(&config)?;
            let info = serde_json::json!({
                "model": classifier.model_info(),
                "llm": classifier.llm_info(),
            });
            let json = serde_json::to_string_pretty(&info).map_err(|e| SieveError::Json {
                source: e,
                context: "Failed to serialize tier info".to_string(),
            })?;
            println!("{}", json);
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'logsieve config init' to create one."
        );
        // The bundled template carries the named profiles
        let mut config: Config = toml::from_str(DEFAULT_CONFIG_TOML)?;
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn write_template(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).map_err(|e| SieveError::Io {
        source: e,
        context: format!("Failed to write {:?}", path),
    })
}
