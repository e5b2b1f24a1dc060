//! insertmap CLI - run a configured insert step over JSON items
//!
//! Items are read from a file or stdin, results are written as NDJSON or a
//! JSON array to a file or stdout. Logs go to stderr (`RUST_LOG` controls the level).

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;

use insertmap::items::{self, JsonArrayWriter, NdjsonWriter};
use insertmap::{Database, StepConfig};

#[derive(Parser)]
#[command(name = "insertmap")]
#[command(version, about = "Parameterized row inserts into SQL Server tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Insert every input item into the configured table
    Run {
        /// Path to the step configuration (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Input items as NDJSON or a JSON array (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Where to write the results (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Ndjson)]
        format: OutputFormat,
    },

    /// Print the statement and parameter declarations without connecting
    Plan {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Validate identifiers, types and column mappings
    Validate {
        #[arg(short, long)]
        config: PathBuf,

        /// Also log in to the configured server
        #[arg(long)]
        connect: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Ndjson,
    Json,
}

fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insertmap=info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config, input, output, format } => run_step(config, input, output, format),
        Commands::Plan { config } => plan_step(config),
        Commands::Validate { config, connect } => validate_step(config, connect),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_step(config: &Path) -> Result<StepConfig, String> {
    StepConfig::load_from_file(config).map_err(|e| e.to_string())
}

fn run_step(
    config: PathBuf,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<(), String> {
    let step = load_step(&config)?;
    // Fail on local problems before touching the network
    let plan = step.plan().map_err(|e| e.to_string())?;

    let reader: Box<dyn Read> = match &input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).map_err(|e| format!("Failed to open {}: {}", path.display(), e))?,
        )),
        None => Box::new(io::stdin().lock()),
    };
    let items = items::read_items(reader).map_err(|e| e.to_string())?;

    let options = step.connection_options().map_err(|e| e.to_string())?;
    let database = Database::new(options).map_err(|e| e.to_string())?;

    let results = plan.execute(&database, &items).map_err(|e| e.to_string())?;

    let writer: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).map_err(|e| format!("Failed to create {}: {}", path.display(), e))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    match format {
        OutputFormat::Ndjson => {
            let mut writer = NdjsonWriter::new(writer);
            writer.write_all(&results).map_err(|e| e.to_string())?;
            writer.flush().map_err(|e| e.to_string())?;
        }
        OutputFormat::Json => {
            let mut writer = JsonArrayWriter::new(writer).map_err(|e| e.to_string())?;
            for result in &results {
                writer.write(result).map_err(|e| e.to_string())?;
            }
            writer.finish().map_err(|e| e.to_string())?;
        }
    }

    eprintln!("✓ Inserted {} rows into {}", results.len(), plan.statement.table());
    Ok(())
}

fn plan_step(config: PathBuf) -> Result<(), String> {
    let step = load_step(&config)?;
    let plan = step.plan().map_err(|e| e.to_string())?;

    println!("{}", plan.statement.sql());
    println!("{}", plan.statement.parameter_declarations());
    println!("use_transaction: {}", plan.options.use_transaction);

    Ok(())
}

fn validate_step(config: PathBuf, connect: bool) -> Result<(), String> {
    println!("🔍 Validating {}...", config.display());

    let step = load_step(&config)?;
    let statement = step.prepare().map_err(|e| e.to_string())?;

    println!("  ✓ Table {}", statement.table());
    for param in statement.params() {
        println!(
            "  ✓ {} -> @{} {}",
            param.column.column_name,
            param.name,
            param.descriptor.declaration()
        );
    }

    if connect {
        let options = step.connection_options().map_err(|e| e.to_string())?;
        let database = Database::new(options).map_err(|e| e.to_string())?;
        database.test_connection().map_err(|e| e.to_string())?;
        println!("  ✓ Connected to {}", database.target());
    }

    println!("✅ Step configuration is valid!");

    Ok(())
}
