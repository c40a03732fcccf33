mod config;
mod serve;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use leanflow_synthesis::{compare_flows, compute_fingerprint, AgentType, FlowComparison, FlowInput};
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Log line format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Future-state synthesis for waste-walk sessions.
#[derive(Parser)]
#[command(name = "leanflow", version, about = "Future-state synthesis for waste-walk sessions")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log format on stderr (text or json); filter with RUST_LOG
    #[arg(long, global = true, default_value = "text", value_enum)]
    log_format: LogFormat,

    /// Path to a leanflow.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP JSON API server
    Serve {
        /// Port to listen on (default 8080)
        #[arg(long)]
        port: Option<u16>,
        /// SQLite database file; in-memory storage when omitted
        #[arg(long)]
        database: Option<PathBuf>,
        /// JSON file with sessions and their inputs to load at startup
        #[arg(long)]
        seed: Option<PathBuf>,
    },

    /// Compare current-state and future-state information flows
    Compare {
        /// JSON array of current-state flows
        current: PathBuf,
        /// JSON array of future-state flows
        future: PathBuf,
    },

    /// Print the cache key an agent run would use for the given inputs
    Fingerprint {
        /// Agent type: synthesis, solutions, sequencing or design
        agent_type: String,
        /// JSON object with the agent inputs
        inputs: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve {
            port,
            database,
            seed,
        } => {
            cmd_serve(
                cli.config.as_deref(),
                port,
                database,
                seed,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Compare { current, future } => {
            cmd_compare(&current, &future, cli.output, cli.quiet);
        }
        Commands::Fingerprint { agent_type, inputs } => {
            cmd_fingerprint(&agent_type, &inputs, cli.output, cli.quiet);
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn cmd_serve(
    config_path: Option<&Path>,
    port: Option<u16>,
    database: Option<PathBuf>,
    seed: Option<PathBuf>,
    output: OutputFormat,
    quiet: bool,
) {
    let file_config = match config_path {
        Some(path) => match config::read_config(path) {
            Ok(c) => c,
            Err(e) => {
                report_error(&e, output, quiet);
                process::exit(1);
            }
        },
        None => config::FileConfig::default(),
    };
    let synthesis = match file_config.synthesis_config() {
        Ok(c) => c,
        Err(e) => {
            report_error(&format!("configuration error: {}", e), output, quiet);
            process::exit(1);
        }
    };

    let options = serve::ServeOptions {
        port: port.or(file_config.server.port).unwrap_or(8080),
        database: database.or(file_config.server.database),
        seed,
        config: synthesis,
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(serve::start_server(options)) {
        report_error(&format!("server error: {}", e), output, quiet);
        process::exit(1);
    }
}

/// Read a JSON file, reporting and exiting on failure.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path, output: OutputFormat, quiet: bool) -> T {
    let content = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

fn cmd_compare(current_path: &Path, future_path: &Path, output: OutputFormat, quiet: bool) {
    let current: Vec<FlowInput> = read_json_file(current_path, output, quiet);
    let future: Vec<FlowInput> = read_json_file(future_path, output, quiet);

    for (path, flows) in [(current_path, &current), (future_path, &future)] {
        for flow in flows {
            if let Err(e) = flow.validate() {
                let msg = format!("invalid flow '{}' in '{}': {}", flow.name, path.display(), e);
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        }
    }

    let current: Vec<_> = current.into_iter().map(|f| f.into_record("local")).collect();
    let future: Vec<_> = future.into_iter().map(|f| f.into_record("local")).collect();
    let comparison = compare_flows(&current, &future);

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&comparison).unwrap_or_default()
            );
        }
        OutputFormat::Text => print_comparison(&comparison),
    }
}

fn print_comparison(comparison: &FlowComparison) {
    let s = &comparison.summary;
    println!(
        "{} eliminated, {} added, {} modified, {} unchanged",
        s.eliminated_count, s.added_count, s.modified_count, s.unchanged_count
    );
    println!(
        "average quality change: {:+.2}, waste types removed: {}",
        s.avg_quality_improvement, s.waste_reduction_count
    );
    for (label, flows) in [
        ("eliminated", &comparison.eliminated),
        ("added", &comparison.added),
        ("modified", &comparison.modified),
    ] {
        if flows.is_empty() {
            continue;
        }
        println!();
        println!("{}:", label);
        for flow in flows {
            match flow.quality_change {
                Some(delta) => println!("  - {} (quality {:+})", flow.name, delta),
                None => println!("  - {}", flow.name),
            }
        }
    }
}

fn cmd_fingerprint(agent_type: &str, inputs_path: &Path, output: OutputFormat, quiet: bool) {
    let agent_type = match AgentType::parse(agent_type) {
        Some(t) => t,
        None => {
            let names: Vec<&str> = AgentType::ALL.iter().map(|t| t.as_str()).collect();
            let msg = format!(
                "unknown agent type '{}' (expected one of: {})",
                agent_type,
                names.join(", ")
            );
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };
    let inputs: serde_json::Value = read_json_file(inputs_path, output, quiet);
    let fingerprint = compute_fingerprint(agent_type, &inputs);

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "agent_type": agent_type.as_str(),
                "fingerprint": fingerprint,
            });
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
        }
        OutputFormat::Text => println!("{}", fingerprint),
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{{\"error\": \"{}\"}}", msg.replace('"', "\\\""));
        }
    }
}
