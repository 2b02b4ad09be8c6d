//! p4rpc - Perforce RPC protocol client
//!
//! Runs server commands over the native wire protocol and exposes a few
//! offline helpers for inspecting the protocol tables.

use clap::{Parser, Subcommand};
use colored::Colorize;
use p4rpc_client::{Client, ClientError, Config};
use p4rpc_protocol::{
    Category, FileType, FunctionSpec, LineEnding, ResultMap, ServerMessage, Severity,
    FUNCTION_FIELD,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "p4rpc")]
#[command(about = "Command-line driver for the Perforce RPC protocol")]
#[command(version)]
struct Cli {
    /// Server address ([ssl:]host:port)
    #[arg(short, long, env = "P4PORT")]
    port: Option<String>,

    /// User name
    #[arg(short, long, env = "P4USER")]
    user: Option<String>,

    /// Client workspace name
    #[arg(short, long, env = "P4CLIENT")]
    client: Option<String>,

    /// Charset of the server connection
    #[arg(short = 'C', long, env = "P4CHARSET")]
    charset: Option<String>,

    /// Pinned SHA-256 fingerprint of the server certificate
    #[arg(long, env = "P4RPC_TLS_FINGERPRINT")]
    fingerprint: Option<String>,

    /// Accept command names that are not in the function registry
    #[arg(long)]
    relaxed: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a server command and print its results
    Run {
        /// Print each result as a JSON object
        #[arg(long)]
        json: bool,

        /// Ask for untagged output
        #[arg(long)]
        untagged: bool,

        /// Command name, e.g. info or files
        command: String,

        /// Command arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// List the function registry
    Functions {
        /// Only list one category (protocol, user, client-callback, server-callback)
        #[arg(long)]
        category: Option<String>,
    },

    /// Explain a server file type string such as 03 (text, CRLF) or 9 (raw text)
    DecodeType {
        /// Type string as sent by the server
        type_string: String,
    },

    /// Print the effective configuration as YAML
    DumpConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Functions { ref category } => {
            list_functions(category.as_deref());
            return Ok(());
        }
        Commands::DecodeType { ref type_string } => {
            decode_type(type_string);
            return Ok(());
        }
        _ => {}
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::DumpConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
        }
        Commands::Run {
            json,
            untagged,
            command,
            args,
        } => {
            let mut config = config;
            config.protocol.tagged = !untagged;
            run(config, &command, &args, json).await;
        }
        Commands::Functions { .. } | Commands::DecodeType { .. } => {}
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = Config::load()?;
    if let Ok(path) = std::env::var("P4RPC_CONFIG") {
        tracing::debug!("Loaded config from {}", path);
    }

    if let Some(ref port) = cli.port {
        config.server.port = port.clone();
    }
    if let Some(ref user) = cli.user {
        config.protocol.user = Some(user.clone());
    }
    if let Some(ref client) = cli.client {
        config.protocol.client = Some(client.clone());
    }
    if let Some(ref charset) = cli.charset {
        config.charset.wire = charset.clone();
        config.charset.local = charset.clone();
    }
    if let Some(ref fingerprint) = cli.fingerprint {
        config.server.tls.fingerprint = Some(fingerprint.clone());
    }
    if cli.relaxed {
        config.protocol.relaxed_command_names = true;
    }

    config.validate()?;
    Ok(config)
}

async fn run(config: Config, command: &str, args: &[String], json: bool) {
    let port = config.server.port.clone();
    let mut client = match Client::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("{} to {}: {}", "Connection failed".red(), port, e);
            std::process::exit(1);
        }
    };

    let mut print = |result: ResultMap| {
        print_result(&result, json);
        true
    };

    let outcome = tokio::select! {
        result = client.run_with_handler(command, args, &mut print) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(outcome) = outcome else {
        eprintln!("\n{}", "Interrupted".dimmed());
        if let Err(e) = client.abort().await {
            tracing::debug!("Abort failed: {}", e);
        }
        std::process::exit(130);
    };

    let stats = client.connection().stats();
    tracing::debug!(
        "Sent {} packets ({} bytes), received {} packets ({} bytes)",
        stats.packets_sent,
        stats.bytes_sent,
        stats.packets_received,
        stats.bytes_received
    );

    match outcome {
        Ok(()) => {
            let _ = client.close().await;
        }
        Err(ClientError::Server(messages)) => {
            for message in &messages {
                eprintln!("{}", message.text.red());
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}

fn print_result(result: &ResultMap, json: bool) {
    if json {
        match serde_json::to_string(result) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("{}: {}", "Error".red(), e),
        }
        return;
    }

    if result.get_str(FUNCTION_FIELD) == Some(FunctionSpec::ClientMessage.encode()) {
        // Errors are reported once the command ends.
        for message in ServerMessage::from_result_map(result) {
            match message.severity {
                Severity::Failed | Severity::Fatal => {}
                Severity::Warn => println!("{}", message.text.yellow()),
                _ => println!("{}", message.text),
            }
        }
        return;
    }

    for (key, value) in result.iter().filter(|(k, _)| *k != FUNCTION_FIELD) {
        println!("{} {} {}", "...".dimmed(), key.cyan(), value);
    }
    println!();
}

fn list_functions(category: Option<&str>) {
    let mut count = 0;
    for spec in FunctionSpec::ALL {
        let cat = spec.category();
        if category.is_some_and(|c| c != cat.name()) {
            continue;
        }
        let name = match cat {
            Category::Protocol => cat.name().magenta(),
            Category::User => cat.name().green(),
            Category::ClientCallback => cat.name().cyan(),
            Category::ServerCallback => cat.name().yellow(),
        };
        println!("{:<28} {}", spec.encode(), name);
        count += 1;
    }
    if count == 0 {
        println!("{}", "No functions in that category".yellow());
    }
}

fn decode_type(type_string: &str) {
    let file_type = FileType::decode(Some(type_string));
    let line_ending = LineEnding::for_file(Some(type_string));

    println!("{}", format!("Type {}", type_string.cyan()).bold());
    println!("  {:<12} {}", "base", file_type);
    println!("  {:<12} {}", "text", file_type.is_text());
    println!("  {:<12} {}", "raw text", file_type.is_raw_text());
    println!("  {:<12} {}", "unicode", file_type.is_unicode());
    println!("  {:<12} {}", "executable", file_type.is_executable());
    println!("  {:<12} {}", "compressed", file_type.is_compressed());
    println!(
        "  {:<12} {:?} ({:?})",
        "line ending",
        line_ending.terminator(),
        line_ending.layout()
    );
}
