//! TOSCA Validator CLI
//!
//! Validates service templates, prints their relationship graph, and searches
//! the normative type catalog.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tosca_parser::config::OutputFormat;
use tosca_parser::entity::parameters::parse_params;
use tosca_parser::{Mode, ParserConfig, ToscaTemplate};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tosca-validate")]
#[command(about = "Validate TOSCA service templates")]
struct Cli {
    /// Configuration file, read after tosca.toml and before TOSCA__* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a template or CSAR archive
    Validate {
        /// Path to a YAML template, .zip or .csar
        path: PathBuf,

        /// Input parameter as name=value (repeatable)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Stop at the first error
        #[arg(long)]
        fail_fast: bool,

        /// Report format: text or json
        #[arg(long)]
        format: Option<String>,
    },

    /// Print the relationship graph of a template as DOT
    Graph {
        path: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Search the normative type catalog
    Types {
        query: String,

        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded without validation errors
fn run(cli: Cli) -> Result<bool> {
    let config = ParserConfig::load_from(cli.config.as_deref().and_then(|p| p.to_str()))
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Validate { path, params, fail_fast, format } => {
            let mut options = config.load_options()?;
            if fail_fast {
                options.mode = Mode::Immediate;
            }
            options.params = parse_params(params.iter().map(String::as_str))?;
            let format = match format.as_deref() {
                None => config.output.format,
                Some("text") => OutputFormat::Text,
                Some("json") => OutputFormat::Json,
                Some(other) => bail!("Unknown format \"{}\"; expected text or json", other),
            };

            let template = match ToscaTemplate::from_path(&path, &options) {
                Ok(t) => t,
                Err(e) if options.mode == Mode::Immediate => {
                    println!("[{}] {}: {}", e.code(), e.kind(), e);
                    return Ok(false);
                }
                Err(e) => return Err(e).with_context(|| format!("Failed to load {}", path.display())),
            };

            match format {
                OutputFormat::Text => print_summary(&template),
                OutputFormat::Json => print_json(&template)?,
            }
            Ok(!template.has_errors())
        }

        Commands::Graph { path, output } => {
            let options = config.load_options()?;
            let template = ToscaTemplate::from_path(&path, &options)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            let dot = template.topology_template().to_dot();
            match output {
                Some(out) => {
                    std::fs::write(&out, &dot).with_context(|| format!("Failed to write {}", out.display()))?;
                    eprintln!("Exported DOT to: {}", out.display());
                }
                None => print!("{}", dot),
            }
            Ok(true)
        }

        Commands::Types { query, limit } => {
            let catalog = config.catalog()?;
            let matches = catalog.search(&query, limit);
            if matches.is_empty() {
                println!("No types match \"{}\"", query);
            }
            for m in matches {
                println!("{:<12} {}", m.kind.to_string(), m.name);
            }
            Ok(true)
        }
    }
}

fn print_summary(template: &ToscaTemplate) {
    println!("Version: {}", template.version().unwrap_or("-"));
    if let Some(description) = template.description() {
        println!("Description: {}", description.trim());
    }

    if !template.inputs().is_empty() {
        println!("\nInputs:");
        for input in template.inputs() {
            println!("  {} ({})", input.name, input.type_name());
        }
    }

    println!("\nNode templates:");
    for node in template.nodetemplates() {
        println!("  {} ({})", node.name, node.type_name);
        for (rel, target) in template.topology_template().node_relationships(node.id) {
            println!("    -> {} [{}]", target.name, rel);
        }
    }

    if !template.outputs().is_empty() {
        println!("\nOutputs:");
        for output in template.outputs() {
            println!("  {}", output.name);
        }
    }

    let diagnostics = template.diagnostics();
    if diagnostics.has_errors() {
        println!("\n{}", diagnostics.format_all());
    } else {
        println!("\nTemplate is valid.");
    }
}

fn print_json(template: &ToscaTemplate) -> Result<()> {
    let report = serde_json::json!({
        "version": template.version(),
        "description": template.description(),
        "inputs": template.inputs().iter().map(|i| &i.name).collect::<Vec<_>>(),
        "node_templates": template
            .nodetemplates()
            .iter()
            .map(|n| serde_json::json!({ "name": n.name, "type": n.type_name }))
            .collect::<Vec<_>>(),
        "outputs": template.outputs().iter().map(|o| &o.name).collect::<Vec<_>>(),
        "valid": !template.has_errors(),
        "errors": template.diagnostics().records(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
