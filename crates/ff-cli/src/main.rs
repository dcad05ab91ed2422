//! FocusFlow CLI
//!
//! Check locations against block rules, compile block lists into a
//! configuration file, and run a page instance against an in-process
//! controller.

mod logger;
mod simulate;

use std::fs;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};

use ff_bridge::ControllerMode;
use ff_core::{load_block_lists, BlockingConfig};
use ff_page::UserAction;

use simulate::{run_simulation, SimulateOptions};

#[derive(Parser)]
#[command(name = "ff-cli")]
#[command(about = "FocusFlow block-list tools and page simulator")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a location would be blocked
    Check {
        /// Location to check
        #[arg(short, long)]
        url: String,

        /// Site rules
        #[arg(short, long)]
        site: Vec<String>,

        /// Block-list files
        #[arg(short, long)]
        list: Vec<String>,
    },

    /// Compile block lists into a blocking configuration
    Compile {
        /// Input block-list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Output configuration file
        #[arg(short, long, default_value = "config.json")]
        output: String,
    },

    /// Run a page instance against an in-process controller
    Simulate {
        /// Location the page opens at
        #[arg(short, long)]
        url: String,

        /// Site rules to start blocking with
        #[arg(short, long)]
        site: Vec<String>,

        /// User action taken on the block surface
        #[arg(short, long, value_enum)]
        action: Option<ActionArg>,

        /// How the controller answers
        #[arg(short, long, value_enum, default_value_t = ModeArg::Online)]
        controller: ModeArg,

        /// JSON settings file
        #[arg(long)]
        settings: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Return,
    Break,
}

impl From<ActionArg> for UserAction {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Return => UserAction::ReturnToFocus,
            ActionArg::Break => UserAction::TakeBreak,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Online,
    Silent,
    Unavailable,
}

impl From<ModeArg> for ControllerMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Online => ControllerMode::Online,
            ModeArg::Silent => ControllerMode::Silent,
            ModeArg::Unavailable => ControllerMode::Unavailable,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logger::initialize(cli.verbose) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Check { url, site, list } => cmd_check(&url, &site, &list),
        Commands::Compile { input, output } => cmd_compile(&input, &output),
        Commands::Simulate {
            url,
            site,
            action,
            controller,
            settings,
        } => run_simulation(SimulateOptions {
            url,
            sites: site,
            action: action.map(UserAction::from),
            mode: controller.into(),
            settings,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_check(url: &str, sites: &[String], lists: &[String]) -> Result<(), String> {
    let mut all_sites = sites.to_vec();
    let listed = load_block_lists(lists).map_err(|e| e.to_string())?;
    all_sites.extend(listed.into_iter().map(String::from));

    let config = BlockingConfig::from_sites(true, all_sites);
    if config.rules.is_empty() {
        return Err("No site rules given; use --site or --list".to_string());
    }

    match config.matching_rule(url) {
        Some(rule) => println!("blocked by '{}'", rule),
        None => println!("allowed"),
    }

    Ok(())
}

fn cmd_compile(inputs: &[String], output: &str) -> Result<(), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    let start = Instant::now();
    let total_lines: usize = inputs
        .iter()
        .map(|path| {
            fs::read_to_string(path)
                .map(|content| content.lines().count())
                .map_err(|e| format!("Failed to read '{}': {}", path, e))
        })
        .sum::<Result<usize, String>>()?;

    let rules = load_block_lists(inputs).map_err(|e| e.to_string())?;
    let config = BlockingConfig {
        enabled: true,
        rules,
    };

    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| format!("Failed to encode configuration: {}", e))?;
    fs::write(output, json).map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    println!("Compiled {} block lists to '{}'", inputs.len(), output);
    println!("  Lines:    {}", total_lines);
    println!("  Rules:    {}", config.rules.len());
    println!("  Time:     {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}
