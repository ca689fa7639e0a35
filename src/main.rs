/// `main.rs` — soxlua CLI: run Lua scripts against libsox

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use soxlua::{
    config::BindingConfig, scripting::sandbox::TrustLevel, ScriptEngine, Sox,
};

#[derive(Parser)]
#[command(name = "soxlua")]
#[command(version)]
#[command(about = "Run Lua scripts with the libsox module loaded", long_about = None)]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// libsox shared object (overrides config and SOX_LIBRARY_PATH)
    #[arg(long, global = true)]
    library: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script
    Run {
        script: PathBuf,

        /// Standard libraries available to the script
        #[arg(long, value_enum)]
        trust: Option<TrustLevel>,
    },

    /// Print the libsox version
    Version,
}

fn load_config(cli: &Cli) -> Result<BindingConfig, String> {
    let mut config = match &cli.config {
        Some(path) => BindingConfig::from_file(path).map_err(|e| e.to_string())?,
        None => BindingConfig::default(),
    }
    .with_env();
    if let Some(lib) = &cli.library {
        config.library_path = Some(lib.clone());
    }
    Ok(config)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Version => match Sox::load(config.library_path.as_deref()) {
            Ok(sox) => {
                println!("{}", sox.version());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Commands::Run { script, trust } => {
            if let Some(trust) = trust {
                config.trust = trust;
            }
            let result = ScriptEngine::new(config).run_file(&script);
            for line in &result.output {
                println!("{line}");
            }
            if result.success {
                ExitCode::SUCCESS
            } else {
                eprintln!("{}", result.error.unwrap_or_default());
                ExitCode::FAILURE
            }
        }
    }
}
