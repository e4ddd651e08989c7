use abgrow::commands::{self, Commands};
use abgrow::config::{AppConfig, DEFAULT_CONFIG_PATH};
use clap::Parser;
use log::{error, info};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "abgrow")]
#[command(about = "Grow the boot partition of an A/B system across reboots", long_about = None)]
struct Cli {
    /// Configuration file (default: /etc/abgrow.toml if present)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

fn load_config(explicit: Option<&Path>) -> AppConfig {
    let path = match explicit {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => return AppConfig::default(),
    };
    match AppConfig::load_from_file(path) {
        Ok(cfg) => {
            let abs_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            info!("Using configuration file: {}", abs_path.display());
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration file {}: {}, using defaults", path.display(), e);
            AppConfig::default()
        }
    }
}

fn main() {
    // Initialize logger, default info level, display file line number and time
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}:{}] {level_style}{}{level_style:#}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let app_config = load_config(cli.config.as_deref());

    match commands::run(cli.command, &app_config) {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
