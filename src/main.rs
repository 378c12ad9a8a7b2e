pub mod config;
pub mod coords;
pub mod crs;
pub mod data;
pub mod error;
pub mod export;
pub mod html;
pub mod render;
pub mod server;
pub mod types;
pub mod workflow;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the map generator web page
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Render one study area map to a PNG file
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Administrative level (defaults to the first configured one)
        #[arg(short, long)]
        level: Option<String>,
        /// Area name within the level (defaults to the first in sorted order)
        #[arg(short, long)]
        area: Option<String>,
        /// Polygon as a JSON list of pairs; overrides --level/--area
        #[arg(long, value_name = "JSON")]
        coordinates: Option<String>,
        /// Display name for --coordinates
        #[arg(short, long)]
        name: Option<String>,
        /// Output file (defaults to study_area_map_<area name>.png)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// List the area names of a level
    Areas {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(short, long)]
        level: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            info!("Serving map generator with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            server::start_server(app_config).await?;
        }
        Commands::Render {
            config,
            level,
            area,
            coordinates,
            name,
            output,
        } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let request = types::MapRequest {
                level,
                area,
                coordinates,
                name,
            };

            let map = workflow::generate(&app_config, &request, workflow::Resolution::Export)?;

            let path = output.unwrap_or_else(|| PathBuf::from(&map.filename));
            fs::write(&path, &map.png)
                .with_context(|| format!("Failed to write map to {:?}", path))?;
            info!("Map written to {:?}", path);
        }
        Commands::Areas { config, level } => {
            let app_config = config::AppConfig::load_from_file(&config)?;
            let (level, names) = workflow::list_areas(&app_config, level.as_deref())?;
            info!("{} areas in level '{}' ({})", names.len(), level.name, level.field);
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
