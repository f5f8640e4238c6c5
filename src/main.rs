use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use walkability_map::{compose, config, data, processing, render};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join, simplify and render the walkability choropleth
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Run the join and color scale only, printing diagnostics as JSON
    Diagnose {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

fn load(app_config: &config::AppConfig) -> anyhow::Result<processing::Processed> {
    let table = data::load_attributes(&app_config.input.attributes, &app_config.input.attribute_id_column)?;
    let tracts = data::load_tracts(&app_config.input.tracts, &app_config.input.tract_id_column)?;
    processing::process(app_config, tracts, &table)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Render { config } => {
            info!("Rendering map with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(config)?;

            // 1. Load, join, simplify, scale
            let processed = load(&app_config)?;
            let scale = processed
                .scale
                .as_ref()
                .map_err(|e| e.clone())
                .context("Cannot render map")?;

            // 2. Compose layers
            let artifact = compose::compose(
                &processed.tracts,
                scale,
                &app_config.processing.metric,
                &app_config.map,
            )?;

            // 3. Write the document
            render::write_html(&artifact, &app_config.map.legend_label, &app_config.output.html)?;
            info!("Map saved as {:?}", app_config.output.html);
        }
        Commands::Diagnose { config } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let processed = load(&app_config)?;
            let report = processed.report(&app_config.processing.metric);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
