#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Forest change statistics for a single country.
//!
//! Takes an FAO GAUL country code, evaluates the Hansen Global Forest
//! Change raster over that country on Google Earth Engine, and prints the
//! stable forest area, the deforested area, the year-over-year
//! deforestation rates and the year with the highest rate.
//!
//! Log output goes through [`forest_change_cli_utils::init_logger`] so it
//! never collides with the per-year progress bar. Set `RUST_LOG=info` to
//! follow each stage.

use clap::Parser;
use console::style;
use forest_change::{
    decode::YearLookup, pipeline::ForestChangeAnalysis, progress::ProgressCallback as _,
};
use forest_change_cli_utils::IndicatifProgress;
use forest_change_earth_engine::{EarthEngine, EarthEngineConfig};
use forest_change_models::ForestChangeReport;

const BIN_NAME: &str = "forest_change";

#[derive(Parser, Debug)]
#[command(
    name = BIN_NAME,
    about = "Forest change statistics for a country",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// FAO GAUL (Global Administrative Unit Layers) country code
    gaul_code: i64,
}

fn usage() -> String {
    format!(
        "Usage: {BIN_NAME} <GAUL_CODE>\n\n\
         Example: {BIN_NAME} 113\n\n\
         GAUL_CODE is the FAO Global Administrative Unit Layers (GAUL 2015)\n\
         country code, the ADM0_CODE property of FAO/GAUL/2015/level0."
    )
}

fn print_report(report: &ForestChangeReport) {
    println!(
        "{} {} km²",
        style("Stable forest area:").bold(),
        style(report.stable_forest_km2).green()
    );
    println!(
        "{} {} km²",
        style("Deforested area:").bold(),
        style(report.deforested_km2).red()
    );
    println!(
        "Deforestation rate based on previous year: {}",
        style(&report.rates).cyan()
    );
    println!(
        "Highest rate is {} at {}",
        style(report.peak.rate).yellow().bold(),
        style(report.peak.year).yellow().bold()
    );
}

async fn run(gaul_code: i64) -> Result<ForestChangeReport, Box<dyn std::error::Error>> {
    let multi = forest_change_cli_utils::init_logger();

    let config = EarthEngineConfig::embedded()?;
    let options = config.analysis_options();
    log::info!(
        "Using {} from project {}",
        config.forest_change_dataset,
        config.project
    );
    let engine = EarthEngine::from_config(config)?;

    let progress = IndicatifProgress::requests_bar(&multi, "Waiting for loss-year histogram");
    let analysis = ForestChangeAnalysis::new(&engine, YearLookup::hansen_gfc_2022(), options)
        .with_progress(progress.clone());

    let report = analysis.run(&engine, &engine, gaul_code).await;
    progress.finish_and_clear();
    Ok(report?)
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(_) => {
            eprintln!("{}", usage());
            std::process::exit(1);
        }
    };

    match run(cli.gaul_code).await {
        Ok(report) => print_report(&report),
        Err(e) => {
            eprintln!("{} {e}", style("Error:").red().bold());
            std::process::exit(1);
        }
    }
}
