use std::path::Path;

use clap::Parser;
use log::{error, info};
use turbox_hub::configuration::config::Config;
use turbox_hub::controller::controller_handler::Controller;

#[derive(Parser)]
#[command(name = "turbox-hub")]
#[command(version = "0.1.0")]
#[command(about = "Desktop hub daemon for the turboX browser tools")]
struct Args {
    /// Path to automation.json; the standard location is used when omitted.
    config_file: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    println!(
        "
████████╗██╗   ██╗██████╗ ██████╗  ██████╗ ██╗  ██╗    ██╗  ██╗██╗   ██╗██████╗
╚══██╔══╝██║   ██║██╔══██╗██╔══██╗██╔═══██╗╚██╗██╔╝    ██║  ██║██║   ██║██╔══██╗
   ██║   ██║   ██║██████╔╝██████╔╝██║   ██║ ╚███╔╝     ███████║██║   ██║██████╔╝
   ██║   ██║   ██║██╔══██╗██╔══██╗██║   ██║ ██╔██╗     ██╔══██║██║   ██║██╔══██╗
   ██║   ╚██████╔╝██║  ██║██████╔╝╚██████╔╝██╔╝ ██╗    ██║  ██║╚██████╔╝██████╔╝
   ╚═╝    ╚═════╝ ╚═╝  ╚═╝╚═════╝  ╚═════╝ ╚═╝  ╚═╝    ╚═╝  ╚═╝ ╚═════╝ ╚═════╝
================================================================================
              Desktop hub for the turboX browser tools v0.1.0
================================================================================
"
    );

    let args = Args::parse();

    let config = match &args.config_file {
        Some(path) => Config::from_file(Path::new(path)),
        None => match Config::load() {
            Ok(config) => config,
            Err(e) => {
                error!("Unable to resolve configuration: {}, exiting...", e);
                std::process::exit(1);
            }
        },
    };

    info!("Configuration imported successfully");

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = controller.run().await {
        error!("Hub terminated with error: {}", e);
        std::process::exit(1);
    }
}
