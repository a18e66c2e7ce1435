use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use can_format::FormatRegistry;
use canhub::config::Config;
use canhub::logger::LoggerRegistry;
use canhub::util::{catch_error, AbortOnDrop};
use canhub::{devices, replay, Control};
use clap::ArgAction;

const INTERRUPT_POLL_PERIOD: Duration = Duration::from_millis(5);

fn args() -> clap::Command {
    clap::command!()
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Bus and logger configuration")
                .default_value("canhub.toml"),
        )
        .arg(
            clap::Arg::new("replay")
                .long("replay")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Capture file to feed through the hub after startup"),
        )
        .arg(
            clap::Arg::new("format")
                .long("format")
                .action(ArgAction::Set)
                .help("Format of the replayed capture")
                .default_value("gvret-a"),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let matches = args().get_matches();
    let config_path = matches
        .get_one::<PathBuf>("config")
        .context("No configuration file given")?;
    let config = Config::load(config_path).await?;

    let formats = FormatRegistry::with_defaults();
    let wired = devices::build(&config)?;
    let hub = wired.hub.clone();
    hub.start();
    devices::start_buses(&hub, &config)?;

    let control = Control::new(hub.clone(), LoggerRegistry::with_defaults(&formats));
    if let Some(logger) = &config.logger {
        control
            .logger_configure(&logger.type_name, logger.path.as_deref(), logger.filters.as_slice())
            .await?;
    }

    let _interrupts = AbortOnDrop::new(tokio::spawn(devices::poll_interrupts(
        wired.hardware,
        INTERRUPT_POLL_PERIOD,
    )));

    if let Some(path) = matches.get_one::<PathBuf>("replay") {
        let format = matches
            .get_one::<String>("format")
            .map(String::as_str)
            .unwrap_or("gvret-a");
        catch_error("Replay", async {
            replay::replay_file(&hub, path, format, &formats)
                .await
                .map(|_| ())
        })
        .await;
    }

    log::info!(
        "canhub running with {} buses, logger types: {}",
        hub.buses().len(),
        control.logger_types().collect::<Vec<_>>().join(", ")
    );
    tokio::signal::ctrl_c().await?;

    log::info!("Shutting down");
    if control.logger_status().is_ok() {
        control.logger_stop().await?;
    }
    for bus in hub.buses() {
        if bus.is_running() {
            catch_error("Stopping bus", async { bus.stop() }).await;
        }
    }
    hub.shutdown();
    Ok(())
}
