// Copyright (c) 2024 Unfolded Circle ApS, Markus Zehnder <markus.z@unfoldedcircle.com>
// SPDX-License-Identifier: MPL-2.0

//! Genvex Connect select entity simulator.
//!
//! Wires a simulated device with the select entities and a host event loop. Selections and
//! device value pushes can be given on the command line.

#![forbid(non_ascii_idents)]
#![deny(unsafe_code)]

use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, Command};
use genvex_connect::APP_VERSION;
use genvex_connect::configuration::{DEF_CONFIG_FILE, Settings, get_configuration};
use genvex_connect::device::{DeviceHandle, SetpointKey, SimulatedDevice, ValueKey};
use genvex_connect::entity::{SelectEntity, setup_select_entities};
use genvex_connect::host::{EventLoopRefresher, RefreshRequest, StateRefresh};
use log::{error, info, warn};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;

struct Actions {
    selections: Vec<(SetpointKey, String)>,
    updates: Vec<(ValueKey, f64)>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let (cfg, actions) = parse_args_load_cfg()?;

    let device = Arc::new(SimulatedDevice::from_settings(&cfg.device)?);
    let handle: Arc<dyn DeviceHandle> = device.clone();
    let entities = setup_select_entities(&handle, &cfg);

    let (refresher, mut rx) = EventLoopRefresher::channel();
    let refresher: Arc<dyn StateRefresh> = Arc::new(refresher);
    for entity in &entities {
        entity.added_to_host(refresher.clone()).await;
    }
    drop(refresher);

    if let Some(entity) = entities.first() {
        let info = serde_json::to_string_pretty(&entity.base().device_info())?;
        info!("Device info: {info}");
    }
    for entity in &entities {
        info!(
            "{} ({}): options={:?}, current={:?}",
            entity.base().unique_id(),
            entity.icon(),
            entity.options(),
            entity.current_option()
        );
    }

    for (key, option) in &actions.selections {
        let Some(entity) = entities.iter().find(|e| e.key() == *key) else {
            warn!("No select entity for {key}, ignoring selection '{option}'");
            continue;
        };
        if let Err(e) = entity.select_option(option).await {
            error!("Selecting '{option}' for {key} failed: {e}");
        }
    }

    // device pushes are delivered from a different thread than the host loop
    let pusher = thread::spawn(move || {
        for (key, value) in actions.updates {
            device.update_value(key, Some(value));
        }
    });
    pusher
        .join()
        .map_err(|_| anyhow!("Device update thread panicked"))?;

    while let Ok(request) = rx.try_recv() {
        render(&entities, &request);
    }

    for entity in &entities {
        entity.will_remove_from_host().await;
    }

    Ok(())
}

fn render(entities: &[SelectEntity], request: &RefreshRequest) {
    match entities
        .iter()
        .find(|e| e.base().unique_id() == request.unique_id)
    {
        Some(entity) => info!(
            "State refresh {} (force={}): current={:?}",
            request.unique_id,
            request.force_refresh,
            entity.current_option()
        ),
        None => warn!("State refresh for unknown entity {}", request.unique_id),
    }
}

fn parse_args_load_cfg() -> anyhow::Result<(Settings, Actions)> {
    let args = Command::new("genvex-select-sim")
        .author("Unfolded Circle ApS")
        .version(APP_VERSION)
        .about("Genvex Connect select entity simulator")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file"),
        )
        .arg(
            Arg::new("select")
                .short('s')
                .long("select")
                .value_name("KEY=OPTION")
                .action(ArgAction::Append)
                .help("Select an option, e.g. fan_level=3"),
        )
        .arg(
            Arg::new("update")
                .short('u')
                .long("update")
                .value_name("KEY=VALUE")
                .action(ArgAction::Append)
                .help("Simulate a device value push, e.g. fan_level=1"),
        )
        .get_matches();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg_file = match args.get_one::<String>("config") {
        None if Path::new(DEF_CONFIG_FILE).exists() => {
            info!("Loading default configuration file: {DEF_CONFIG_FILE}");
            Some(DEF_CONFIG_FILE)
        }
        None => None,
        Some(c) => Some(c.as_str()),
    };
    let cfg = get_configuration(cfg_file).context("Failed to read configuration")?;

    let mut actions = Actions {
        selections: Vec::new(),
        updates: Vec::new(),
    };
    for arg in args.get_many::<String>("select").unwrap_or_default() {
        let (key, option) = split_assignment(arg)?;
        let key = SetpointKey::from_str(key).with_context(|| format!("Invalid setpoint: {key}"))?;
        actions.selections.push((key, option.to_string()));
    }
    for arg in args.get_many::<String>("update").unwrap_or_default() {
        let (key, value) = split_assignment(arg)?;
        let key = ValueKey::from_str(key).map_err(|e| anyhow!("Invalid value key {key}: {e}"))?;
        let value = f64::from_str(value).with_context(|| format!("Invalid value: {value}"))?;
        actions.updates.push((key, value));
    }

    Ok((cfg, actions))
}

fn split_assignment(arg: &str) -> anyhow::Result<(&str, &str)> {
    arg.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got: {arg}"))
}
