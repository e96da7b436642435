use std::{fs, process::ExitCode};

use anyhow::{Context, Result};
use clap::Parser;
use dwell::{
    agent::{args::AgentArgs, start_agent, ProviderSet},
    config::AgentConfig,
    utils::{
        dir::create_application_default_path,
        logging::{enable_logging, AGENT_PREFIX},
        runtime::block_on_with_grace,
    },
};
use tracing::error;

fn main() -> ExitCode {
    match run(AgentArgs::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Agent failed: {e:?}");
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: AgentArgs) -> Result<()> {
    let data_dir = match args.dir {
        Some(dir) => {
            fs::create_dir_all(&dir)?;
            dir
        }
        None => create_application_default_path()?,
    };
    enable_logging(AGENT_PREFIX, &data_dir, args.log, args.log_console)?;

    // Invalid configuration is the only fatal error once logging is up.
    let config = AgentConfig::load(args.config.as_deref(), &data_dir)
        .context("Invalid configuration")?;
    let providers = ProviderSet::for_platform(&config, &data_dir)?;

    // Hung providers are abandoned after the same budget the scheduler gives them.
    let grace = config.stop_timeout();
    block_on_with_grace(start_agent(config, data_dir, providers), grace)?
}
