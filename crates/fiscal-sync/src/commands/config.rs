//! Config command

use anyhow::Result;
use fiscal_core::config::CONFIG_FILE_NAME;

use crate::cli::{ConfigCommands, ConfigShowArgs};
use crate::output;
use crate::utils::Context;

pub fn run(cmd: ConfigCommands, ctx: &Context) -> Result<()> {
    match cmd {
        ConfigCommands::Show(args) => show(args, ctx),
        ConfigCommands::Path => path(ctx),
    }
}

fn show(args: ConfigShowArgs, ctx: &Context) -> Result<()> {
    let config = ctx.load_config()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", serde_yaml_ng::to_string(&config)?);
    }
    Ok(())
}

fn path(ctx: &Context) -> Result<()> {
    let config_file = ctx.config_dir.join(CONFIG_FILE_NAME);
    output::kv("Config directory", ctx.config_dir.as_str());
    output::kv(
        "Config file",
        &format!(
            "{}{}",
            config_file,
            if config_file.exists() { "" } else { " (not present)" }
        ),
    );
    output::kv("Queue directory", ctx.queue_dir.as_str());
    Ok(())
}
