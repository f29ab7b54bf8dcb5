//! `benchdash status` - check the server and show local settings.

use std::process::ExitCode;

use anyhow::Result;
use console::style;

use crate::{render, Context};

pub async fn run(ctx: &Context) -> Result<ExitCode> {
    println!();
    println!("  benchdash v{}", env!("CARGO_PKG_VERSION"));
    println!("  Data dir: {}", ctx.data_dir.root().display());
    println!("  Server:   {}", ctx.config.server_url);
    println!(
        "  Session:  {}",
        if ctx.session.is_authenticated() {
            "token saved"
        } else {
            "anonymous"
        }
    );

    let healthy = match ctx.rest()?.health().await {
        Ok(health) => {
            let label = if health.is_healthy() {
                style(health.status.as_str()).green()
            } else {
                style(health.status.as_str()).yellow()
            };
            println!("  Health:   {label}");
            if let Some(version) = &health.version {
                println!("  Version:  {version}");
            }
            if let Some(database) = &health.database {
                println!("  Database: {database}");
            }
            health.is_healthy()
        }
        Err(e) => {
            println!("  Health:   {}", render::api_error(&e));
            false
        }
    };
    println!();

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
