//! `passim-cli`: the bundled command-line consumer of `ClientLibrary`
//! (spec §6 "CLI (external collaborator, not part of the core)").
//!
//! Argument parsing here is intentionally minimal — proper flag parsing,
//! localization, and `--help` rendering are explicitly out of scope for
//! the core (spec §1) and are left to a richer CLI front-end.

// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::Path;

use anyhow::{Context, Result, bail};
use passim::{
    control::client::ClientLibrary,
    item::metadata::{DEFAULT_MAX_AGE, DEFAULT_SHARE_LIMIT},
};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version") {
        println!("passim-cli {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    if let Err(e) = run(args).await {
        eprintln!("passim-cli: {e:#}");
        std::process::exit(1);
    }
}

async fn run(mut args: Vec<String>) -> Result<()> {
    let next_reboot = {
        let before = args.len();
        args.retain(|a| a != "--next-reboot");
        args.len() != before
    };

    let Some(command) = args.first().cloned() else {
        bail!("usage: passim-cli <status|dump|publish|unpublish> [args...]");
    };
    let rest = &args[1..];

    let client = ClientLibrary::load()
        .await
        .context("failed to connect to the passim daemon")?;

    match command.as_str() {
        "status" => cmd_status(&client).await,
        "dump" => cmd_dump(&client).await,
        "publish" => cmd_publish(&client, rest, next_reboot).await,
        "unpublish" => cmd_unpublish(&client, rest).await,
        other => bail!("unknown command {other:?}"),
    }
}

async fn cmd_status(client: &ClientLibrary) -> Result<()> {
    println!("name:            {}", client.get_name().await);
    println!("version:         {}", client.get_version().await);
    println!("uri:             {}", client.get_uri().await);
    println!("status:          {}", client.get_status().await);
    println!("download-saving: {} bytes", client.get_download_saving().await);
    println!("carbon-saving:   {:.3} kg CO2e", client.get_carbon_saving().await);
    Ok(())
}

async fn cmd_dump(client: &ClientLibrary) -> Result<()> {
    let items = client.get_items().await.context("dump")?;
    if items.is_empty() {
        println!("(no items cached)");
        return Ok(());
    }
    for item in items {
        println!(
            "{}  {:>10}  shares={}/{}  {}  {}",
            item.hash,
            item.size,
            item.share_count,
            if item.share_limit == u32::MAX {
                "\u{221e}".to_string()
            } else {
                item.share_limit.to_string()
            },
            if item.is_disabled() { "disabled" } else { "enabled" },
            item.basename,
        );
    }
    Ok(())
}

/// `publish <file> [max-age] [share]`.
async fn cmd_publish(client: &ClientLibrary, args: &[String], next_reboot: bool) -> Result<()> {
    let Some(path) = args.first() else {
        bail!("publish: usage: publish <file> [max-age] [share]");
    };
    let max_age = args
        .get(1)
        .map(|s| s.parse::<u32>().context("publish: max-age must be a u32"))
        .transpose()?
        .unwrap_or(DEFAULT_MAX_AGE);
    let share_limit = args
        .get(2)
        .map(|s| s.parse::<u32>().context("publish: share must be a u32"))
        .transpose()?
        .unwrap_or(DEFAULT_SHARE_LIMIT);

    let path = Path::new(path);
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("publish: file path has no basename")?;

    client
        .publish_path(path, basename, max_age, share_limit, next_reboot)
        .await
        .context("publish")?;
    println!("published {basename}");
    Ok(())
}

async fn cmd_unpublish(client: &ClientLibrary, args: &[String]) -> Result<()> {
    let Some(hash) = args.first() else {
        bail!("unpublish: usage: unpublish <hash>");
    };
    client.unpublish(hash).await.context("unpublish")?;
    println!("unpublished {hash}");
    Ok(())
}
