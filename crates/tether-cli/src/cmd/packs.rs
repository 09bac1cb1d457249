//! `tether packs`: the dependency pack cache.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::Write;
use tether_core::bits::{CachedPack, evict_pack, list_cached_packs};
use tether_core::config::EngineConfig;

use crate::cmd::{format_bytes, open_db};
use crate::output::{OutputMode, pretty_section, render};

#[derive(Args, Debug)]
pub struct PacksArgs {
    #[command(subcommand)]
    command: PacksCommand,
}

#[derive(Subcommand, Debug)]
enum PacksCommand {
    /// List cached packs, newest first
    List,
    /// Drop one cached pack so the next resolve walks again
    Evict(EvictArgs),
}

#[derive(Args, Debug)]
struct EvictArgs {
    /// Dependency tree hash of the pack
    hash: String,
}

#[derive(Debug, Serialize)]
struct EvictResult {
    dependency_tree_hash: String,
    evicted: bool,
}

pub fn run_packs(args: &PacksArgs, config: &EngineConfig, output: OutputMode) -> Result<()> {
    let db = open_db(config)?;
    match &args.command {
        PacksCommand::List => {
            let packs = list_cached_packs(&db).context("Failed to read the pack cache")?;
            render_list(&packs, output)
        }
        PacksCommand::Evict(evict) => {
            let evicted = evict_pack(&db, &evict.hash)
                .with_context(|| format!("Failed to evict pack {}", evict.hash))?;
            let result = EvictResult {
                dependency_tree_hash: evict.hash.clone(),
                evicted,
            };
            render(
                output,
                &result,
                |r, w| writeln!(w, "{}\t{}", r.dependency_tree_hash, r.evicted),
                |r, w| {
                    if r.evicted {
                        writeln!(w, "Evicted pack {}", r.dependency_tree_hash)
                    } else {
                        writeln!(w, "No cached pack {}", r.dependency_tree_hash)
                    }
                },
            )
        }
    }
}

fn render_list(packs: &[CachedPack], output: OutputMode) -> Result<()> {
    render(
        output,
        packs,
        |packs, w| {
            for p in packs {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}\t{}",
                    p.dependency_tree_hash,
                    p.root_hash,
                    p.bit_count,
                    p.size_bytes,
                    p.cached_at.to_rfc3339()
                )?;
            }
            Ok(())
        },
        |packs, w| {
            pretty_section(w, &format!("Cached packs ({})", packs.len()))?;
            for p in packs {
                writeln!(
                    w,
                    "{}  root {}  {} bits  {}",
                    p.dependency_tree_hash,
                    p.root_hash,
                    p.bit_count,
                    format_bytes(p.size_bytes)
                )?;
            }
            Ok(())
        },
    )
}
