pub mod config;
pub mod history;
pub mod packs;
pub mod queue;

use anyhow::{Context, Result};
use tether_core::config::EngineConfig;
use tether_core::db::{StateDb, open_state_db};

/// Open the state database the engine would use for `config`.
pub fn open_db(config: &EngineConfig) -> Result<StateDb> {
    let path = config.state_db_path();
    open_state_db(&path).with_context(|| format!("Failed to open state database {}", path.display()))
}

/// Human-readable byte count, `1.5 MiB` style.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
