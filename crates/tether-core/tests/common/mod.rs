#![allow(dead_code)]

use chrono::Duration;
use std::sync::Arc;
use tether_core::config::EngineConfig;
use tether_core::db::StateDb;
use tether_core::model::{Board, BoardBody, CommandPayload, GenericCommand, ResourceKey};
use tether_core::sync::StaticConnectivity;
use tether_core::{Engine, EngineBuilder};
use tether_sim::{ManualClock, SimEngine, SimulatedRemote};

pub const APP: &str = "app1";
pub const BOARD: &str = "board1";

pub struct Harness {
    pub engine: Engine,
    pub local: SimEngine,
    pub remote: SimulatedRemote,
    pub connectivity: Arc<StaticConnectivity>,
    pub clock: Arc<ManualClock>,
}

pub fn key() -> ResourceKey {
    ResourceKey::new(APP, BOARD)
}

pub fn cmd(n: i64) -> GenericCommand {
    GenericCommand::AddNode(CommandPayload::new().with("node_id", format!("n{n}")))
}

pub fn board(id: &str, name: &str, clock: &ManualClock) -> Board {
    use tether_core::clock::Clock;
    Board::new(
        id,
        clock.now(),
        BoardBody {
            name: name.to_string(),
            ..BoardBody::default()
        },
    )
}

fn build(with_remote: bool) -> Harness {
    let clock = Arc::new(ManualClock::default());
    let local = SimEngine::new(clock.clone()).with_sample_interval(std::time::Duration::from_secs(1));
    let remote = SimulatedRemote::new();
    let connectivity = Arc::new(StaticConnectivity::default());

    let mut builder = EngineBuilder::new(EngineConfig::default())
        .local(Arc::new(local.clone()))
        .connectivity(connectivity.clone())
        .clock(clock.clone())
        .state_db(StateDb::open_in_memory().expect("state db"));
    if with_remote {
        builder = builder.remote(Arc::new(remote.clone()));
    }
    let engine = builder.build().expect("engine");

    local.seed_board(APP, board(BOARD, "Main", &clock));
    Harness {
        engine,
        local,
        remote,
        connectivity,
        clock,
    }
}

/// Online engine with a scripted remote and one seeded board.
pub fn harness() -> Harness {
    build(true)
}

/// Online engine with no remote session configured.
pub fn harness_without_remote() -> Harness {
    build(false)
}

impl Harness {
    pub fn go_offline(&self) {
        self.connectivity.set_offline(APP, true);
    }

    pub fn age(&self, by: Duration) {
        self.clock.advance(by);
    }
}
