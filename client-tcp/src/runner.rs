use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use sampler::ConnectionStats;
use shared::config::Config;
use shared::{Error, Result};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::clock::{Clock, MonotonicClock};
use crate::connection::Connection;
use crate::session::Session;
use crate::values::ValuePool;

/// Outcome of a complete run.
#[derive(Debug)]
pub struct RunReport {
    /// Every connection's measured-phase statistics folded together
    pub stats: ConnectionStats,
    pub connections: usize,
    /// Records written during the load phase, summed over servers
    pub loaded_records: u64,
    /// Set when the run stopped after the load phase
    pub load_only: bool,
}

/// Connects, loads, runs and aggregates with the system clock.
pub async fn run(config: Arc<Config>) -> Result<RunReport> {
    run_with_clock(config, Arc::new(MonotonicClock)).await
}

pub async fn run_with_clock(config: Arc<Config>, clock: Arc<dyn Clock>) -> Result<RunReport> {
    let per_server = config.connections * config.threads;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let values = ValuePool::new(&mut rng);

    info!(
        servers = config.servers.len(),
        connections = config.total_connections(),
        depth = config.depth,
        qps = config.qps,
        "connecting"
    );

    let mut connecting = JoinSet::new();
    for (server_index, server) in config.servers.iter().enumerate() {
        for i in 0..per_server {
            let id = server_index * per_server + i;
            let conn = Connection::new(
                id,
                server.clone(),
                Arc::clone(&config),
                Arc::clone(&clock),
                values.clone(),
            )?;
            let nodelay = !config.no_nodelay;
            connecting.spawn(async move { Session::connect(conn, nodelay).await });
        }
    }
    let mut sessions = join_all(connecting).await?;
    sessions.sort_by_key(|s| s.connection().id());

    let mut loaded_records = 0;
    if !config.noload {
        info!(records = config.records, "loading");
        let started = Instant::now();

        // one loader per server; the others wait
        let mut loading = JoinSet::new();
        let mut idle = Vec::with_capacity(sessions.len());
        for session in sessions {
            if session.connection().id() % per_server == 0 {
                loading.spawn(async move {
                    let mut session = session;
                    session.load().await?;
                    Ok(session)
                });
            } else {
                idle.push(session);
            }
        }
        let loaders = join_all(loading).await?;
        loaded_records = config.records * loaders.len() as u64;

        idle.extend(loaders);
        sessions = idle;
        info!(elapsed = ?started.elapsed(), "load phase complete");
    }

    if config.loadonly {
        return Ok(RunReport {
            stats: ConnectionStats::new(false),
            connections: sessions.len(),
            loaded_records,
            load_only: true,
        });
    }

    for session in &mut sessions {
        session.connection_mut().reset()?;
    }

    info!(time = ?config.time, "starting measured run");
    let connections = sessions.len();
    let mut running = JoinSet::new();
    for session in sessions {
        running.spawn(async move {
            let mut session = session;
            session.run().await?;
            Ok(session.into_connection().into_stats())
        });
    }

    let mut stats = ConnectionStats::new(config.save.is_some());
    for conn_stats in join_all(running).await? {
        stats.accumulate(&conn_stats)?;
    }

    Ok(RunReport {
        stats,
        connections,
        loaded_records,
        load_only: false,
    })
}

/// Waits for every task. The first failure aborts the rest and is returned: one broken
/// connection ends the whole run.
async fn join_all<T: 'static>(mut tasks: JoinSet<Result<T>>) -> Result<Vec<T>> {
    let mut results = Vec::with_capacity(tasks.len());

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| Error::Task(e.to_string())).and_then(|r| r);
        match outcome {
            Ok(value) => results.push(value),
            Err(e) => {
                error!(error = %e, "aborting run");
                tasks.abort_all();
                return Err(e);
            }
        }
    }

    Ok(results)
}
