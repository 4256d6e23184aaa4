//! Replicate command implementation.
//!
//! The master instance is opened from its directory and served in-process:
//! the replica's HTTP transport posts CBOR bodies through a loopback client
//! straight into a [`ReplicationServer`] over the master's log.

use crate::error::{CliError, CliResult};
use crate::state::{self, Instance};
use modlog_sync_engine::{
    FileLock, HttpTransport, LockGuard, LoopbackClient, LoopbackServer, ReplicationConfig,
    ReplicationEngine,
};
use modlog_sync_server::{ReplicationServer, ServerConfig};
use serde::Serialize;
use std::path::Path;
use tracing::info;

struct MasterEndpoint(ReplicationServer);

impl LoopbackServer for MasterEndpoint {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body).map_err(|e| e.to_string())
    }
}

/// Replication result.
#[derive(Debug, Serialize)]
pub struct ReplicateResult {
    /// Master URL the replica pulled from.
    pub master: String,
    /// False if another run held the replication lock.
    pub lock_acquired: bool,
    /// Entries applied.
    pub applied: u64,
    /// Entries already present on the replica.
    pub skipped: u64,
    /// Cursor after the run.
    pub cursor: u64,
    /// Latest `instance_seq` on the master.
    pub master_latest: u64,
    /// Whether the master still has entries to pull.
    pub has_more: bool,
}

/// Pulls the master's changes into the replica stored in `replica_dir`.
///
/// The replica's lock file is held from loading its state until saving it;
/// if another run holds it nothing is read or written. With `all` the
/// replica keeps pulling until it has caught up; otherwise one batch is
/// pulled, retrying transient failures. The replica is saved even when the
/// run fails, so entries applied before the failure are kept together with
/// the cursor covering them.
pub fn execute(
    replica_dir: &Path,
    master: &Instance,
    batch_limit: u32,
    all: bool,
) -> CliResult<ReplicateResult> {
    let url = format!("loopback://{}", master.dir().display());
    let lock = FileLock::new(state::lock_path(replica_dir));
    let Some(_guard) = LockGuard::acquire(&lock)? else {
        info!(master = %url, "replication lock held elsewhere, skipping run");
        return Ok(ReplicateResult {
            master: url,
            lock_acquired: false,
            applied: 0,
            skipped: 0,
            cursor: 0,
            master_latest: 0,
            has_more: false,
        });
    };

    let replica = Instance::open(replica_dir)?;
    if replica.instance_id() == master.instance_id() {
        return Err(CliError::InvalidArgument(
            "replica and master are the same instance".into(),
        ));
    }

    let server = ReplicationServer::new(ServerConfig::default(), master.log().clone());
    let transport = HttpTransport::new(url.clone(), LoopbackClient::new(MasterEndpoint(server)));
    let config = ReplicationConfig::new(replica.instance_id(), url.clone()).with_batch_limit(batch_limit);
    let engine = ReplicationEngine::new(
        config,
        replica.service().clone(),
        transport,
        replica.cursor().clone(),
    );

    let outcome = if all {
        engine.run_until_caught_up()
    } else {
        engine.run_with_retry()
    };
    replica.save()?;
    let run = outcome?;

    info!(
        master = %url,
        applied = run.applied,
        skipped = run.skipped,
        cursor = run.cursor,
        "replication finished"
    );
    Ok(ReplicateResult {
        master: url,
        lock_acquired: run.lock_acquired,
        applied: run.applied,
        skipped: run.skipped,
        cursor: run.cursor,
        master_latest: run.master_latest,
        has_more: run.has_more,
    })
}

/// Runs the replicate command.
pub fn run(
    path: &Path,
    master: &Path,
    batch_limit: u32,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let master = Instance::open(master)?;
    let result = execute(path, &master, batch_limit, all)?;

    if !result.lock_acquired {
        println!("Another replication run holds the lock; nothing done");
        return Ok(());
    }
    println!("Replicated from {}", result.master);
    println!("  Applied:  {}", result.applied);
    println!("  Skipped:  {}", result.skipped);
    println!("  Cursor:   {} / {}", result.cursor, result.master_latest);
    if result.has_more {
        println!("  More entries pending; run again or pass --all");
    }
    Ok(())
}
