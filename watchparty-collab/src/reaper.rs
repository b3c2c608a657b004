use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::{db::Database, Collab};

pub const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic sweep over every table: dead sessions are dropped through
/// the normal leave and detach paths, and rooms that stayed empty past
/// the backstop threshold are evicted.
pub async fn run_reaper<Db: Database>(collab: Arc<Collab<Db>>) {
    let mut tick = tokio::time::interval(REAP_INTERVAL);
    tick.tick().await;

    loop {
        tick.tick().await;

        let reaped = collab.sweep();
        if reaped > 0 {
            info!("Reaped {reaped} dead sessions");
        }
    }
}
