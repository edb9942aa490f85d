use std::sync::Arc;
use std::time::Instant;

use crate::db::DatabaseProxy;

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    db_proxy: Option<Arc<DatabaseProxy>>,
}

impl AppState {
    pub fn new(db_proxy: Option<Arc<DatabaseProxy>>) -> Self {
        Self {
            started_at: Instant::now(),
            db_proxy,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }
}
