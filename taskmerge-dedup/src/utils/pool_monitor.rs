//! Monitored transactions
//!
//! Wraps `sqlx` transactions so that slow pool acquisition and long-held
//! write locks show up in the logs with the calling operation's name.

use sqlx::{Sqlite, SqlitePool, Transaction};
use std::time::Instant;
use taskmerge_common::{Error, Result};

const SLOW_ACQUIRE_MS: u128 = 500;
const LONG_HOLD_MS: u128 = 1000;

/// Transaction that logs how long it held its connection
pub struct MonitoredTransaction<'c> {
    tx: Option<Transaction<'c, Sqlite>>,
    caller: &'static str,
    acquired_at: Instant,
}

impl<'c> MonitoredTransaction<'c> {
    /// Underlying transaction for query execution
    pub fn conn(&mut self) -> Result<&mut Transaction<'c, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("{}: transaction already finished", self.caller)))
    }

    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            self.log_release("commit");
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            self.log_release("rollback");
        }
        Ok(())
    }

    fn log_release(&self, how: &'static str) {
        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > LONG_HOLD_MS {
            tracing::warn!(caller = self.caller, held_ms = held_ms as u64, how, "Long transaction");
        } else {
            tracing::debug!(caller = self.caller, held_ms = held_ms as u64, how, "Transaction released");
        }
    }
}

impl Drop for MonitoredTransaction<'_> {
    fn drop(&mut self) {
        // sqlx rolls back an unfinished transaction when it is dropped
        if self.tx.is_some() {
            self.log_release("drop");
        }
    }
}

/// Begin a transaction, logging acquisition wait time
pub async fn begin_monitored<'c>(
    pool: &'c SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let requested_at = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = requested_at.elapsed().as_millis();
    if wait_ms > SLOW_ACQUIRE_MS {
        tracing::warn!(caller, wait_ms = wait_ms as u64, "Slow connection acquisition");
    } else {
        tracing::trace!(caller, wait_ms = wait_ms as u64, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx: Some(tx),
        caller,
        acquired_at: Instant::now(),
    })
}
