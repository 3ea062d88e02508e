use super::{MetricStore, Result};
use tracing::{debug, instrument};

impl MetricStore {
    /// Deletes every metric row except the `keep` most recently inserted.
    ///
    /// Order is ROWID (insertion order), not `time_stamp`, and the window is
    /// shared by all entities. Returns the number of deleted rows.
    #[instrument(skip(self))]
    pub fn prune_oldest(&self, keep: usize) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM metrics WHERE ROWID IN (
                 SELECT ROWID FROM metrics ORDER BY ROWID DESC LIMIT -1 OFFSET ?1
             )",
            [keep as i64],
        )?;
        debug!(deleted, "Retention applied.");
        Ok(deleted)
    }
}
