//! SQLite storage for per-slot loss tables and diagnostics.
//!
//! Every table is replaced wholesale on each run: the analysis is a batch
//! recomputation over historical data, so rows from older runs are stale.

use eyre::Result;
use rusqlite::Connection;
use std::cell::RefCell;

use crate::types::{MevRecipientLoss, RemovedSlot, UnplottedSlot, VanillaLossRecord};

pub struct ResultsStore {
    conn: RefCell<Connection>,
}

impl ResultsStore {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self {
            conn: RefCell::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.borrow_mut().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS mev_recipient_losses (
                slot INTEGER PRIMARY KEY,
                node_address TEXT,
                mev_reward REAL,
                reth_portion REAL,
                lost_eth REAL
            );

            CREATE TABLE IF NOT EXISTS vanilla_losses (
                slot INTEGER PRIMARY KEY,
                node_address TEXT,
                max_bid REAL,
                priority_fees REAL,
                reth_portion REAL,
                lost_eth_bad_recipient REAL,
                lost_eth_bid_estimate REAL,
                lost_eth_nobid_neighborestimate REAL,
                lost_eth_nobid_avgestimate REAL,
                neighbor_estimate REAL,
                avg_estimate REAL
            );

            CREATE TABLE IF NOT EXISTS removed_slots (
                slot INTEGER PRIMARY KEY,
                node_address TEXT,
                relay_tag TEXT,
                producer_fee_recipient TEXT,
                expected_fee_recipient TEXT,
                correct_fee_recipient INTEGER,
                lost_eth REAL
            );

            CREATE TABLE IF NOT EXISTS unplotted_slots (
                variant TEXT,
                slot INTEGER,
                node_address TEXT,
                is_vanilla INTEGER,
                correct_fee_recipient INTEGER,
                PRIMARY KEY (variant, slot)
            );
            ",
        )?;
        Ok(())
    }

    /// Replaces the MEV-boost wrong-recipient table.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn replace_mev_recipient_losses(&self, rows: &[MevRecipientLoss]) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM mev_recipient_losses", [])?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO mev_recipient_losses (
                    slot, node_address, mev_reward, reth_portion, lost_eth
                ) VALUES (?, ?, ?, ?, ?)
                ",
            )?;

            for r in rows {
                stmt.execute(rusqlite::params![
                    r.slot,
                    r.node_address,
                    r.mev_reward,
                    r.reth_portion,
                    r.lost_eth,
                ])?;
            }
        }

        tx.commit()?;
        Ok(rows.len())
    }

    /// Replaces the vanilla loss table; one loss column is populated per row.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn replace_vanilla_losses(&self, rows: &[VanillaLossRecord]) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM vanilla_losses", [])?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO vanilla_losses (
                    slot, node_address, max_bid, priority_fees, reth_portion,
                    lost_eth_bad_recipient, lost_eth_bid_estimate,
                    lost_eth_nobid_neighborestimate, lost_eth_nobid_avgestimate,
                    neighbor_estimate, avg_estimate
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )?;

            for r in rows {
                let [bad_recipient, bid, neighbor, avg] = r.loss_columns();
                stmt.execute(rusqlite::params![
                    r.slot,
                    r.node_address,
                    r.max_bid,
                    r.priority_fees,
                    r.reth_portion,
                    bad_recipient,
                    bid,
                    neighbor,
                    avg,
                    r.neighbor_estimate,
                    r.avg_estimate,
                ])?;
            }
        }

        tx.commit()?;
        Ok(rows.len())
    }

    /// Replaces the removed-slot diagnostic table.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn replace_removed_slots(&self, rows: &[RemovedSlot]) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM removed_slots", [])?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO removed_slots (
                    slot, node_address, relay_tag, producer_fee_recipient,
                    expected_fee_recipient, correct_fee_recipient, lost_eth
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;

            for r in rows {
                stmt.execute(rusqlite::params![
                    r.slot,
                    r.node_address,
                    r.relay_tag,
                    r.producer_fee_recipient,
                    r.expected_fee_recipient,
                    r.correct_fee_recipient,
                    r.lost_eth,
                ])?;
            }
        }

        tx.commit()?;
        Ok(rows.len())
    }

    /// Replaces the unplotted slots recorded for one distribution variant.
    ///
    /// # Errors
    /// Returns error if database insert fails.
    pub fn replace_unplotted_slots(&self, variant: &str, rows: &[UnplottedSlot]) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM unplotted_slots WHERE variant = ?",
            rusqlite::params![variant],
        )?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO unplotted_slots (
                    variant, slot, node_address, is_vanilla, correct_fee_recipient
                ) VALUES (?, ?, ?, ?, ?)
                ",
            )?;

            for r in rows {
                stmt.execute(rusqlite::params![
                    variant,
                    r.slot,
                    r.node_address,
                    r.is_vanilla,
                    r.correct_fee_recipient,
                ])?;
            }
        }

        tx.commit()?;
        Ok(rows.len())
    }

    /// Row count of one of the result tables.
    ///
    /// # Errors
    /// Returns error for unknown table names or failed queries.
    pub fn count_rows(&self, table: &str) -> Result<u64> {
        const TABLES: [&str; 4] = [
            "mev_recipient_losses",
            "vanilla_losses",
            "removed_slots",
            "unplotted_slots",
        ];
        if !TABLES.contains(&table) {
            return Err(eyre::eyre!("unknown results table {table}"));
        }
        let count: u64 = self.conn.borrow().query_row(
            &format!("SELECT COUNT(*) FROM {table}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VanillaLossBranch;

    #[test]
    fn migrations_create_tables() {
        let store = ResultsStore::new(":memory:").expect("in-memory store should always open");
        let conn = store.conn.borrow();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("query should prepare");

        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query_map should succeed")
            .collect::<Result<Vec<_>, _>>()
            .expect("all rows should parse");

        assert!(tables.contains(&"mev_recipient_losses".to_string()));
        assert!(tables.contains(&"removed_slots".to_string()));
        assert!(tables.contains(&"unplotted_slots".to_string()));
        assert!(tables.contains(&"vanilla_losses".to_string()));
    }

    #[test]
    fn vanilla_rows_populate_single_loss_column() {
        let store = ResultsStore::new(":memory:").expect("in-memory store should always open");
        let row = VanillaLossRecord {
            slot: 100,
            node_address: "0xnode".to_string(),
            max_bid: None,
            priority_fees: 0.05,
            reth_portion: 0.1,
            branch: VanillaLossBranch::NobidNeighborEstimate,
            lost_eth: 0.085,
            neighbor_estimate: Some(0.085),
            avg_estimate: Some(0.07),
        };
        store
            .replace_vanilla_losses(&[row])
            .expect("insert should succeed");

        let conn = store.conn.borrow();
        let (bid, neighbor, avg): (Option<f64>, Option<f64>, Option<f64>) = conn
            .query_row(
                "SELECT lost_eth_bid_estimate, lost_eth_nobid_neighborestimate, lost_eth_nobid_avgestimate
                 FROM vanilla_losses WHERE slot = 100",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .expect("row should exist");
        assert_eq!(bid, None);
        assert_eq!(neighbor, Some(0.085));
        assert_eq!(avg, None);
    }

    #[test]
    fn replace_discards_previous_run() {
        let store = ResultsStore::new(":memory:").expect("in-memory store should always open");
        let loss = |slot| MevRecipientLoss {
            slot,
            node_address: "0xnode".to_string(),
            mev_reward: 2.0,
            reth_portion: 0.2,
            lost_eth: 0.4,
        };

        store
            .replace_mev_recipient_losses(&[loss(1), loss(2)])
            .expect("first run");
        store
            .replace_mev_recipient_losses(&[loss(3)])
            .expect("second run");
        assert_eq!(store.count_rows("mev_recipient_losses").expect("count"), 1);

        let unplotted = UnplottedSlot {
            slot: 9,
            node_address: "0xnode".to_string(),
            is_vanilla: true,
            correct_fee_recipient: Some(true),
        };
        store
            .replace_unplotted_slots("raw", std::slice::from_ref(&unplotted))
            .expect("raw variant");
        store
            .replace_unplotted_slots("filled", &[unplotted])
            .expect("filled variant");
        assert_eq!(store.count_rows("unplotted_slots").expect("count"), 2);
        assert!(store.count_rows("sqlite_master").is_err());
    }
}
