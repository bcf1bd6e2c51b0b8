//! SQLite persistence layer for the inheritance engine.
//!
//! All durable state lives here: plans, beneficiaries, materialized
//! distribution periods, escrow records, per-plan advisory locks, the
//! activity log, and key-value settings. Nothing is held in memory
//! between scheduler passes.
//!
//! Invariants are enforced at the write boundary, not just in the schema:
//! plan creation validates allocations and materializes the full period
//! set inside one transaction, claims flip unclaimed to claimed exactly
//! once, and escrow releases that would exceed the locked amount are
//! rejected.

pub mod activity;
pub mod distributions;
pub mod locks;
pub mod model;
pub mod plans;
pub mod settings;

pub use activity::{activity_insert, activity_list, ActivityRow};
pub use locks::{acquire_plan_lock, PlanLock};
pub use model::{
    AssetType, BeneficiaryRow, DistributionMethod, DistributionRow, DistributionStatus,
    EscrowRow, NewBeneficiary, NewPlan, PlanRow, PlanStatus, Schedule,
};

use heirloom_core::{AllocationError, CipherError, ClaimCodeError};
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    ClaimCode(#[from] ClaimCodeError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("plan {0} not found")]
    PlanNotFound(i64),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("release of {units} units exceeds remaining escrow for plan {plan_id}")]
    ReleaseExceedsEscrow { plan_id: i64, units: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Open (or create) the database at `path` and run migrations.
pub fn open_db(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Open an in-memory database. Used by tests and `--check` dry runs.
pub fn open_in_memory() -> StoreResult<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> StoreResult<()> {
    // WAL mode for better concurrent read performance. In-memory
    // databases reject the pragma, which is fine.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS plans (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            chain_plan_id           INTEGER,
            owner_plan_id           INTEGER,
            tx_hash                 TEXT,
            owner_email             TEXT NOT NULL,
            name                    TEXT NOT NULL,
            description             TEXT NOT NULL DEFAULT '',
            asset_type              TEXT NOT NULL,
            total_display           TEXT NOT NULL,
            total_units             INTEGER NOT NULL,
            method                  TEXT NOT NULL,
            periodic_percent        INTEGER,
            transfer_date           INTEGER,
            start_date              INTEGER,
            end_date                INTEGER,
            proof_of_life_enabled   INTEGER NOT NULL DEFAULT 0,
            early_claim_enabled     INTEGER NOT NULL DEFAULT 0,
            verification_token      TEXT,
            last_verification_sent  INTEGER,
            last_verification_at    INTEGER,
            verification_fail_count INTEGER NOT NULL DEFAULT 0,
            claim_codes_sent_at     INTEGER,
            status                  TEXT NOT NULL,
            is_claimed_fully        INTEGER NOT NULL DEFAULT 0,
            created_at              INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS beneficiaries (
            plan_id            INTEGER NOT NULL REFERENCES plans(id),
            beneficiary_index  INTEGER NOT NULL,
            name               TEXT NOT NULL,
            email              TEXT NOT NULL,
            relationship       TEXT NOT NULL,
            name_hash          TEXT NOT NULL,
            email_hash         TEXT NOT NULL,
            relationship_hash  TEXT NOT NULL,
            combined_hash      TEXT NOT NULL,
            claim_code_cipher  TEXT NOT NULL,
            claim_code_hash    TEXT NOT NULL,
            allocation_bp      INTEGER NOT NULL,
            allocated_units    INTEGER NOT NULL,
            has_claimed        INTEGER NOT NULL DEFAULT 0,
            claimed_at         INTEGER,
            claimed_by_address TEXT,
            claimed_units      INTEGER,
            claim_tx_hash      TEXT,
            PRIMARY KEY (plan_id, beneficiary_index)
        );

        CREATE TABLE IF NOT EXISTS distributions (
            plan_id        INTEGER NOT NULL REFERENCES plans(id),
            period_number  INTEGER NOT NULL,
            units          INTEGER NOT NULL,
            scheduled_date INTEGER NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending',
            executed_at    INTEGER,
            tx_hash        TEXT,
            attempts       INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (plan_id, period_number)
        );

        CREATE TABLE IF NOT EXISTS escrows (
            plan_id            INTEGER PRIMARY KEY REFERENCES plans(id),
            locked_units       INTEGER NOT NULL,
            locked_at          INTEGER NOT NULL,
            fee_bp             INTEGER NOT NULL,
            fee_units          INTEGER NOT NULL,
            release_conditions INTEGER NOT NULL DEFAULT 1,
            released_units     INTEGER NOT NULL DEFAULT 0,
            refunded_at        INTEGER
        );

        CREATE TABLE IF NOT EXISTS plan_locks (
            plan_id      INTEGER PRIMARY KEY,
            holder       TEXT NOT NULL,
            locked_until INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS settings (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS activity_log (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            at          INTEGER NOT NULL,
            actor       TEXT NOT NULL,
            kind        TEXT NOT NULL,
            description TEXT NOT NULL,
            metadata    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_plans_status ON plans(status);
        CREATE INDEX IF NOT EXISTS idx_distributions_due
            ON distributions(status, scheduled_date);
        ",
    )?;

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_db_creates_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("heirloom.db");

        let conn = open_db(&path).unwrap();
        // Re-running migrations on an existing database is a no-op
        drop(conn);
        let conn = open_db(&path).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM plans", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
