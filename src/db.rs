//! Subscription store.
//!
//! The only persisted shared state in the service. One row per delegated
//! smart account (lowercased key); every mutation writes its own row, no
//! cross-row transaction. Revocation keeps the row and clears the key
//! material.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::types::{DistributionMode, Subscription, SubscriptionStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    smart_account TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    session_key TEXT,
    agent_ens TEXT NOT NULL,
    mode TEXT NOT NULL,
    compound_percent REAL NOT NULL,
    distribute_percent REAL NOT NULL,
    distribution_destination TEXT,
    destination_chain INTEGER,
    position_token_id INTEGER,
    status TEXT NOT NULL,
    last_action_at INTEGER,
    total_collected_usd REAL NOT NULL DEFAULT 0,
    total_compounded_usd REAL NOT NULL DEFAULT 0,
    total_distributed_usd REAL NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
"#;

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating data dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.execute_batch(SCHEMA).context("applying schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        conn.execute_batch(SCHEMA).context("applying schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_subscription(&self, sub: &Subscription) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO subscriptions (
                smart_account, owner, session_key, agent_ens, mode,
                compound_percent, distribute_percent, distribution_destination,
                destination_chain, position_token_id, status, last_action_at,
                total_collected_usd, total_compounded_usd, total_distributed_usd,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(smart_account) DO UPDATE SET
                owner = excluded.owner,
                session_key = excluded.session_key,
                agent_ens = excluded.agent_ens,
                mode = excluded.mode,
                compound_percent = excluded.compound_percent,
                distribute_percent = excluded.distribute_percent,
                distribution_destination = excluded.distribution_destination,
                destination_chain = excluded.destination_chain,
                position_token_id = excluded.position_token_id,
                status = excluded.status,
                last_action_at = excluded.last_action_at,
                total_collected_usd = excluded.total_collected_usd,
                total_compounded_usd = excluded.total_compounded_usd,
                total_distributed_usd = excluded.total_distributed_usd
            "#,
            params![
                sub.account_key(),
                sub.owner,
                sub.session_key,
                sub.agent_ens,
                sub.mode.as_str(),
                sub.compound_percent,
                sub.distribute_percent,
                sub.distribution_destination,
                sub.destination_chain.map(|chain| chain as i64),
                sub.position_token_id.map(|id| id as i64),
                sub.status.as_str(),
                sub.last_action_at.map(|t| t.timestamp()),
                sub.total_collected_usd,
                sub.total_compounded_usd,
                sub.total_distributed_usd,
                sub.created_at.timestamp(),
            ],
        )
        .context("upserting subscription")?;
        Ok(())
    }

    pub fn get_subscription(&self, smart_account: &str) -> Result<Option<Subscription>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT * FROM subscriptions WHERE smart_account = ?1",
            params![smart_account.to_lowercase()],
            row_to_subscription,
        )
        .optional()
        .context("loading subscription")
    }

    pub fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.query_subscriptions("SELECT * FROM subscriptions ORDER BY created_at", &[])
    }

    pub fn list_active(&self) -> Result<Vec<Subscription>> {
        self.query_subscriptions(
            "SELECT * FROM subscriptions WHERE status = ?1 ORDER BY created_at",
            &[SubscriptionStatus::Active.as_str()],
        )
    }

    fn query_subscriptions(&self, sql: &str, args: &[&str]) -> Result<Vec<Subscription>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).context("preparing query")?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_subscription)
            .context("querying subscriptions")?;
        let mut subscriptions = Vec::new();
        for row in rows {
            subscriptions.push(row.context("decoding subscription row")?);
        }
        Ok(subscriptions)
    }

    pub fn update_status(&self, smart_account: &str, status: SubscriptionStatus) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE subscriptions SET status = ?1 WHERE smart_account = ?2",
                params![status.as_str(), smart_account.to_lowercase()],
            )
            .context("updating status")?;
        if changed == 0 {
            return Err(anyhow!("subscription {smart_account} not found"));
        }
        Ok(())
    }

    /// Logical delete: flip to revoked and clear the delegated key material.
    pub fn revoke_subscription(&self, smart_account: &str) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                "UPDATE subscriptions SET status = ?1, session_key = NULL WHERE smart_account = ?2",
                params![
                    SubscriptionStatus::Revoked.as_str(),
                    smart_account.to_lowercase()
                ],
            )
            .context("revoking subscription")?;
        if changed == 0 {
            return Err(anyhow!("subscription {smart_account} not found"));
        }
        Ok(())
    }

    /// Fold an executed action's USD value into the running totals and stamp
    /// the action time.
    pub fn record_action(
        &self,
        smart_account: &str,
        collected_usd: f64,
        compounded_usd: f64,
        distributed_usd: f64,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn
            .execute(
                r#"
                UPDATE subscriptions SET
                    total_collected_usd = total_collected_usd + ?1,
                    total_compounded_usd = total_compounded_usd + ?2,
                    total_distributed_usd = total_distributed_usd + ?3,
                    last_action_at = ?4
                WHERE smart_account = ?5
                "#,
                params![
                    collected_usd,
                    compounded_usd,
                    distributed_usd,
                    Utc::now().timestamp(),
                    smart_account.to_lowercase()
                ],
            )
            .context("recording action")?;
        if changed == 0 {
            return Err(anyhow!("subscription {smart_account} not found"));
        }
        Ok(())
    }
}

fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let mode_text: String = row.get("mode")?;
    let status_text: String = row.get("status")?;
    let mode = DistributionMode::parse(&mode_text)
        .ok_or_else(|| conversion_error(format!("unknown mode {mode_text:?}")))?;
    let status = SubscriptionStatus::parse(&status_text)
        .ok_or_else(|| conversion_error(format!("unknown status {status_text:?}")))?;

    Ok(Subscription {
        owner: row.get("owner")?,
        smart_account: row.get("smart_account")?,
        session_key: row.get("session_key")?,
        agent_ens: row.get("agent_ens")?,
        mode,
        compound_percent: row.get("compound_percent")?,
        distribute_percent: row.get("distribute_percent")?,
        distribution_destination: row.get("distribution_destination")?,
        destination_chain: row
            .get::<_, Option<i64>>("destination_chain")?
            .map(|chain| chain as u64),
        position_token_id: row
            .get::<_, Option<i64>>("position_token_id")?
            .map(|id| id as u64),
        status,
        last_action_at: row
            .get::<_, Option<i64>>("last_action_at")?
            .map(epoch_to_datetime),
        total_collected_usd: row.get("total_collected_usd")?,
        total_compounded_usd: row.get("total_compounded_usd")?,
        total_distributed_usd: row.get("total_distributed_usd")?,
        created_at: epoch_to_datetime(row.get("created_at")?),
    })
}

fn epoch_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}
