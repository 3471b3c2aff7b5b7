use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::model::InterestRow;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS parliament_interests (
            interest_id     INTEGER PRIMARY KEY,
            mp_name         TEXT NOT NULL,
            mp_id           INTEGER NOT NULL,
            constituency    TEXT NOT NULL DEFAULT '',
            party           TEXT NOT NULL DEFAULT '',
            category        TEXT NOT NULL,
            category_id     INTEGER NOT NULL,
            date_registered TEXT,
            date_published  TEXT,
            summary         TEXT NOT NULL,
            companies       TEXT NOT NULL DEFAULT '',
            amounts         TEXT NOT NULL DEFAULT '',
            company_count   INTEGER NOT NULL DEFAULT 0,
            amount_count    INTEGER NOT NULL DEFAULT 0,
            collected_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_interests_mp ON parliament_interests(mp_id);
        CREATE INDEX IF NOT EXISTS idx_interests_category ON parliament_interests(category_id);
        ",
    )
}

/// Upsert rows keyed by `interest_id`. Returns rows written.
pub fn upsert_interests(conn: &Connection, rows: &[InterestRow]) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO parliament_interests
             (interest_id, mp_name, mp_id, constituency, party, category, category_id,
              date_registered, date_published, summary, companies, amounts,
              company_count, amount_count, collected_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
             ON CONFLICT(interest_id) DO UPDATE SET
                mp_name = excluded.mp_name,
                mp_id = excluded.mp_id,
                constituency = excluded.constituency,
                party = excluded.party,
                category = excluded.category,
                category_id = excluded.category_id,
                date_registered = excluded.date_registered,
                date_published = excluded.date_published,
                summary = excluded.summary,
                companies = excluded.companies,
                amounts = excluded.amounts,
                company_count = excluded.company_count,
                amount_count = excluded.amount_count,
                collected_at = excluded.collected_at",
        )?;
        for r in rows {
            count += stmt.execute(rusqlite::params![
                r.interest_id, r.mp_name, r.mp_id, r.constituency, r.party, r.category,
                r.category_id, r.date_registered, r.date_published, r.summary, r.companies,
                r.amounts, r.company_count, r.amount_count, r.collected_at,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub members: usize,
    pub categories: usize,
    pub with_amounts: usize,
    pub last_collected: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize =
        conn.query_row("SELECT COUNT(*) FROM parliament_interests", [], |r| r.get(0))?;
    let members: usize = conn.query_row(
        "SELECT COUNT(DISTINCT mp_id) FROM parliament_interests",
        [],
        |r| r.get(0),
    )?;
    let categories: usize = conn.query_row(
        "SELECT COUNT(DISTINCT category_id) FROM parliament_interests",
        [],
        |r| r.get(0),
    )?;
    let with_amounts: usize = conn.query_row(
        "SELECT COUNT(*) FROM parliament_interests WHERE amount_count > 0",
        [],
        |r| r.get(0),
    )?;
    let last_collected: Option<String> = conn.query_row(
        "SELECT MAX(collected_at) FROM parliament_interests",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        total,
        members,
        categories,
        with_amounts,
        last_collected,
    })
}
