//! Read-only comparison of local migrations against the ledger.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::ledger::{Ledger, MigrationRecord};
use crate::order::sort_migrations;

/// State of one migration relative to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Recorded and unchanged (or not compared).
    Applied,
    /// Not recorded yet.
    Pending,
    /// The last local migration, recorded with a different `up`.
    Changed,
    /// Recorded but missing locally.
    Orphaned,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Applied => "applied",
            Self::Pending => "pending",
            Self::Changed => "changed",
            Self::Orphaned => "orphaned",
        };
        f.pad(label)
    }
}

/// One line of a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    /// Migration name.
    pub name: String,
    /// Description, from the local definition when there is one.
    pub description: String,
    /// State relative to the ledger.
    pub state: MigrationState,
    /// When the ledger recorded it, if known.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Compares `local` with `ledger`.
///
/// Local migrations come first in canonical order, then orphans in ledger
/// order. Mirrors what a run would do: only the last local migration is
/// checked for a changed `up`.
///
/// # Errors
///
/// Fails on malformed or duplicate local names.
pub fn status(local: &[MigrationRecord], ledger: &Ledger) -> Result<Vec<MigrationStatus>> {
    let sorted = sort_migrations(local.to_vec())?;
    let names: HashSet<&str> = sorted.iter().map(|m| m.name.as_str()).collect();
    let count = sorted.len();

    let mut report: Vec<MigrationStatus> = sorted
        .iter()
        .enumerate()
        .map(|(index, migration)| {
            let stored = ledger.get(&migration.name);
            let state = match stored {
                None => MigrationState::Pending,
                Some(stored) if index + 1 == count && stored.up != migration.up => {
                    MigrationState::Changed
                }
                Some(_) => MigrationState::Applied,
            };
            MigrationStatus {
                name: migration.name.clone(),
                description: migration.description.clone(),
                state,
                applied_at: stored.and_then(|s| s.applied_at),
            }
        })
        .collect();

    report.extend(
        ledger
            .records()
            .iter()
            .filter(|record| !names.contains(record.name.as_str()))
            .map(|record| MigrationStatus {
                name: record.name.clone(),
                description: record.description.clone(),
                state: MigrationState::Orphaned,
                applied_at: record.applied_at,
            }),
    );

    Ok(report)
}
