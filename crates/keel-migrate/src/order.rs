//! Canonical migration order.
//!
//! Names start with a decimal ordering prefix. Migrations are ordered by that
//! prefix numerically, then by the rest of the name lexicographically.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::error::{MigrateError, Result};
use crate::ledger::MigrationRecord;

/// Splits a name into its numeric ordering key and the remainder.
///
/// # Errors
///
/// Returns [`MigrateError::NameFormat`] when the name has no leading digits or
/// the prefix does not fit in a `u64`.
pub fn parse_name(name: &str) -> Result<(u64, &str)> {
    let digits = name.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err(MigrateError::NameFormat(name.to_string()));
    }
    let (prefix, rest) = name.split_at(digits);
    let key = prefix
        .parse::<u64>()
        .map_err(|_| MigrateError::NameFormat(name.to_string()))?;
    Ok((key, rest))
}

/// Compares two migration names in canonical order.
///
/// # Errors
///
/// Fails if either name has no ordering prefix.
pub fn compare_names(a: &str, b: &str) -> Result<Ordering> {
    let (key_a, rest_a) = parse_name(a)?;
    let (key_b, rest_b) = parse_name(b)?;
    Ok(key_a.cmp(&key_b).then_with(|| rest_a.cmp(rest_b)))
}

/// Sorts migrations into canonical order, rejecting malformed and duplicate
/// names.
///
/// # Errors
///
/// Returns [`MigrateError::NameFormat`] or [`MigrateError::DuplicateMigration`].
pub fn sort_migrations(migrations: Vec<MigrationRecord>) -> Result<Vec<MigrationRecord>> {
    let mut seen = HashSet::new();
    let mut keyed = Vec::with_capacity(migrations.len());
    for migration in migrations {
        if !seen.insert(migration.name.clone()) {
            return Err(MigrateError::DuplicateMigration(migration.name));
        }
        let (key, rest) = parse_name(&migration.name)?;
        let rest = rest.to_string();
        keyed.push((key, rest, migration));
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    Ok(keyed.into_iter().map(|(_, _, migration)| migration).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> MigrationRecord {
        MigrationRecord::new(name, "select 1;", "select 2;", "test")
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(parse_name("0001_init").unwrap(), (1, "_init"));
        assert_eq!(parse_name("42").unwrap(), (42, ""));
        assert_eq!(parse_name("10-users.pgsql").unwrap(), (10, "-users.pgsql"));
    }

    #[test]
    fn test_parse_name_without_prefix() {
        assert!(matches!(
            parse_name("init"),
            Err(MigrateError::NameFormat(ref name)) if name == "init"
        ));
        assert!(parse_name("").is_err());
        assert!(parse_name("_0001").is_err());
    }

    #[test]
    fn test_parse_name_overflow() {
        assert!(parse_name("99999999999999999999999_big").is_err());
    }

    #[test]
    fn test_numeric_prefix_dominates() {
        assert_eq!(compare_names("2_b", "10_a").unwrap(), Ordering::Less);
        assert_eq!(compare_names("0010_a", "9_z").unwrap(), Ordering::Greater);
        assert_eq!(compare_names("007_a", "7_a").unwrap(), Ordering::Equal);
    }

    #[test]
    fn test_remainder_breaks_ties() {
        assert_eq!(compare_names("3_alpha", "3_beta").unwrap(), Ordering::Less);
        assert_eq!(compare_names("3_beta", "3_alpha").unwrap(), Ordering::Greater);
    }

    #[test]
    fn test_sort_migrations() {
        let sorted = sort_migrations(vec![
            record("10_last"),
            record("2_second"),
            record("1_first"),
            record("2_another"),
        ])
        .unwrap();
        let names: Vec<_> = sorted.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["1_first", "2_another", "2_second", "10_last"]);
    }

    #[test]
    fn test_sort_rejects_bad_names() {
        let result = sort_migrations(vec![record("1_ok"), record("oops")]);
        assert!(matches!(result, Err(MigrateError::NameFormat(_))));
    }

    #[test]
    fn test_sort_rejects_duplicates() {
        let result = sort_migrations(vec![record("1_ok"), record("1_ok")]);
        assert!(matches!(result, Err(MigrateError::DuplicateMigration(_))));
    }
}
