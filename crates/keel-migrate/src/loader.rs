//! Migration discovery from directories.
//!
//! Source directories hold raw scripts (`.pgsql`/`.sql`) and builder-defined
//! migrations (`.rs`). Build directories hold `.json` artifacts compiled from
//! `.rs` sources. An artifact is only trusted when its source is present, so a
//! migration can never be registered twice.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::ledger::MigrationRecord;
use crate::registry::Registry;

/// Marker opening the up section of a script file.
pub const UP_MARKER: &str = "-- up";
/// Marker opening the down section of a script file.
pub const DOWN_MARKER: &str = "-- down";
/// Prefix of the optional description line.
pub const DESCRIPTION_PREFIX: &str = "-- description: ";
/// Description used when a script file has none.
pub const UNSPECIFIED_DESCRIPTION: &str = "<not specified>";

const SCRIPT_EXTENSIONS: &[&str] = &["pgsql", "sql"];
const SOURCE_EXTENSION: &str = "rs";
const ARTIFACT_EXTENSION: &str = "json";

/// Compiled builder migration, as written to a build directory.
///
/// Holds the scripts exactly as [`Registry::compile`] produces them, so a
/// migration loaded from its artifact is identical to one compiled in process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Human-readable summary.
    pub description: String,
    /// Forward script.
    pub up: String,
    /// Reverse script.
    pub down: String,
}

impl BuildArtifact {
    /// Captures the scripts of a compiled migration.
    #[must_use]
    pub fn from_record(record: &MigrationRecord) -> Self {
        Self {
            description: record.description.clone(),
            up: record.up.clone(),
            down: record.down.clone(),
        }
    }

    /// Turns the artifact back into a migration named `name`.
    #[must_use]
    pub fn into_record(self, name: &str) -> MigrationRecord {
        MigrationRecord::new(name, self.up, self.down, self.description)
    }
}

/// What a migration directory contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryKind {
    /// Hand-written scripts and builder sources.
    Source,
    /// Artifacts compiled from builder sources.
    Build,
}

/// A directory to load migrations from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDirectory {
    /// Directory path.
    pub path: PathBuf,
    /// Directory kind.
    pub kind: DirectoryKind,
}

impl MigrationDirectory {
    /// A source directory.
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: DirectoryKind::Source,
        }
    }

    /// A build directory.
    pub fn build(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: DirectoryKind::Build,
        }
    }
}

struct Entry {
    stem: String,
    extension: String,
    path: PathBuf,
}

fn is_script(extension: &str) -> bool {
    SCRIPT_EXTENSIONS.contains(&extension)
}

fn list_directory(dir: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return Err(MigrateError::ParseError {
                path,
                message: "file name is not valid UTF-8".to_string(),
            });
        };
        if file_name.starts_with('.') || !entry.file_type()?.is_file() {
            continue;
        }
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, extension)) => (stem.to_string(), extension.to_string()),
            None => (file_name.to_string(), String::new()),
        };
        entries.push(Entry {
            stem,
            extension,
            path,
        });
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Loads every migration found in `directories`.
///
/// The result is in no particular order; the engine sorts it.
///
/// # Errors
///
/// Fails on unreadable directories, malformed scripts, files of unknown type,
/// and `.rs` sources that neither the registry nor a build directory can
/// resolve.
pub fn load_migrations(
    directories: &[MigrationDirectory],
    registry: &Registry,
) -> Result<Vec<MigrationRecord>> {
    let mut sources = Vec::new();
    let mut artifacts: HashMap<String, PathBuf> = HashMap::new();

    for directory in directories {
        for entry in list_directory(&directory.path)? {
            match directory.kind {
                DirectoryKind::Source => sources.push(entry),
                DirectoryKind::Build if entry.extension == ARTIFACT_EXTENSION => {
                    artifacts.insert(entry.stem, entry.path);
                }
                DirectoryKind::Build => {
                    debug!(path = %entry.path.display(), "Ignoring non-artifact build file");
                }
            }
        }
    }

    let mut migrations = Vec::new();
    let mut resolved_artifacts = Vec::new();
    for entry in sources {
        if is_script(&entry.extension) {
            migrations.push(read_script(&entry.path)?);
        } else if entry.extension == SOURCE_EXTENSION {
            if let Some(record) = registry.compile(&entry.stem)? {
                debug!(name = %entry.stem, "Resolved migration from registry");
                migrations.push(record);
            } else if let Some(artifact) = artifacts.get(&entry.stem) {
                debug!(name = %entry.stem, path = %artifact.display(), "Resolved migration from build artifact");
                migrations.push(read_artifact(artifact)?);
                resolved_artifacts.push(entry.stem);
            } else {
                return Err(MigrateError::UnregisteredMigration(entry.stem));
            }
        } else {
            return Err(MigrateError::UnknownFileType(entry.path));
        }
    }

    for stem in &resolved_artifacts {
        artifacts.remove(stem);
    }
    for (stem, path) in artifacts {
        debug!(name = %stem, path = %path.display(), "Skipping build artifact without a trusted source");
    }

    Ok(migrations)
}

fn file_stem(path: &Path) -> Result<&str> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: "file name is not valid UTF-8".to_string(),
        })
}

/// Reads and parses one script file. The migration name is the file stem.
///
/// # Errors
///
/// Fails if the file cannot be read or is not a valid script.
pub fn read_script(path: &Path) -> Result<MigrationRecord> {
    let text = fs::read_to_string(path)?;
    let name = file_stem(path)?;
    parse_script(name, &text).map_err(|message| MigrateError::ParseError {
        path: path.to_path_buf(),
        message,
    })
}

/// Reads one build artifact. The migration name is the file stem.
///
/// # Errors
///
/// Fails if the file cannot be read or is not a valid artifact.
pub fn read_artifact(path: &Path) -> Result<MigrationRecord> {
    let text = fs::read_to_string(path)?;
    let name = file_stem(path)?;
    let artifact: BuildArtifact =
        serde_json::from_str(&text).map_err(|e| MigrateError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    Ok(artifact.into_record(name))
}

/// Reads a script or a build artifact, depending on the extension.
///
/// # Errors
///
/// Fails like [`read_script`] or [`read_artifact`].
pub fn read_migration_file(path: &Path) -> Result<MigrationRecord> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ARTIFACT_EXTENSION) => read_artifact(path),
        Some(extension) if is_script(extension) => read_script(path),
        _ => Err(MigrateError::UnknownFileType(path.to_path_buf())),
    }
}

/// Parses script text into a migration.
///
/// `up` runs from the `-- up` marker to the `-- down` marker and `down` from
/// the `-- down` marker to the end; both keep their marker line. The
/// description is the rest of the first `-- description: ` line and only
/// counts when that line ends with a newline.
///
/// # Errors
///
/// Returns a message when a marker is missing or the markers are out of order.
pub fn parse_script(name: &str, text: &str) -> std::result::Result<MigrationRecord, String> {
    let description = text
        .find(DESCRIPTION_PREFIX)
        .and_then(|start| {
            let rest = &text[start + DESCRIPTION_PREFIX.len()..];
            rest.find('\n').map(|end| &rest[..end])
        })
        .unwrap_or(UNSPECIFIED_DESCRIPTION);

    let up_index = text
        .find(UP_MARKER)
        .ok_or_else(|| "Up section not found".to_string())?;
    let down_index = text
        .find(DOWN_MARKER)
        .ok_or_else(|| "Down section not found".to_string())?;
    if up_index > down_index {
        return Err("Up section must be before down section".to_string());
    }

    Ok(MigrationRecord::new(
        name,
        &text[up_index..down_index],
        &text[down_index..],
        description,
    ))
}

/// Writes a JSON artifact for every registry entry into `dir`, as a build
/// step would. Returns the written paths in name order.
///
/// # Errors
///
/// Fails if a definition does not compile or a file cannot be written.
pub fn write_build_artifacts(registry: &Registry, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let records = registry.records()?;

    let mut written = Vec::with_capacity(records.len());
    for record in &records {
        let path = dir.join(format!("{}.{ARTIFACT_EXTENSION}", record.name));
        let json = serde_json::to_string_pretty(&BuildArtifact::from_record(record))?;
        fs::write(&path, json)?;
        debug!(path = %path.display(), "Wrote build artifact");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use keel_schema::Specifier;
    use tempfile::TempDir;

    use super::*;

    const ARTIFACT: &str = r#"{"description": "From artifact", "up": "select 1;", "down": "select 2;"}"#;

    const SCRIPT: &str = "-- description: Create accounts\n\
                          -- up\n\
                          create table account (id serial);\n\
                          -- down\n\
                          drop table account;\n";

    fn define_users(t: &mut Specifier) -> keel_schema::Result<()> {
        t.description("Users")?;
        t.create_table("user_table", |c| c("name").column_type("text"))
    }

    fn names(mut records: Vec<MigrationRecord>) -> Vec<String> {
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records.into_iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_parse_script() {
        let record = parse_script("0001_accounts", SCRIPT).unwrap();
        assert_eq!(record.name, "0001_accounts");
        assert_eq!(record.description, "Create accounts");
        assert_eq!(record.up, "-- up\ncreate table account (id serial);\n");
        assert_eq!(record.down, "-- down\ndrop table account;\n");
    }

    #[test]
    fn test_parse_script_without_description() {
        let record = parse_script("1_a", "-- up\nselect 1;\n-- down\nselect 2;").unwrap();
        assert_eq!(record.description, UNSPECIFIED_DESCRIPTION);
    }

    #[test]
    fn test_description_needs_line_end() {
        let text = "-- up\nselect 1;\n-- down\nselect 2;\n-- description: trailing";
        let record = parse_script("1_a", text).unwrap();
        assert_eq!(record.description, UNSPECIFIED_DESCRIPTION);

        let record = parse_script("1_a", "-- description: kept\r\n-- up\n-- down\n").unwrap();
        assert_eq!(record.description, "kept\r");
    }

    #[test]
    fn test_parse_script_missing_sections() {
        assert_eq!(
            parse_script("1_a", "select 1;\n-- down\n").unwrap_err(),
            "Up section not found"
        );
        assert_eq!(
            parse_script("1_a", "-- up\nselect 1;\n").unwrap_err(),
            "Down section not found"
        );
        assert_eq!(
            parse_script("1_a", "-- down\nselect 2;\n-- up\nselect 1;\n").unwrap_err(),
            "Up section must be before down section"
        );
    }

    #[test]
    fn test_load_source_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001_accounts.pgsql"), SCRIPT).unwrap();
        fs::write(dir.path().join("0002_more.sql"), "-- up\nselect 1;\n-- down\n").unwrap();
        fs::write(dir.path().join(".gitkeep"), "").unwrap();

        let records =
            load_migrations(&[MigrationDirectory::source(dir.path())], &Registry::new()).unwrap();
        assert_eq!(names(records), ["0001_accounts", "0002_more"]);
    }

    #[test]
    fn test_unknown_file_type() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001_notes.txt"), "hello").unwrap();

        let result = load_migrations(&[MigrationDirectory::source(dir.path())], &Registry::new());
        assert!(matches!(result, Err(MigrateError::UnknownFileType(_))));
    }

    #[test]
    fn test_malformed_script_names_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001_bad.pgsql"), "select 1;").unwrap();

        let result = load_migrations(&[MigrationDirectory::source(dir.path())], &Registry::new());
        match result {
            Err(MigrateError::ParseError { path, message }) => {
                assert!(path.ends_with("0001_bad.pgsql"));
                assert_eq!(message, "Up section not found");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_source_resolved_by_registry() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0001_users.rs"), "// defined in code").unwrap();
        let mut registry = Registry::new();
        registry.register_fn("0001_users", define_users);

        let records = load_migrations(&[MigrationDirectory::source(dir.path())], &registry).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, "Users");
    }

    #[test]
    fn test_source_resolved_by_build_artifact() {
        let source = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        fs::write(source.path().join("0001_users.rs"), "// defined in code").unwrap();
        let mut registry = Registry::new();
        registry.register_fn("0001_users", define_users);
        write_build_artifacts(&registry, build.path()).unwrap();

        let records = load_migrations(
            &[
                MigrationDirectory::source(source.path()),
                MigrationDirectory::build(build.path()),
            ],
            &Registry::new(),
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "0001_users");
        assert_eq!(records[0].description, "Users");
        assert!(records[0].up.starts_with("create table \"user_table\""));
    }

    #[test]
    fn test_artifact_matches_registry_compile() {
        let source = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        fs::write(source.path().join("0001_users.rs"), "").unwrap();
        let mut registry = Registry::new();
        registry.register_fn("0001_users", define_users);
        write_build_artifacts(&registry, build.path()).unwrap();
        let directories = [
            MigrationDirectory::source(source.path()),
            MigrationDirectory::build(build.path()),
        ];

        let compiled = load_migrations(&directories, &registry).unwrap();
        let from_artifact = load_migrations(&directories, &Registry::new()).unwrap();
        assert_eq!(compiled, from_artifact);
        assert_eq!(compiled[0], registry.compile("0001_users").unwrap().unwrap());
    }

    #[test]
    fn test_read_migration_file_dispatch() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("0002_b.json");
        let script = dir.path().join("0003_c.pgsql");
        let other = dir.path().join("0004_d.txt");
        fs::write(&artifact, ARTIFACT).unwrap();
        fs::write(&script, SCRIPT).unwrap();
        fs::write(&other, "").unwrap();

        let record = read_migration_file(&artifact).unwrap();
        assert_eq!(record, MigrationRecord::new("0002_b", "select 1;", "select 2;", "From artifact"));
        assert_eq!(read_migration_file(&script).unwrap().description, "Create accounts");
        assert!(matches!(
            read_migration_file(&other),
            Err(MigrateError::UnknownFileType(_))
        ));
    }

    #[test]
    fn test_malformed_artifact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0001_bad.json");
        fs::write(&path, "{\"up\": 1}").unwrap();
        assert!(matches!(read_artifact(&path), Err(MigrateError::ParseError { .. })));
    }

    #[test]
    fn test_artifact_without_source_ignored() {
        let build = TempDir::new().unwrap();
        fs::write(build.path().join("0001_orphan.json"), ARTIFACT).unwrap();
        fs::write(build.path().join("0002_stray.pgsql"), SCRIPT).unwrap();

        let records =
            load_migrations(&[MigrationDirectory::build(build.path())], &Registry::new()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_registry_wins_over_artifact() {
        let source = TempDir::new().unwrap();
        let build = TempDir::new().unwrap();
        fs::write(source.path().join("0001_users.rs"), "").unwrap();
        fs::write(build.path().join("0001_users.json"), ARTIFACT).unwrap();
        let mut registry = Registry::new();
        registry.register_fn("0001_users", define_users);

        let records = load_migrations(
            &[
                MigrationDirectory::source(source.path()),
                MigrationDirectory::build(build.path()),
            ],
            &registry,
        )
        .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description, "Users");
    }

    #[test]
    fn test_unregistered_source() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("0004_missing.rs"), "").unwrap();

        let result = load_migrations(&[MigrationDirectory::source(dir.path())], &Registry::new());
        assert!(matches!(
            result,
            Err(MigrateError::UnregisteredMigration(ref name)) if name == "0004_missing"
        ));
    }
}
