//! Working trees, archive settings, and INI configuration
//!
//! A working tree is any directory with a hidden `.hoard` control directory:
//!
//! ```text
//! .hoard/
//!   config        archive settings (INI)
//!   ignore        newline-separated ignore rules
//!   versions/     locally retained plaintext version indexes
//!   cache/tree    persistent tree cache
//! ```
//!
//! The settings file uses INI sections. `[archive]` names the archive and
//! its encoder commands; `[repository.<name>]` sections describe where
//! snapshots are stored; `[defaults]` supplies fallbacks for any option.
//! Values `true`/`false` and decimal integers are auto-typed, comments are
//! introduced with `#`.

use crate::error::{HoardError, Result};
use crate::fsutil;
use crate::snapshot::codec;
use crate::snapshot::entry::IndexEntry;
use crate::snapshot::ignore::CONTROL_DIR;
use crate::store::VersionMeta;
use crate::tsv;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Parsed INI document: section name to key/value map
#[derive(Debug, Clone, Default)]
pub struct Ini {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Ini {
    /// Parse INI text, tolerating blank lines and `#` comments
    pub fn parse(text: &str) -> Result<Ini> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current = String::new();

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                current = name.trim().to_string();
                sections.entry(current.clone()).or_default();
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                HoardError::Config(format!("line {}: expected key = value", idx + 1))
            })?;
            let mut value = value.trim().to_string();
            if let Some(pos) = value.find(" #") {
                value.truncate(pos);
                value = value.trim_end().to_string();
            }
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value);
        }
        Ok(Ini { sections })
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// Typed accessor for boolean options
    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get(section, key) {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(HoardError::Config(format!(
                "{}.{}: expected true or false, found {:?}",
                section, key, other
            ))),
        }
    }

    /// Typed accessor for integer options
    pub fn get_int(&self, section: &str, key: &str) -> Result<Option<i64>> {
        match self.get(section, key) {
            None => Ok(None),
            Some(v) => v.parse::<i64>().map(Some).map_err(|_| {
                HoardError::Config(format!(
                    "{}.{}: expected an integer, found {:?}",
                    section, key, v
                ))
            }),
        }
    }

    /// Section names starting with the given prefix
    pub fn sections_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.sections
            .keys()
            .filter(move |name| name.starts_with(prefix))
            .map(String::as_str)
    }
}

/// Split a shell-style command string into argv parts
///
/// Single and double quotes group words; there is no escape syntax.
pub fn split_command(input: &str) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for ch in input.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    word.push(ch);
                }
            }
            None => {
                if ch == '\'' || ch == '"' {
                    quote = Some(ch);
                    in_word = true;
                } else if ch.is_whitespace() {
                    if in_word {
                        parts.push(std::mem::take(&mut word));
                        in_word = false;
                    }
                } else {
                    word.push(ch);
                    in_word = true;
                }
            }
        }
    }
    if quote.is_some() {
        return Err(HoardError::Config(format!(
            "unterminated quote in command {:?}",
            input
        )));
    }
    if in_word {
        parts.push(word);
    }
    Ok(parts)
}

/// Retention rules for one repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimConfig {
    pub keep_versions: Option<u64>,
    pub keep_days: Option<u64>,
}

impl TrimConfig {
    pub fn is_configured(&self) -> bool {
        self.keep_versions.is_some() || self.keep_days.is_some()
    }
}

/// Backend selector for a configured repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoKind {
    File { root: PathBuf },
    Memory,
}

/// One `[repository.<name>]` section, with defaults folded in
///
/// Encoder commands configured here override the ones in `[archive]` when
/// this repository is selected.
#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub name: String,
    pub kind: RepoKind,
    pub trim: TrimConfig,
    pub encode_command: Option<Vec<String>>,
    pub decode_command: Option<Vec<String>>,
}

impl RepoConfig {
    /// Apply this repository's command overrides to an archive
    pub fn apply_commands(&self, archive: &mut Archive) {
        if let Some(cmd) = &self.encode_command {
            archive.encode_command = cmd.clone();
        }
        if let Some(cmd) = &self.decode_command {
            archive.decode_command = cmd.clone();
        }
    }
}

/// Archive settings loaded from a working tree
///
/// Repository command overrides are applied right after load; from then on
/// the archive value is read-only for the rest of the invocation.
#[derive(Debug, Clone)]
pub struct Archive {
    pub name: String,
    pub root: PathBuf,
    pub created_at: SystemTime,
    pub encode_command: Vec<String>,
    pub decode_command: Vec<String>,
    pub ignore: BTreeSet<String>,
    pub versions: Vec<VersionMeta>,
}

impl Archive {
    /// Fill in the version history from a version store
    pub fn load_versions(&mut self, store: &dyn crate::store::VersionStore) -> Result<()> {
        self.versions = store
            .get_archive(&self.name)?
            .map(|meta| meta.versions)
            .unwrap_or_default();
        Ok(())
    }

    /// The most recent version, by id ordering
    pub fn latest_version(&self) -> Option<&VersionMeta> {
        self.versions.last()
    }
}

/// A directory under version control, located by its `.hoard` child
#[derive(Debug, Clone)]
pub struct WorkingTree {
    root: PathBuf,
}

impl WorkingTree {
    /// Create the control directory for a fresh archive
    pub fn init(root: &Path, name: &str, encode: &str, decode: &str) -> Result<WorkingTree> {
        if name.is_empty() {
            return Err(HoardError::Config("archive name must not be empty".into()));
        }
        let root = fsutil::canonical(root)?;
        let control = root.join(CONTROL_DIR);
        if control.exists() {
            return Err(HoardError::Config(format!(
                "{} already contains a {} directory",
                root.display(),
                CONTROL_DIR
            )));
        }
        fs::create_dir_all(control.join("versions"))?;
        fs::create_dir_all(control.join("cache"))?;
        fs::write(control.join("ignore"), "")?;
        fs::write(
            control.join("config"),
            format!(
                "[archive]\nname = {}\ncreated-at = {}\nencode-command = {}\ndecode-command = {}\n",
                name,
                tsv::fmt_instant(SystemTime::now()),
                encode,
                decode,
            ),
        )?;
        Ok(WorkingTree { root })
    }

    /// Find the working tree containing a directory by walking upward
    pub fn discover(start: &Path) -> Result<WorkingTree> {
        let start = fsutil::canonical(start)?;
        let root = fsutil::find_upward(&start, CONTROL_DIR).ok_or_else(|| {
            HoardError::Config(format!(
                "no {} directory found above {}",
                CONTROL_DIR,
                start.display()
            ))
        })?;
        Ok(WorkingTree { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn control_dir(&self) -> PathBuf {
        self.root.join(CONTROL_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.control_dir().join("config")
    }

    pub fn ignore_path(&self) -> PathBuf {
        self.control_dir().join("ignore")
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.control_dir().join("versions")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.control_dir().join("cache").join("tree")
    }

    /// Parse the settings file
    pub fn config(&self) -> Result<Ini> {
        let text = fs::read_to_string(self.config_path())
            .map_err(|e| HoardError::Config(format!("cannot read archive settings: {}", e)))?;
        Ini::parse(&text)
    }

    /// Raw settings text, used when registering the archive in a repository
    pub fn config_text(&self) -> Result<String> {
        Ok(fs::read_to_string(self.config_path())?)
    }

    /// Ignore rules from the ignore file, blank lines and comments stripped
    pub fn load_ignore(&self) -> Result<BTreeSet<String>> {
        let text = match fs::read_to_string(self.ignore_path()) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Load the archive value for this tree
    pub fn load_archive(&self) -> Result<Archive> {
        let ini = self.config()?;
        let name = ini
            .get("archive", "name")
            .filter(|n| !n.is_empty())
            .ok_or_else(|| HoardError::Config("archive.name is not set".into()))?
            .to_string();

        let created_at = match ini.get("archive", "created-at") {
            Some(cell) => DateTime::parse_from_rfc3339(cell)
                .map(|dt| dt.with_timezone(&Utc).into())
                .map_err(|e| HoardError::Config(format!("archive.created-at: {}", e)))?,
            None => SystemTime::UNIX_EPOCH,
        };

        let command = |key: &str| -> Result<Vec<String>> {
            let raw = ini
                .get("archive", key)
                .or_else(|| ini.get("defaults", key))
                .unwrap_or("cat");
            let parts = split_command(raw)?;
            if parts.is_empty() {
                return Err(HoardError::Config(format!("archive.{} is empty", key)));
            }
            Ok(parts)
        };

        Ok(Archive {
            name,
            root: self.root.clone(),
            created_at,
            encode_command: command("encode-command")?,
            decode_command: command("decode-command")?,
            ignore: self.load_ignore()?,
            versions: Vec::new(),
        })
    }

    /// Configured repositories, named sections first
    pub fn repositories(&self) -> Result<Vec<RepoConfig>> {
        let ini = self.config()?;
        let mut repos = Vec::new();
        let names: Vec<String> = ini
            .sections_with_prefix("repository.")
            .map(str::to_string)
            .collect();
        for section in names {
            let name = section["repository.".len()..].to_string();
            repos.push(self.repo_from_section(&ini, &section, name)?);
        }
        Ok(repos)
    }

    /// Select a repository by name, or the only configured one
    pub fn repository(&self, name: Option<&str>) -> Result<RepoConfig> {
        let mut repos = self.repositories()?;
        match name {
            Some(wanted) => repos
                .into_iter()
                .find(|r| r.name == wanted)
                .ok_or_else(|| {
                    HoardError::Config(format!("no repository named {:?} configured", wanted))
                }),
            None => {
                if repos.is_empty() {
                    Err(HoardError::Config(
                        "no [repository.<name>] section configured".into(),
                    ))
                } else if repos.len() == 1 {
                    Ok(repos.remove(0))
                } else {
                    Err(HoardError::Config(format!(
                        "multiple repositories configured ({}); pick one",
                        repos
                            .iter()
                            .map(|r| r.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )))
                }
            }
        }
    }

    fn repo_from_section(&self, ini: &Ini, section: &str, name: String) -> Result<RepoConfig> {
        let lookup = |key: &str| ini.get(section, key).or_else(|| ini.get("defaults", key));
        let typed_int = |key: &str| -> Result<Option<i64>> {
            match ini.get_int(section, key)? {
                Some(v) => Ok(Some(v)),
                None => ini.get_int("defaults", key),
            }
        };

        let kind = match lookup("type").unwrap_or("file") {
            "file" => {
                let root = lookup("root").ok_or_else(|| {
                    HoardError::Config(format!("{}.root is required for file repositories", section))
                })?;
                RepoKind::File {
                    root: PathBuf::from(root),
                }
            }
            "memory" => RepoKind::Memory,
            other => {
                return Err(HoardError::Config(format!(
                    "{}.type: unknown repository type {:?}",
                    section, other
                )))
            }
        };

        let non_negative = |key: &str, v: i64| -> Result<u64> {
            u64::try_from(v).map_err(|_| {
                HoardError::Config(format!("{}.{}: must not be negative", section, key))
            })
        };
        let trim = TrimConfig {
            keep_versions: typed_int("trim.keep-versions")?
                .map(|v| non_negative("trim.keep-versions", v))
                .transpose()?,
            keep_days: typed_int("trim.keep-days")?
                .map(|v| non_negative("trim.keep-days", v))
                .transpose()?,
        };

        let command = |key: &str| -> Result<Option<Vec<String>>> {
            match ini.get(section, key) {
                Some(raw) => split_command(raw).map(Some),
                None => Ok(None),
            }
        };

        Ok(RepoConfig {
            name,
            kind,
            trim,
            encode_command: command("encode-command")?,
            decode_command: command("decode-command")?,
        })
    }

    /// Ids of locally retained version indexes, oldest first
    pub fn local_version_ids(&self) -> Result<Vec<String>> {
        let dir = self.versions_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if crate::snapshot::version_id::is_valid(&name) {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Read one locally retained version index (plaintext form)
    pub fn read_local_version(&self, id: &str) -> Result<Vec<IndexEntry>> {
        let file = File::open(self.versions_dir().join(id))?;
        codec::read_index(BufReader::new(file))
    }

    /// Write a version index to the local versions directory
    pub fn write_local_version(&self, id: &str, entries: &[IndexEntry]) -> Result<()> {
        let dir = self.versions_dir();
        fs::create_dir_all(&dir)?;
        let out = BufWriter::new(File::create(dir.join(id))?);
        codec::write_index(out, entries)
    }

    /// Remove a locally retained version index if present
    pub fn remove_local_version(&self, id: &str) -> Result<bool> {
        let path = self.versions_dir().join(id);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ini_parse() {
        let ini = Ini::parse(
            "# top comment\n\
             [defaults]\n\
             encode-command = cat\n\
             \n\
             [repository.main]\n\
             type = file  # trailing comment\n\
             root = /mnt/backup\n\
             trim.keep-versions = 30\n\
             enabled = true\n",
        )
        .unwrap();

        assert_eq!(ini.get("defaults", "encode-command"), Some("cat"));
        assert_eq!(ini.get("repository.main", "type"), Some("file"));
        assert_eq!(ini.get("repository.main", "root"), Some("/mnt/backup"));
        assert_eq!(ini.get_int("repository.main", "trim.keep-versions").unwrap(), Some(30));
        assert_eq!(ini.get_bool("repository.main", "enabled").unwrap(), Some(true));
        assert_eq!(ini.get("repository.main", "missing"), None);
    }

    #[test]
    fn test_ini_rejects_bad_lines_and_types() {
        assert!(Ini::parse("not a key value line\n").is_err());

        let ini = Ini::parse("[s]\nn = 12x\nb = yes\n").unwrap();
        assert!(ini.get_int("s", "n").is_err());
        assert!(ini.get_bool("s", "b").is_err());
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("age -e -r key").unwrap(),
            vec!["age", "-e", "-r", "key"]
        );
        assert_eq!(
            split_command("aes -p \"my secret\"").unwrap(),
            vec!["aes", "-p", "my secret"]
        );
        assert_eq!(
            split_command("cmd 'a b' c").unwrap(),
            vec!["cmd", "a b", "c"]
        );
        assert_eq!(split_command("   ").unwrap(), Vec::<String>::new());
        assert!(split_command("cmd 'unterminated").is_err());
    }

    #[test]
    fn test_init_and_discover() {
        let dir = tempdir().unwrap();
        let tree = WorkingTree::init(dir.path(), "photos", "cat", "cat").unwrap();
        assert!(tree.config_path().is_file());
        assert!(tree.versions_dir().is_dir());

        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let found = WorkingTree::discover(&dir.path().join("a/b")).unwrap();
        assert_eq!(found.root(), tree.root());

        // A second init in the same tree fails
        assert!(WorkingTree::init(dir.path(), "photos", "cat", "cat").is_err());
    }

    #[test]
    fn test_discover_outside_tree_fails() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            WorkingTree::discover(dir.path()),
            Err(HoardError::Config(_))
        ));
    }

    #[test]
    fn test_load_archive() {
        let dir = tempdir().unwrap();
        let tree = WorkingTree::init(dir.path(), "photos", "gzip -c", "gzip -cd").unwrap();
        fs::write(tree.ignore_path(), "# comment\n\ntarget\n/secret\n").unwrap();

        let archive = tree.load_archive().unwrap();
        assert_eq!(archive.name, "photos");
        assert_eq!(archive.encode_command, vec!["gzip", "-c"]);
        assert_eq!(archive.decode_command, vec!["gzip", "-cd"]);
        assert_eq!(
            archive.ignore,
            BTreeSet::from(["target".to_string(), "/secret".to_string()])
        );
        assert_eq!(archive.root, fsutil::canonical(dir.path()).unwrap());
    }

    #[test]
    fn test_repository_selection() {
        let dir = tempdir().unwrap();
        let tree = WorkingTree::init(dir.path(), "photos", "cat", "cat").unwrap();
        let mut config = tree.config_text().unwrap();
        config.push_str(
            "\n[defaults]\ntrim.keep-days = 365\n\
             \n[repository.main]\ntype = file\nroot = /mnt/backup\ntrim.keep-versions = 10\n\
             encode-command = age -e -r KEY\n\
             \n[repository.scratch]\ntype = memory\n",
        );
        fs::write(tree.config_path(), config).unwrap();

        let repos = tree.repositories().unwrap();
        assert_eq!(repos.len(), 2);

        let main = tree.repository(Some("main")).unwrap();
        assert_eq!(
            main.kind,
            RepoKind::File {
                root: PathBuf::from("/mnt/backup")
            }
        );
        assert_eq!(main.trim.keep_versions, Some(10));
        // Defaults fill unset options
        assert_eq!(main.trim.keep_days, Some(365));

        // Repository commands override the archive's when selected
        let mut archive = tree.load_archive().unwrap();
        main.apply_commands(&mut archive);
        assert_eq!(archive.encode_command, vec!["age", "-e", "-r", "KEY"]);
        assert_eq!(archive.decode_command, vec!["cat"]);

        assert!(tree.repository(Some("absent")).is_err());
        // Ambiguous when more than one is configured and none is named
        assert!(tree.repository(None).is_err());
    }

    #[test]
    fn test_local_versions_roundtrip() {
        let dir = tempdir().unwrap();
        let tree = WorkingTree::init(dir.path(), "photos", "cat", "cat").unwrap();

        assert!(tree.local_version_ids().unwrap().is_empty());

        let entries = vec![IndexEntry {
            path: "a.txt".into(),
            kind: crate::snapshot::entry::EntryType::File,
            size: Some(1),
            permissions: Some(0o644),
            modified_at: Some(SystemTime::UNIX_EPOCH),
            content_id: Some(crate::multihash::Multihash::of_bytes(b"a")),
            coded_id: None,
            target: None,
        }];
        tree.write_local_version("20220101-00000-abcde", &entries).unwrap();
        tree.write_local_version("20220102-00000-abcde", &entries).unwrap();

        assert_eq!(
            tree.local_version_ids().unwrap(),
            vec!["20220101-00000-abcde", "20220102-00000-abcde"]
        );
        assert_eq!(tree.read_local_version("20220101-00000-abcde").unwrap(), entries);

        assert!(tree.remove_local_version("20220101-00000-abcde").unwrap());
        assert!(!tree.remove_local_version("20220101-00000-abcde").unwrap());
    }
}
