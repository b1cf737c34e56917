//! Source taxonomy loading.
//!
//! A taxonomy maps shipper module names to file types, and each file type to an ordered list of
//! path fragments relative to a triage directory. One definition file exists per source system
//! (e.g. `ubuntu.yml`) inside the taxonomy directory.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while resolving a taxonomy.
#[derive(Error, Debug)]
pub enum TaxonomyError {
    #[error("{system} is currently not supported or no configuration file was found in {}", .directory.display())]
    NotFound { system: String, directory: PathBuf },

    #[error("The configuration file {} could not be parsed: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("IO error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type TaxonomyResult<T> = Result<T, TaxonomyError>;

/// Declarative formats a taxonomy file may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaxonomyFormat {
    Yaml,
    Toml,
    Json,
}

impl TaxonomyFormat {
    /// Maps a file extension onto a supported format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "yml" | "yaml" => Some(TaxonomyFormat::Yaml),
            "toml" => Some(TaxonomyFormat::Toml),
            "json" => Some(TaxonomyFormat::Json),
            _ => None,
        }
    }

    fn parse(self, content: &str) -> Result<SourceTaxonomy, String> {
        match self {
            TaxonomyFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            TaxonomyFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            TaxonomyFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// A file type within a module together with the path fragments that locate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeEntry {
    pub name: String,
    pub fragments: Vec<String>,
}

/// A shipper module and its file types, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleEntry {
    pub name: String,
    pub file_types: Vec<FileTypeEntry>,
}

/// Module → file type → path fragments, preserving the order of the definition file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceTaxonomy {
    modules: Vec<ModuleEntry>,
}

impl From<Vec<ModuleEntry>> for SourceTaxonomy {
    fn from(modules: Vec<ModuleEntry>) -> Self {
        Self { modules }
    }
}

impl SourceTaxonomy {
    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl<'de> Deserialize<'de> for SourceTaxonomy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ModulesVisitor;

        impl<'de> Visitor<'de> for ModulesVisitor {
            type Value = SourceTaxonomy;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of module names to file types")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut seen = HashSet::new();
                let mut modules = Vec::new();
                while let Some((name, file_types)) = map.next_entry::<String, FileTypes>()? {
                    if !seen.insert(name.clone()) {
                        return Err(de::Error::custom(format!("duplicate module `{}`", name)));
                    }
                    modules.push(ModuleEntry {
                        name,
                        file_types: file_types.0,
                    });
                }
                Ok(SourceTaxonomy { modules })
            }
        }

        deserializer.deserialize_map(ModulesVisitor)
    }
}

/// Ordered file-type table of a single module.
struct FileTypes(Vec<FileTypeEntry>);

impl<'de> Deserialize<'de> for FileTypes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FileTypesVisitor;

        impl<'de> Visitor<'de> for FileTypesVisitor {
            type Value = FileTypes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of file types to lists of path fragments")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut seen = HashSet::new();
                let mut entries = Vec::new();
                while let Some((name, fragments)) = map.next_entry::<String, Vec<String>>()? {
                    if !seen.insert(name.clone()) {
                        return Err(de::Error::custom(format!("duplicate file type `{}`", name)));
                    }
                    entries.push(FileTypeEntry { name, fragments });
                }
                Ok(FileTypes(entries))
            }
        }

        deserializer.deserialize_map(FileTypesVisitor)
    }
}

/// Finds and parses the taxonomy for `system` inside `directory`.
///
/// A file matches when its stem equals `system` exactly and its extension is a supported
/// declarative format. Nothing outside `directory` is read.
pub fn resolve(system: &str, directory: &Path) -> TaxonomyResult<SourceTaxonomy> {
    let not_found = || TaxonomyError::NotFound {
        system: system.to_string(),
        directory: directory.to_path_buf(),
    };

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(source) => {
            return Err(TaxonomyError::Io {
                path: directory.to_path_buf(),
                source,
            });
        }
    };

    let mut candidates: Vec<(TaxonomyFormat, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| TaxonomyError::Io {
            path: directory.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str());
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(TaxonomyFormat::from_extension);
        if let (Some(stem), Some(format)) = (stem, format) {
            if stem == system {
                candidates.push((format, path));
            }
        }
    }

    // read_dir order is platform dependent
    candidates.sort();
    let (format, path) = match candidates.first() {
        Some(found) => found.clone(),
        None => return Err(not_found()),
    };
    if candidates.len() > 1 {
        warn!(
            "Multiple configuration files found for {}, using {}",
            system,
            path.display()
        );
    }
    info!("Configuration file found for {}: {}", system, path.display());

    let content = fs::read_to_string(&path).map_err(|source| TaxonomyError::Io {
        path: path.clone(),
        source,
    })?;
    let taxonomy = format.parse(&content).map_err(|message| TaxonomyError::Parse {
        path: path.clone(),
        message,
    })?;

    debug!("Loaded taxonomy for {}: {:?}", system, taxonomy);
    Ok(taxonomy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use tempfile::tempdir;

    #[test]
    fn test_yaml_preserves_document_order() {
        let dir = tempdir().unwrap();
        write(
            dir.path().join("ubuntu.yml"),
            "system:\n  syslog:\n    - var/log/syslog\n  auth:\n    - var/log/auth.log\napache:\n  access:\n    - var/log/apache2/access.log\n",
        )
        .unwrap();

        let taxonomy = resolve("ubuntu", dir.path()).unwrap();
        assert_eq!(taxonomy.module_names(), vec!["system", "apache"]);

        let system = &taxonomy.modules()[0];
        let names: Vec<&str> = system.file_types.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["syslog", "auth"]);
        assert_eq!(system.file_types[1].fragments, vec!["var/log/auth.log"]);
    }

    #[test]
    fn test_toml_and_json_definitions() {
        let dir = tempdir().unwrap();
        write(
            dir.path().join("centos.toml"),
            "[system]\nsyslog = [\"var/log/messages\", \"var/log/syslog\"]\n",
        )
        .unwrap();
        write(
            dir.path().join("debian.json"),
            r#"{"system": {"auth": ["var/log/auth.log"]}}"#,
        )
        .unwrap();

        let centos = resolve("centos", dir.path()).unwrap();
        assert_eq!(
            centos.modules()[0].file_types[0].fragments,
            vec!["var/log/messages", "var/log/syslog"]
        );

        let debian = resolve("debian", dir.path()).unwrap();
        assert_eq!(debian.modules()[0].file_types[0].name, "auth");
    }

    #[test]
    fn test_stem_must_match_exactly() {
        let dir = tempdir().unwrap();
        write(dir.path().join("ubuntu20.yml"), "system: {}\n").unwrap();
        write(dir.path().join("ubuntu.txt"), "system: {}\n").unwrap();

        match resolve("ubuntu", dir.path()) {
            Err(TaxonomyError::NotFound { system, .. }) => assert_eq!(system, "ubuntu"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("config");
        assert!(matches!(
            resolve("ubuntu", &missing),
            Err(TaxonomyError::NotFound { .. })
        ));
    }

    #[test]
    fn test_parse_error_carries_diagnostic() {
        let dir = tempdir().unwrap();
        write(dir.path().join("ubuntu.yml"), "system:\n  syslog: 42\n").unwrap();

        match resolve("ubuntu", dir.path()) {
            Err(TaxonomyError::Parse { path, message }) => {
                assert!(path.ends_with("ubuntu.yml"));
                assert!(!message.is_empty());
            }
            other => panic!("expected Parse, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_file_type_rejected() {
        let result: Result<SourceTaxonomy, _> =
            serde_json::from_str(r#"{"system": {"syslog": ["a"], "syslog": ["b"]}}"#);
        assert!(result.is_err());
    }
}
