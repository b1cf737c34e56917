//! File discovery for triage directories.
//!
//! Candidate files are matched by plain, case-sensitive substring containment on the file name.
//! Gzip-compressed matches are materialised next to the archive with the `.gz` suffix removed,
//! and every final path is reported at most once.

pub mod walk;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use thiserror::Error;

/// Suffix that marks a gzip-compressed log.
pub const GZIP_SUFFIX: &str = ".gz";

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to decompress {} into {}: {source}", .source_path.display(), .target.display())]
    Decompress {
        source_path: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// A matched file and how it becomes a plain-text log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Already plain text, shipped as is.
    Plain(PathBuf),
    /// Gzip archive to be expanded into `target`.
    Decompressed { source: PathBuf, target: PathBuf },
}

impl Candidate {
    /// The path that is shipped and counted.
    pub fn final_path(&self) -> &Path {
        match self {
            Candidate::Plain(path) => path,
            Candidate::Decompressed { target, .. } => target,
        }
    }

    pub fn was_compressed(&self) -> bool {
        matches!(self, Candidate::Decompressed { .. })
    }
}

/// Returns the decompressed sibling of `path` when its name ends in `.gz`.
pub fn decompressed_target(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(GZIP_SUFFIX)?;
    if stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(stem))
}

fn name_contains(path: &Path, fragment: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().contains(fragment))
        .unwrap_or(false)
}

/// Decides what to do with every walked path, without touching the filesystem.
///
/// Paths whose name does not contain `fragment` are dropped. A compressed match is skipped when
/// its target was already produced or is itself one of the plain matches, so the result does not
/// depend on which of `x.log` and `x.log.gz` the walk visits first.
pub fn plan<I>(fragment: &str, entries: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = PathBuf>,
{
    let retained: Vec<PathBuf> = entries
        .into_iter()
        .filter(|path| name_contains(path, fragment))
        .collect();

    let plain: HashSet<&Path> = retained
        .iter()
        .filter(|path| decompressed_target(path).is_none())
        .map(PathBuf::as_path)
        .collect();

    let mut produced: HashSet<PathBuf> = HashSet::new();
    let mut candidates = Vec::new();

    for path in &retained {
        match decompressed_target(path) {
            Some(target) => {
                if produced.contains(&target) || plain.contains(target.as_path()) {
                    info!("{} exists in results. Skipping...", target.display());
                    continue;
                }
                produced.insert(target.clone());
                candidates.push(Candidate::Decompressed {
                    source: path.clone(),
                    target,
                });
            }
            None => {
                if !produced.insert(path.clone()) {
                    info!("{} exists in results. Skipping...", path.display());
                    continue;
                }
                candidates.push(Candidate::Plain(path.clone()));
            }
        }
    }

    candidates
}

/// Outcome of expanding an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// The target was written with this many bytes.
    Written(u64),
    /// The target already existed and was left untouched.
    AlreadyPresent,
}

/// Expands a compressed log into its plain-text sibling.
pub trait Decompressor {
    fn decompress(&self, source: &Path, target: &Path) -> DiscoveryResult<Expansion>;
}

/// Gzip expansion backed by flate2. Concatenated members are read as one stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipDecompressor;

impl Decompressor for GzipDecompressor {
    fn decompress(&self, source: &Path, target: &Path) -> DiscoveryResult<Expansion> {
        let decompress_err = |source_err: io::Error| DiscoveryError::Decompress {
            source_path: source.to_path_buf(),
            target: target.to_path_buf(),
            source: source_err,
        };

        let input = File::open(source).map_err(decompress_err)?;

        // create_new refuses to clobber a target that is already materialised
        let output = match OpenOptions::new().write(true).create_new(true).open(target) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(Expansion::AlreadyPresent);
            }
            Err(e) => return Err(decompress_err(e)),
        };

        let mut decoder = MultiGzDecoder::new(BufReader::new(input));
        let mut writer = BufWriter::with_capacity(64 * 1024, output);
        let copied = io::copy(&mut decoder, &mut writer).and_then(|n| writer.flush().map(|_| n));

        match copied {
            Ok(bytes) => Ok(Expansion::Written(bytes)),
            Err(e) => {
                drop(writer);
                if let Err(remove_err) = fs::remove_file(target) {
                    warn!(
                        "Unable to remove partial file {}: {}",
                        target.display(),
                        remove_err
                    );
                }
                Err(decompress_err(e))
            }
        }
    }
}

/// Finds log files below a search root and turns them into a canonical, plain-text set.
#[derive(Debug, Default, Clone)]
pub struct FileDiscovery<D = GzipDecompressor> {
    decompressor: D,
}

impl FileDiscovery<GzipDecompressor> {
    pub fn new() -> Self {
        Self {
            decompressor: GzipDecompressor,
        }
    }
}

impl<D: Decompressor> FileDiscovery<D> {
    pub fn with_decompressor(decompressor: D) -> Self {
        Self { decompressor }
    }

    /// Returns the final paths of every file under `search_root` whose name contains
    /// `fragment`, in walk order. An empty or missing root yields an empty list.
    pub fn discover(&self, fragment: &str, search_root: &Path) -> DiscoveryResult<Vec<PathBuf>> {
        let entries = walk::walk_files(search_root);
        let candidates = plan(fragment, entries);
        self.materialize(candidates)
    }

    /// Applies a plan: archives are expanded, plain files are passed through.
    pub fn materialize(&self, candidates: Vec<Candidate>) -> DiscoveryResult<Vec<PathBuf>> {
        let compressed = candidates.iter().filter(|c| c.was_compressed()).count();
        debug!("{} of {} candidates need decompression", compressed, candidates.len());

        let mut result = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if let Candidate::Decompressed { source, target } = candidate {
                match self.decompressor.decompress(source, target)? {
                    Expansion::Written(bytes) => {
                        debug!(
                            "Decompressed {} into {} ({} bytes)",
                            source.display(),
                            target.display(),
                            bytes
                        );
                    }
                    Expansion::AlreadyPresent => {
                        info!("{} already exists. Skipping...", target.display());
                    }
                }
            }
            result.push(candidate.final_path().to_path_buf());
        }
        Ok(result)
    }

    /// Resolves every fragment against `triage_dir` and concatenates the results.
    ///
    /// Each fragment is split into a search root (its parent directory) and a file name
    /// substring. A fragment ending in a separator, or an empty one, names a directory and
    /// matches every file below it. Fragments that match nothing are warned about and contribute nothing. A file
    /// reached through more than one fragment is kept once, at its first position.
    pub fn discover_fragments(
        &self,
        triage_dir: &Path,
        fragments: &[String],
    ) -> DiscoveryResult<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut all_files = Vec::new();

        for fragment in fragments {
            info!("Retrieving paths containing {}", fragment);
            let relative = fragment.trim_start_matches(['/', '\\']);
            let full_path = triage_dir.join(relative);
            let names_directory = relative.is_empty() || relative.ends_with(['/', '\\']);
            let (search_root, file_name) = match (full_path.parent(), full_path.file_name()) {
                // a directory fragment lists every file below it
                _ if names_directory => (full_path.clone(), String::new()),
                (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_string_lossy().into_owned()),
                _ => {
                    warn!("The path fragment \"{}\" does not name a file, skipping", fragment);
                    continue;
                }
            };

            let found = self.discover(&file_name, &search_root)?;
            if found.is_empty() {
                warn!("No paths were found for {}", fragment);
            }

            for path in found {
                if seen.insert(path.clone()) {
                    all_files.push(path);
                } else {
                    info!("{} exists in results. Skipping...", path.display());
                }
            }
        }

        Ok(all_files)
    }
}
