use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};
use zip::ZipArchive;

use crate::domain::ArchiveFormat;
use crate::error::AggregatorError;

pub const LEGACY_SEPARATOR_MESSAGE: &str = "legacy path separator";

/// macOS resource forks and Finder metadata never take part in a walk.
pub fn is_ignored_name(name: &str) -> bool {
    name.starts_with("._") || name == ".DS_Store" || name == "__MACOSX"
}

pub fn is_ignored_path(path: &Path) -> bool {
    path.components().any(|component| match component {
        Component::Normal(name) => is_ignored_name(&name.to_string_lossy()),
        _ => false,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

/// Sorted direct children of `dir`, resource forks excluded.
pub fn list_dir(dir: &Path) -> Result<DirListing, AggregatorError> {
    let mut listing = DirListing::default();
    let entries = fs::read_dir(dir)
        .map_err(|err| AggregatorError::Filesystem(format!("read {}: {err}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_ignored_name(&name) {
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        if file_type.is_dir() {
            listing.dirs.push(name);
        } else {
            listing.files.push(name);
        }
    }
    listing.files.sort();
    listing.dirs.sort();
    Ok(listing)
}

pub fn first_line(path: &Path) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).ok()?;
    Some(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Every directory under `root` (root excluded), parents before children,
/// siblings in name order.
pub fn walk_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_name(&entry.file_name().to_string_lossy()))
        .filter_map(readable_entry)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .collect()
}

/// Unreadable entries drop out of the walk with a warning.
fn readable_entry(entry: walkdir::Result<DirEntry>) -> Option<DirEntry> {
    match entry {
        Ok(entry) => Some(entry),
        Err(err) => {
            let path = err.path().map(|path| path.display().to_string()).unwrap_or_default();
            warn!(path = %path, "skipping unreadable entry: {err}");
            None
        }
    }
}

pub fn walk_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_name(&entry.file_name().to_string_lossy()))
        .filter_map(readable_entry)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

pub fn extract_archive(
    archive: &Path,
    format: ArchiveFormat,
    target_dir: &Path,
) -> Result<(), AggregatorError> {
    match format {
        ArchiveFormat::Zip => extract_zip(archive, target_dir),
        ArchiveFormat::Tar => extract_tar(archive, false, target_dir),
        ArchiveFormat::TarGz => extract_tar(archive, true, target_dir),
        ArchiveFormat::Directory | ArchiveFormat::Unsupported => {
            Err(AggregatorError::ArchiveCorrupt {
                path: archive.to_path_buf(),
                message: format!("not an archive ({format})"),
            })
        }
    }
}

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), AggregatorError> {
    let file = fs::File::open(zip_path).map_err(|err| corrupt(zip_path, format!("open: {err}")))?;
    let mut archive = ZipArchive::new(file).map_err(|err| corrupt(zip_path, err.to_string()))?;

    let mut legacy = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| corrupt(zip_path, err.to_string()))?;
        if entry.name().contains('\\') {
            legacy.push(entry.name().to_string());
            continue;
        }
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(corrupt(zip_path, "zip entry path traversal detected".to_string()));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path).map_err(|err| write_failure(zip_path, err))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| write_failure(zip_path, err))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| write_failure(zip_path, err))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| io_failure(zip_path, err))?;
    }
    legacy_result(zip_path, legacy)
}

pub fn extract_tar(
    tar_path: &Path,
    gzipped: bool,
    target_dir: &Path,
) -> Result<(), AggregatorError> {
    let file = fs::File::open(tar_path).map_err(|err| corrupt(tar_path, format!("open: {err}")))?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    fs::create_dir_all(target_dir).map_err(|err| write_failure(tar_path, err))?;

    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| corrupt(tar_path, err.to_string()))?;
    let mut legacy = Vec::new();
    for entry in entries {
        let mut entry = entry.map_err(|err| corrupt(tar_path, err.to_string()))?;
        let name = entry
            .path()
            .map_err(|err| corrupt(tar_path, err.to_string()))?
            .to_string_lossy()
            .to_string();
        if name.contains('\\') {
            legacy.push(name);
            continue;
        }
        let unpacked = entry
            .unpack_in(target_dir)
            .map_err(|err| io_failure(tar_path, err))?;
        if !unpacked {
            return Err(corrupt(tar_path, format!("tar entry escapes target: {name}")));
        }
    }
    legacy_result(tar_path, legacy)
}

fn legacy_result(archive: &Path, legacy: Vec<String>) -> Result<(), AggregatorError> {
    match legacy.first() {
        None => Ok(()),
        Some(first) => Err(AggregatorError::ArchiveWrite {
            path: archive.to_path_buf(),
            message: format!(
                "{} entries use a {LEGACY_SEPARATOR_MESSAGE} and were skipped (first: {first})",
                legacy.len()
            ),
        }),
    }
}

fn corrupt(archive: &Path, message: String) -> AggregatorError {
    AggregatorError::ArchiveCorrupt {
        path: archive.to_path_buf(),
        message,
    }
}

fn write_failure(archive: &Path, err: io::Error) -> AggregatorError {
    AggregatorError::ArchiveWrite {
        path: archive.to_path_buf(),
        message: err.to_string(),
    }
}

/// Read-side failures surface as data errors; anything else is the filesystem.
fn io_failure(archive: &Path, err: io::Error) -> AggregatorError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            corrupt(archive, err.to_string())
        }
        _ => write_failure(archive, err),
    }
}

/// Copies `source` into `dest`, skipping any entry (and its subtree) for
/// which `skip` returns true. Existing files at the destination are replaced.
pub fn copy_dir_filtered(
    source: &Path,
    dest: &Path,
    skip: &dyn Fn(&Path) -> bool,
) -> Result<(), AggregatorError> {
    fs::create_dir_all(dest).map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
    let walker = WalkDir::new(source)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !is_ignored_name(&entry.file_name().to_string_lossy()) && !skip(entry.path())
        });
    for entry in walker {
        let entry = entry.map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
            }
            fs::copy(entry.path(), &target).map_err(|err| {
                AggregatorError::Filesystem(format!("copy {}: {err}", entry.path().display()))
            })?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub files: usize,
    pub excluded: usize,
}

/// Writes `source` as a gzip-compressed tar whose entries are rooted at
/// `prefix`. Files rejected by `include` are left out. The archive is built
/// in a temporary file next to `dest` and only renamed into place once
/// complete.
pub fn write_tar_gz(
    source: &Path,
    prefix: &str,
    dest: &Path,
    include: &dyn Fn(&Path, &fs::Metadata) -> bool,
) -> Result<PackStats, AggregatorError> {
    let parent = dest
        .parent()
        .ok_or_else(|| AggregatorError::Filesystem("invalid archive destination".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix(".amplicon-agg-pack")
        .tempfile_in(parent)
        .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;

    let encoder = GzEncoder::new(
        temp.reopen()
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?,
        Compression::default(),
    );
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    let mut stats = PackStats::default();

    let walker = WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored_name(&entry.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry.map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        if entry.path() == dest {
            continue;
        }
        let name = if relative.as_os_str().is_empty() {
            PathBuf::from(prefix)
        } else {
            Path::new(prefix).join(relative)
        };
        if entry.file_type().is_dir() {
            builder
                .append_dir(&name, entry.path())
                .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry
            .metadata()
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        if !include(entry.path(), &metadata) {
            stats.excluded += 1;
            continue;
        }
        builder
            .append_path_with_name(entry.path(), &name)
            .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
        stats.files += 1;
    }

    let encoder = builder
        .into_inner()
        .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
    temp.persist(dest)
        .map_err(|err| AggregatorError::Filesystem(err.to_string()))?;
    Ok(stats)
}

/// Names of the regular files stored in a gzip-compressed tar.
pub fn tar_gz_members(path: &Path) -> Result<Vec<String>, AggregatorError> {
    let file = fs::File::open(path).map_err(|err| corrupt(path, format!("open: {err}")))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|err| corrupt(path, err.to_string()))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| corrupt(path, err.to_string()))?;
        let name = entry
            .path()
            .map_err(|err| corrupt(path, err.to_string()))?
            .to_string_lossy()
            .to_string();
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_resource_forks() {
        assert!(is_ignored_name("._S1_summary.txt"));
        assert!(is_ignored_name(".DS_Store"));
        assert!(is_ignored_path(Path::new("run/__MACOSX/S1_AA_results")));
        assert!(!is_ignored_path(Path::new("run/S1/S1_AA_results")));
    }

    #[test]
    fn walks_skip_unreadable_roots() {
        let temp = tempfile::tempdir().unwrap();
        let missing = temp.path().join("gone");
        assert!(walk_dirs(&missing).is_empty());
        assert!(walk_files(&missing).is_empty());

        fs::create_dir_all(temp.path().join("S1/S1_AA_results")).unwrap();
        fs::write(temp.path().join("S1/S1_AA_results/S1_summary.txt"), b"x").unwrap();
        assert_eq!(walk_dirs(temp.path()).len(), 2);
        assert_eq!(walk_files(temp.path()).len(), 1);
    }

    #[test]
    fn list_dir_is_sorted_and_split() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("files")).unwrap();
        fs::create_dir(temp.path().join("AUX_DIR")).unwrap();
        fs::write(temp.path().join("b.txt"), b"b").unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        fs::write(temp.path().join("._a.txt"), b"fork").unwrap();

        let listing = list_dir(temp.path()).unwrap();
        assert_eq!(listing.files, vec!["a.txt", "b.txt"]);
        assert_eq!(listing.dirs, vec!["AUX_DIR", "files"]);
    }

    #[test]
    fn first_line_strips_newline() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("S1_summary.txt");
        fs::write(&path, "#Amplicons = 2\r\n#Fraction = 0.1\n").unwrap();
        assert_eq!(first_line(&path).as_deref(), Some("#Amplicons = 2"));
    }

    #[test]
    fn write_tar_gz_applies_filter() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("results");
        fs::create_dir_all(source.join("AA_outputs")).unwrap();
        fs::write(source.join("run.json"), b"{}").unwrap();
        fs::write(source.join("AA_outputs/reads.bam"), b"bam").unwrap();

        let dest = temp.path().join("out.tar.gz");
        let stats = write_tar_gz(&source, "results", &dest, &|path, _| {
            !path.to_string_lossy().ends_with(".bam")
        })
        .unwrap();
        assert_eq!(stats, PackStats { files: 1, excluded: 1 });

        let members = tar_gz_members(&dest).unwrap();
        assert!(members.contains(&"results/run.json".to_string()));
        assert!(!members.iter().any(|name| name.ends_with(".bam")));
    }
}
