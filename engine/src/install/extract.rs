//! Zip extraction for engine runtime archives.
//!
//! Entries are streamed one at a time on the blocking pool. Directory creation
//! is recursive and tolerates directories that already exist. Entry paths that
//! would escape the target directory are skipped.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::InstallError;

#[cfg(unix)]
const DIR_MODE: u32 = 0o775;
#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o755;
#[cfg(unix)]
const FILE_MODE: u32 = 0o664;

/// File names the engine runtime launches directly.
const EXECUTABLE_NAMES: &[&str] = &["cli", "cli.exe", "linterhub-cli", "dotnet"];
const EXECUTABLE_EXTENSIONS: &[&str] = &["exe", "sh"];

/// Extract every entry of `archive` under `target`.
///
/// Returns the paths of extracted files, in archive order.
pub async fn extract_archive(archive: &Path, target: &Path) -> Result<Vec<PathBuf>, InstallError> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &target))
        .await
        .map_err(|e| InstallError::io("extraction task failed", io::Error::other(e)))?
}

fn extract_blocking(archive_path: &Path, target: &Path) -> Result<Vec<PathBuf>, InstallError> {
    let file = File::open(archive_path).map_err(|source| {
        InstallError::io(format!("opening {}", archive_path.display()), source)
    })?;
    let archive_error = |source| InstallError::Archive {
        path: archive_path.to_path_buf(),
        source,
    };
    let mut archive = ZipArchive::new(file).map_err(archive_error)?;

    create_dir(target)?;
    let mut extracted = Vec::new();

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_error)?;
        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "Skipping archive entry outside target");
            continue;
        };
        let out = target.join(&relative);

        if entry.is_dir() {
            create_dir(&out)?;
            continue;
        }

        if let Some(parent) = out.parent() {
            create_dir(parent)?;
        }
        let mut dest = File::create(&out)
            .map_err(|source| InstallError::io(format!("creating {}", out.display()), source))?;
        io::copy(&mut entry, &mut dest)
            .map_err(|source| InstallError::io(format!("writing {}", out.display()), source))?;

        let executable = is_executable(&relative, entry.unix_mode());
        set_file_mode(&out, executable)?;
        tracing::trace!(path = %out.display(), executable, "Extracted");
        extracted.push(out);
    }

    tracing::info!(
        files = extracted.len(),
        target = %target.display(),
        "Extracted engine runtime"
    );
    Ok(extracted)
}

fn is_executable(relative: &Path, unix_mode: Option<u32>) -> bool {
    if unix_mode.is_some_and(|mode| mode & 0o111 != 0) {
        return true;
    }
    let name = relative
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let extension = relative
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    EXECUTABLE_NAMES.contains(&name)
        || EXECUTABLE_EXTENSIONS
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
}

fn create_dir(path: &Path) -> Result<(), InstallError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder
        .create(path)
        .map_err(|source| InstallError::io(format!("creating {}", path.display()), source))
}

#[cfg(unix)]
fn set_file_mode(path: &Path, executable: bool) -> Result<(), InstallError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { EXECUTABLE_MODE } else { FILE_MODE };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|source| InstallError::io(format!("chmod {}", path.display()), source))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _executable: bool) -> Result<(), InstallError> {
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    /// Build a zip with `dirs` directory entries and `files` (name, body).
    pub(crate) fn build_zip(path: &Path, dirs: &[&str], files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for dir in dirs {
            zip.add_directory(*dir, options).unwrap();
        }
        for (name, body) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn extracts_directories_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("temp.zip");
        build_zip(
            &archive,
            &["bin/"],
            &[("bin/cli", b"#!/bin/sh\n"), ("README.md", b"docs")],
        );
        let target = dir.path().join("out");

        let files = extract_archive(&archive, &target).await.unwrap();
        assert_eq!(files, vec![target.join("bin/cli"), target.join("README.md")]);
        assert!(target.join("bin").is_dir());
        assert_eq!(fs::read(target.join("bin/cli")).unwrap(), b"#!/bin/sh\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn applies_executable_and_plain_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("temp.zip");
        build_zip(&archive, &[], &[("bin/cli", b"x"), ("bin/rules.json", b"{}")]);
        let target = dir.path().join("out");
        extract_archive(&archive, &target).await.unwrap();

        let mode = |p: &str| fs::metadata(target.join(p)).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode("bin/cli"), 0o755);
        assert_eq!(mode("bin/rules.json"), 0o664);
    }

    #[tokio::test]
    async fn existing_directories_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("temp.zip");
        build_zip(&archive, &["bin/", "bin/nested/"], &[("bin/cli", b"x")]);
        let target = dir.path().join("out");
        fs::create_dir_all(target.join("bin")).unwrap();

        extract_archive(&archive, &target).await.unwrap();
        assert!(target.join("bin/cli").is_file());
    }

    #[tokio::test]
    async fn corrupt_archive_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("temp.zip");
        fs::write(&archive, b"this is not a zip").unwrap();

        let err = extract_archive(&archive, &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Archive { .. }));
    }

    #[test]
    fn executables_are_recognized_by_name_or_mode() {
        assert!(is_executable(Path::new("bin/cli"), None));
        assert!(is_executable(Path::new("bin/Cli.EXE"), None));
        assert!(is_executable(Path::new("tools/run.sh"), None));
        assert!(is_executable(Path::new("lib/engine"), Some(0o100_755)));
        assert!(!is_executable(Path::new("lib/engine.dll"), Some(0o100_644)));
        assert!(!is_executable(Path::new("config.json"), None));
    }
}
