//! Extraction of downloaded Core Tools archives.
//!
//! The feed serves zip archives today; gzip-compressed tarballs are accepted
//! as well, keyed off the download URL. Entries that could write outside the
//! destination (absolute paths, `..` components, link entries) are skipped.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path};
use tracing::{debug, warn};

/// Supported archive layouts for release artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Infers the format from a download URL or file name. Unknown suffixes
    /// yield `None`; the feed has only ever served zip and tar.gz.
    pub fn from_url(url: &str) -> Option<Self> {
        let lower = url.to_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

/// Unpacks `archive` into `dest_dir`, creating the directory tree as needed.
pub fn unpack(archive: &Path, dest_dir: &Path, format: ArchiveFormat) -> Result<()> {
    debug!(
        "Unpacking {:?} archive {} into {}",
        format,
        archive.display(),
        dest_dir.display()
    );
    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory {}", dest_dir.display()))?;

    match format {
        ArchiveFormat::Zip => unpack_zip(archive, dest_dir),
        ArchiveFormat::TarGz => unpack_tar_gz(archive, dest_dir),
    }
}

fn unpack_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip {}", archive_path.display()))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // enclosed_name rejects absolute and parent-relative entry names.
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe name: {}", entry.name());
            continue;
        };
        let target = dest_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut output)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            restore_unix_mode(&target, mode)?;
        }
    }

    Ok(())
}

fn unpack_tar_gz(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let decoder = flate2::read::GzDecoder::new(BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();

        // Links can point anywhere on the host; never materialize them.
        if kind.is_symlink() || kind.is_hard_link() {
            warn!("Skipping link entry in tar archive");
            continue;
        }

        let relative = entry.path()?.into_owned();
        if !is_safe_relative(&relative) {
            warn!("Skipping tar entry with unsafe path: {:?}", relative);
            continue;
        }
        let target = dest_dir.join(&relative);

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if !kind.is_file() {
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut output = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut output)?;

        #[cfg(unix)]
        if let Ok(mode) = entry.header().mode() {
            restore_unix_mode(&target, mode)?;
        }
    }

    Ok(())
}

fn is_safe_relative(path: &Path) -> bool {
    !path.is_absolute()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

#[cfg(unix)]
fn restore_unix_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if mode & 0o111 != 0 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o755))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

/// Grants owner/group/other execute on `path` when missing. No-op on
/// Windows.
#[allow(unused_variables)]
pub fn ensure_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to read metadata for {}", path.display()))?;
        let mut permissions = metadata.permissions();
        if permissions.mode() & 0o111 == 0 {
            permissions.set_mode(permissions.mode() | 0o755);
            fs::set_permissions(path, permissions)
                .with_context(|| format!("Failed to mark {} executable", path.display()))?;
            debug!("Marked {} executable", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn format_inferred_from_url() {
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/cli.zip"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/Cli.ZIP"),
            Some(ArchiveFormat::Zip)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/cli.tar.gz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(
            ArchiveFormat::from_url("https://example.com/cli.tgz"),
            Some(ArchiveFormat::TarGz)
        );
        assert_eq!(ArchiveFormat::from_url("https://example.com/cli.msi"), None);
    }

    #[test]
    fn unpacks_zip_with_nested_entries() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("cli.zip");
        let dest = temp.path().join("out");
        write_zip(
            &archive,
            &[
                ("func", b"binary" as &[u8]),
                ("workers/python/worker.py", b"print()" as &[u8]),
            ],
        );

        unpack(&archive, &dest, ArchiveFormat::Zip).unwrap();

        assert_eq!(fs::read(dest.join("func")).unwrap(), b"binary");
        assert!(dest.join("workers/python/worker.py").exists());
    }

    #[test]
    fn unpacks_tar_gz() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("cli.tar.gz");
        let dest = temp.path().join("out");
        {
            let file = File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let data = b"binary";
            let mut header = tar::Header::new_gnu();
            header.set_path("func").unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.finish().unwrap();
        }

        unpack(&archive, &dest, ArchiveFormat::TarGz).unwrap();
        assert!(dest.join("func").exists());
    }

    #[test]
    fn corrupt_zip_is_an_error() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("cli.zip");
        fs::write(&archive, b"definitely not a zip").unwrap();

        let result = unpack(&archive, &temp.path().join("out"), ArchiveFormat::Zip);
        assert!(result.is_err());
    }

    #[test]
    fn tar_parent_dir_escape_is_skipped() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("evil.tar.gz");
        let dest = temp.path().join("out");
        let escape = temp.path().join("escaped.txt");
        {
            let file = File::create(&archive).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let data = b"outside";
            let mut header = tar::Header::new_gnu();
            // `Header::set_path` refuses `..` components, so write the raw
            // name bytes directly to build the malicious fixture.
            let name = b"../escaped.txt";
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();
            builder.finish().unwrap();
        }

        unpack(&archive, &dest, ArchiveFormat::TarGz).unwrap();
        assert!(!escape.exists());
    }

    #[cfg(unix)]
    #[test]
    fn ensure_executable_adds_missing_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("func");
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        ensure_executable(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
    }

    #[cfg(unix)]
    #[test]
    fn ensure_executable_keeps_existing_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("func");
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o700)).unwrap();

        ensure_executable(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
