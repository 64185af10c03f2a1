//! Expanding backup archives
//!
//! A backup archive is a tar stream, gzip-compressed or plain. Only its `.xml`
//! members are extracted, into a sibling `<archive>-xml` directory. A later run
//! reuses that directory instead of expanding again.

use crate::error::{MeltError, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::info;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// `backup.mbz` → `backup-xml`
pub fn xml_dir_for(archive: &Path) -> PathBuf {
    sibling(archive, "-xml")
}

/// `backup.mbz` → `backup-out`
pub fn output_dir_for(archive: &Path) -> PathBuf {
    sibling(archive, "-out")
}

fn sibling(archive: &Path, suffix: &str) -> PathBuf {
    let mut name = archive
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "archive".into());
    name.push(suffix);
    archive.with_file_name(name)
}

fn has_xml_files(dir: &Path) -> Result<bool> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "xml") {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Make the XML members of `archive` available under `dest`
///
/// With `reuse_existing`, a `dest` that already holds top-level XML files is
/// used as is. Any other existing `dest` is left untouched and reported as an
/// error. Returns the number of files extracted.
pub fn expand(archive: &Path, dest: &Path, reuse_existing: bool) -> Result<usize> {
    if dest.exists() {
        if reuse_existing && has_xml_files(dest)? {
            info!(dir = %dest.display(), "Reusing expanded XML files");
            return Ok(0);
        }
        return Err(MeltError::archive(
            archive,
            format!("{} already exists and will not be overwritten", dest.display()),
        ));
    }

    info!(archive = %archive.display(), dir = %dest.display(), "Expanding archive");
    let count = extract_xml_members(archive, dest)?;
    info!(files = count, "XML files extracted");
    Ok(count)
}

/// Extract every `.xml` member of a tar or tar.gz archive into `dest`
pub fn extract_xml_members(archive: &Path, dest: &Path) -> Result<usize> {
    let mut file = File::open(archive)?;
    let mut magic = [0u8; 2];
    let compressed = file.read(&mut magic)? == magic.len() && magic == GZIP_MAGIC;
    file.seek(SeekFrom::Start(0))?;
    let reader = BufReader::new(file);

    std::fs::create_dir_all(dest)?;
    if compressed {
        unpack_xml(Archive::new(GzDecoder::new(reader)), archive, dest)
    } else {
        unpack_xml(Archive::new(reader), archive, dest)
    }
}

fn unpack_xml<R: Read>(mut tar: Archive<R>, archive: &Path, dest: &Path) -> Result<usize> {
    let tar_err = |e: std::io::Error| MeltError::archive(archive, e);
    let mut count = 0;
    for entry in tar.entries().map_err(tar_err)? {
        let mut entry = entry.map_err(tar_err)?;
        let is_xml = entry.header().entry_type().is_file()
            && entry
                .path()
                .map_err(tar_err)?
                .extension()
                .is_some_and(|e| e == "xml");
        // unpack_in refuses members that would land outside dest
        if is_xml && entry.unpack_in(dest).map_err(tar_err)? {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn append(builder: &mut tar::Builder<impl std::io::Write>, name: &str, body: &str) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }

    fn backup(dir: &Path, gzip: bool) -> PathBuf {
        let path = dir.join("backup.mbz");
        let file = File::create(&path).unwrap();
        let members = [
            ("moodle_backup.xml", "<moodle_backup/>"),
            ("users.xml", "<users/>"),
            ("files/ab/abcdef", "binary"),
            ("activities/forum_1/forum.xml", "<activity/>"),
        ];
        if gzip {
            let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
            for (name, body) in members {
                append(&mut builder, name, body);
            }
            builder.into_inner().unwrap().finish().unwrap();
        } else {
            let mut builder = tar::Builder::new(file);
            for (name, body) in members {
                append(&mut builder, name, body);
            }
            builder.finish().unwrap();
        }
        path
    }

    #[test]
    fn test_sibling_directories() {
        let archive = Path::new("/data/backup-course-1.mbz");
        assert_eq!(xml_dir_for(archive), PathBuf::from("/data/backup-course-1-xml"));
        assert_eq!(output_dir_for(archive), PathBuf::from("/data/backup-course-1-out"));
    }

    #[test]
    fn test_gzip_archive_extracts_only_xml() {
        let dir = TempDir::new().unwrap();
        let archive = backup(dir.path(), true);
        let dest = xml_dir_for(&archive);

        assert_eq!(expand(&archive, &dest, true).unwrap(), 3);
        assert!(dest.join("users.xml").is_file());
        assert!(dest.join("activities/forum_1/forum.xml").is_file());
        assert!(!dest.join("files").exists());
    }

    #[test]
    fn test_plain_tar_is_accepted() {
        let dir = TempDir::new().unwrap();
        let archive = backup(dir.path(), false);
        assert_eq!(extract_xml_members(&archive, &dir.path().join("x")).unwrap(), 3);
    }

    #[test]
    fn test_existing_expansion_is_reused() {
        let dir = TempDir::new().unwrap();
        let archive = backup(dir.path(), true);
        let dest = xml_dir_for(&archive);
        expand(&archive, &dest, true).unwrap();
        std::fs::write(dest.join("users.xml"), "<users><user id=\"1\"/></users>").unwrap();

        assert_eq!(expand(&archive, &dest, true).unwrap(), 0);
        let kept = std::fs::read_to_string(dest.join("users.xml")).unwrap();
        assert!(kept.contains("user id"));
    }

    #[test]
    fn test_existing_directory_is_not_overwritten() {
        let dir = TempDir::new().unwrap();
        let archive = backup(dir.path(), true);
        let dest = xml_dir_for(&archive);
        std::fs::create_dir(&dest).unwrap();

        let err = expand(&archive, &dest, true).unwrap_err();
        assert!(matches!(err, MeltError::Archive { .. }));

        expand(&archive, &dir.path().join("fresh"), false).unwrap();
        assert!(expand(&archive, &dir.path().join("fresh"), false).is_err());
    }
}
