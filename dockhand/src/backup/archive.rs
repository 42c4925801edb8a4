//! Tar archive creation and extraction

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::errors::DockhandError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Archive compression detected from the leading bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Gzip,
    Tar,
}

/// Sniff whether `path` is gzip-compressed
pub fn detect_format(path: &Path) -> Result<ArchiveFormat, DockhandError> {
    let mut file = fs::File::open(path)?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    if read == 2 && magic == GZIP_MAGIC {
        Ok(ArchiveFormat::Gzip)
    } else {
        Ok(ArchiveFormat::Tar)
    }
}

fn create_blocking(source: &Path, dest: &Path) -> Result<(), DockhandError> {
    let file = fs::File::create(dest)?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn extract_blocking(archive: &Path, dest: &Path) -> Result<(), DockhandError> {
    let format = detect_format(archive)?;
    let file = fs::File::open(archive)?;
    fs::create_dir_all(dest)?;
    match format {
        ArchiveFormat::Gzip => Archive::new(GzDecoder::new(file)).unpack(dest)?,
        ArchiveFormat::Tar => Archive::new(file).unpack(dest)?,
    }
    Ok(())
}

async fn blocking<F>(op: &'static str, f: F) -> Result<(), DockhandError>
where
    F: FnOnce() -> Result<(), DockhandError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DockhandError::Internal(format!("{} task failed: {}", op, e)))?
}

/// Write the contents of `source` as a gzip-compressed tar at `dest`
pub async fn create_tar_gz(source: &Path, dest: &Path) -> Result<(), DockhandError> {
    let (source, dest): (PathBuf, PathBuf) = (source.into(), dest.into());
    blocking("archive", move || {
        create_blocking(&source, &dest).map_err(|e| {
            DockhandError::ExecutionError(format!(
                "Failed to archive {}: {}",
                source.display(),
                e
            ))
        })
    })
    .await
}

/// Extract a gzip-compressed or plain tar into `dest`
pub async fn extract(archive: &Path, dest: &Path) -> Result<(), DockhandError> {
    let (archive, dest): (PathBuf, PathBuf) = (archive.into(), dest.into());
    blocking("extract", move || {
        extract_blocking(&archive, &dest).map_err(|e| {
            DockhandError::ExecutionError(format!(
                "Failed to extract {}: {}",
                archive.display(),
                e
            ))
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(root: &Path) {
        fs::create_dir_all(root.join("app/sub")).unwrap();
        fs::write(root.join("app/a.txt"), b"alpha").unwrap();
        fs::write(root.join("app/sub/b.bin"), [0u8, 1, 2, 255]).unwrap();
    }

    #[tokio::test]
    async fn test_gzip_archive_extracts() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        tree(&src);
        let archive = tmp.path().join("out.tar.gz");

        create_tar_gz(&src, &archive).await.unwrap();
        assert_eq!(detect_format(&archive).unwrap(), ArchiveFormat::Gzip);

        let dest = tmp.path().join("dest");
        extract(&archive, &dest).await.unwrap();
        assert_eq!(fs::read(dest.join("app/a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("app/sub/b.bin")).unwrap(), [0u8, 1, 2, 255]);
    }

    #[tokio::test]
    async fn test_plain_tar_extracts() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        tree(&src);

        let archive = tmp.path().join("out.tar");
        {
            let mut builder = Builder::new(fs::File::create(&archive).unwrap());
            builder.append_dir_all(".", &src).unwrap();
            builder.finish().unwrap();
        }
        assert_eq!(detect_format(&archive).unwrap(), ArchiveFormat::Tar);

        let dest = tmp.path().join("dest");
        extract(&archive, &dest).await.unwrap();
        assert_eq!(fs::read(dest.join("app/a.txt")).unwrap(), b"alpha");
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("bad.tar.gz");
        fs::write(&archive, [0x1f, 0x8b, 0, 0, 1, 2, 3]).unwrap();
        let err = extract(&archive, &tmp.path().join("dest")).await.unwrap_err();
        assert!(matches!(err, DockhandError::ExecutionError(_)));
    }
}
