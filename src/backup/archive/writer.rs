use crate::backup::archive::algorithm::EncryptionAlgorithm;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, IntoInnerError};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use zip::unstable::write::FileOptionsExt;
use zip::write::{FileOptions, SimpleFileOptions};
use zip::{AesMode, CompressionMethod, DateTime, ZipWriter};

pub static ARCHIVE_EXT: &str = "zip";
static TMP_EXT: &str = "tmp";

fn with_ext(base: &Path, ext: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(".");
    path.push(ext);
    path.into()
}

/// `dest/a/b.txt` -> `dest/a/b.txt.zip`
pub fn archive_path<P: AsRef<Path>>(destination_base: P) -> PathBuf {
    with_ext(destination_base.as_ref(), ARCHIVE_EXT)
}

fn tmp_archive_path(destination_base: &Path) -> PathBuf {
    with_ext(&archive_path(destination_base), TMP_EXT)
}

/// Name of the single entry: the base name of the file, never its relative path.
pub fn entry_name<P: AsRef<Path>>(destination_base: P) -> Result<String> {
    destination_base
        .as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            Error::Configuration(format!(
                "{:?} has no file name to use as archive entry",
                destination_base.as_ref()
            ))
        })
}

/// Zip timestamps are local wall-clock time and cannot predate 1980.
fn entry_mtime(modified: SystemTime) -> Option<DateTime> {
    let local = chrono::DateTime::<chrono::Local>::from(modified).naive_local();
    DateTime::try_from(local).ok()
}

fn entry_options(
    algorithm: EncryptionAlgorithm,
    password: &RedactedString,
    large_file: bool,
    modified: Option<DateTime>,
) -> FileOptions<'_, ()> {
    let mut base = SimpleFileOptions::default().large_file(large_file);
    if let Some(modified) = modified {
        base = base.last_modified_time(modified);
    }

    let stored = base.compression_method(CompressionMethod::Stored);
    if !algorithm.encrypts_with(password) {
        return stored;
    }

    let deflated = base.compression_method(CompressionMethod::Deflated);
    match algorithm {
        EncryptionAlgorithm::None => stored,
        EncryptionAlgorithm::ZipStandard => {
            deflated.with_deprecated_encryption(password.as_bytes())
        }
        EncryptionAlgorithm::Aes256 => {
            deflated.with_aes_encryption(AesMode::Aes256, password.as_str())
        }
    }
}

/// Archives one source file into `<destination_base>.zip`.
///
/// The archive is streamed into a sibling `.zip.tmp` file and renamed into
/// place once complete. Any failure removes the temporary file and leaves a
/// previous archive untouched. Errors come back as [`Error::Archive`] carrying
/// the source path; they are not fatal to the run.
pub fn archive_file<P1: AsRef<Path>, P2: AsRef<Path>>(
    algorithm: EncryptionAlgorithm,
    source: P1,
    destination_base: P2,
    password: &RedactedString,
) -> Result<PathBuf> {
    let source = source.as_ref();
    write_archive(algorithm, source, destination_base.as_ref(), password)
        .map_err(|e| Error::archive(source, e))
}

fn write_archive(
    algorithm: EncryptionAlgorithm,
    source: &Path,
    destination_base: &Path,
    password: &RedactedString,
) -> Result<PathBuf> {
    if let Some(parent) = destination_base.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let source_file = File::open(source)?;
    let metadata = source_file.metadata()?;
    let large_file = metadata.len() >= u32::MAX as u64;
    let modified = metadata.modified().ok().and_then(entry_mtime);
    let mut reader = BufReader::new(source_file);
    let name = entry_name(destination_base)?;
    let final_path = archive_path(destination_base);
    let tmp_path = tmp_archive_path(destination_base);

    let res = (|| -> Result<()> {
        let mut writer = ZipWriter::new(BufWriter::new(File::create(&tmp_path)?));
        writer.start_file(name, entry_options(algorithm, password, large_file, modified))?;
        std::io::copy(&mut reader, &mut writer)?;
        writer
            .finish()?
            .into_inner()
            .map_err(IntoInnerError::into_error)?
            .sync_all()?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    })();

    match res {
        Ok(()) => {
            tracing::trace!("Wrote archive {:?}", final_path);
            Ok(final_path)
        }
        Err(mut e) => {
            if let Err(e2) = std::fs::remove_file(&tmp_path) {
                if e2.kind() != std::io::ErrorKind::NotFound {
                    e = e.chain(e2.into());
                }
            }
            Err(e)
        }
    }
}
