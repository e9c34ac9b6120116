//! Per-file zip archives, optionally encrypted.
//!
//! Every changed source file gets its own archive mirroring the source tree:
//! `root/a/b.txt` becomes `dest/a/b.txt.zip` holding one entry named `b.txt`.

pub mod algorithm;
pub mod writer;

pub use algorithm::EncryptionAlgorithm;
pub use writer::{archive_file, archive_path, entry_name, ARCHIVE_EXT};
