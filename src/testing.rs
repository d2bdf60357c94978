//! Fixtures shared by unit tests.

use crate::package::{DownloadRef, LanguagePackage, PackageVersion, METADATA_FILE};
use sha2::{Digest, Sha256};
use std::io::Write;

/// Zip archive holding a package directory with metadata and a one-entry
/// lexicon (`hello` -> `hola`).
pub fn package_archive(from: &str, to: &str, version: &str) -> Vec<u8> {
    package_archive_with_lexicon(from, to, version, "hello\thola\n")
}

pub fn package_archive_with_lexicon(from: &str, to: &str, version: &str, lexicon: &str) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::FileOptions::default();
        let dir = format!("translate-{}_{}", from, to);

        writer
            .start_file(format!("{}/{}", dir, METADATA_FILE), options)
            .unwrap();
        writer
            .write_all(
                format!(
                    r#"{{"from_code":"{}","to_code":"{}","package_version":"{}"}}"#,
                    from, to, version
                )
                .as_bytes(),
            )
            .unwrap();
        writer
            .start_file(format!("{}/lexicon.tsv", dir), options)
            .unwrap();
        writer.write_all(lexicon.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn catalog_package(
    from: &str,
    to: &str,
    version: &str,
    url: String,
    sha256: Option<String>,
    size: Option<u64>,
) -> LanguagePackage {
    LanguagePackage {
        from_code: from.into(),
        to_code: to.into(),
        from_name: from.to_string(),
        to_name: to.to_string(),
        version: PackageVersion::new(version),
        download: Some(DownloadRef { url, sha256, size }),
    }
}
