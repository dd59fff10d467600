//! Minimal office packages for tests.

use std::io::{Cursor, Write};

use zip::result::ZipResult;
use zip::write::FileOptions;

/// Zip archive holding one small XML part per entry name.
pub fn office_package(entries: &[&str]) -> ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    for entry in entries {
        writer.start_file(*entry, options)?;
        writer.write_all(b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_lists_entries() {
        let bytes = office_package(&["[Content_Types].xml", "xl/workbook.xml"]).unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.by_name("xl/workbook.xml").is_ok());
    }
}
