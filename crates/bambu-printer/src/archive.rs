//! Print-job packaging for plain G-code files.
//!
//! The printer only starts `.3mf` projects. A bare G-code file is wrapped
//! into a zip whose single entry sits at the plate location the start
//! command will point at.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{BambuError, Result};

/// Package the G-code at `gcode` into a temporary archive with one entry
/// at `plate_location`.
///
/// The archive is deleted when the returned handle is dropped.
pub fn package_gcode(gcode: &Path, plate_location: &str) -> Result<NamedTempFile> {
    let mut input = File::open(gcode)?;
    let archive = tempfile::Builder::new()
        .prefix("bambu-")
        .suffix(".3mf")
        .tempfile()?;

    let mut zip = ZipWriter::new(archive.as_file());
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(6));

    let entry = plate_location.replace('\\', "/");
    zip.start_file(entry.as_str(), options)
        .map_err(|e| BambuError::Archive(e.to_string()))?;
    let copied = io::copy(&mut input, &mut zip)?;
    let mut file = zip.finish().map_err(|e| BambuError::Archive(e.to_string()))?;
    file.flush()?;

    tracing::debug!(entry = %entry, bytes = copied, "packaged gcode");
    Ok(archive)
}

/// Remote name for an upload when none is given.
///
/// `x.3mf` is kept, `x.gcode` becomes `x.3mf`, anything else gets `.3mf`
/// appended.
pub fn remote_name_for(local: &Path) -> String {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if has_extension(&name, ".3mf") {
        name
    } else if has_extension(&name, ".gcode") {
        format!("{}.3mf", &name[..name.len() - ".gcode".len()])
    } else {
        format!("{name}.3mf")
    }
}

/// Whether `path` should be packaged before upload.
pub fn needs_packaging(path: &Path) -> bool {
    !path
        .file_name()
        .map(|n| has_extension(&n.to_string_lossy(), ".3mf"))
        .unwrap_or(false)
}

/// Case-insensitive suffix check, `ext` including the dot.
pub fn has_extension(name: &str, ext: &str) -> bool {
    name.len() >= ext.len()
        && name
            .get(name.len() - ext.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_package_gcode_single_entry() {
        let mut gcode = NamedTempFile::new().unwrap();
        gcode.write_all(b"G28\nG1 X10 Y10\n").unwrap();

        let archive = package_gcode(gcode.path(), "Metadata/plate_1.gcode").unwrap();
        let mut zip = ZipArchive::new(File::open(archive.path()).unwrap()).unwrap();

        assert_eq!(zip.len(), 1);
        let mut entry = zip.by_index(0).unwrap();
        assert_eq!(entry.name(), "Metadata/plate_1.gcode");
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "G28\nG1 X10 Y10\n");
    }

    #[test]
    fn test_archive_removed_on_drop() {
        let gcode = NamedTempFile::new().unwrap();
        let archive = package_gcode(gcode.path(), "Metadata/plate_2.gcode").unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".3mf"));

        drop(archive);
        assert!(!path.exists());
    }

    #[test]
    fn test_package_missing_input() {
        let err = package_gcode(Path::new("/nonexistent/part.gcode"), "Metadata/plate_1.gcode")
            .unwrap_err();
        assert!(matches!(err, BambuError::IoError(_)));
    }

    #[test]
    fn test_remote_name_for() {
        assert_eq!(remote_name_for(Path::new("/tmp/benchy.3mf")), "benchy.3mf");
        assert_eq!(remote_name_for(Path::new("cube.gcode")), "cube.3mf");
        assert_eq!(remote_name_for(Path::new("dir/part.GCODE")), "part.3mf");
        assert_eq!(remote_name_for(Path::new("notes.txt")), "notes.txt.3mf");
    }

    #[test]
    fn test_needs_packaging() {
        assert!(needs_packaging(Path::new("cube.gcode")));
        assert!(!needs_packaging(Path::new("benchy.3MF")));
    }
}
