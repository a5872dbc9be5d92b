//! ZIP packaging of the finished tree into an `.epub`.
//!
//! The EPUB container rules are load-bearing: `mimetype` must be the first
//! entry and must be stored without compression, or readers reject the file.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::EpubError;
use super::package::MIMETYPE;

/// Packages a book working tree into `epub_path`.
///
/// Entry order: `mimetype` (stored), `META-INF/container.xml`, then the
/// whole `OEBPS/` tree (deflated). Any `.epub` files already sitting in the
/// tree (from earlier variants) are excluded.
///
/// # Errors
///
/// Returns [`EpubError::Packaging`] on any archive-level failure and
/// [`EpubError::Io`] when the tree cannot be walked.
#[instrument(level = "debug", skip_all, fields(path = %epub_path.display()))]
pub fn package_tree(book_dir: &Path, epub_path: &Path) -> Result<(), EpubError> {
    let file = std::fs::File::create(epub_path)
        .map_err(|source| EpubError::io(epub_path, source))?;
    let mut archive = ZipWriter::new(file);

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let pack_err = |detail: String| EpubError::Packaging {
        path: epub_path.to_path_buf(),
        detail,
    };

    // EPUB requirement: mimetype first, stored.
    archive
        .start_file("mimetype", stored)
        .map_err(|e| pack_err(e.to_string()))?;
    archive
        .write_all(MIMETYPE.as_bytes())
        .map_err(|e| pack_err(e.to_string()))?;

    let container = book_dir.join("META-INF/container.xml");
    add_file(&mut archive, &container, "META-INF/container.xml", deflated, epub_path)?;

    let oebps = book_dir.join("OEBPS");
    let mut entries = Vec::new();
    collect_files(&oebps, &mut entries)?;
    entries.sort();

    for entry in entries {
        let relative = entry
            .strip_prefix(book_dir)
            .map_err(|e| pack_err(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if name.ends_with(".epub") {
            continue;
        }
        add_file(&mut archive, &entry, &name, deflated, epub_path)?;
    }

    archive.finish().map_err(|e| pack_err(e.to_string()))?;
    debug!("epub packaged");
    Ok(())
}

fn add_file(
    archive: &mut ZipWriter<std::fs::File>,
    source: &Path,
    name: &str,
    options: SimpleFileOptions,
    epub_path: &Path,
) -> Result<(), EpubError> {
    let bytes = std::fs::read(source).map_err(|source_err| EpubError::io(source, source_err))?;
    archive
        .start_file(name, options)
        .and_then(|()| archive.write_all(&bytes).map_err(Into::into))
        .map_err(|e| EpubError::Packaging {
            path: epub_path.to_path_buf(),
            detail: e.to_string(),
        })
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EpubError> {
    for entry in std::fs::read_dir(dir).map_err(|source| EpubError::io(dir, source))? {
        let entry = entry.map_err(|source| EpubError::io(dir, source))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn build_tree(dir: &Path) {
        std::fs::create_dir_all(dir.join("META-INF")).unwrap();
        std::fs::create_dir_all(dir.join("OEBPS/Images")).unwrap();
        std::fs::create_dir_all(dir.join("OEBPS/Styles")).unwrap();
        std::fs::write(
            dir.join("META-INF/container.xml"),
            super::super::package::CONTAINER_XML,
        )
        .unwrap();
        std::fs::write(dir.join("OEBPS/content.opf"), "<package/>").unwrap();
        std::fs::write(dir.join("OEBPS/ch01.xhtml"), "<html/>").unwrap();
        std::fs::write(dir.join("OEBPS/Images/x.png"), b"png").unwrap();
        std::fs::write(dir.join("OEBPS/Styles/Style00.css"), "p{}").unwrap();
    }

    #[test]
    fn test_mimetype_is_first_and_stored() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());
        let epub = dir.path().join("book.epub");

        package_tree(dir.path(), &epub).unwrap();

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&epub).unwrap()).unwrap();
        let first = zip.by_index(0).unwrap();
        assert_eq!(first.name(), "mimetype");
        assert_eq!(first.compression(), CompressionMethod::Stored);
        drop(first);

        let mut mimetype = String::new();
        zip.by_name("mimetype")
            .unwrap()
            .read_to_string(&mut mimetype)
            .unwrap();
        assert_eq!(mimetype, "application/epub+zip");
    }

    #[test]
    fn test_archive_contains_whole_tree() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());
        let epub = dir.path().join("book.epub");

        package_tree(dir.path(), &epub).unwrap();

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&epub).unwrap()).unwrap();
        for name in [
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/ch01.xhtml",
            "OEBPS/Images/x.png",
            "OEBPS/Styles/Style00.css",
        ] {
            assert!(zip.by_name(name).is_ok(), "missing {name}");
        }
    }

    #[test]
    fn test_existing_epub_in_tree_excluded() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());
        // A previous variant's output inside OEBPS should never be nested
        std::fs::write(dir.path().join("OEBPS/old.epub"), b"old").unwrap();
        let epub = dir.path().join("book.epub");

        package_tree(dir.path(), &epub).unwrap();

        let mut zip = zip::ZipArchive::new(std::fs::File::open(&epub).unwrap()).unwrap();
        assert!(zip.by_name("OEBPS/old.epub").is_err());
    }

    #[test]
    fn test_missing_container_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("OEBPS")).unwrap();
        let epub = dir.path().join("book.epub");
        let result = package_tree(dir.path(), &epub);
        assert!(result.is_err());
    }
}
