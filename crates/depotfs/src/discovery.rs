//! Archive discovery under a game installation
//!
//! The game executable lives three levels below the installation root
//! (`<root>/bin/x64/game.exe`). Archives sit flat in
//! `<root>/archive/pc/content`.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Archive file extension
pub const ARCHIVE_EXTENSION: &str = "archive";

/// File name prefix of language-pack archives
pub const LANGUAGE_PREFIX: &str = "lang_";

/// Content directory, relative to the installation root
pub const CONTENT_SUBPATH: [&str; 3] = ["archive", "pc", "content"];

/// Installation root for a game executable, three levels up
pub fn game_root_from_executable(executable: &Path) -> Option<PathBuf> {
    executable
        .parent()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .map(Path::to_path_buf)
}

/// Content directory below an installation root
pub fn content_dir(game_root: &Path) -> PathBuf {
    CONTENT_SUBPATH
        .iter()
        .fold(game_root.to_path_buf(), |path, part| path.join(part))
}

/// Whether an archive with this file name should be loaded
///
/// The extension is compared case-insensitively. Language packs are admitted
/// only for the configured language; everything else is always admitted.
pub fn is_admitted(file_name: &str, language: &str) -> bool {
    is_archive(file_name) && !is_foreign_language(file_name, language)
}

fn is_archive(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

fn is_foreign_language(file_name: &str, language: &str) -> bool {
    file_name
        .strip_prefix(LANGUAGE_PREFIX)
        .is_some_and(|rest| !rest.starts_with(language))
}

/// Result of scanning a content directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveScan {
    /// Archives to load, sorted by file name
    pub admitted: Vec<PathBuf>,
    /// Language packs skipped for another language
    pub skipped_language: Vec<PathBuf>,
}

/// Scan a content directory for archives (non-recursive)
///
/// # Errors
///
/// Returns error if the directory cannot be read
pub fn scan_archives(dir: &Path, language: &str) -> io::Result<ArchiveScan> {
    let mut scan = ArchiveScan::default();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            debug!("Ignoring non-UTF-8 file name {:?}", entry.path());
            continue;
        };

        if !is_archive(file_name) {
            continue;
        }

        if is_foreign_language(file_name, language) {
            debug!("Skipping language pack {}", file_name);
            scan.skipped_language.push(entry.path());
        } else {
            scan.admitted.push(entry.path());
        }
    }

    scan.admitted.sort();
    scan.skipped_language.sort();
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_game_root_from_executable() {
        let exe = Path::new("/games/depot/bin/x64/game.exe");
        assert_eq!(
            game_root_from_executable(exe),
            Some(PathBuf::from("/games/depot"))
        );
        assert_eq!(game_root_from_executable(Path::new("game.exe")), None);
    }

    #[test]
    fn test_content_dir() {
        assert_eq!(
            content_dir(Path::new("/games/depot")),
            PathBuf::from("/games/depot/archive/pc/content")
        );
    }

    #[test]
    fn test_language_filter() {
        assert!(is_admitted("basegame_1_engine.archive", "en"));
        assert!(is_admitted("lang_en_voice.archive", "en"));
        assert!(!is_admitted("lang_fr_voice.archive", "en"));
        assert!(is_admitted("lang_fr_voice.archive", "fr"));
        assert!(is_admitted("BASEGAME.ARCHIVE", "en"));
        assert!(!is_admitted("basegame.archive.bak", "en"));
        assert!(!is_admitted("readme.txt", "en"));
    }

    #[test]
    fn test_scan_archives() {
        let dir = TempDir::new().unwrap();
        for name in [
            "patch.archive",
            "basegame.archive",
            "lang_en_voice.archive",
            "lang_fr_voice.archive",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.archive")).unwrap();

        let scan = scan_archives(dir.path(), "en").unwrap();

        let admitted: Vec<_> = scan
            .admitted
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(
            admitted,
            vec!["basegame.archive", "lang_en_voice.archive", "patch.archive"]
        );
        assert_eq!(
            scan.skipped_language,
            vec![dir.path().join("lang_fr_voice.archive")]
        );
    }

    #[test]
    fn test_scan_missing_dir() {
        let dir = TempDir::new().unwrap();
        assert!(scan_archives(&dir.path().join("missing"), "en").is_err());
    }
}
