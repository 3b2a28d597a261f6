use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::archive;
use crate::model::{
    is_lang_file_name, sort_and_dedupe_case_insensitive, ScanResult, SourceKind,
    ARCHIVE_UNIT_EXTENSION, ASSETS_DIR_NAME, BACKUP_DIR_NAME, EXTRACTED_DIR_NAME, LANG_DIR_NAME,
};

/// Folders under the target directory written by the tool itself.
const RESERVED_UNIT_NAMES: &[&str] = &[BACKUP_DIR_NAME, EXTRACTED_DIR_NAME];

#[derive(Debug, Clone)]
struct UnitRef {
    path: PathBuf,
    kind: SourceKind,
}

/// Classifies every mod unit directly under `target_dir`.
///
/// `should_stop` is consulted with each unit's path before that unit is
/// processed; returning `true` ends the scan and the units collected so far
/// are returned. A missing or empty target yields no results.
pub fn scan<F>(target_dir: &Path, include_archive_units: bool, mut should_stop: F) -> Vec<ScanResult>
where
    F: FnMut(&Path) -> bool,
{
    if target_dir.as_os_str().is_empty() || !target_dir.is_dir() {
        return Vec::new();
    }

    let units = collect_units(target_dir, include_archive_units);
    info!(
        "scan start: {} ({} unit(s), archives {})",
        target_dir.display(),
        units.len(),
        if include_archive_units { "on" } else { "off" }
    );

    let mut results = Vec::with_capacity(units.len());
    for unit in units {
        if should_stop(&unit.path) {
            warn!(
                "scan stopped before {}; returning {} result(s)",
                unit.path.display(),
                results.len()
            );
            break;
        }

        let result = match unit.kind {
            SourceKind::Folder => scan_folder_unit(&unit.path),
            SourceKind::Archive => scan_archive_unit(&unit.path),
        };
        debug!(
            "classified {} ({:?}): assets={} candidates={}",
            result.unit_name,
            result.source_kind,
            result.has_assets_root,
            result.lang_candidates.len()
        );
        results.push(result);
    }

    info!("scan done: {} unit(s)", results.len());
    results
}

fn collect_units(target_dir: &Path, include_archive_units: bool) -> Vec<UnitRef> {
    let read_dir = match fs::read_dir(target_dir) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            warn!("cannot list {}: {}", target_dir.display(), err);
            return Vec::new();
        }
    };

    let mut units = Vec::new();
    for entry in read_dir.filter_map(Result::ok) {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if path.is_dir() {
            if RESERVED_UNIT_NAMES
                .iter()
                .any(|reserved| name.eq_ignore_ascii_case(reserved))
            {
                continue;
            }
            units.push(UnitRef {
                path,
                kind: SourceKind::Folder,
            });
        } else if include_archive_units && path.is_file() && is_archive_unit_name(&name) {
            units.push(UnitRef {
                path,
                kind: SourceKind::Archive,
            });
        }
    }

    units.sort_by_cached_key(|unit| unit.path.to_string_lossy().to_lowercase());
    units
}

fn is_archive_unit_name(name: &str) -> bool {
    name.to_ascii_lowercase()
        .ends_with(&format!(".{ARCHIVE_UNIT_EXTENSION}"))
}

fn scan_folder_unit(unit_path: &Path) -> ScanResult {
    let assets_dir = find_child_dir(unit_path, ASSETS_DIR_NAME);

    let mut candidates = assets_dir
        .as_deref()
        .map(assets_lang_dirs)
        .unwrap_or_default();
    candidates.extend(loose_lang_dirs(unit_path, assets_dir.as_deref()));

    ScanResult {
        source_kind: SourceKind::Folder,
        unit_name: file_name_of(unit_path),
        unit_path: unit_path.to_path_buf(),
        has_assets_root: assets_dir.is_some(),
        lang_candidates: sort_and_dedupe_case_insensitive(candidates),
    }
}

fn scan_archive_unit(unit_path: &Path) -> ScanResult {
    let (has_assets_root, lang_candidates) = match archive::list_entries(unit_path) {
        Ok(entries) => (
            archive::has_assets_root(&entries),
            archive::lang_candidates(&entries),
        ),
        Err(err) => {
            warn!("archive unreadable, treating as empty: {}", err);
            (false, Vec::new())
        }
    };

    ScanResult {
        source_kind: SourceKind::Archive,
        unit_name: file_name_of(unit_path),
        unit_path: unit_path.to_path_buf(),
        has_assets_root,
        lang_candidates,
    }
}

/// `assets/<id>/lang` directories, nothing shallower or deeper.
fn assets_lang_dirs(assets_dir: &Path) -> Vec<String> {
    WalkDir::new(assets_dir)
        .min_depth(2)
        .max_depth(2)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir() && is_named(entry, LANG_DIR_NAME))
        .map(|entry| entry.path().to_string_lossy().to_string())
        .collect()
}

/// `lang` directories outside `assets` that actually hold localization files.
/// The unit's own destination folder is never descended into, and neither is
/// an accepted candidate, so candidates never nest.
fn loose_lang_dirs(unit_path: &Path, assets_dir: Option<&Path>) -> Vec<String> {
    let mut walker = WalkDir::new(unit_path)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 1 && entry.file_type().is_dir() && is_named(entry, LANG_DIR_NAME)
            {
                return false;
            }
            assets_dir.map_or(true, |assets| entry.path() != assets)
        });

    let mut found = Vec::new();
    while let Some(entry) = walker.next() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.file_type().is_dir()
            && is_named(&entry, LANG_DIR_NAME)
            && contains_lang_file(entry.path())
        {
            found.push(entry.path().to_string_lossy().to_string());
            walker.skip_current_dir();
        }
    }
    found
}

fn contains_lang_file(dir: &Path) -> bool {
    WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| {
            entry.file_type().is_file() && is_lang_file_name(&entry.file_name().to_string_lossy())
        })
}

fn find_child_dir(parent: &Path, name: &str) -> Option<PathBuf> {
    let exact = parent.join(name);
    if exact.is_dir() {
        return Some(exact);
    }
    fs::read_dir(parent)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_name().to_string_lossy().eq_ignore_ascii_case(name)
                && entry.path().is_dir()
        })
        .map(|entry| entry.path())
}

fn is_named(entry: &DirEntry, name: &str) -> bool {
    entry.file_name().to_string_lossy().eq_ignore_ascii_case(name)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    use super::scan;
    use crate::model::SourceKind;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "{}").expect("write");
    }

    fn write_zip(path: &Path, entries: &[&str]) {
        let file = fs::File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        for name in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start file");
            writer.write_all(b"{}").expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    fn as_string(path: PathBuf) -> String {
        path.to_string_lossy().to_string()
    }

    #[test]
    fn missing_or_empty_target_yields_nothing() {
        assert!(scan(Path::new(""), true, |_| false).is_empty());
        assert!(scan(Path::new("/definitely/not/here"), true, |_| false).is_empty());
    }

    #[test]
    fn assets_candidates_are_shape_exact() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("ModA");
        touch(&unit.join("assets/moda/lang/en_us.json"));
        touch(&unit.join("assets/a/b/lang/deep.json"));
        touch(&unit.join("assets/lang/shallow.json"));
        fs::create_dir_all(unit.join("assets/empty/lang")).expect("mkdir");

        let results = scan(dir.path(), false, |_| false);
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.has_assets_root);
        assert_eq!(
            result.lang_candidates,
            vec![
                as_string(unit.join("assets/empty/lang")),
                as_string(unit.join("assets/moda/lang")),
            ]
        );
    }

    #[test]
    fn destination_folder_is_never_a_candidate() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("Done");
        touch(&unit.join("lang/en_us.json"));
        touch(&unit.join("lang/nested/lang/ja_jp.json"));

        let results = scan(dir.path(), false, |_| false);
        assert_eq!(results.len(), 1);
        assert!(!results[0].has_assets_root);
        assert!(results[0].lang_candidates.is_empty());
    }

    #[test]
    fn loose_lang_dirs_need_localization_files() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("Loose");
        touch(&unit.join("resources/lang/en_us.lang"));
        touch(&unit.join("docs/lang/readme.txt"));
        touch(&unit.join("src/lang/sub/zh_cn.json"));

        let results = scan(dir.path(), false, |_| false);
        assert_eq!(
            results[0].lang_candidates,
            vec![
                as_string(unit.join("resources/lang")),
                as_string(unit.join("src/lang")),
            ]
        );
    }

    #[test]
    fn nested_loose_lang_dir_is_not_a_second_candidate() {
        let dir = tempdir().expect("tempdir");
        let unit = dir.path().join("U");
        touch(&unit.join("src/lang/en_us.json"));
        touch(&unit.join("src/lang/x/lang/ja_jp.json"));

        let results = scan(dir.path(), false, |_| false);
        assert_eq!(results[0].lang_candidates, vec![as_string(unit.join("src/lang"))]);
    }

    #[test]
    fn archive_units_interleave_with_folders_by_path() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("alpha")).expect("mkdir");
        fs::create_dir_all(dir.path().join("Charlie")).expect("mkdir");
        write_zip(
            &dir.path().join("Bravo.jar"),
            &["assets/modb/lang/en_us.json", "assets/modb/lang/sub/extra.json"],
        );
        fs::write(dir.path().join("notes.txt"), "ignored").expect("write");

        let results = scan(dir.path(), true, |_| false);
        let names = results
            .iter()
            .map(|result| result.unit_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha", "Bravo.jar", "Charlie"]);

        let archive = &results[1];
        assert_eq!(archive.source_kind, SourceKind::Archive);
        assert!(archive.has_assets_root);
        assert_eq!(archive.lang_candidates, vec!["assets/modb/lang".to_string()]);

        let without_archives = scan(dir.path(), false, |_| false);
        assert_eq!(without_archives.len(), 2);
    }

    #[test]
    fn unreadable_archive_is_reported_empty() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("broken.jar"), "not a zip").expect("write");

        let results = scan(dir.path(), true, |_| false);
        assert_eq!(results.len(), 1);
        assert!(!results[0].has_assets_root);
        assert!(results[0].lang_candidates.is_empty());
    }

    #[test]
    fn reserved_output_folders_are_skipped() {
        let dir = tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("_backup/20260101_000000")).expect("mkdir");
        fs::create_dir_all(dir.path().join("_extracted/mod/lang")).expect("mkdir");
        fs::create_dir_all(dir.path().join("RealMod")).expect("mkdir");

        let results = scan(dir.path(), false, |_| false);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].unit_name, "RealMod");
    }

    #[test]
    fn stop_predicate_returns_units_processed_before_it() {
        let dir = tempdir().expect("tempdir");
        for name in ["a", "b", "c", "d"] {
            fs::create_dir_all(dir.path().join(name)).expect("mkdir");
        }

        let results = scan(dir.path(), false, |path| path.ends_with("c"));
        let names = results
            .iter()
            .map(|result| result.unit_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b"]);
    }
}
