use std::fs::{self, File};
use std::path::{Component, Path, PathBuf};

use tracing::{info, warn};
use zip::ZipArchive;

use crate::app::adb::parse::is_valid_package_name;
use crate::app::error::AppError;
use crate::app::models::{InstallSequence, XapkManifest};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const BASE_SPLIT_ID: &str = "base";

/// Extracts an XAPK next to itself (`<dir>/<name>.xapk` -> `<dir>/<name>/`).
///
/// The archive is renamed to `.zip` for the duration of the extraction and
/// renamed back on every path out of this function. It is never deleted.
/// The target folder must not exist yet, so the returned folder always
/// belongs to this extraction and is safe to remove afterwards.
pub fn unpack_split_archive(archive: &Path, trace_id: &str) -> Result<PathBuf, AppError> {
    let archive = if archive.is_absolute() {
        archive.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|err| AppError::system(format!("Failed to resolve working dir: {err}"), trace_id))?
            .join(archive)
    };
    if !archive.is_file() {
        return Err(AppError::unpack(
            format!("Archive not found: {}", archive.display()),
            trace_id,
        ));
    }

    let target_dir = archive.with_extension("");
    let staging = archive.with_extension("zip");
    if staging.exists() {
        return Err(AppError::unpack(
            format!("Staging path already exists: {}", staging.display()),
            trace_id,
        ));
    }
    if target_dir.exists() {
        return Err(AppError::unpack(
            format!("Extraction target already exists: {}", target_dir.display()),
            trace_id,
        ));
    }

    fs::rename(&archive, &staging).map_err(|err| {
        AppError::unpack(
            format!("Failed to stage {}: {err}", archive.display()),
            trace_id,
        )
    })?;

    let extracted = extract_zip(&staging, &target_dir);

    let restored = fs::rename(&staging, &archive);
    if let Err(err) = &restored {
        warn!(
            trace_id = %trace_id,
            archive = %archive.display(),
            error = %err,
            "failed to restore archive extension"
        );
    }

    match extracted {
        Ok(()) => {
            restored.map_err(|err| {
                AppError::unpack(
                    format!("Failed to restore {}: {err}", archive.display()),
                    trace_id,
                )
            })?;
            info!(
                trace_id = %trace_id,
                archive = %archive.display(),
                target = %target_dir.display(),
                "split archive extracted"
            );
            Ok(target_dir)
        }
        Err(message) => {
            if target_dir.exists() {
                let _ = fs::remove_dir_all(&target_dir);
            }
            info!(
                trace_id = %trace_id,
                archive = %archive.display(),
                error = %message,
                "split archive could not be extracted"
            );
            Err(AppError::unpack(
                format!("Corrupt or unreadable archive {}: {message}", archive.display()),
                trace_id,
            ))
        }
    }
}

fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), String> {
    let file = File::open(zip_path).map_err(|err| format!("Failed to open bundle: {err}"))?;
    let mut archive = ZipArchive::new(file).map_err(|err| format!("Invalid bundle: {err}"))?;
    fs::create_dir_all(target_dir).map_err(|err| format!("Failed to create target dir: {err}"))?;
    archive
        .extract(target_dir)
        .map_err(|err| format!("Failed to extract bundle: {err}"))
}

pub fn read_manifest(dir: &Path, trace_id: &str) -> Result<XapkManifest, AppError> {
    let path = dir.join(MANIFEST_FILE_NAME);
    let raw = fs::read_to_string(&path).map_err(|err| {
        AppError::manifest(format!("Failed to read {}: {err}", path.display()), trace_id)
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        AppError::manifest(format!("Malformed {}: {err}", path.display()), trace_id)
    })
}

/// Install order for an extracted XAPK: the `base` split first, the rest in
/// manifest order. Without split entries the bundle holds one
/// `<package_name>.apk`.
pub fn build_install_sequence(dir: &Path, trace_id: &str) -> Result<InstallSequence, AppError> {
    let manifest = read_manifest(dir, trace_id)?;
    if manifest.package_name.trim().is_empty() {
        return Err(AppError::manifest("Manifest has an empty package_name", trace_id));
    }
    if !is_valid_package_name(&manifest.package_name) {
        return Err(AppError::manifest(
            format!("Manifest package_name is not a valid identifier: {}", manifest.package_name),
            trace_id,
        ));
    }

    let splits = manifest.split_apks.unwrap_or_default();
    if splits.is_empty() {
        return Ok(InstallSequence {
            apk_paths: vec![dir.join(format!("{}.apk", manifest.package_name))],
            package_name: manifest.package_name,
        });
    }

    let base_count = splits.iter().filter(|split| split.id == BASE_SPLIT_ID).count();
    if base_count > 1 {
        return Err(AppError::manifest(
            format!("Manifest declares {base_count} base splits"),
            trace_id,
        ));
    }

    let mut apk_paths = Vec::with_capacity(splits.len());
    for split in &splits {
        if split.file.trim().is_empty() {
            warn!(trace_id = %trace_id, split_id = %split.id, "split entry without file skipped");
            continue;
        }
        if !is_enclosed_file_name(&split.file) {
            return Err(AppError::manifest(
                format!("Split file escapes the bundle: {}", split.file),
                trace_id,
            ));
        }
        let path = dir.join(&split.file);
        if split.id == BASE_SPLIT_ID {
            apk_paths.insert(0, path);
        } else {
            apk_paths.push(path);
        }
    }

    if apk_paths.is_empty() {
        return Err(AppError::unpack("Split list is empty after processing", trace_id));
    }

    Ok(InstallSequence {
        apk_paths,
        package_name: manifest.package_name,
    })
}

/// Relative path made only of normal components, i.e. it stays inside the bundle.
fn is_enclosed_file_name(file: &str) -> bool {
    let path = Path::new(file);
    path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}
