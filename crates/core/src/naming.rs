//! Image discovery and job naming.
//!
//! Job names double as directory names under the output folder, so they
//! must be deterministic and free of characters any common filesystem
//! rejects in a path segment.

use std::io;
use std::path::{Path, PathBuf};

/// File extensions (lowercase, without dot) treated as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff", "bmp"];

/// Separator placed between the two image stems in a job name.
pub const JOB_NAME_SEPARATOR: &str = "__vs__";

/// Characters rejected in a file name on at least one supported platform.
const INVALID_FILE_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Whether `path` carries one of the [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
}

/// Lazily list image files directly inside `folder` (non-recursive).
///
/// Entries are yielded in directory order. Unreadable entries are skipped;
/// only failing to open `folder` itself is an error.
pub fn enumerate_images(folder: &Path) -> io::Result<impl Iterator<Item = PathBuf>> {
    let entries = std::fs::read_dir(folder)?;
    Ok(entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_image_file(path)))
}

/// Like [`enumerate_images`], collected and sorted for a stable job order.
pub fn list_images(folder: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = enumerate_images(folder)?.collect();
    images.sort();
    Ok(images)
}

/// Build the job name for a reference/deformed pair.
///
/// Convention: `{stemA}__vs__{stemB}` with every filesystem-illegal or
/// control character replaced by `_`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use dicebatch_core::naming::make_job_name;
///
/// assert_eq!(
///     make_job_name(Path::new("/a/img1.png"), Path::new("/b/img2.png")),
///     "img1__vs__img2"
/// );
/// ```
pub fn make_job_name(reference: &Path, deformed: &Path) -> String {
    let name = format!(
        "{}{JOB_NAME_SEPARATOR}{}",
        stem_lossy(reference),
        stem_lossy(deformed)
    );
    sanitize_file_name(&name)
}

/// Replace characters that cannot appear in a path segment with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_control() || INVALID_FILE_NAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Case-insensitive comparison of the final path components.
pub fn same_file_name(a: &Path, b: &Path) -> bool {
    match (a.file_name(), b.file_name()) {
        (Some(a), Some(b)) => {
            a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
        }
        _ => false,
    }
}

fn stem_lossy(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
