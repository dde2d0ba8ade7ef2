//! Pair planning over two image lists.

use std::path::PathBuf;

use dicebatch_core::types::ImagePair;

/// Cartesian product of `folder_a × folder_b`, in list order.
///
/// With `skip_self_compare`, pairs whose file names match case-insensitively
/// are dropped. Only the file name is compared: folders, timestamps and
/// contents are ignored.
pub fn build_pairs(
    folder_a: &[PathBuf],
    folder_b: &[PathBuf],
    skip_self_compare: bool,
) -> Vec<ImagePair> {
    let mut pairs = Vec::with_capacity(folder_a.len() * folder_b.len());
    for a in folder_a {
        for b in folder_b {
            let pair = ImagePair::new(a, b);
            if skip_self_compare && pair.is_self_pair() {
                continue;
            }
            pairs.push(pair);
        }
    }
    pairs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
