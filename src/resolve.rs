//! Filename, content type and boundary resolution

use rand::Rng;
use std::fmt::Write;
use std::path::Path;

use crate::stream_configuration::FileDefaults;

const BOUNDARY_SUFFIX_LEN: usize = 12;

/// Filename for a file-like part
///
/// Basename of the explicit filename, else of the value's own path, else
/// `{name}.{ext}` from the defaults.
pub fn resolve_filename(
    explicit: Option<&str>,
    path: Option<&Path>,
    defaults: &FileDefaults,
) -> String {
    let candidate = explicit
        .filter(|name| !name.is_empty())
        .map(Path::new)
        .or_else(|| path.filter(|p| !p.as_os_str().is_empty()));

    match candidate {
        Some(path) => basename(path),
        None => format!("{}.{}", defaults.name, defaults.ext),
    }
}

pub fn resolve_content_type(explicit: Option<&str>, defaults: &FileDefaults) -> String {
    explicit
        .filter(|ty| !ty.is_empty())
        .unwrap_or(defaults.content_type.as_str())
        .to_string()
}

/// `--{prefix}` followed by 12 random hex digits
pub fn generate_boundary(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut boundary = String::with_capacity(prefix.len() + 2 + BOUNDARY_SUFFIX_LEN);
    boundary.push_str("--");
    boundary.push_str(prefix);
    for _ in 0..BOUNDARY_SUFFIX_LEN {
        let _ = write!(boundary, "{:x}", rng.gen_range(0u8..16));
    }
    boundary
}

fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
