//! Source path handling
//!
//! Shader producers emit paths in whatever convention the host compiler ran
//! under, so paths are treated as strings with `/` or `\` separators rather
//! than as `std::path::Path` values of the current platform.

/// Whether the path is rooted (`/x`, `\x` or a drive prefix such as `C:`)
pub(crate) fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    matches!(bytes.first(), Some(b'/') | Some(b'\\'))
        || (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
}

/// Normalize separators to `/` and resolve `.` and `..` components
/// (no filesystem checks)
pub(crate) fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let rooted = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for comp in unified.split('/') {
        match comp {
            "" | "." => continue,
            ".." => {
                // Never pop a drive prefix
                match parts.last() {
                    Some(last) if *last != ".." && !last.ends_with(':') => {
                        parts.pop();
                    }
                    _ if rooted => {}
                    _ => parts.push(".."),
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Join directory and filename into a normalized path
pub(crate) fn join_paths(left: &str, right: &str) -> String {
    if right.is_empty() {
        return normalize_path(left);
    }
    if left.trim().is_empty() || is_absolute(right) {
        return normalize_path(right);
    }
    normalize_path(&format!("{}/{}", left.trim(), right))
}

/// Final component of a path
pub(crate) fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Component-wise suffix test: `core/a.hlsl` matches `/src/core/a.hlsl`
/// but `a.hlsl` does not match `/src/ba.hlsl`
pub(crate) fn path_ends_with(full: &str, suffix: &str) -> bool {
    if suffix.is_empty() {
        return false;
    }
    if full == suffix {
        return true;
    }
    full.len() > suffix.len()
        && full.ends_with(suffix)
        && full.as_bytes()[full.len() - suffix.len() - 1] == b'/'
}
