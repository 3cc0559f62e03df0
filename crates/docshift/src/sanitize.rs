//! Filename and log-field sanitizing.
//!
//! Log lines and span fields never carry full paths or whole share tokens;
//! stored and downloaded file names are reduced to a safe character set.

use std::path::Path;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

/// Longest name kept on disk.
pub const MAX_FILENAME_LEN: usize = 255;
/// Longest name offered in a Content-Disposition header.
pub const MAX_DOWNLOAD_NAME_LEN: usize = 200;
/// Stem budget inside a generated unique name.
const MAX_UNIQUE_STEM_LEN: usize = 100;

static RE_UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9._-]").unwrap());
static RE_UNDERSCORE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_{2,}").unwrap());

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// First few characters of a share token, for log correlation.
pub fn token_prefix(token: &str) -> &str {
    match token.char_indices().nth(6) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

/// Splits `name` into stem and extension (without the dot).
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => (&name[..pos], Some(&name[pos + 1..])),
        _ => (name, None),
    }
}

/// Truncates to `max` characters, keeping the extension if there is one.
fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.chars().count() <= max {
        return name.to_string();
    }
    match split_extension(name) {
        (stem, Some(ext)) if ext.chars().count() + 1 < max => {
            let keep = max - ext.chars().count() - 1;
            let stem: String = stem.chars().take(keep).collect();
            format!("{}.{}", stem, ext)
        }
        _ => name.chars().take(max).collect(),
    }
}

/// Reduces a user-supplied file name to `[A-Za-z0-9._-]`.
///
/// Any other character becomes `_`, `..` sequences are broken up, runs of
/// `_` collapse, and the result is capped at 255 characters with the
/// extension preserved. An empty result becomes `"file"`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let replaced = RE_UNSAFE_CHARS.replace_all(base, "_");
    let mut dotless = replaced.into_owned();
    while dotless.contains("..") {
        dotless = dotless.replace("..", "_");
    }
    let collapsed = RE_UNDERSCORE_RUNS.replace_all(&dotless, "_");
    let trimmed = collapsed.trim_matches('.');

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return "file".to_string();
    }
    truncate_keeping_extension(trimmed, MAX_FILENAME_LEN)
}

/// Makes a name safe to embed in a quoted Content-Disposition value.
pub fn sanitize_for_content_disposition(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .map(|c| match c {
            '"' => '\'',
            '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return "download".to_string();
    }
    truncate_keeping_extension(cleaned, MAX_DOWNLOAD_NAME_LEN)
}

/// Collision-resistant stored name: `<unix millis>_<8 hex>_<stem>.<ext>`.
pub fn unique_filename(original: &str, extension: &str) -> String {
    let sanitized = sanitize_filename(original);
    let (stem, _) = split_extension(&sanitized);
    let stem: String = stem.chars().take(MAX_UNIQUE_STEM_LEN).collect();
    let random = uuid::Uuid::new_v4().simple().to_string();
    let extension = extension.trim_start_matches('.').to_ascii_lowercase();

    format!(
        "{}_{}_{}.{}",
        Utc::now().timestamp_millis(),
        &random[..8],
        stem,
        extension
    )
}

/// Lower-cased extension of a file name, if any.
pub fn extension_of(name: &str) -> Option<String> {
    split_extension(name).1.map(|ext| ext.to_ascii_lowercase())
}
