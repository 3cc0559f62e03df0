//! Request-time access checks: ownership, path safety, secret comparison.

use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use log::warn;
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use crate::error::SecurityError;
use crate::model::{Job, UserId};
use crate::sanitize::redact_path;

const CSRF_TOKEN_BYTES: usize = 32;

/// True iff `user_id` owns `job`.
pub fn authorize_owner(job: &Job, user_id: UserId) -> bool {
    job.is_owned_by(user_id)
}

/// Resolves `candidate` lexically and confines it to `base` when given.
///
/// `.` segments are dropped and `..` segments consume the preceding
/// component. A `..` with nothing left to consume is a traversal attempt.
/// Relative candidates are taken relative to `base`. When the path exists,
/// its canonical form must also lie under the canonical base.
pub fn resolve_safe_path(candidate: &Path, base: Option<&Path>) -> Result<PathBuf, SecurityError> {
    let result = resolve_inner(candidate, base);
    if let Err(ref err) = result {
        warn!(
            "Security: rejected file reference '{}': {}",
            redact_path(candidate),
            err
        );
    }
    result
}

fn resolve_inner(candidate: &Path, base: Option<&Path>) -> Result<PathBuf, SecurityError> {
    if candidate.as_os_str().is_empty() {
        return Err(SecurityError::EmptyPath);
    }

    let Some(base) = base else {
        return normalize(candidate);
    };

    let base = normalize(base)?;
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };
    let resolved = normalize(&joined)?;
    if !resolved.starts_with(&base) {
        return Err(SecurityError::OutsideBase);
    }

    // Existing paths are also checked after symlinks are resolved.
    if let (Ok(real), Ok(real_base)) = (resolved.canonicalize(), base.canonicalize()) {
        if !real.starts_with(&real_base) {
            return Err(SecurityError::OutsideBase);
        }
    }
    Ok(resolved)
}

fn normalize(path: &Path) -> Result<PathBuf, SecurityError> {
    let mut anchor = PathBuf::new();
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => anchor.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(SecurityError::PathTraversal);
                }
            }
            Component::Normal(part) => parts.push(part),
        }
    }

    if anchor.as_os_str().is_empty() && parts.is_empty() {
        return Err(SecurityError::EmptyPath);
    }
    Ok(parts.into_iter().fold(anchor, |acc, part| acc.join(part)))
}

/// Compares two secrets without short-circuiting on the first differing byte.
///
/// Lengths are compared first; only the length can leak through timing.
pub fn compare_token_constant_time(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

/// Fills `buf` from the operating system's secure random source.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), SecurityError> {
    getrandom::getrandom(buf).map_err(|e| SecurityError::RandomSource(e.to_string()))
}

/// A fresh per-session CSRF secret: 32 random bytes, URL-safe base64.
pub fn generate_csrf_token() -> Result<SecretString, SecurityError> {
    let mut bytes = [0u8; CSRF_TOKEN_BYTES];
    fill_random(&mut bytes)?;
    Ok(SecretString::from(URL_SAFE_NO_PAD.encode(bytes)))
}

/// Checks a submitted CSRF token against the session's secret.
pub fn verify_csrf(session_secret: &SecretString, candidate: &str) -> bool {
    let expected = session_secret.expose_secret();
    if expected.is_empty() || candidate.is_empty() {
        return false;
    }
    compare_token_constant_time(expected, candidate)
}
