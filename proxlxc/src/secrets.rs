//! Process-wide secret filter.
//!
//! Every registered value is replaced with `<sensitive>` before a line
//! reaches the operator. The builder registers the configured passwords
//! during `prepare` and again before the first stage runs.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::{OnceLock, RwLock};

use proxlxc_shared::constants::SECRET_PLACEHOLDER;

static SECRETS: OnceLock<RwLock<BTreeSet<String>>> = OnceLock::new();

fn secrets() -> &'static RwLock<BTreeSet<String>> {
    SECRETS.get_or_init(|| RwLock::new(BTreeSet::new()))
}

/// Register a secret. Empty strings are ignored.
pub fn register(secret: &str) {
    if secret.is_empty() {
        return;
    }
    let mut guard = secrets().write().unwrap_or_else(|e| e.into_inner());
    guard.insert(secret.to_string());
}

/// Whether `secret` is currently filtered.
pub fn is_registered(secret: &str) -> bool {
    let guard = secrets().read().unwrap_or_else(|e| e.into_inner());
    guard.contains(secret)
}

/// Replace every registered secret in `text`.
pub fn redact(text: &str) -> Cow<'_, str> {
    let guard = secrets().read().unwrap_or_else(|e| e.into_inner());
    if !guard.iter().any(|s| text.contains(s.as_str())) {
        return Cow::Borrowed(text);
    }

    // Longest first so a secret that contains another is replaced whole.
    let mut ordered: Vec<&String> = guard.iter().collect();
    ordered.sort_by_key(|s| std::cmp::Reverse(s.len()));

    let mut out = text.to_string();
    for secret in ordered {
        if out.contains(secret.as_str()) {
            out = out.replace(secret.as_str(), SECRET_PLACEHOLDER);
        }
    }
    Cow::Owned(out)
}
