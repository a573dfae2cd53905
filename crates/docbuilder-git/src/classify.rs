//! Classification of fetch failures into the stable issue taxonomy.
//!
//! Structured causes are inspected first; the fallback is substring
//! matching on the git error text. Everything downstream consumes only the
//! resulting code.

use docbuilder_core::issue::IssueCode;

use crate::fetcher::FetchError;

/// Classify a fetch failure. `None` means unclassified: the caller records
/// a generic clone failure.
pub fn classify(err: &FetchError) -> Option<IssueCode> {
    match err {
        FetchError::Canceled => None,
        FetchError::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            Some(IssueCode::NetworkTimeout)
        }
        FetchError::Io(_) => None,
        FetchError::Command { stderr, .. } => classify_message(stderr),
    }
}

/// Substring heuristics over git error output.
pub fn classify_message(message: &str) -> Option<IssueCode> {
    let msg = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if any(&["rate limit", "too many requests", "429"]) {
        return Some(IssueCode::RateLimit);
    }
    if any(&[
        "timed out",
        "timeout",
        "could not resolve host",
        "connection reset",
        "connection refused",
        "network is unreachable",
    ]) {
        return Some(IssueCode::NetworkTimeout);
    }
    if any(&[
        "authentication failed",
        "could not read username",
        "could not read password",
        "permission denied",
        "invalid credentials",
        "access denied",
        "403",
    ]) {
        return Some(IssueCode::AuthFailure);
    }
    if any(&["repository not found", "does not exist", "not found", "404"]) {
        return Some(IssueCode::RepoNotFound);
    }
    if (msg.contains("protocol") && msg.contains("not supported"))
        || msg.contains("unable to find remote helper")
    {
        return Some(IssueCode::UnsupportedProtocol);
    }
    if any(&["non-fast-forward", "diverged", "unrelated histories"]) {
        return Some(IssueCode::RemoteDiverged);
    }
    None
}
