use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use http::StatusCode;

use super::BackendFault;
use crate::util::truncate_with_ellipsis;

pub(crate) const RETRY_BACKOFF_BASE_MS: u64 = 100;
pub(crate) const RETRY_BACKOFF_MAX_MS: u64 = 1_000;
pub(crate) const RETRY_AFTER_MAX_SECS: u64 = 10;
const FAULT_MESSAGE_MAX_CHARS: usize = 512;

const QUOTA_NEEDLES: [&[u8]; 4] = [
    b"monthly_request_count",
    b"quota",
    b"usage limit",
    b"insufficient credits",
];

const BAN_NEEDLES: [&[u8]; 4] = [
    b"suspended",
    b"banned",
    b"account is locked",
    b"account disabled",
];

/// Classify a non-success backend response.
///
/// Quota signals win over everything else, then ban signals on 403.
#[must_use]
pub(crate) fn classify_status(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> BackendFault {
    let message = truncate_with_ellipsis(body.trim(), FAULT_MESSAGE_MAX_CHARS);
    let code = status.as_u16();
    let haystack = body.as_bytes();

    if code == 402 || (status.is_client_error() && contains_any(haystack, &QUOTA_NEEDLES)) {
        return BackendFault::QuotaExhausted(message);
    }
    if code == 403 && contains_any(haystack, &BAN_NEEDLES) {
        return BackendFault::Banned(message);
    }
    if matches!(code, 401 | 403) {
        return BackendFault::Unauthorized {
            status: code,
            message,
        };
    }
    if should_retry_backend_status(status) {
        return BackendFault::Transient {
            message: format!("status {code}: {message}"),
            retry_after,
        };
    }
    BackendFault::Rejected {
        status: code,
        message,
    }
}

#[inline]
pub(crate) fn should_retry_backend_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 529) || status.is_server_error()
}

#[inline]
pub(crate) fn should_retry_transport_message(message: &str) -> bool {
    const NEEDLES: [&[u8]; 9] = [
        b"timed out",
        b"timeout",
        b"connection reset",
        b"connection aborted",
        b"broken pipe",
        b"http2 error",
        b"connection refused",
        b"unexpected eof",
        b"stream closed",
    ];
    contains_any(message.as_bytes(), &NEEDLES)
}

/// Classify a transport-level error message.
///
/// Unrecognized connection errors are still treated as transient; only
/// request-construction failures are not.
#[must_use]
pub(crate) fn classify_transport_message(message: &str, is_builder_error: bool) -> BackendFault {
    if is_builder_error && !should_retry_transport_message(message) {
        return BackendFault::Rejected {
            status: 0,
            message: message.to_string(),
        };
    }
    BackendFault::transient(message)
}

#[inline]
fn contains_any(haystack: &[u8], needles: &[&[u8]]) -> bool {
    needles
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

#[inline]
fn contains_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }

    haystack.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

#[inline]
pub(crate) fn retry_backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.min(10);
    let multiplier = 1_u64 << shift;
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}

/// Delay before the next attempt after `fault`; zero for faults that switch accounts.
#[must_use]
pub(crate) fn retry_delay(fault: &BackendFault, attempt: u32) -> Duration {
    match fault {
        BackendFault::Transient { retry_after, .. } => retry_after
            .map(|delay| delay.min(Duration::from_secs(RETRY_AFTER_MAX_SECS)))
            .unwrap_or_else(|| retry_backoff_delay(attempt)),
        _ => Duration::ZERO,
    }
}

#[inline]
pub(crate) fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds.min(RETRY_AFTER_MAX_SECS)));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(Duration::from_secs(RETRY_AFTER_MAX_SECS)))
}
