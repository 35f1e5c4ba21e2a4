//! HTTP request-header evaluation: ranges, conditionals, and
//! accepted content encodings.

use chrono::DateTime;

/// Result of evaluating a `Range` header against an entity length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No range requested; serve the full entity.
    None,
    /// A satisfiable range, clamped to `[start, end]` inclusive.
    Satisfiable { start: u64, end: u64 },
    /// Malformed or unsatisfiable; respond 416 with `Content-Range: bytes */total`.
    Unsatisfiable,
}

/// Parse and clamp a `bytes=start-end` range header.
///
/// Only single byte-ranges are supported; suffix form `bytes=-n` takes the
/// final `n` bytes. The parser is total: anything malformed or out of bounds
/// maps to [`RangeOutcome::Unsatisfiable`], never a panic.
pub fn parse_range(header: Option<&str>, total: u64) -> RangeOutcome {
    let header = match header {
        Some(h) => h.trim(),
        None => return RangeOutcome::None,
    };

    let spec = match header.strip_prefix("bytes=") {
        Some(s) => s.trim(),
        None => return RangeOutcome::Unsatisfiable,
    };

    // Multi-range requests are not supported.
    if spec.contains(',') || spec.is_empty() || total == 0 {
        return RangeOutcome::Unsatisfiable;
    }

    let (start_str, end_str) = match spec.split_once('-') {
        Some(parts) => parts,
        None => return RangeOutcome::Unsatisfiable,
    };

    if start_str.is_empty() {
        // Suffix form: last n bytes.
        let n: u64 = match end_str.parse() {
            Ok(n) if n > 0 => n,
            _ => return RangeOutcome::Unsatisfiable,
        };
        let start = total.saturating_sub(n);
        return RangeOutcome::Satisfiable {
            start,
            end: total - 1,
        };
    }

    let start: u64 = match start_str.parse() {
        Ok(s) => s,
        Err(_) => return RangeOutcome::Unsatisfiable,
    };

    if start >= total {
        return RangeOutcome::Unsatisfiable;
    }

    let end = if end_str.is_empty() {
        total - 1
    } else {
        match end_str.parse::<u64>() {
            // Clamp an overlong end to the final byte.
            Ok(e) => e.min(total - 1),
            Err(_) => return RangeOutcome::Unsatisfiable,
        }
    };

    if start > end {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Satisfiable { start, end }
}

/// Evaluate conditional request headers against an entry's validators.
///
/// `If-None-Match` wins on an exact byte-for-byte match with the stored ETag
/// (quoting included). `If-Modified-Since` succeeds when it parses to a time
/// at or after the entry's `Last-Modified`. Unparseable dates are ignored.
pub fn is_not_modified(
    if_none_match: Option<&str>,
    if_modified_since: Option<&str>,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> bool {
    if let (Some(inm), Some(tag)) = (if_none_match, etag) {
        if inm.trim() == tag {
            return true;
        }
    }

    if let (Some(ims), Some(lm)) = (if_modified_since, last_modified) {
        if let (Some(ims_time), Some(lm_time)) = (parse_http_date(ims), parse_http_date(lm)) {
            if ims_time >= lm_time {
                return true;
            }
        }
    }

    false
}

/// Parse an HTTP-date (IMF-fixdate) to epoch seconds.
///
/// HTTP dates like `Sun, 06 Nov 1994 08:49:37 GMT` are RFC 2822 compatible,
/// which chrono parses directly.
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

/// Content encodings a client is willing to accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptedEncodings {
    pub gzip: bool,
    pub brotli: bool,
}

/// Parse an `Accept-Encoding` header. A `q=0` weight rejects the coding.
pub fn accepted_encodings(header: Option<&str>) -> AcceptedEncodings {
    let mut accepted = AcceptedEncodings::default();
    let header = match header {
        Some(h) => h,
        None => return accepted,
    };

    for part in header.split(',') {
        let mut pieces = part.split(';');
        let coding = pieces.next().unwrap_or("").trim().to_ascii_lowercase();

        let rejected = pieces.any(|p| {
            let p = p.trim().to_ascii_lowercase();
            p == "q=0" || p == "q=0.0" || p == "q=0.00" || p == "q=0.000"
        });
        if rejected {
            continue;
        }

        match coding.as_str() {
            "gzip" | "*" => accepted.gzip = true,
            "br" => accepted.brotli = true,
            _ => {}
        }
    }

    accepted
}
