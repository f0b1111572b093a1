use crate::error::{GatewayError, GatewayResult};

/// An inclusive byte range a client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedRange {
    pub from: u64,
    pub until: u64,
}

/// Parse a `Range: bytes=a-b` header value against a file of `size` bytes.
///
/// Suffix ranges (`-500`) and open-ended ranges (`500-`) are resolved here;
/// bounds against the file size are the caller's job via
/// [`validate_range`]. Returns `None` for anything unparsable.
pub fn parse_range_header(value: &str, size: u64) -> Option<RequestedRange> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.trim();
    let end = end.trim();

    let from = if start.is_empty() {
        // Suffix range: the last N bytes.
        let suffix: u64 = end.parse().ok()?;
        if suffix == 0 {
            return None;
        }
        return Some(RequestedRange {
            from: size.saturating_sub(suffix),
            until: size.checked_sub(1)?,
        });
    } else {
        start.parse().ok()?
    };

    let until = if end.is_empty() {
        size.checked_sub(1)?
    } else {
        end.parse().ok()?
    };

    if from > until {
        return None;
    }
    Some(RequestedRange { from, until })
}

/// Enforce `0 <= from <= until <= size - 1`.
pub fn validate_range(range: &RequestedRange, size: u64) -> GatewayResult<()> {
    if size == 0 || range.from > range.until || range.until > size - 1 {
        return Err(GatewayError::RangeNotSatisfiable { size });
    }
    Ok(())
}
