//! Address specification parsing.
//!
//! A specification is a comma-separated list of single hosts (`10.0.0.7`) and
//! inclusive IPv4 ranges (`10.0.0.1-10.0.0.20`). Ranges are ordered by their
//! 32-bit big-endian value.

use std::net::Ipv4Addr;

use crate::error::SpecError;

/// One comma-separated segment of an address specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSegment {
    /// A single host, kept verbatim.
    Single(String),
    /// Inclusive IPv4 range, `start <= end`.
    Range(Ipv4Addr, Ipv4Addr),
}

impl AddressSegment {
    /// Number of addresses this segment expands to.
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Range(start, end) => (u32::from(*end) - u32::from(*start)) as usize + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate the addresses of this segment as strings, in ascending order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = String> + Send + '_> {
        match self {
            Self::Single(host) => Box::new(std::iter::once(host.clone())),
            Self::Range(start, end) => Box::new(
                (u32::from(*start)..=u32::from(*end)).map(|n| Ipv4Addr::from(n).to_string()),
            ),
        }
    }
}

/// Parse a single segment (no commas).
pub fn parse_segment(fragment: &str) -> Result<AddressSegment, SpecError> {
    let fragment = fragment.trim();
    let Some((a, b)) = fragment.split_once('-') else {
        return Ok(AddressSegment::Single(fragment.to_string()));
    };
    if b.contains('-') {
        return Err(SpecError::invalid_range(fragment, "expected exactly one '-'"));
    }
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() {
        return Err(SpecError::invalid_range(fragment, "missing range endpoint"));
    }
    let start: Ipv4Addr = a
        .parse()
        .map_err(|_| SpecError::invalid_range(fragment, format!("invalid IPv4 address {a}")))?;
    let end: Ipv4Addr = b
        .parse()
        .map_err(|_| SpecError::invalid_range(fragment, format!("invalid IPv4 address {b}")))?;
    if u32::from(end) < u32::from(start) {
        return Err(SpecError::invalid_range(fragment, "end before start"));
    }
    Ok(AddressSegment::Range(start, end))
}

/// Split an address specification into parsed segments, preserving input order.
///
/// Empty segments (e.g. a trailing comma) are ignored. The first malformed
/// segment aborts parsing; its text is available via [`SpecError::fragment`].
pub fn parse_address_segments(spec: &str) -> Result<Vec<AddressSegment>, SpecError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_segment)
        .collect()
}

/// Parse and eagerly expand an address specification.
pub fn parse_addresses(spec: &str) -> Result<Vec<String>, SpecError> {
    let segments = parse_address_segments(spec)?;
    Ok(segments.iter().flat_map(AddressSegment::iter).collect())
}

/// Number of addresses named by `spec`, without materializing them.
pub fn count_addresses(spec: &str) -> Result<usize, SpecError> {
    Ok(parse_address_segments(spec)?
        .iter()
        .map(AddressSegment::len)
        .sum())
}
