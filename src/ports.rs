use crate::error::SpecError;

/// Parse a port specification into the ordered list of TCP ports it names.
///
/// Supported tokens, separated by commas:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - surrounding whitespace and empty tokens are ignored
///
/// Duplicates are kept; the result has exactly one entry per port named by each token.
pub fn parse_ports(spec: &str) -> Result<Vec<u16>, SpecError> {
    let mut out = Vec::new();
    for token in tokens(spec) {
        let (start, end) = parse_token(token)?;
        out.extend(start..=end);
    }
    Ok(out)
}

/// Number of ports `parse_ports` would return, without materializing them.
pub fn count_ports(spec: &str) -> Result<usize, SpecError> {
    tokens(spec).try_fold(0usize, |acc, token| {
        let (start, end) = parse_token(token)?;
        Ok(acc + usize::from(end - start) + 1)
    })
}

/// A conservative default list of commonly used TCP ports.
pub fn default_ports() -> Vec<u16> {
    const DEFAULT: &[u16] = &[
        21, 22, 23, 25, 53, 80, 110, 135, 139, 143, 389, 443, 445, 465, 587, 631, 993, 995, 1433,
        1521, 1723, 1883, 2049, 2375, 3000, 3128, 3306, 3389, 5000, 5432, 5672, 5900, 5985, 6379,
        7001, 8000, 8008, 8080, 8081, 8443, 8888, 9000, 9092, 9200, 11211, 27017,
    ];
    DEFAULT.to_vec()
}

/// `default_ports` rendered as a port specification.
pub fn default_port_spec() -> String {
    default_ports()
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn tokens(spec: &str) -> impl Iterator<Item = &str> {
    spec.split(',').map(str::trim).filter(|t| !t.is_empty())
}

fn parse_token(token: &str) -> Result<(u16, u16), SpecError> {
    match token.split_once('-') {
        Some((a, b)) => {
            if b.contains('-') {
                return Err(SpecError::invalid_port(token));
            }
            let start = parse_port_str(a.trim(), token)?;
            let end = parse_port_str(b.trim(), token)?;
            if start > end {
                return Err(SpecError::invalid_range(token, "start > end"));
            }
            Ok((start, end))
        }
        None => {
            let p = parse_port_str(token, token)?;
            Ok((p, p))
        }
    }
}

fn parse_port_str(s: &str, token: &str) -> Result<u16, SpecError> {
    let val: i64 = s.parse().map_err(|_| SpecError::invalid_port(token))?;
    if !(1..=65535).contains(&val) {
        return Err(SpecError::out_of_range(token));
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_ports() {
        let ports = parse_ports("80, 22,   443  ").unwrap();
        assert_eq!(ports, vec![80, 22, 443]);
    }

    #[test]
    fn parse_ranges_keeps_order_and_duplicates() {
        let ports = parse_ports("8000-8002,80,8001").unwrap();
        assert_eq!(ports, vec![8000, 8001, 8002, 80, 8001]);
    }

    #[test]
    fn empty_tokens_are_skipped() {
        assert_eq!(parse_ports(" , 22,,").unwrap(), vec![22]);
        assert!(parse_ports("").unwrap().is_empty());
    }

    #[test]
    fn error_kinds() {
        assert!(matches!(parse_ports("http"), Err(SpecError::InvalidPort { .. })));
        assert!(matches!(parse_ports("1-2-3"), Err(SpecError::InvalidPort { .. })));
        assert!(matches!(parse_ports("10-x"), Err(SpecError::InvalidPort { .. })));
        assert!(matches!(parse_ports("70000"), Err(SpecError::OutOfRange { .. })));
        assert!(matches!(parse_ports("0-10"), Err(SpecError::OutOfRange { .. })));
        assert!(matches!(parse_ports("90-80"), Err(SpecError::InvalidRange { .. })));
    }

    #[test]
    fn count_matches_expansion() {
        for spec in ["1-65535", "22,80-82,443", "5,5,5", ""] {
            assert_eq!(count_ports(spec).unwrap(), parse_ports(spec).unwrap().len());
        }
    }

    #[test]
    fn default_spec_round_trips() {
        let d = default_ports();
        assert!(d.contains(&80) && d.contains(&443));
        assert_eq!(parse_ports(&default_port_spec()).unwrap(), d);
    }
}
