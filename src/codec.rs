/// How far an encoder must drain its internal state after consuming input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Consume input; output may stay buffered inside the encoder.
    None,
    /// Emit everything consumed so far as a decodable prefix.
    Sync,
    /// Finalize the stream, writing trailers and checksums.
    Finish,
}

/// Returns whether an `Accept-Encoding` header value accepts `token`.
///
/// The header value is expected to be comma-separated encodings with optional
/// quality values (e.g., "gzip, br;q=1.0, zstd;q=0.8"). An explicit entry for
/// the token wins over a `*` wildcard, and a quality of zero rejects.
pub fn accepts_encoding(header: &str, token: &str) -> bool {
    let mut wildcard: Option<f32> = None;

    for part in header.split(',') {
        let (encoding, quality) = parse_encoding_with_quality(part.trim());
        if encoding.is_empty() {
            continue;
        }

        if matches_token(encoding, token) {
            return quality > 0.0;
        }

        if encoding == "*" && wildcard.is_none() {
            wildcard = Some(quality);
        }
    }

    wildcard.is_some_and(|quality| quality > 0.0)
}

fn matches_token(encoding: &str, token: &str) -> bool {
    encoding.eq_ignore_ascii_case(token)
        || (token.eq_ignore_ascii_case("gzip") && encoding.eq_ignore_ascii_case("x-gzip"))
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.split(';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .filter_map(|param| {
            let (name, value) = param.trim().split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("q")
                .then(|| value.trim().parse::<f32>().ok())
                .flatten()
        })
        .next()
        .unwrap_or(1.0);

    (encoding, quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_simple() {
        assert!(accepts_encoding("gzip", "gzip"));
        assert!(accepts_encoding("zstd", "zstd"));
        assert!(!accepts_encoding("gzip", "zstd"));
    }

    #[test]
    fn test_accepts_multiple() {
        assert!(accepts_encoding("gzip, br, zstd", "zstd"));
        assert!(accepts_encoding("br,gzip", "gzip"));
    }

    #[test]
    fn test_accepts_case_insensitive() {
        assert!(accepts_encoding("GZIP", "gzip"));
        assert!(accepts_encoding("x-gzip", "gzip"));
    }

    #[test]
    fn test_accepts_with_quality() {
        assert!(accepts_encoding("gzip;q=1.0, br;q=0.5", "br"));
        assert!(accepts_encoding("gzip;Q=0.1", "gzip"));
        assert!(accepts_encoding("gzip; q=0.5", "gzip"));
    }

    #[test]
    fn test_accepts_quality_zero() {
        assert!(!accepts_encoding("gzip;q=0", "gzip"));
        assert!(!accepts_encoding("gzip;q=0.000, br", "gzip"));
        assert!(accepts_encoding("gzip;q=0, br", "br"));
    }

    #[test]
    fn test_accepts_wildcard() {
        assert!(accepts_encoding("*", "zstd"));
        assert!(!accepts_encoding("*;q=0", "zstd"));
        assert!(!accepts_encoding("zstd;q=0, *", "zstd"));
        assert!(accepts_encoding("*;q=0, zstd", "zstd"));
    }

    #[test]
    fn test_accepts_unsupported() {
        assert!(!accepts_encoding("identity", "gzip"));
        assert!(!accepts_encoding("", "gzip"));
        assert!(!accepts_encoding(" , ", "gzip"));
    }

    #[test]
    fn test_invalid_quality_defaults_to_one() {
        assert!(accepts_encoding("gzip;q=abc", "gzip"));
    }
}
