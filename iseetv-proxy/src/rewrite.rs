//! Manifest rewriting.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything except RFC 3986 unreserved characters.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Replace every occurrence of `original_prefix` in a manifest with
/// `mount_path`.
///
/// Plain substring substitution: `/segments/foo.ts` with mount
/// `/api/segments/3` becomes `/api/segments/3/foo.ts`. Replaced text is not
/// scanned again.
#[must_use]
pub fn rewrite_base_url(manifest: &str, original_prefix: &str, mount_path: &str) -> String {
    if original_prefix.is_empty() {
        return manifest.to_string();
    }
    manifest.replace(original_prefix, mount_path)
}

/// Point every URI in a remote playlist at `proxy_base?url=<absolute>`.
///
/// Relative URIs are resolved against `source_url`. Tag lines are kept,
/// except for their `URI="..."` attributes which are rewritten the same way.
#[must_use]
pub fn rewrite_m3u8(m3u8: &str, source_url: &str, proxy_base: &str) -> String {
    let base = url::Url::parse(source_url).ok();
    let mut output = String::with_capacity(m3u8.len() * 2);

    for line in m3u8.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            output.push_str(&rewrite_uri_attribute(line, base.as_ref(), proxy_base));
        } else if trimmed.is_empty() {
            output.push_str(line);
        } else {
            output.push_str(&proxied_url(proxy_base, &make_absolute(trimmed, base.as_ref())));
        }
        output.push('\n');
    }

    output
}

fn proxied_url(proxy_base: &str, absolute: &str) -> String {
    format!("{proxy_base}?url={}", percent_encode(absolute))
}

/// Resolve a possibly relative URL against `base`.
#[must_use]
pub fn make_absolute(raw: &str, base: Option<&url::Url>) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    base.and_then(|b| b.join(raw).ok())
        .map_or_else(|| raw.to_string(), |joined| joined.to_string())
}

fn rewrite_uri_attribute(line: &str, base: Option<&url::Url>, proxy_base: &str) -> String {
    const PATTERN: &str = "URI=\"";
    let mut result = String::with_capacity(line.len());
    let mut remaining = line;

    while let Some(start) = remaining.find(PATTERN) {
        let value_start = start + PATTERN.len();
        result.push_str(&remaining[..value_start]);
        remaining = &remaining[value_start..];

        let Some(end) = remaining.find('"') else {
            break;
        };
        result.push_str(&proxied_url(proxy_base, &make_absolute(&remaining[..end], base)));
        result.push('"');
        remaining = &remaining[end + 1..];
    }

    result.push_str(remaining);
    result
}

/// Percent-encode a query parameter value.
#[must_use]
pub fn percent_encode(input: &str) -> String {
    utf8_percent_encode(input, QUERY_VALUE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_base_url_exact() {
        let manifest = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\n/segments/foo.ts\n";
        let rewritten = rewrite_base_url(manifest, "/segments", "/api/segments/3");

        assert_eq!(
            rewritten,
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\n/api/segments/3/foo.ts\n"
        );
    }

    #[test]
    fn test_rewrite_base_url_replaces_every_occurrence_once() {
        let manifest = "/segments/a.ts\n/segments/b.ts\n";
        assert_eq!(
            rewrite_base_url(manifest, "/segments", "/segments/3"),
            "/segments/3/a.ts\n/segments/3/b.ts\n"
        );
        assert_eq!(rewrite_base_url(manifest, "", "/x"), manifest);
    }

    #[test]
    fn test_rewrite_m3u8_relative_and_absolute() {
        let m3u8 = "#EXTM3U\n#EXTINF:4.0,\nseg1.ts\n#EXTINF:4.0,\nhttps://cdn.example.com/seg2.ts\n";
        let rewritten = rewrite_m3u8(m3u8, "http://origin.example.com/live/index.m3u8", "/segment/7");

        let lines: Vec<&str> = rewritten.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(
            lines[2],
            "/segment/7?url=http%3A%2F%2Forigin.example.com%2Flive%2Fseg1.ts"
        );
        assert_eq!(
            lines[4],
            "/segment/7?url=https%3A%2F%2Fcdn.example.com%2Fseg2.ts"
        );
    }

    #[test]
    fn test_rewrite_m3u8_uri_attribute() {
        let m3u8 = "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x1\n";
        let rewritten = rewrite_m3u8(m3u8, "http://origin/live/index.m3u8", "/segment/1");

        assert_eq!(
            rewritten,
            "#EXT-X-KEY:METHOD=AES-128,URI=\"/segment/1?url=http%3A%2F%2Forigin%2Flive%2Fkey.bin\",IV=0x1\n"
        );
    }

    #[test]
    fn test_unterminated_uri_attribute_kept() {
        let line = "#EXT-X-MAP:URI=\"init.mp4";
        assert_eq!(rewrite_uri_attribute(line, None, "/p"), line);
    }

    #[test]
    fn test_percent_encode_unreserved_kept() {
        assert_eq!(percent_encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(percent_encode("a b&c"), "a%20b%26c");
    }
}
