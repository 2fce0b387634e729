//! Content-Disposition header parsing (`filename` and RFC 5987 `filename*`).

/// Extracts the filename from a raw Content-Disposition header value.
/// `filename*` wins over `filename` when both are present.
pub fn parse_content_disposition_filename(header_value: &str) -> Option<String> {
    let mut plain: Option<String> = None;

    for param in header_value.split(';').map(str::trim) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();

        if name == "filename*" {
            // charset'language'value
            let mut parts = value.splitn(3, '\'');
            let charset = parts.next().unwrap_or_default();
            let _lang = parts.next();
            if let Some(encoded) = parts.next() {
                if charset.eq_ignore_ascii_case("utf-8") || charset.is_empty() {
                    let decoded = percent_decode(encoded.trim_matches('"'));
                    if !decoded.is_empty() {
                        return Some(decoded);
                    }
                }
            }
        } else if name == "filename" {
            let v = match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                Some(inner) => unescape_quoted(inner),
                None => value.to_string(),
            };
            if !v.is_empty() {
                plain = Some(v);
            }
        }
    }
    plain
}

/// Undo `\"` and `\\` escapes inside a quoted-string.
fn unescape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            if c != '"' && c != '\\' {
                out.push('\\');
            }
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    if escaped {
        out.push('\\');
    }
    out
}

/// Decode `%XX` escapes; malformed escapes are kept literally and invalid
/// UTF-8 is replaced.
pub(super) fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_and_token_forms() {
        assert_eq!(
            parse_content_disposition_filename("attachment; filename=\"report.pdf\"").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            parse_content_disposition_filename("attachment; filename=report.pdf").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            parse_content_disposition_filename(r#"attachment; filename="say \"hi\".txt""#).as_deref(),
            Some("say \"hi\".txt")
        );
    }

    #[test]
    fn extended_form_wins() {
        assert_eq!(
            parse_content_disposition_filename(
                "attachment; filename=\"fallback.bin\"; filename*=UTF-8''real%20name.dat"
            )
            .as_deref(),
            Some("real name.dat")
        );
        assert_eq!(
            parse_content_disposition_filename("attachment; filename*=utf-8'en'caf%C3%A9.txt").as_deref(),
            Some("café.txt")
        );
    }

    #[test]
    fn inline_without_filename() {
        assert_eq!(parse_content_disposition_filename("inline"), None);
    }

    #[test]
    fn malformed_escapes_are_literal() {
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("a%zzb"), "a%zzb");
        assert_eq!(percent_decode("%41%42"), "AB");
    }
}
