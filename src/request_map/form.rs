//! Form attribute decoding for urlencoded and multipart bodies.

use std::collections::BTreeMap;

const URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Whether a request with this content type carries form attributes.
pub(crate) fn expects_form(content_type: &str) -> bool {
    let media_type = media_type(content_type);
    media_type.eq_ignore_ascii_case(URLENCODED) || media_type.eq_ignore_ascii_case(MULTIPART)
}

/// Decode the form attributes of a body. Repeated names are joined with `,`.
pub(crate) fn attributes(content_type: &str, body: &[u8]) -> BTreeMap<String, String> {
    let media_type = media_type(content_type);
    let pairs: Vec<(String, String)> = if media_type.eq_ignore_ascii_case(URLENCODED) {
        url::form_urlencoded::parse(body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    } else {
        match boundary(content_type) {
            Some(boundary) => multipart_fields(&boundary, body),
            None => Vec::new(),
        }
    };

    let mut attributes: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in pairs {
        attributes
            .entry(name)
            .and_modify(|joined| {
                joined.push(',');
                joined.push_str(&value);
            })
            .or_insert(value);
    }
    attributes
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or_default().trim()
}

fn boundary(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| unquote(value).to_string())
    })
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Text fields of a multipart body. File parts are skipped.
fn multipart_fields(boundary: &str, body: &[u8]) -> Vec<(String, String)> {
    let opening = format!("--{boundary}");
    let closing = format!("\r\n--{boundary}");
    let (opening, closing) = (opening.as_bytes(), closing.as_bytes());
    let mut fields = Vec::new();

    let Some(start) = find(body, opening) else {
        return fields;
    };
    let mut rest = &body[start + opening.len()..];

    while !rest.starts_with(b"--") {
        let part_start = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        let Some(end) = find(part_start, closing) else {
            break;
        };
        if let Some(field) = text_field(&part_start[..end]) {
            fields.push(field);
        }
        rest = &part_start[end + closing.len()..];
    }
    fields
}

fn text_field(part: &[u8]) -> Option<(String, String)> {
    let split = find(part, b"\r\n\r\n")?;
    let head = std::str::from_utf8(&part[..split]).ok()?;
    let value = &part[split + 4..];

    let disposition = head.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-disposition")
            .then(|| value.trim())
    })?;

    let mut name = None;
    for param in disposition.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => name = Some(unquote(value).to_string()),
            "filename" => return None,
            _ => {}
        }
    }
    Some((name?, String::from_utf8_lossy(value).into_owned()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expects_form() {
        assert!(expects_form("application/x-www-form-urlencoded"));
        assert!(expects_form("Multipart/Form-Data; boundary=xyz"));
        assert!(!expects_form("application/json"));
        assert!(!expects_form(""));
    }

    #[test]
    fn test_urlencoded_is_decoded() {
        let attrs = attributes(
            "application/x-www-form-urlencoded; charset=utf-8",
            b"name=John+Doe&city=S%C3%A3o%20Paulo",
        );

        assert_eq!(attrs.get("name").map(String::as_str), Some("John Doe"));
        assert_eq!(attrs.get("city").map(String::as_str), Some("São Paulo"));
    }

    #[test]
    fn test_repeated_names_are_joined() {
        let attrs = attributes("application/x-www-form-urlencoded", b"tag=a&tag=b&tag=c");

        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs.get("tag").map(String::as_str), Some("a,b,c"));
    }

    #[test]
    fn test_multipart_text_fields() {
        let body = concat!(
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"first\"\r\n",
            "\r\n",
            "alpha\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "file contents\r\n",
            "--XyZ\r\n",
            "content-disposition: form-data; name=second\r\n",
            "\r\n",
            "beta\r\n",
            "--XyZ--\r\n",
        );

        let attrs = attributes("multipart/form-data; boundary=\"XyZ\"", body.as_bytes());

        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.get("first").map(String::as_str), Some("alpha"));
        assert_eq!(attrs.get("second").map(String::as_str), Some("beta"));
    }

    #[test]
    fn test_multipart_value_may_contain_boundary_text() {
        let body = concat!(
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"note\"\r\n",
            "\r\n",
            "see --XyZ inline\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"last\"\r\n",
            "\r\n",
            "omega\r\n",
            "--XyZ--\r\n",
        );

        let attrs = attributes("multipart/form-data; boundary=XyZ", body.as_bytes());

        assert_eq!(attrs.get("note").map(String::as_str), Some("see --XyZ inline"));
        assert_eq!(attrs.get("last").map(String::as_str), Some("omega"));
    }

    #[test]
    fn test_multipart_without_boundary_is_empty() {
        assert!(attributes("multipart/form-data", b"--x\r\n").is_empty());
    }
}
