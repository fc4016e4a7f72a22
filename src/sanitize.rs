//! Strips non-content markup from newsletter HTML. Everything that is not
//! a `script`/`style` element or a `link`/`meta` tag passes through
//! byte-for-byte, so the cleaned document stays renderable as-is.

/// Character budget for sanitized content of archived (trashed) mail.
pub const ARCHIVED_CONTENT_CAP: usize = 10_000;

/// Elements removed together with their content.
const STRIPPED_CONTAINERS: &[&str] = &["script", "style"];

/// Void tags removed on their own; they carry no renderable content.
const STRIPPED_VOIDS: &[&str] = &["link", "meta"];

/// Removes script and style elements (including their content) and link
/// and meta tags, preserving all other markup and text verbatim.
pub fn clean_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        rest = &rest[lt..];

        match strip_length(rest) {
            Some(consumed) => rest = &rest[consumed..],
            None => {
                out.push('<');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

/// Applies the archive budget: the first [`ARCHIVED_CONTENT_CAP`]
/// characters of cleaned markup. Active mail is never passed through here.
pub fn cap_archived(html: &str) -> String {
    if html.chars().count() <= ARCHIVED_CONTENT_CAP {
        return html.to_string();
    }
    html.chars().take(ARCHIVED_CONTENT_CAP).collect()
}

/// If `s` (starting at `<`) opens a stripped tag, returns how many bytes
/// to drop; `None` means the `<` belongs to markup that is kept.
fn strip_length(s: &str) -> Option<usize> {
    let name = open_tag_name(s)?;

    if STRIPPED_CONTAINERS.contains(&name.as_str()) {
        let tag_end = tag_end(s).unwrap_or(s.len());
        // A self-closed container has no content to skip.
        if s[..tag_end].trim_end_matches('>').trim_end().ends_with('/') {
            return Some(tag_end);
        }
        return Some(closing_tag_end(s, tag_end, &name).unwrap_or(s.len()));
    }

    if STRIPPED_VOIDS.contains(&name.as_str()) {
        return Some(tag_end(s).unwrap_or(s.len()));
    }

    None
}

/// Lowercased name of an opening tag at the start of `s`, or `None` for
/// closing tags, comments, doctypes, and stray `<` characters.
fn open_tag_name(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut end = 1;
    while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
        end += 1;
    }
    if end == 1 {
        return None;
    }

    // The name must terminate the way a real tag does, otherwise
    // `<scripty>` would be mistaken for `<script>`.
    match bytes.get(end).copied() {
        Some(b'>') | Some(b'/') | None => {}
        Some(c) if c.is_ascii_whitespace() => {}
        Some(_) => return None,
    }

    Some(s[1..end].to_ascii_lowercase())
}

/// Index just past the `>` closing the tag at the start of `s`. Quoted
/// attribute values may contain `>` and are skipped over.
fn tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, b) in s.bytes().enumerate() {
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(i + 1),
                _ => {}
            },
        }
    }
    None
}

/// Index just past the `>` of `</name>` for the container opened at the
/// start of `s`, searching from `from`. Tag names match case-insensitively.
fn closing_tag_end(s: &str, from: usize, name: &str) -> Option<usize> {
    let needle = format!("</{name}");
    let mut search_start = from;

    while let Some(offset) = find_ascii_ci(&s[search_start..], &needle) {
        let close_start = search_start + offset;
        let after_name = close_start + needle.len();
        let tail = s[after_name..].trim_start();
        if tail.starts_with('>') {
            let gt = s[after_name..].find('>').map(|i| after_name + i + 1);
            return gt;
        }
        // `</scriptx` or similar: keep looking.
        search_start = close_start + 1;
    }

    None
}

fn find_ascii_ci(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.as_bytes();
    let n = needle.as_bytes();
    if n.is_empty() || n.len() > h.len() {
        return None;
    }
    (0..=h.len() - n.len()).find(|&i| h[i..i + n.len()].eq_ignore_ascii_case(n))
}
