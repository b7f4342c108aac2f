// Minimal HTML helpers for the registration system's detail page.
// Matching is ASCII case-insensitive on tag and attribute text; elements of
// the same tag are assumed not to nest, which holds for the tables we read.

/// ASCII-only lowercasing. Keeps byte offsets identical to the input.
fn lower(s: &str) -> String {
    s.to_ascii_lowercase()
}

/// Byte range of the next `<tag ...>` opening tag at or after `from`:
/// returns `(start_of_tag, index_of_closing_gt)`.
fn next_open_tag(lc: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let needle = format!("<{tag}");
    let mut pos = from;
    loop {
        let start = lc.get(pos..)?.find(&needle)? + pos;
        let after = start + needle.len();
        // `<th` must not match `<thead`.
        match lc.as_bytes().get(after) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {
                let gt = lc[after..].find('>')? + after;
                return Some((start, gt));
            }
            Some(_) => pos = after,
            None => return None,
        }
    }
}

/// Inner HTML of every `<tag>` element in `html`, in document order.
pub fn elements<'a>(html: &'a str, tag: &str) -> Vec<&'a str> {
    find_elements(html, tag, |_| true)
}

/// Inner HTML of the first `<tag>` element whose opening tag satisfies `attrs`.
/// `attrs` receives the lowercased opening tag text.
pub fn find_element<'a>(html: &'a str, tag: &str, attrs: impl Fn(&str) -> bool) -> Option<&'a str> {
    find_elements(html, tag, attrs).into_iter().next()
}

fn find_elements<'a>(html: &'a str, tag: &str, attrs: impl Fn(&str) -> bool) -> Vec<&'a str> {
    let lc = lower(html);
    let tag = lower(tag);
    let close = format!("</{tag}");

    let mut out = Vec::new();
    let mut pos = 0;
    while let Some((start, gt)) = next_open_tag(&lc, &tag, pos) {
        let inner_start = gt + 1;
        let Some(end) = lc[inner_start..].find(&close).map(|i| i + inner_start) else {
            break;
        };
        if attrs(&lc[start..gt]) {
            out.push(&html[inner_start..end]);
        }
        pos = inner_start;
    }
    out
}

/// Visible text of an HTML fragment: tags removed, `&nbsp;`/`&amp;` decoded,
/// whitespace collapsed and trimmed.
pub fn text(fragment: &str) -> String {
    let mut out = String::with_capacity(fragment.len());
    let mut in_tag = false;
    for ch in fragment.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    normalize_ws(&decode_entities(&out))
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ").replace("&#160;", " ").replace("&amp;", "&")
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
