//! Bracket-marker extraction for logtube-native plain-text messages:
//! `CRID[...]`, `K[...]`, `KW[...]`, `KEYWORD[...]` segments anywhere in
//! the line are pulled out, the `K`/`KW`/`KEYWORD` families combined
//! comma-separated into one keyword string, and what remains (trimmed)
//! becomes the message.

/// Remove every occurrence of `<name>[...]` from `buf`, returning the
/// bracket contents in the order they were found.
fn extract_all(buf: &mut String, name: &str) -> Vec<String> {
    let prefix = format!("{name}[");
    let mut found = Vec::new();
    loop {
        let Some(start) = buf.find(prefix.as_str()) else {
            break;
        };
        let content_start = start + prefix.len();
        let Some(rel_end) = buf[content_start..].find(']') else {
            break;
        };
        let content_end = content_start + rel_end;
        found.push(buf[content_start..content_end].to_owned());
        buf.replace_range(start..content_end + 1, "");
    }
    found
}

/// Extracted marker fields plus the remaining, trimmed message text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMarkers {
    pub crid: Option<String>,
    pub keyword: String,
    pub message: String,
}

pub fn extract_markers(text: &str) -> ExtractedMarkers {
    let mut buf = text.to_owned();

    let crids = extract_all(&mut buf, "CRID");
    let crid = crids.into_iter().next();

    let mut keyword_parts = Vec::new();
    keyword_parts.extend(extract_all(&mut buf, "K"));
    keyword_parts.extend(extract_all(&mut buf, "KW"));
    keyword_parts.extend(extract_all(&mut buf, "KEYWORD"));

    ExtractedMarkers {
        crid,
        keyword: keyword_parts.join(","),
        message: buf.trim().to_owned(),
    }
}
