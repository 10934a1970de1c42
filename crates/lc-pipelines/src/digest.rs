//! Path normalization: collapse numeric/hex/uuid/version path segments into
//! placeholder tokens so similar request paths group together.
//!
//! Ported from the pre-existing `digestPath` helper (`core/utils.go`); not
//! wired into any pipeline here (its original caller is an output this
//! daemon doesn't implement) but kept public since the behavior is
//! exercised directly. `:version` has no counterpart in the Go source —
//! it's a behavior the distilled spec names explicitly (§8 S5).

fn is_dec(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '-')
}

fn is_hex(s: &str) -> bool {
    matches!(s.len(), 16 | 32 | 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_uuid(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    let joined: String = [
        &s[0..8],
        &s[9..13],
        &s[14..18],
        &s[19..23],
        &s[24..36],
    ]
    .concat();
    is_hex(&joined)
}

/// A dotted version string: two or more numeric components, e.g. `11.2.3`.
fn is_version(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() >= 2 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Replace numeric, hex, UUID and dotted-version path segments with
/// `:dec`/`:hex`/`:uuid`/`:version` placeholders. A segment containing a
/// comma is always treated as numeric (a comma-joined list of ids). Paths
/// with no `/` are returned unchanged; empty segments (leading/trailing/
/// doubled slashes) are dropped and the result is always re-prefixed with
/// a single `/`.
pub fn digest_path(p: &str) -> String {
    if p.is_empty() {
        return p.to_owned();
    }
    let segments: Vec<&str> = p.split('/').collect();
    if segments.len() == 1 {
        return p.to_owned();
    }
    let mut out = Vec::with_capacity(segments.len());
    for item in segments {
        if item.is_empty() {
            continue;
        }
        let replaced = if item.contains(',') || is_dec(item) {
            ":dec"
        } else if is_hex(item) {
            ":hex"
        } else if is_uuid(item) {
            ":uuid"
        } else if is_version(item) {
            ":version"
        } else {
            item
        };
        out.push(replaced);
    }
    format!("/{}", out.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_slash() {
        assert_eq!(digest_path("//hello//world/"), "/hello/world");
    }

    #[test]
    fn clean_number() {
        assert_eq!(
            digest_path("//hello/world/-1/223/5333/store"),
            "/hello/world/:dec/:dec/:dec/store"
        );
    }

    #[test]
    fn clean_number_comma() {
        assert_eq!(
            digest_path("//hello/world/-1/223/5333,224,553/store"),
            "/hello/world/:dec/:dec/:dec/store"
        );
    }

    #[test]
    fn clean_hex() {
        assert_eq!(
            digest_path("//hello/world/-1/ee3c5e83670ba40dd80d74d7773e309b/store"),
            "/hello/world/:dec/:hex/store"
        );
    }

    #[test]
    fn no_touch_dubbo_style_name() {
        assert_eq!(digest_path("com.something.else"), "com.something.else");
    }

    #[test]
    fn clean_uuid() {
        assert_eq!(
            digest_path("//v1/goods/detail/126602/1441/85978/A54DC252-5DD6-4128-A8DA-BE13D9D7CBDB"),
            "/v1/goods/detail/:dec/:dec/:dec/:uuid"
        );
    }

    #[test]
    fn clean_version() {
        assert_eq!(
            digest_path("//v1/goods/detail/126602/1441/85978/11.2.3"),
            "/v1/goods/detail/:dec/:dec/:dec/:version"
        );
    }
}
