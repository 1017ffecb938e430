//! Share link codec
//!
//! ```text
//! <base_url>/share/<fileId>#k=<percent-encoded base64 key>
//! ```
//!
//! The key only ever travels in the fragment. Fragments are not part of an
//! HTTP request, so building or following a link never hands the key to a
//! server. Nothing in this module accepts a key from a network response.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use secrecy::ExposeSecret;
use tracing::debug;
use url::Url;

use fdrive_core::config::ShareConfig;
use fdrive_core::{FdriveResult, ShareRecord};
use fdrive_crypto::FileKey;

/// Fragment parameter written by [`encode_link`]
pub const KEY_PARAM: &str = "k";
/// Every fragment parameter name that carries a key
pub const KEY_PARAM_ALIASES: [&str; 2] = ["k", "key"];

/// Same escaping as JavaScript's `encodeURIComponent`
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// `<base_url>/share/<file_id>`
pub fn share_url(base_url: &str, file_id: &str) -> String {
    format!(
        "{}/share/{}",
        base_url.trim().trim_end_matches('/'),
        utf8_percent_encode(file_id, COMPONENT)
    )
}

/// Canonical share URL, with the key appended as a fragment when given.
pub fn encode_link(base_url: &str, file_id: &str, key: Option<&FileKey>) -> String {
    append_key(share_url(base_url, file_id), key)
}

/// Link for a stored record: its `shortUrl` when set, else the canonical URL.
/// The key is embedded only for encrypted records.
pub fn link_for_record(share: &ShareConfig, record: &ShareRecord, key: Option<&FileKey>) -> String {
    let base = match record.short_url.as_deref().map(str::trim) {
        Some(short) if !short.is_empty() => short.to_string(),
        _ => share_url(share.normalized_base_url(), &record.id),
    };
    let key = if record.is_encrypted { key } else { None };
    append_key(base, key)
}

fn append_key(mut link: String, key: Option<&FileKey>) -> String {
    if let Some(key) = key {
        // A short url may already carry a fragment; the key replaces it
        if let Some(pos) = link.find('#') {
            link.truncate(pos);
        }
        let encoded = key.to_base64();
        link.push('#');
        link.push_str(KEY_PARAM);
        link.push('=');
        link.extend(utf8_percent_encode(encoded.expose_secret(), COMPONENT));
    }
    link
}

/// Pull a key out of a fragment such as `k=...` or `#a=1&key=...`.
///
/// `None` covers every "no usable key here" case: no fragment, no key
/// parameter, an empty value, or a value that is not a 32-byte base64 key.
pub fn decode_link_fragment(fragment: &str) -> Option<FileKey> {
    let value = fragment_key_value(fragment)?;
    match FileKey::from_base64(&value) {
        Ok(key) => Some(key),
        Err(e) => {
            debug!("link fragment carries no usable key: {e}");
            None
        }
    }
}

/// Key carried by a full share link, if any.
pub fn decode_link(link: &str) -> Option<FileKey> {
    let (_, fragment) = link.split_once('#')?;
    decode_link_fragment(fragment)
}

/// A share link taken apart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    pub file_id: String,
    pub key: Option<FileKey>,
}

/// Accept a full share link, a `/share/<id>` path, or a bare file id.
pub fn parse_share_link(input: &str) -> Option<ParsedLink> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let (without_fragment, fragment) = match input.split_once('#') {
        Some((head, frag)) => (head, Some(frag)),
        None => (input, None),
    };

    let path = match Url::parse(without_fragment) {
        Ok(url) => url.path().to_string(),
        Err(_) => without_fragment.to_string(),
    };
    let path = path.split('?').next().unwrap_or_default();

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let raw_id = match segments.as_slice() {
        [id] if *id != "share" => *id,
        [.., "share", id] => *id,
        _ => return None,
    };
    let file_id = percent_decode_str(raw_id).decode_utf8().ok()?.into_owned();
    if file_id.is_empty() {
        return None;
    }

    Some(ParsedLink {
        file_id,
        key: fragment.and_then(decode_link_fragment),
    })
}

/// Normalise a key typed or pasted by a person.
///
/// Blank input is `Ok(None)`, anything else must decode to a key.
pub fn normalize_manual_key(input: &str) -> FdriveResult<Option<FileKey>> {
    let normalized = normalize_key_text(input);
    if normalized.is_empty() {
        return Ok(None);
    }
    FileKey::from_base64(&normalized).map(Some)
}

fn fragment_key_value(fragment: &str) -> Option<String> {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    if fragment.is_empty() {
        return None;
    }

    let pair = fragment.split('&').find(|pair| {
        KEY_PARAM_ALIASES
            .iter()
            .any(|name| pair.strip_prefix(name).is_some_and(|rest| rest.starts_with('=')))
    })?;
    let raw = pair.split_once('=').map(|(_, v)| v).unwrap_or_default();

    let decoded = match percent_decode_str(raw).decode_utf8() {
        Ok(text) => text.into_owned(),
        Err(_) => raw.to_string(),
    };
    let normalized = normalize_key_text(&decoded);
    (!normalized.is_empty()).then_some(normalized)
}

/// Trim, then turn every whitespace run back into the `+` it most likely was.
fn normalize_key_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join("+")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdrive_crypto::generate_file_key;

    fn record(id: &str, encrypted: bool) -> ShareRecord {
        ShareRecord {
            id: id.into(),
            is_encrypted: encrypted,
            ..Default::default()
        }
    }

    /// Base64 "Afv7+/v7...+/s=": many `+`, none at either end
    fn plus_heavy_key() -> FileKey {
        let mut bytes = [0xFB; 32];
        bytes[0] = 0x01;
        FileKey::from_bytes(bytes)
    }

    #[test]
    fn test_encode_without_key() {
        assert_eq!(
            encode_link("https://drive.example.com/", "abc123", None),
            "https://drive.example.com/share/abc123"
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = generate_file_key().unwrap();
        let link = encode_link("https://drive.example.com", "abc123", Some(&key));
        assert!(link.starts_with("https://drive.example.com/share/abc123#k="));
        assert_eq!(decode_link(&link), Some(key));
    }

    #[test]
    fn test_key_stays_out_of_request_parts() {
        let key = FileKey::from_bytes([0xFB; 32]);
        let link = encode_link("https://drive.example.com", "abc", Some(&key));
        let url = Url::parse(&link).unwrap();

        assert_eq!(url.query(), None);
        assert_eq!(url.path(), "/share/abc");
        // `+`, `/` and `=` are escaped inside the fragment
        let fragment = url.fragment().unwrap();
        assert!(fragment.starts_with("k="));
        assert!(!fragment[2..].contains('+'));
        assert!(!fragment[2..].contains('='));
    }

    #[test]
    fn test_decode_aliases() {
        let key = generate_file_key().unwrap();
        let b64 = key.to_base64().expose_secret().to_string();
        let encoded: String = utf8_percent_encode(&b64, COMPONENT).collect();

        assert_eq!(decode_link_fragment(&format!("k={encoded}")), Some(key.clone()));
        assert_eq!(decode_link_fragment(&format!("#key={encoded}")), Some(key.clone()));
        assert_eq!(
            decode_link_fragment(&format!("x=1&key={encoded}&y=2")),
            Some(key.clone())
        );
        // Unencoded value with trailing `=` padding
        assert_eq!(decode_link_fragment(&format!("k={b64}")), Some(key));
    }

    #[test]
    fn test_decode_plus_mangled_to_space() {
        let key = plus_heavy_key();
        let b64 = key.to_base64().expose_secret().to_string();
        let mangled = b64.replace('+', " ");
        assert_eq!(decode_link_fragment(&format!("k={mangled}")), Some(key.clone()));
        let mangled_escaped = b64.replace('+', "%20");
        assert_eq!(decode_link_fragment(&format!("k={mangled_escaped}")), Some(key));
    }

    #[test]
    fn test_bad_percent_escape_falls_back_to_raw() {
        let key = FileKey::from_bytes([0x11; 32]);
        let b64 = key.to_base64().expose_secret().to_string();
        // %FF is not valid UTF-8; the raw value still holds a valid key
        let frag = format!("k={b64}%FF");
        assert_eq!(fragment_key_value(&frag), Some(format!("{b64}%FF")));
        assert_eq!(decode_link_fragment(&format!("k={b64}")), Some(key));
    }

    #[test]
    fn test_decode_absent_or_malformed() {
        assert_eq!(decode_link_fragment(""), None);
        assert_eq!(decode_link_fragment("#"), None);
        assert_eq!(decode_link_fragment("other=1"), None);
        assert_eq!(decode_link_fragment("kk=abc"), None);
        assert_eq!(decode_link_fragment("k="), None);
        assert_eq!(decode_link_fragment("k=%20%20"), None);
        assert_eq!(decode_link_fragment("k=dG9vc2hvcnQ="), None);
        assert_eq!(decode_link("https://drive.example.com/share/abc"), None);
    }

    #[test]
    fn test_link_for_record() {
        let share = ShareConfig {
            base_url: "https://drive.example.com/".into(),
            ..Default::default()
        };
        let key = generate_file_key().unwrap();

        let plain = link_for_record(&share, &record("p1", false), Some(&key));
        assert_eq!(plain, "https://drive.example.com/share/p1");

        let encrypted = link_for_record(&share, &record("e1", true), Some(&key));
        assert_eq!(decode_link(&encrypted), Some(key.clone()));

        let mut with_short = record("e2", true);
        with_short.short_url = Some("https://s.example/x".into());
        let link = link_for_record(&share, &with_short, Some(&key));
        assert!(link.starts_with("https://s.example/x#k="));

        with_short.short_url = Some("   ".into());
        let link = link_for_record(&share, &with_short, None);
        assert_eq!(link, "https://drive.example.com/share/e2");
    }

    #[test]
    fn test_link_for_record_always_decodes() {
        // Older config files may still carry a `key_param` entry; it is ignored
        let config: fdrive_core::config::FdriveConfig =
            toml::from_str("[share]\nkey_param = \"secret\"\n").unwrap();
        let key = generate_file_key().unwrap();
        let link = link_for_record(&config.share, &record("f", true), Some(&key));
        assert!(link.contains("#k="));
        assert_eq!(decode_link(&link), Some(key));
    }

    #[test]
    fn test_parse_share_link() {
        let key = generate_file_key().unwrap();
        let link = encode_link("https://drive.example.com", "abc123", Some(&key));

        let parsed = parse_share_link(&link).unwrap();
        assert_eq!(parsed.file_id, "abc123");
        assert_eq!(parsed.key, Some(key));

        let bare = parse_share_link("abc123").unwrap();
        assert_eq!(bare.file_id, "abc123");
        assert_eq!(bare.key, None);

        let path = parse_share_link("/share/xyz").unwrap();
        assert_eq!(path.file_id, "xyz");

        assert!(parse_share_link("").is_none());
        assert!(parse_share_link("https://drive.example.com/files/a/b").is_none());
    }

    #[test]
    fn test_normalize_manual_key() {
        let key = plus_heavy_key();
        let b64 = key.to_base64().expose_secret().to_string();

        assert_eq!(normalize_manual_key("   ").unwrap(), None);
        assert_eq!(normalize_manual_key(&format!("  {b64}\n")).unwrap(), Some(key.clone()));
        assert_eq!(
            normalize_manual_key(&b64.replace('+', " ")).unwrap(),
            Some(key)
        );
        assert!(normalize_manual_key("nope").is_err());
    }
}

#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fragment_roundtrip(bytes in any::<[u8; 32]>(), id in "[A-Za-z0-9]{1,20}") {
            let key = FileKey::from_bytes(bytes);
            let link = encode_link("https://drive.example.com", &id, Some(&key));
            let (_, fragment) = link.split_once('#').unwrap();
            prop_assert_eq!(decode_link_fragment(fragment), Some(key));
        }

        #[test]
        fn link_without_key_decodes_to_none(id in "[A-Za-z0-9]{1,20}") {
            let link = encode_link("https://drive.example.com", &id, None);
            prop_assert_eq!(decode_link(&link), None);
            let parsed = parse_share_link(&link).unwrap();
            prop_assert_eq!(parsed.file_id, id);
        }
    }
}
