//! Key Codec Module
//!
//! Maps logical cache keys to namespace-qualified wire keys.

use super::glob::glob_escape;

/// Wildcard used to enumerate every key of the namespace.
const WILDCARD: &str = "*";

// == Key Codec ==
/// Translates logical keys to wire keys and back.
///
/// Keys are always trimmed and lowercased before they reach the store.
#[derive(Debug, Clone, Default)]
pub struct KeyCodec {
    /// `namespace:` prefix, lowercased
    prefix: Option<String>,
}

impl KeyCodec {
    /// Creates a codec for the given namespace. Blank namespaces are ignored.
    pub fn new(namespace: Option<&str>) -> Self {
        let prefix = namespace
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(|ns| format!("{}:", ns.to_lowercase()));
        Self { prefix }
    }

    /// Returns the logical key in its normalized wire form.
    pub fn encode_str(&self, key: &str) -> String {
        let key = key.trim().to_lowercase();
        match &self.prefix {
            Some(prefix) if !key.starts_with(prefix.as_str()) => format!("{}{}", prefix, key),
            _ => key,
        }
    }

    /// Encodes a logical key to wire bytes.
    pub fn encode(&self, key: &str) -> Vec<u8> {
        self.encode_str(key).into_bytes()
    }

    /// Strips the namespace prefix from a wire key.
    pub fn decode_str(&self, wire: &str) -> String {
        if let Some(prefix) = &self.prefix {
            let matches = wire
                .get(..prefix.len())
                .is_some_and(|head| head.to_lowercase() == *prefix);
            if matches {
                return wire[prefix.len()..].to_string();
            }
        }
        wire.to_string()
    }

    /// Decodes wire bytes to a logical key.
    pub fn decode(&self, wire: &[u8]) -> String {
        self.decode_str(&String::from_utf8_lossy(wire))
    }

    /// Glob pattern matching every wire key of this namespace. Glob syntax
    /// inside the namespace is escaped.
    pub fn wildcard(&self) -> Vec<u8> {
        let prefix = self.prefix.as_deref().map(glob_escape).unwrap_or_default();
        format!("{}{}", prefix, WILDCARD).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_without_namespace() {
        let codec = KeyCodec::new(None);
        assert_eq!(codec.encode_str("  MyKey "), "mykey");
        assert_eq!(codec.wildcard(), b"*".to_vec());
    }

    #[test]
    fn test_encode_with_namespace() {
        let codec = KeyCodec::new(Some("App"));
        assert_eq!(codec.encode_str("Session"), "app:session");
        assert_eq!(codec.wildcard(), b"app:*".to_vec());
    }

    #[test]
    fn test_wildcard_escapes_namespace() {
        let codec = KeyCodec::new(Some("tenant[1]"));
        assert_eq!(codec.wildcard(), br"tenant\[1\]:*".to_vec());
    }

    #[test]
    fn test_encode_keeps_existing_prefix() {
        let codec = KeyCodec::new(Some("app"));
        assert_eq!(codec.encode_str("APP:session"), "app:session");
    }

    #[test]
    fn test_blank_namespace_ignored() {
        let codec = KeyCodec::new(Some("   "));
        assert_eq!(codec.encode_str("key"), "key");
    }

    #[test]
    fn test_decode_strips_prefix_once() {
        let codec = KeyCodec::new(Some("app"));
        assert_eq!(codec.decode_str("app:session"), "session");
        assert_eq!(codec.decode_str("APP:user:app:x"), "user:app:x");
        assert_eq!(codec.decode_str("other:session"), "other:session");
    }

    #[test]
    fn test_decode_non_ascii_boundary() {
        let codec = KeyCodec::new(Some("app"));
        assert_eq!(codec.decode_str("ä"), "ä");
        assert_eq!(codec.decode("日本".as_bytes()), "日本");
    }
}
