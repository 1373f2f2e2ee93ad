//! Cache Statistics Module
//!
//! Parses the store's `INFO` diagnostic report into structured maps.

use std::collections::BTreeMap;

/// Section name used for pairs that appear before any `# Section` header.
const DEFAULT_SECTION: &str = "default";

// == Info Parser ==
/// Parser for newline-delimited `# Section` / `key:value` reports.
pub struct InfoParser;

impl InfoParser {
    /// Flattens a report into one map.
    ///
    /// The map starts from `known`, the cache's own info, and is annotated
    /// with every `key:value` pair from the report. Keys already present in
    /// `known` keep their value. Lines without a separator are skipped.
    pub fn parse(known: &BTreeMap<String, String>, raw: &str) -> BTreeMap<String, String> {
        let mut info = known.clone();
        for (key, value) in raw.lines().filter_map(parse_pair) {
            info.entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }
        info
    }

    /// Groups the report's pairs by section, keyed by lowercased section name.
    pub fn parse_sections(raw: &str) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut current = DEFAULT_SECTION.to_string();

        for line in raw.lines() {
            let line = line.trim();
            if let Some(header) = line.strip_prefix('#') {
                let header = header.trim();
                if !header.is_empty() {
                    current = header.to_lowercase();
                }
                continue;
            }
            if let Some((key, value)) = parse_pair(line) {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.to_string(), value.to_string());
            }
        }
        sections
    }
}

fn parse_pair(line: &str) -> Option<(&str, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    (!key.is_empty()).then_some((key, value.trim()))
}
