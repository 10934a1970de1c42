//! Generic `tag=value|tag=value` parser used by the nginx access pipeline.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Integer,
    Float,
}

/// A registry of recognized tags: lowercased tag → expanded field name and
/// value type. Unregistered tags pass through unchanged as strings.
#[derive(Debug, Clone, Default)]
pub struct CompactKv {
    names: HashMap<String, String>,
    types: HashMap<String, ValueType>,
}

impl CompactKv {
    pub fn new() -> Self {
        CompactKv::default()
    }

    pub fn add(&mut self, tag: &str, name: &str, typ: ValueType) {
        let tag = tag.to_ascii_lowercase();
        self.names.insert(tag.clone(), name.to_owned());
        self.types.insert(tag, typ);
    }

    /// Split `str` on `|`, then each item on the first `=`. Whitespace
    /// around tag/value is trimmed; items missing `=` or with an empty
    /// tag/value are skipped.
    pub fn parse(&self, raw: &str) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        for item in raw.split('|') {
            let Some((tag_part, val_part)) = item.split_once('=') else {
                continue;
            };
            let tag = tag_part.trim().to_ascii_lowercase();
            let val = val_part.trim();
            if tag.is_empty() || val.is_empty() {
                continue;
            }
            let name = self.names.get(&tag).cloned().unwrap_or_else(|| tag.clone());
            match self.types.get(&tag) {
                Some(ValueType::Integer) => {
                    let parsed: i64 = val.parse().unwrap_or(0);
                    out.insert(name, Value::from(parsed));
                }
                Some(ValueType::Float) => {
                    let parsed: f64 = val.parse().unwrap_or(0.0);
                    out.insert(name, Value::from(parsed));
                }
                _ => {
                    out.insert(name, Value::String(val.to_owned()));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_types_with_whitespace() {
        let mut ckv = CompactKv::new();
        ckv.add("r", "request", ValueType::String);
        ckv.add("s", "status", ValueType::Integer);
        ckv.add("rt", "request_time", ValueType::Integer);
        ckv.add("ra", "remote_addr", ValueType::String);
        ckv.add("ft", "float_test", ValueType::Float);

        let m = ckv.parse("  r = hello|  s = 300|  rt= 34| ra = world | zz=145 | | ft = 0.22");
        assert_eq!(m["request"], Value::String("hello".into()));
        assert_eq!(m["status"], Value::from(300));
        assert_eq!(m["request_time"], Value::from(34));
        assert_eq!(m["remote_addr"], Value::String("world".into()));
        assert_eq!(m["zz"], Value::String("145".into()));
        assert_eq!(m["float_test"], Value::from(0.22));
    }
}
