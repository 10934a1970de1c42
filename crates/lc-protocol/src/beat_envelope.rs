//! The shipper envelope as pushed onto the redis-dialect ingress: one
//! line of filebeat-shaped JSON per value.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeatHostname {
    #[serde(default)]
    pub hostname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fileset {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub name: String,
}

/// JSON-on-the-wire shipper envelope (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeatEnvelope {
    #[serde(default)]
    pub beat: BeatHostname,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub fileset: Fileset,
}

/// env/topic/project decoded from `source`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceParts {
    pub env: String,
    pub topic: String,
    pub project: String,
}

impl BeatEnvelope {
    /// Split `source` on `/`: if the last non-empty path component is
    /// dot-separated with at least 4 fields, the first three fields of
    /// that component are env/topic/project; otherwise the last three
    /// non-empty path components are env/topic/project. The project
    /// field is further truncated at its first dot.
    pub fn source_parts(&self) -> Option<SourceParts> {
        let components: Vec<&str> = self.source.split('/').filter(|s| !s.is_empty()).collect();
        let last = *components.last()?;
        let dot_fields: Vec<&str> = last.split('.').collect();
        let (env, topic, mut project) = if dot_fields.len() >= 4 {
            (
                dot_fields[0].to_owned(),
                dot_fields[1].to_owned(),
                dot_fields[2].to_owned(),
            )
        } else {
            if components.len() < 3 {
                return None;
            }
            let n = components.len();
            (
                components[n - 3].to_owned(),
                components[n - 2].to_owned(),
                components[n - 1].to_owned(),
            )
        };
        if let Some(idx) = project.find('.') {
            project.truncate(idx);
        }
        Some(SourceParts { env, topic, project })
    }
}
