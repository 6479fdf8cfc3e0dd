use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::bindings::{BindingDescriptor, ScriptBinding};
use crate::serde_utils;

/// The script body handed to an upload. Streamed sources are copied to the
/// wire chunk by chunk and never fully buffered.
pub enum ScriptSource {
    Text(String),
    Bytes(Vec<u8>),
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl fmt::Debug for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSource::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            ScriptSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ScriptSource::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<String> for ScriptSource {
    fn from(text: String) -> Self {
        ScriptSource::Text(text)
    }
}

impl From<&str> for ScriptSource {
    fn from(text: &str) -> Self {
        ScriptSource::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for ScriptSource {
    fn from(bytes: Vec<u8>) -> Self {
        ScriptSource::Bytes(bytes)
    }
}

/// A script that consumes the logs of another script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailConsumer {
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    Smart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub mode: PlacementMode,
}

/// Parameters for uploading a script, metadata and body together.
///
/// The binding map keys are binding names; iteration order over the map is
/// not guaranteed, so the order of descriptors and body parts on the wire is
/// stable within one upload but not across uploads.
#[derive(Debug, Default)]
pub struct CreateScriptParams {
    pub script_name: String,

    /// Upload into a dispatch namespace instead of the account's main pool.
    pub dispatch_namespace: Option<String>,

    /// The body is an ES module rather than a classic script.
    pub module: bool,

    pub script: Option<ScriptSource>,

    pub bindings: HashMap<String, ScriptBinding>,

    /// Opt the script in or out of log forwarding. `None` leaves the current
    /// setting unchanged.
    pub logpush: Option<bool>,

    pub tail_consumers: Option<Vec<TailConsumer>>,

    /// A date in the form yyyy-mm-dd selecting the runtime version.
    pub compatibility_date: String,

    pub compatibility_flags: Vec<String>,

    pub placement: Option<Placement>,

    pub tags: Vec<String>,
}

impl CreateScriptParams {
    /// True when the upload must be sent as a multipart envelope instead of
    /// a raw `application/javascript` body. Callers can use this to pick
    /// request headers before handing the params to
    /// [`upload_script`](crate::StratoClient::upload_script).
    pub fn requires_multipart(&self) -> bool {
        self.module
            || self.logpush.is_some()
            || self.placement.is_some()
            || !self.bindings.is_empty()
            || !self.compatibility_date.is_empty()
            || !self.compatibility_flags.is_empty()
            || self.tail_consumers.is_some()
            || !self.tags.is_empty()
    }
}

/// Parameters for replacing only the body of an existing script.
#[derive(Debug, Default)]
pub struct UpdateScriptContentParams {
    pub script_name: String,
    pub dispatch_namespace: Option<String>,
    pub module: bool,
    pub script: Option<ScriptSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub SystemTime);

impl<'de> serde::Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let system_time = serde_utils::deserialize_timestamp_rfc3339(deserializer)?;
        Ok(Timestamp(system_time))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", humantime::format_rfc3339_seconds(self.0))
    }
}

/// Server-side metadata describing an uploaded script.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptMetadata {
    pub id: String,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    pub created_on: Timestamp,
    pub modified_on: Timestamp,
    #[serde(default)]
    pub logpush: Option<bool>,
    #[serde(default)]
    pub placement_mode: Option<PlacementMode>,
    #[serde(default)]
    pub tail_consumers: Option<Vec<TailConsumer>>,
    #[serde(default)]
    pub deployment_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListScriptsResponse {
    pub scripts: Vec<ScriptMetadata>,
}

/// A script read back from the service, already decoded from the raw or
/// multipart download shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedScript {
    pub script: String,
    pub module: bool,
}

/// Script settings as stored server-side; bindings travel as their wire
/// descriptors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logpush: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail_consumers: Option<Vec<TailConsumer>>,
    #[serde(default)]
    pub bindings: Vec<BindingDescriptor>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compatibility_date: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compatibility_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
}

/// Parameters for patching script settings without touching the body.
#[derive(Debug, Default)]
pub struct UpdateScriptSettingsParams {
    pub script_name: String,
    pub logpush: Option<bool>,
    pub tail_consumers: Option<Vec<TailConsumer>>,
    pub bindings: HashMap<String, ScriptBinding>,
    pub compatibility_date: String,
    pub compatibility_flags: Vec<String>,
    pub placement: Option<Placement>,
}

impl UpdateScriptSettingsParams {
    /// Settings bindings are inline-only; body-carrying kinds have no wire
    /// representation here and are serialized descriptor-only, matching the
    /// upload metadata.
    pub(crate) fn to_settings(&self) -> ScriptSettings {
        let bindings = self
            .bindings
            .iter()
            .map(|(name, binding)| binding.serialize(name).0)
            .collect();
        ScriptSettings {
            logpush: self.logpush,
            tail_consumers: self.tail_consumers.clone(),
            bindings,
            compatibility_date: self.compatibility_date.clone(),
            compatibility_flags: self.compatibility_flags.clone(),
            placement: self.placement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_params_do_not_require_multipart() {
        let params = CreateScriptParams {
            script_name: "plain".to_owned(),
            script: Some("addEventListener('fetch', () => {})".into()),
            ..Default::default()
        };

        assert!(!params.requires_multipart());
    }

    #[test]
    fn each_metadata_field_forces_multipart() {
        let cases: Vec<(&str, CreateScriptParams)> = vec![
            (
                "module",
                CreateScriptParams {
                    module: true,
                    ..Default::default()
                },
            ),
            (
                "logpush",
                CreateScriptParams {
                    logpush: Some(false),
                    ..Default::default()
                },
            ),
            (
                "placement",
                CreateScriptParams {
                    placement: Some(Placement {
                        mode: PlacementMode::Smart,
                    }),
                    ..Default::default()
                },
            ),
            (
                "bindings",
                CreateScriptParams {
                    bindings: HashMap::from([(
                        "KV".to_owned(),
                        ScriptBinding::KvNamespace {
                            namespace_id: "abc".to_owned(),
                        },
                    )]),
                    ..Default::default()
                },
            ),
            (
                "compatibility_date",
                CreateScriptParams {
                    compatibility_date: "2026-08-01".to_owned(),
                    ..Default::default()
                },
            ),
            (
                "compatibility_flags",
                CreateScriptParams {
                    compatibility_flags: vec!["nodejs_compat".to_owned()],
                    ..Default::default()
                },
            ),
            (
                "tail_consumers",
                CreateScriptParams {
                    tail_consumers: Some(vec![]),
                    ..Default::default()
                },
            ),
            (
                "tags",
                CreateScriptParams {
                    tags: vec!["team-edge".to_owned()],
                    ..Default::default()
                },
            ),
        ];

        for (field, params) in cases {
            assert!(params.requires_multipart(), "{field} should force multipart");
        }
    }

    #[test]
    fn script_metadata_deserializes_timestamps() {
        let json = r#"{
            "id": "billing-worker",
            "etag": "0f6c2d",
            "size": 1024,
            "created_on": "2026-07-01T08:30:00Z",
            "modified_on": "2026-08-01T10:00:00Z",
            "logpush": true,
            "tags": ["team-edge"]
        }"#;

        let metadata: ScriptMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(metadata.id, "billing-worker");
        assert_eq!(metadata.created_on.to_string(), "2026-07-01T08:30:00Z");
        assert!(metadata.created_on < metadata.modified_on);
        assert_eq!(metadata.tags, vec!["team-edge".to_owned()]);
    }

    #[test]
    fn settings_params_serialize_bindings_as_descriptors() {
        let params = UpdateScriptSettingsParams {
            script_name: "billing-worker".to_owned(),
            logpush: Some(true),
            bindings: HashMap::from([(
                "SESSIONS".to_owned(),
                ScriptBinding::KvNamespace {
                    namespace_id: "ns-1".to_owned(),
                },
            )]),
            ..Default::default()
        };

        let value = serde_json::to_value(params.to_settings()).unwrap();
        assert_eq!(value["logpush"], true);
        assert_eq!(value["bindings"][0]["name"], "SESSIONS");
        assert_eq!(value["bindings"][0]["type"], "kv_namespace");
        assert_eq!(value["bindings"][0]["namespace_id"], "ns-1");
    }
}
