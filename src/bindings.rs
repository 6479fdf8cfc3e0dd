use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const KIND_KV_NAMESPACE: &str = "kv_namespace";
pub const KIND_PLAIN_TEXT: &str = "plain_text";
pub const KIND_SECRET_TEXT: &str = "secret_text";
pub const KIND_DURABLE_OBJECT_NAMESPACE: &str = "durable_object_namespace";
pub const KIND_SERVICE: &str = "service";
pub const KIND_QUEUE: &str = "queue";
pub const KIND_BUCKET: &str = "bucket";
pub const KIND_WASM_MODULE: &str = "wasm_module";
pub const KIND_TEXT_BLOB: &str = "text_blob";
pub const KIND_DATA_BLOB: &str = "data_blob";
pub const KIND_INHERIT: &str = "inherit";

/// One named resource attached to a script.
///
/// Most kinds are fully described by the scalar fields of their descriptor.
/// `WasmModule`, `TextBlob` and `DataBlob` additionally carry a body that is
/// too large to inline into the metadata JSON; it travels as a separate wire
/// part named after the binding, and the descriptor references that part.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptBinding {
    /// Key-value store namespace.
    KvNamespace { namespace_id: String },
    /// Plain configuration text, inlined into the descriptor.
    PlainText { text: String },
    /// Secret text; write-only server-side.
    SecretText { text: String },
    /// Stateful object namespace backed by a class exported from a script.
    DurableObjectNamespace {
        class_name: String,
        script_name: Option<String>,
    },
    /// Call into another deployed script.
    Service {
        service: String,
        environment: Option<String>,
    },
    Queue { queue_name: String },
    Bucket { bucket_name: String },
    /// A compiled wasm module, uploaded as its own part.
    WasmModule { module: Vec<u8> },
    /// Arbitrary text uploaded as its own part.
    TextBlob { text: String },
    /// Arbitrary bytes uploaded as its own part.
    DataBlob { data: Vec<u8> },
    /// Keep the previously uploaded binding of this name (optionally renamed
    /// from `old_name`).
    Inherit { old_name: Option<String> },
}

/// The flat JSON record describing one binding inside the metadata part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_name: Option<String>,
}

/// A deferred body part produced alongside a descriptor. The encoder appends
/// these after the script part, in descriptor order.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingBody {
    pub part_name: String,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

impl ScriptBinding {
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptBinding::KvNamespace { .. } => KIND_KV_NAMESPACE,
            ScriptBinding::PlainText { .. } => KIND_PLAIN_TEXT,
            ScriptBinding::SecretText { .. } => KIND_SECRET_TEXT,
            ScriptBinding::DurableObjectNamespace { .. } => KIND_DURABLE_OBJECT_NAMESPACE,
            ScriptBinding::Service { .. } => KIND_SERVICE,
            ScriptBinding::Queue { .. } => KIND_QUEUE,
            ScriptBinding::Bucket { .. } => KIND_BUCKET,
            ScriptBinding::WasmModule { .. } => KIND_WASM_MODULE,
            ScriptBinding::TextBlob { .. } => KIND_TEXT_BLOB,
            ScriptBinding::DataBlob { .. } => KIND_DATA_BLOB,
            ScriptBinding::Inherit { .. } => KIND_INHERIT,
        }
    }

    /// Build the wire descriptor for this binding, plus the deferred body
    /// part for kinds whose payload travels out of band.
    pub fn serialize(&self, name: &str) -> (BindingDescriptor, Option<BindingBody>) {
        let descriptor = BindingDescriptor {
            name: name.to_owned(),
            kind: self.kind().to_owned(),
            ..Default::default()
        };

        match self {
            ScriptBinding::KvNamespace { namespace_id } => (
                BindingDescriptor {
                    namespace_id: Some(namespace_id.clone()),
                    ..descriptor
                },
                None,
            ),
            ScriptBinding::PlainText { text } | ScriptBinding::SecretText { text } => (
                BindingDescriptor {
                    text: Some(text.clone()),
                    ..descriptor
                },
                None,
            ),
            ScriptBinding::DurableObjectNamespace {
                class_name,
                script_name,
            } => (
                BindingDescriptor {
                    class_name: Some(class_name.clone()),
                    script_name: script_name.clone(),
                    ..descriptor
                },
                None,
            ),
            ScriptBinding::Service {
                service,
                environment,
            } => (
                BindingDescriptor {
                    service: Some(service.clone()),
                    environment: environment.clone(),
                    ..descriptor
                },
                None,
            ),
            ScriptBinding::Queue { queue_name } => (
                BindingDescriptor {
                    queue_name: Some(queue_name.clone()),
                    ..descriptor
                },
                None,
            ),
            ScriptBinding::Bucket { bucket_name } => (
                BindingDescriptor {
                    bucket_name: Some(bucket_name.clone()),
                    ..descriptor
                },
                None,
            ),
            ScriptBinding::WasmModule { module } => (
                BindingDescriptor {
                    part: Some(name.to_owned()),
                    ..descriptor
                },
                Some(BindingBody {
                    part_name: name.to_owned(),
                    content_type: "application/wasm",
                    content: module.clone(),
                }),
            ),
            ScriptBinding::TextBlob { text } => (
                BindingDescriptor {
                    part: Some(name.to_owned()),
                    ..descriptor
                },
                Some(BindingBody {
                    part_name: name.to_owned(),
                    content_type: "text/plain",
                    content: text.clone().into_bytes(),
                }),
            ),
            ScriptBinding::DataBlob { data } => (
                BindingDescriptor {
                    part: Some(name.to_owned()),
                    ..descriptor
                },
                Some(BindingBody {
                    part_name: name.to_owned(),
                    content_type: "application/octet-stream",
                    content: data.clone(),
                }),
            ),
            ScriptBinding::Inherit { old_name } => (
                BindingDescriptor {
                    old_name: old_name.clone(),
                    ..descriptor
                },
                None,
            ),
        }
    }
}

impl BindingDescriptor {
    /// Parse a descriptor read back from the service into a typed binding.
    ///
    /// Body-carrying kinds come back descriptor-only (the service does not
    /// return part contents), so they parse to empty bodies. An unknown
    /// `type` tag fails with [`Error::InvalidBindingKind`].
    pub fn into_binding(self) -> Result<(String, ScriptBinding)> {
        let binding = match self.kind.as_str() {
            KIND_KV_NAMESPACE => ScriptBinding::KvNamespace {
                namespace_id: self.namespace_id.unwrap_or_default(),
            },
            KIND_PLAIN_TEXT => ScriptBinding::PlainText {
                text: self.text.unwrap_or_default(),
            },
            KIND_SECRET_TEXT => ScriptBinding::SecretText {
                text: self.text.unwrap_or_default(),
            },
            KIND_DURABLE_OBJECT_NAMESPACE => ScriptBinding::DurableObjectNamespace {
                class_name: self.class_name.unwrap_or_default(),
                script_name: self.script_name,
            },
            KIND_SERVICE => ScriptBinding::Service {
                service: self.service.unwrap_or_default(),
                environment: self.environment,
            },
            KIND_QUEUE => ScriptBinding::Queue {
                queue_name: self.queue_name.unwrap_or_default(),
            },
            KIND_BUCKET => ScriptBinding::Bucket {
                bucket_name: self.bucket_name.unwrap_or_default(),
            },
            KIND_WASM_MODULE => ScriptBinding::WasmModule { module: Vec::new() },
            KIND_TEXT_BLOB => ScriptBinding::TextBlob {
                text: String::new(),
            },
            KIND_DATA_BLOB => ScriptBinding::DataBlob { data: Vec::new() },
            KIND_INHERIT => ScriptBinding::Inherit {
                old_name: self.old_name,
            },
            other => return Err(Error::InvalidBindingKind(other.to_owned())),
        };
        Ok((self.name, binding))
    }
}
