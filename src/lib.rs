//! Client for the Strato edge compute platform.
//!
//! Scripts are uploaded either as a raw `application/javascript` body or,
//! once bindings or metadata are involved, as a multipart message that is
//! encoded and transmitted concurrently through a bounded in-process pipe,
//! so large payloads never have to fit in memory.

pub mod bindings;
pub mod client;
pub mod error;
pub mod multipart;
pub mod types;

mod serde_utils;

pub use bindings::{BindingBody, BindingDescriptor, ScriptBinding};
pub use client::StratoClient;
pub use error::{Error, Result};
pub use multipart::decode_script_content;
pub use types::{
    CreateScriptParams, FetchedScript, Placement, PlacementMode, ScriptMetadata, ScriptSettings,
    ScriptSource, TailConsumer, Timestamp, UpdateScriptContentParams, UpdateScriptSettingsParams,
};
