use mime::Mime;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::bindings::BindingDescriptor;
use crate::error::{Error, Result};
use crate::types::{CreateScriptParams, Placement, ScriptSource, TailConsumer};

pub(crate) const SCRIPT_PART_NAME: &str = "script";
pub(crate) const MODULE_PART_NAME: &str = "worker.mjs";

pub(crate) const CLASSIC_CONTENT_TYPE: &str = "application/javascript";
pub(crate) const MODULE_CONTENT_TYPE: &str = "application/javascript+module";

const COPY_CHUNK_SIZE: usize = 16 * 1024;

pub(crate) fn generate_boundary() -> String {
    format!("strato-{}", Uuid::new_v4().simple())
}

pub(crate) fn form_data_content_type(boundary: &str) -> String {
    format!("multipart/form-data; boundary={boundary}")
}

/// Incremental writer for one multipart/form-data message. Parts are written
/// in call order; `finish` writes the closing boundary and shuts the sink
/// down so a reader on the other side of a pipe always sees end-of-stream.
pub(crate) struct MultipartWriter<W> {
    writer: W,
    boundary: String,
    in_part: bool,
}

impl<W: AsyncWrite + Unpin> MultipartWriter<W> {
    pub(crate) fn new(writer: W, boundary: impl Into<String>) -> Self {
        Self {
            writer,
            boundary: boundary.into(),
            in_part: false,
        }
    }

    pub(crate) async fn begin_part(
        &mut self,
        name: &str,
        filename: Option<&str>,
        content_type: &str,
    ) -> std::io::Result<()> {
        let mut header = String::new();
        if self.in_part {
            header.push_str("\r\n");
        }
        header.push_str("--");
        header.push_str(&self.boundary);
        header.push_str("\r\n");
        match filename {
            Some(filename) => header.push_str(&format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
            )),
            None => {
                header.push_str(&format!("Content-Disposition: form-data; name=\"{name}\"\r\n"))
            }
        }
        header.push_str(&format!("Content-Type: {content_type}\r\n\r\n"));

        self.writer.write_all(header.as_bytes()).await?;
        self.in_part = true;
        Ok(())
    }

    pub(crate) async fn write(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(chunk).await
    }

    pub(crate) async fn finish(mut self) -> std::io::Result<()> {
        let mut trailer = String::new();
        if self.in_part {
            trailer.push_str("\r\n");
        }
        trailer.push_str(&format!("--{}--\r\n", self.boundary));

        self.writer.write_all(trailer.as_bytes()).await?;
        self.writer.shutdown().await
    }
}

#[derive(Serialize)]
struct UploadMetadata<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    body_part: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    main_module: Option<&'a str>,
    bindings: &'a [BindingDescriptor],
    #[serde(skip_serializing_if = "Option::is_none")]
    logpush: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tail_consumers: Option<&'a [TailConsumer]>,
    #[serde(skip_serializing_if = "str::is_empty")]
    compatibility_date: &'a str,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    compatibility_flags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    placement: Option<&'a Placement>,
    tags: &'a [String],
}

/// Encode the whole upload message into `writer`: metadata part, script
/// part, then one body part per binding that carries one, in descriptor
/// order. The closing boundary is written and the writer shut down on every
/// exit path, so a pipe reader downstream is never left waiting.
pub(crate) async fn encode_script_message<W>(
    params: CreateScriptParams,
    writer: W,
    boundary: &str,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut message = MultipartWriter::new(writer, boundary);
    let written = write_script_message(&mut message, params).await;
    let finished = message.finish().await.map_err(Error::from);
    written.and(finished)
}

async fn write_script_message<W>(
    message: &mut MultipartWriter<W>,
    params: CreateScriptParams,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let CreateScriptParams {
        module,
        script,
        bindings,
        logpush,
        tail_consumers,
        compatibility_date,
        compatibility_flags,
        placement,
        tags,
        ..
    } = params;

    let mut descriptors = Vec::with_capacity(bindings.len());
    let mut bodies = Vec::new();
    for (name, binding) in &bindings {
        let (descriptor, body) = binding.serialize(name);
        descriptors.push(descriptor);
        bodies.extend(body);
    }

    let script_part = if module {
        MODULE_PART_NAME
    } else {
        SCRIPT_PART_NAME
    };
    tracing::trace!(
        bindings = descriptors.len(),
        body_parts = bodies.len(),
        module,
        "encoding script message"
    );

    let metadata = UploadMetadata {
        body_part: (!module).then_some(script_part),
        main_module: module.then_some(script_part),
        bindings: &descriptors,
        logpush,
        tail_consumers: tail_consumers.as_deref(),
        compatibility_date: &compatibility_date,
        compatibility_flags: &compatibility_flags,
        placement: placement.as_ref(),
        tags: &tags,
    };
    let metadata_json = serde_json::to_vec(&metadata).map_err(std::io::Error::from)?;
    message
        .begin_part("metadata", None, "application/json")
        .await?;
    message.write(&metadata_json).await?;

    let content_type = if module {
        MODULE_CONTENT_TYPE
    } else {
        CLASSIC_CONTENT_TYPE
    };
    message
        .begin_part(script_part, module.then_some(script_part), content_type)
        .await?;
    match script {
        Some(ScriptSource::Text(text)) => message.write(text.as_bytes()).await?,
        Some(ScriptSource::Bytes(bytes)) => message.write(&bytes).await?,
        Some(ScriptSource::Stream(mut reader)) => {
            let mut buf = vec![0u8; COPY_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                message.write(&buf[..n]).await?;
            }
        }
        None => return Err(Error::UnreadablePayload),
    }

    for body in bodies {
        message
            .begin_part(&body.part_name, None, body.content_type)
            .await?;
        message.write(&body.content).await?;
    }

    Ok(())
}

/// Decode a downloaded script. A `multipart/*` response is a module script
/// whose text is the first part's body; anything else is a classic script
/// sent verbatim. Returns the script text and whether it is a module.
pub fn decode_script_content(content_type: Option<&str>, body: &[u8]) -> Result<(String, bool)> {
    let media_type = content_type.and_then(|value| value.parse::<Mime>().ok());
    match media_type {
        Some(media_type) if media_type.type_() == mime::MULTIPART => {
            let boundary = media_type.get_param(mime::BOUNDARY).ok_or_else(|| {
                Error::MalformedMultipart("missing boundary parameter".to_owned())
            })?;
            let part = first_part_body(body, boundary.as_str())?;
            Ok((String::from_utf8_lossy(part).into_owned(), true))
        }
        _ => Ok((String::from_utf8_lossy(body).into_owned(), false)),
    }
}

fn first_part_body<'a>(body: &'a [u8], boundary: &str) -> Result<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let start = find(body, delimiter.as_bytes())
        .filter(|&at| at == 0 || body[at - 1] == b'\n')
        .ok_or_else(|| Error::MalformedMultipart(format!("boundary `{boundary}` not found")))?;

    let after = &body[start + delimiter.len()..];
    if after.starts_with(b"--") {
        return Err(Error::MalformedMultipart("message has no parts".to_owned()));
    }
    let headers_end = find(after, b"\r\n\r\n")
        .ok_or_else(|| Error::MalformedMultipart("unterminated part headers".to_owned()))?;
    let part = &after[headers_end + 4..];

    let close = format!("\r\n--{boundary}");
    let end = find(part, close.as_bytes())
        .ok_or_else(|| Error::MalformedMultipart("unterminated part body".to_owned()))?;
    Ok(&part[..end])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::bindings::ScriptBinding;

    const BOUNDARY: &str = "test-boundary";

    async fn encode_to_string(params: CreateScriptParams) -> String {
        let mut out = Vec::new();
        encode_script_message(params, &mut out, BOUNDARY)
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    fn parts(message: &str) -> Vec<&str> {
        message
            .split(&format!("--{BOUNDARY}"))
            .filter(|segment| !segment.is_empty() && *segment != "--\r\n")
            .collect()
    }

    fn part_name(part: &str) -> &str {
        let start = part.find("name=\"").expect("part has no name") + "name=\"".len();
        let end = part[start..].find('"').unwrap() + start;
        &part[start..end]
    }

    #[tokio::test]
    async fn classic_message_references_the_script_part() {
        let message = encode_to_string(CreateScriptParams {
            script_name: "plain".to_owned(),
            script: Some("console.log(1)".into()),
            compatibility_date: "2026-08-01".to_owned(),
            ..Default::default()
        })
        .await;

        assert!(message.contains("Content-Disposition: form-data; name=\"metadata\""));
        assert!(message.contains("\"body_part\":\"script\""));
        assert!(message.contains("\"compatibility_date\":\"2026-08-01\""));
        assert!(message.contains("\"tags\":[]"));
        assert!(!message.contains("main_module"));
        assert!(message.contains("Content-Disposition: form-data; name=\"script\""));
        assert!(message.contains("Content-Type: application/javascript\r\n\r\nconsole.log(1)"));
        assert!(message.ends_with(&format!("\r\n--{BOUNDARY}--\r\n")));
    }

    #[tokio::test]
    async fn module_message_names_the_main_module() {
        let message = encode_to_string(CreateScriptParams {
            script_name: "modular".to_owned(),
            module: true,
            script: Some("export default {}".into()),
            bindings: HashMap::from([(
                "KV".to_owned(),
                ScriptBinding::KvNamespace {
                    namespace_id: "abc".to_owned(),
                },
            )]),
            ..Default::default()
        })
        .await;

        assert!(message.contains("\"main_module\":\"worker.mjs\""));
        assert!(!message.contains("body_part"));
        assert!(message.contains(r#"{"name":"KV","type":"kv_namespace","namespace_id":"abc"}"#));
        assert!(message.contains(
            "Content-Disposition: form-data; name=\"worker.mjs\"; filename=\"worker.mjs\""
        ));
        assert!(
            message.contains("Content-Type: application/javascript+module\r\n\r\nexport default {}")
        );
    }

    #[tokio::test]
    async fn binding_body_parts_follow_descriptor_order() {
        let message = encode_to_string(CreateScriptParams {
            script_name: "blobs".to_owned(),
            script: Some("x".into()),
            bindings: HashMap::from([
                (
                    "FIRST".to_owned(),
                    ScriptBinding::TextBlob {
                        text: "alpha".to_owned(),
                    },
                ),
                (
                    "SECOND".to_owned(),
                    ScriptBinding::DataBlob {
                        data: b"beta".to_vec(),
                    },
                ),
            ]),
            ..Default::default()
        })
        .await;

        let parts = parts(&message);
        assert_eq!(parts.len(), 4);
        assert_eq!(part_name(parts[0]), "metadata");
        assert_eq!(part_name(parts[1]), "script");

        let metadata_body = parts[0].split("\r\n\r\n").nth(1).unwrap();
        let metadata: serde_json::Value = serde_json::from_str(metadata_body.trim_end()).unwrap();
        let descriptor_names: Vec<&str> = metadata["bindings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|descriptor| descriptor["name"].as_str().unwrap())
            .collect();
        assert_eq!(descriptor_names.len(), 2);

        let body_part_names: Vec<&str> = parts[2..].iter().map(|part| part_name(part)).collect();
        assert_eq!(descriptor_names, body_part_names);
    }

    #[tokio::test]
    async fn missing_payload_still_closes_the_message() {
        let mut out = Vec::new();
        let err = encode_script_message(
            CreateScriptParams {
                script_name: "empty".to_owned(),
                ..Default::default()
            },
            &mut out,
            BOUNDARY,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::UnreadablePayload));
        let message = String::from_utf8(out).unwrap();
        assert!(message.ends_with(&format!("--{BOUNDARY}--\r\n")));
    }

    #[tokio::test]
    async fn streaming_source_fits_through_a_small_pipe() {
        let payload_len = 10 * 1024 * 1024u64;
        let (writer, mut reader) = tokio::io::duplex(8 * 1024);

        let params = CreateScriptParams {
            script_name: "big".to_owned(),
            module: true,
            script: Some(ScriptSource::Stream(Box::new(
                tokio::io::repeat(b'x').take(payload_len),
            ))),
            ..Default::default()
        };
        let encode = encode_script_message(params, writer, BOUNDARY);

        let drain = async {
            let mut total = 0u64;
            let mut buf = vec![0u8; 8 * 1024];
            loop {
                let n = reader.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                total += n as u64;
            }
            total
        };

        let (encoded, drained) = tokio::join!(encode, drain);
        encoded.unwrap();
        assert!(drained > payload_len);
    }

    #[tokio::test]
    async fn pipe_writes_block_until_the_reader_drains() {
        let (mut writer, mut reader) = tokio::io::duplex(64);

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            writer.write_all(&[0u8; 1024]),
        )
        .await;
        assert!(blocked.is_err(), "write should stall on a full pipe");

        let mut buf = vec![0u8; 1024];
        let n = reader.read(&mut buf).await.unwrap();
        assert!(n > 0);
    }

    #[tokio::test]
    async fn dropped_reader_fails_the_encoder_instead_of_hanging() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(reader);

        let err = encode_script_message(
            CreateScriptParams {
                script_name: "orphan".to_owned(),
                script: Some(ScriptSource::Stream(Box::new(
                    tokio::io::repeat(b'x').take(1024 * 1024),
                ))),
                ..Default::default()
            },
            writer,
            BOUNDARY,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Encode(_)));
    }

    #[tokio::test]
    async fn module_download_round_trips() {
        let mut out = Vec::new();
        let mut message = MultipartWriter::new(&mut out, "dl");
        message
            .begin_part(MODULE_PART_NAME, Some(MODULE_PART_NAME), MODULE_CONTENT_TYPE)
            .await
            .unwrap();
        message.write(b"export default {}").await.unwrap();
        message.finish().await.unwrap();

        let (script, module) =
            decode_script_content(Some("multipart/form-data; boundary=dl"), &out).unwrap();
        assert_eq!(script, "export default {}");
        assert!(module);
    }

    #[test]
    fn plain_response_decodes_verbatim() {
        let (script, module) = decode_script_content(Some("text/plain"), b"hello").unwrap();
        assert_eq!(script, "hello");
        assert!(!module);
    }

    #[test]
    fn missing_content_type_decodes_as_classic() {
        let (script, module) = decode_script_content(None, b"console.log(1)").unwrap();
        assert_eq!(script, "console.log(1)");
        assert!(!module);
    }

    #[test]
    fn multipart_without_boundary_param_is_malformed() {
        let err = decode_script_content(Some("multipart/form-data"), b"anything").unwrap_err();
        assert!(matches!(err, Error::MalformedMultipart(_)));
    }

    #[test]
    fn multipart_with_wrong_boundary_is_malformed() {
        let body = b"--other\r\n\r\nbody\r\n--other--\r\n";
        let err = decode_script_content(Some("multipart/form-data; boundary=expected"), body)
            .unwrap_err();
        assert!(matches!(err, Error::MalformedMultipart(_)));
    }

    #[test]
    fn unterminated_part_is_malformed() {
        let body = b"--b\r\nContent-Type: text/plain\r\n\r\nnever closed";
        let err = decode_script_content(Some("multipart/form-data; boundary=b"), body).unwrap_err();
        assert!(matches!(err, Error::MalformedMultipart(_)));
    }
}
