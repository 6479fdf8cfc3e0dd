use std::future::Future;

use futures::Stream;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::multipart::{self, CLASSIC_CONTENT_TYPE};
use crate::types::{
    CreateScriptParams, FetchedScript, ListScriptsResponse, ScriptMetadata, ScriptSettings,
    ScriptSource, UpdateScriptContentParams, UpdateScriptSettingsParams,
};

/// Capacity of the in-process pipe between the encode and transmit sides of
/// a multipart upload. Writes beyond this block until the transmit side has
/// drained, which bounds memory use for arbitrarily large payloads.
const PIPE_BUFFER_SIZE: usize = 64 * 1024;

const BODY_CHUNK_SIZE: usize = 16 * 1024;

pub struct StratoClient {
    client: Client,
    base_url: Url,
    auth_token: String,
}

impl StratoClient {
    pub fn new(base_url: Url, auth_token: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            auth_token,
        }
    }

    /// Upload a script together with its bindings and metadata.
    ///
    /// Plain uploads go out as a raw `application/javascript` body. Anything
    /// that needs metadata (see
    /// [`requires_multipart`](CreateScriptParams::requires_multipart)) is
    /// encoded as a multipart message and streamed to the service while it
    /// is being produced.
    pub async fn upload_script(
        &self,
        account: &str,
        params: CreateScriptParams,
    ) -> Result<ScriptMetadata> {
        validate_identifiers(account, &params.script_name)?;
        let url = self.script_url(
            account,
            params.dispatch_namespace.as_deref(),
            &params.script_name,
            "",
        )?;

        if params.requires_multipart() {
            debug!(script = %params.script_name, "uploading script as multipart");
            self.send_multipart(url, params).await
        } else {
            debug!(script = %params.script_name, "uploading script raw");
            let body = raw_body(params.script)?;
            self.send_script(url, CLASSIC_CONTENT_TYPE.to_owned(), body)
                .await
        }
    }

    /// Replace only the body of an existing script. Module bodies still
    /// travel inside a multipart envelope so the service learns the main
    /// module's name.
    pub async fn update_script_content(
        &self,
        account: &str,
        params: UpdateScriptContentParams,
    ) -> Result<ScriptMetadata> {
        validate_identifiers(account, &params.script_name)?;
        let url = self.script_url(
            account,
            params.dispatch_namespace.as_deref(),
            &params.script_name,
            "/content",
        )?;

        if params.module {
            debug!(script = %params.script_name, "updating module content");
            let upload_params = CreateScriptParams {
                script_name: params.script_name,
                module: true,
                script: params.script,
                ..Default::default()
            };
            self.send_multipart(url, upload_params).await
        } else {
            debug!(script = %params.script_name, "updating classic content");
            let body = raw_body(params.script)?;
            self.send_script(url, CLASSIC_CONTENT_TYPE.to_owned(), body)
                .await
        }
    }

    /// Fetch a script and decode it from its download shape: multipart
    /// responses are module scripts, everything else is classic.
    pub async fn get_script(&self, account: &str, script_name: &str) -> Result<FetchedScript> {
        validate_identifiers(account, script_name)?;
        let url = self.script_url(account, None, script_name, "")?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(Error::Transmit)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await.map_err(Error::Transmit)?;
        let (script, module) = multipart::decode_script_content(content_type.as_deref(), &bytes)?;
        debug!(script = script_name, module, "fetched script");
        Ok(FetchedScript { script, module })
    }

    /// Fetch the raw body of a script, without any metadata.
    pub async fn get_script_content(&self, account: &str, script_name: &str) -> Result<String> {
        validate_identifiers(account, script_name)?;
        let url = self.script_url(account, None, script_name, "/content/v2")?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(Error::Transmit)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            });
        }
        let bytes = response.bytes().await.map_err(Error::Transmit)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn get_script_settings(
        &self,
        account: &str,
        script_name: &str,
    ) -> Result<ScriptSettings> {
        validate_identifiers(account, script_name)?;
        let url = self.script_url(account, None, script_name, "/settings")?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(Error::Transmit)?;
        read_json(response).await
    }

    pub async fn update_script_settings(
        &self,
        account: &str,
        params: UpdateScriptSettingsParams,
    ) -> Result<ScriptSettings> {
        validate_identifiers(account, &params.script_name)?;
        let url = self.script_url(account, None, &params.script_name, "/settings")?;

        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.auth_token)
            .json(&params.to_settings())
            .send()
            .await
            .map_err(Error::Transmit)?;
        read_json(response).await
    }

    pub async fn list_scripts(&self, account: &str) -> Result<Vec<ScriptMetadata>> {
        if account.is_empty() {
            return Err(Error::MissingAccountId);
        }
        let url = self
            .base_url
            .join(&format!("v1/accounts/{account}/scripts"))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(Error::Transmit)?;
        let list: ListScriptsResponse = read_json(response).await?;
        Ok(list.scripts)
    }

    pub async fn delete_script(&self, account: &str, script_name: &str) -> Result<()> {
        validate_identifiers(account, script_name)?;
        let url = self.script_url(account, None, script_name, "")?;

        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(Error::Transmit)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            });
        }
        debug!(script = script_name, "deleted script");
        Ok(())
    }

    /// Run the multipart encoder and the transmit request concurrently,
    /// connected by a bounded in-process pipe.
    async fn send_multipart(&self, url: Url, params: CreateScriptParams) -> Result<ScriptMetadata> {
        let boundary = multipart::generate_boundary();
        let content_type = multipart::form_data_content_type(&boundary);
        let (writer, reader) = tokio::io::duplex(PIPE_BUFFER_SIZE);

        let send = self.send_script(url, content_type, Body::wrap_stream(chunk_stream(reader)));
        let encode = multipart::encode_script_message(params, writer, &boundary);
        stream_upload(encode, send).await
    }

    async fn send_script(
        &self,
        url: Url,
        content_type: String,
        body: Body,
    ) -> Result<ScriptMetadata> {
        let response = self
            .client
            .put(url)
            .bearer_auth(&self.auth_token)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(Error::Transmit)?;
        read_json(response).await
    }

    fn script_url(
        &self,
        account: &str,
        namespace: Option<&str>,
        script_name: &str,
        suffix: &str,
    ) -> Result<Url> {
        let path = match namespace {
            Some(namespace) => format!(
                "v1/accounts/{account}/dispatch/namespaces/{namespace}/scripts/{script_name}{suffix}"
            ),
            None => format!("v1/accounts/{account}/scripts/{script_name}{suffix}"),
        };
        Ok(self.base_url.join(&path)?)
    }
}

/// Wait for the encode and transmit sides of a streaming upload.
///
/// Both futures always run to completion, so neither side of the pipe is
/// leaked: once the side that finishes first is known, the other is awaited
/// unconditionally (a failed transmit drops its reader, which unblocks a
/// writer stuck on a full pipe). Each side resolves exactly once, and only
/// the failure observed first is reported.
async fn stream_upload<T, E, S>(encode: E, send: S) -> Result<T>
where
    E: Future<Output = Result<()>>,
    S: Future<Output = Result<T>>,
{
    tokio::pin!(encode);
    tokio::pin!(send);

    tokio::select! {
        encoded = &mut encode => {
            let sent = send.await;
            encoded?;
            sent
        }
        sent = &mut send => {
            let encoded = encode.await;
            match sent {
                Ok(result) => {
                    encoded?;
                    Ok(result)
                }
                Err(err) => Err(err),
            }
        }
    }
}

fn raw_body(script: Option<ScriptSource>) -> Result<Body> {
    match script {
        Some(ScriptSource::Text(text)) => Ok(Body::from(text)),
        Some(ScriptSource::Bytes(bytes)) => Ok(Body::from(bytes)),
        Some(ScriptSource::Stream(reader)) => Ok(Body::wrap_stream(chunk_stream(reader))),
        None => Err(Error::UnreadablePayload),
    }
}

fn chunk_stream<R>(mut reader: R) -> impl Stream<Item = std::io::Result<Vec<u8>>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    async_stream::try_stream! {
        let mut buf = vec![0u8; BODY_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield buf[..n].to_vec();
        }
    }
}

fn validate_identifiers(account: &str, script_name: &str) -> Result<()> {
    if account.is_empty() {
        return Err(Error::MissingAccountId);
    }
    if script_name.is_empty() {
        return Err(Error::MissingScriptName);
    }
    Ok(())
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::Api { status, message });
    }
    let bytes = response.bytes().await.map_err(Error::Transmit)?;
    serde_json::from_slice(&bytes).map_err(Error::Decode)
}
