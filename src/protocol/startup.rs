//! Client side of the startup phase.
//!
//! Before a client sends its StartupMessage it may ask for SSL or GSSAPI
//! encryption; both are declined with a single `'N'` byte. A CancelRequest is
//! rejected outright because the proxy hands out placeholder backend keys.

use std::collections::HashMap;

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{AdapterError, Result};
use crate::protocol::framing::{
    CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, PROTOCOL_VERSION_3, SSL_REQUEST_CODE,
    read_startup_frame,
};

/// One decoded startup-phase message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRequest {
    SslRequest,
    GssEncRequest,
    Cancel { process_id: i32, secret_key: i32 },
    Startup(StartupParameters),
}

/// Key/value parameters from a StartupMessage. Keys are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupParameters {
    params: HashMap<String, String>,
}

impl StartupParameters {
    pub fn user(&self) -> Option<&str> {
        self.get("user")
    }

    pub fn database(&self) -> Option<&str> {
        self.get("database")
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn decode(data: &[u8]) -> Self {
        let mut params = HashMap::new();
        let mut b = data;

        while !b.is_empty() {
            // An unterminated trailing key carries no value; stop there.
            let Some(key_end) = b.iter().position(|&x| x == 0) else {
                break;
            };
            if key_end == 0 {
                break;
            }
            let key = String::from_utf8_lossy(&b[..key_end]).to_string();
            b = &b[key_end + 1..];

            let value_end = b.iter().position(|&x| x == 0).unwrap_or(b.len());
            let value = String::from_utf8_lossy(&b[..value_end]).to_string();
            b = if value_end < b.len() {
                &b[value_end + 1..]
            } else {
                &[]
            };

            params.insert(key, value);
        }

        StartupParameters { params }
    }
}

impl FromIterator<(String, String)> for StartupParameters {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        StartupParameters {
            params: iter.into_iter().collect(),
        }
    }
}

/// Decode the body of one startup-phase message (length prefix already stripped).
pub fn decode_startup(body: Bytes) -> Result<StartupRequest> {
    if body.len() < 4 {
        return Err(AdapterError::Protocol(format!(
            "startup message too short: {} bytes",
            body.len()
        )));
    }

    let mut b = body;
    let code = b.get_i32();

    match code {
        SSL_REQUEST_CODE => Ok(StartupRequest::SslRequest),
        GSSENC_REQUEST_CODE => Ok(StartupRequest::GssEncRequest),
        CANCEL_REQUEST_CODE => {
            if b.remaining() < 8 {
                return Err(AdapterError::Protocol("cancel request too short".into()));
            }
            let process_id = b.get_i32();
            let secret_key = b.get_i32();
            Ok(StartupRequest::Cancel {
                process_id,
                secret_key,
            })
        }
        PROTOCOL_VERSION_3 => Ok(StartupRequest::Startup(StartupParameters::decode(&b))),
        other => Err(AdapterError::Protocol(format!(
            "unexpected startup code: {other}"
        ))),
    }
}

/// Drive the client startup phase until a StartupMessage arrives.
///
/// SSL and GSSAPI encryption requests are declined and the loop continues; a cancel request
/// fails with [`AdapterError::Unsupported`].
pub async fn accept_startup<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
) -> Result<StartupParameters> {
    loop {
        let body = read_startup_frame(stream).await?;
        match decode_startup(body)? {
            StartupRequest::SslRequest => {
                tracing::debug!("declining SSL request");
                stream.write_all(b"N").await?;
                stream.flush().await?;
            }
            StartupRequest::GssEncRequest => {
                tracing::debug!("declining GSSAPI encryption request");
                stream.write_all(b"N").await?;
                stream.flush().await?;
            }
            StartupRequest::Cancel { process_id, .. } => {
                return Err(AdapterError::Unsupported(format!(
                    "cancel requests are not supported (target pid {process_id})"
                )));
            }
            StartupRequest::Startup(params) => return Ok(params),
        }
    }
}
