use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::protocol::messages::{
    put_authentication_ok, put_backend_key_data, put_parameter_status, put_ready_for_query_idle,
};

/// ParameterStatus values reported to every client, in send order.
pub const SERVER_PARAMETERS: &[(&str, &str)] = &[
    ("server_version", "16.0"),
    ("server_encoding", "UTF8"),
    ("client_encoding", "UTF8"),
    ("DateStyle", "ISO, MDY"),
    ("TimeZone", "UTC"),
    ("integer_datetimes", "on"),
    ("standard_conforming_strings", "on"),
];

/// The backend's own key data is never exposed; cancel requests are not proxied.
const SYNTHETIC_PROCESS_ID: i32 = 1;
const SYNTHETIC_SECRET_KEY: i32 = 1;

/// Encode the post-authentication sequence a client expects after startup.
pub fn encode_auth_success() -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);
    put_authentication_ok(&mut buf);
    for (name, value) in SERVER_PARAMETERS {
        put_parameter_status(&mut buf, name, value);
    }
    put_backend_key_data(&mut buf, SYNTHETIC_PROCESS_ID, SYNTHETIC_SECRET_KEY);
    put_ready_for_query_idle(&mut buf);
    buf
}

/// Tell the client it is authenticated and ready, in a single write.
pub async fn send_auth_success<W: AsyncWrite + Unpin>(wr: &mut W) -> Result<()> {
    let buf = encode_auth_success();
    wr.write_all(&buf).await?;
    wr.flush().await?;
    Ok(())
}
