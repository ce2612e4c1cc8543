use bytes::{Buf, BufMut, BytesMut};

use crate::error::{AdapterError, Result};

/// Fields of an ErrorResponse / NoticeResponse the proxy cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    pub severity: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl ErrorFields {
    pub fn into_error(self) -> AdapterError {
        AdapterError::Server {
            code: self.code.unwrap_or_else(|| "XX000".to_string()),
            message: self
                .message
                .unwrap_or_else(|| "unknown server error".to_string()),
        }
    }
}

pub fn parse_error_response(payload: &[u8]) -> ErrorFields {
    // fields: (code_byte, cstring) ... 0
    let mut b = payload;
    let mut fields = ErrorFields::default();

    while !b.is_empty() {
        let code = b[0];
        b = &b[1..];
        if code == 0 {
            break;
        }
        if let Some(pos) = b.iter().position(|&x| x == 0) {
            let s = String::from_utf8_lossy(&b[..pos]).to_string();
            match code {
                // 'V' is the non-localized severity; prefer it when present.
                b'V' => fields.severity = Some(s),
                b'S' if fields.severity.is_none() => fields.severity = Some(s),
                b'C' => fields.code = Some(s),
                b'M' => fields.message = Some(s),
                b'D' => fields.detail = Some(s),
                b'H' => fields.hint = Some(s),
                _ => {}
            }
            b = &b[pos + 1..];
        } else {
            break;
        }
    }

    fields
}

pub fn parse_auth_request(payload: &[u8]) -> Result<(i32, &[u8])> {
    if payload.len() < 4 {
        return Err(AdapterError::Protocol("auth request too short".into()));
    }
    let mut b = payload;
    let code = b.get_i32();
    Ok((code, b))
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Append a tagged message whose body is written by `body`, patching the length.
fn put_tagged(buf: &mut BytesMut, tag: u8, body: impl FnOnce(&mut BytesMut)) {
    buf.put_u8(tag);
    let len_at = buf.len();
    buf.put_i32(0);
    body(buf);
    let len = (buf.len() - len_at) as i32;
    buf[len_at..len_at + 4].copy_from_slice(&len.to_be_bytes());
}

pub fn put_authentication_ok(buf: &mut BytesMut) {
    put_tagged(buf, b'R', |b| b.put_i32(0));
}

pub fn put_parameter_status(buf: &mut BytesMut, name: &str, value: &str) {
    put_tagged(buf, b'S', |b| {
        put_cstring(b, name);
        put_cstring(b, value);
    });
}

pub fn put_backend_key_data(buf: &mut BytesMut, process_id: i32, secret_key: i32) {
    put_tagged(buf, b'K', |b| {
        b.put_i32(process_id);
        b.put_i32(secret_key);
    });
}

/// ReadyForQuery with transaction status idle. A fresh session is never
/// inside a transaction.
pub fn put_ready_for_query_idle(buf: &mut BytesMut) {
    put_tagged(buf, b'Z', |b| b.put_u8(b'I'));
}

/// ErrorResponse with severity (both `S` and `V`), SQLSTATE and message.
pub fn put_error_response(buf: &mut BytesMut, severity: &str, code: &str, message: &str) {
    put_tagged(buf, b'E', |b| {
        b.put_u8(b'S');
        put_cstring(b, severity);
        b.put_u8(b'V');
        put_cstring(b, severity);
        b.put_u8(b'C');
        put_cstring(b, code);
        b.put_u8(b'M');
        put_cstring(b, message);
        b.put_u8(0);
    });
}
