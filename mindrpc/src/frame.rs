use crate::{Error, Result};
use serde_json::Value;
use std::io::{BufRead, ErrorKind};

/// Magic word opening every request and response frame.
pub const PROTOCOL_MAGIC: &str = "MRPC/2";

/// Schema version the device expects in every request.
pub const SCHEMA_VERSION: u32 = 17;

/// Client identification sent with every request.
pub const CLIENT_NAME: &str = "dvrgrab";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Serializes one request frame.
///
/// The header block is built first and the `MRPC/2 <headerLen> <bodyLen>`
/// line synthesized last, since it states the exact byte length of the
/// block (every line's `\r\n` terminator and the closing blank line
/// included). The body follows the blank line with no extra separator.
pub fn encode_request(seq: u32, session_id: u32, request_type: &str, body: &Value) -> Vec<u8> {
    let body = body.to_string();
    let mut header = String::new();

    let session_id = format!("0x{session_id:06x}");
    let schema_version = SCHEMA_VERSION.to_string();
    let seq = seq.to_string();
    let lines = [
        ("Type", "request"),
        ("RpcId", seq.as_str()),
        ("SchemaVersion", schema_version.as_str()),
        ("Content-Type", "application/json"),
        ("RequestType", request_type),
        ("ResponseCount", "single"),
        ("BodyId", ""),
        ("X-ApplicationName", CLIENT_NAME),
        ("X-ApplicationVersion", CLIENT_VERSION),
        ("X-ApplicationSessionId", session_id.as_str()),
    ];

    for (key, value) in lines {
        header.push_str(key);
        header.push_str(": ");
        header.push_str(value);
        header.push_str("\r\n");
    }

    header.push_str("\r\n");

    let mut frame = format!(
        "{} {} {}\r\n{}",
        PROTOCOL_MAGIC,
        header.len(),
        body.len(),
        header
    )
    .into_bytes();
    frame.extend_from_slice(body.as_bytes());
    frame
}

/// Reads one response frame and parses its body.
///
/// The header bytes are length-skipped and discarded; only the body is
/// interpreted. A body whose declared type is the error marker becomes
/// [`Error::Device`] carrying the device-supplied text.
pub fn read_response<R: BufRead>(reader: &mut R) -> Result<Value> {
    let mut line = String::new();

    if reader.read_line(&mut line)? == 0 {
        return Err(Error::NoResponse);
    }

    let (header_len, body_len) = parse_preamble(line.trim_end())?;

    let mut header = vec![0; header_len];
    let mut body = vec![0; body_len];
    read_counted(reader, &mut header)?;
    read_counted(reader, &mut body)?;

    let value: Value = serde_json::from_slice(&body)?;

    if value.get("type").and_then(Value::as_str) == Some("error") {
        let text = value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("no further detail supplied");
        return Err(Error::Device(text.to_owned()));
    }

    Ok(value)
}

fn parse_preamble(line: &str) -> Result<(usize, usize)> {
    let mut parts = line.split(' ');

    if parts.next() != Some(PROTOCOL_MAGIC) {
        return Err(Error::MalformedFrame(format!(
            "expected a {PROTOCOL_MAGIC} preamble, got {line:?}"
        )));
    }

    let mut length = |what: &str| -> Result<usize> {
        parts
            .next()
            .and_then(|x| x.parse().ok())
            .ok_or_else(|| Error::MalformedFrame(format!("bad {what} length in {line:?}")))
    };

    let header_len = length("header")?;
    let body_len = length("body")?;
    Ok((header_len, body_len))
}

fn read_counted<R: BufRead>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => {
            Error::MalformedFrame("response shorter than its declared length".to_owned())
        }
        _ => Error::Io(e),
    })
}
