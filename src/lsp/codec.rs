// Content-Length framing for LSP messages over byte streams.
use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single message body (4 MiB).
pub(crate) const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Read a single LSP message from an async reader (Content-Length framing).
///
/// Returns `Ok(None)` when the stream ends cleanly between messages.
pub(crate) async fn read_message_from<R>(reader: &mut R) -> anyhow::Result<Option<String>>
where
    R: AsyncRead + Unpin + Send,
{
    let mut header_buffer = Vec::new();

    loop {
        let mut byte = [0u8; 1];
        let read = reader
            .read(&mut byte)
            .await
            .context("reading message header")?;
        if read == 0 {
            if header_buffer.is_empty() {
                return Ok(None);
            }
            bail!("unexpected EOF while reading headers");
        }
        header_buffer.push(byte[0]);
        if header_buffer.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    let header_str = String::from_utf8(header_buffer).context("message header is not UTF-8")?;
    let content_length = get_content_length_from(&header_str)?;
    if content_length > MAX_MESSAGE_BYTES {
        bail!("Content-Length {content_length} exceeds maximum {MAX_MESSAGE_BYTES}");
    }

    let mut payload_buffer = vec![0u8; content_length];
    reader
        .read_exact(&mut payload_buffer)
        .await
        .context("reading message body")?;

    Ok(Some(
        String::from_utf8(payload_buffer).context("message body is not UTF-8")?,
    ))
}

/// Write a single LSP message to an async writer with Content-Length framing.
pub(crate) async fn write_message_to<W>(writer: &mut W, json_body: &str) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    // Content-Length counts bytes, not chars.
    let header = format!("Content-Length: {}\r\n\r\n", json_body.len());
    writer
        .write_all(header.as_bytes())
        .await
        .context("writing message header")?;
    writer
        .write_all(json_body.as_bytes())
        .await
        .context("writing message body")?;
    writer.flush().await.context("flushing message")?;
    Ok(())
}

/// Extract Content-Length from header string. Case-insensitive search;
/// other headers are ignored.
pub(crate) fn get_content_length_from(header: &str) -> anyhow::Result<usize> {
    for line in header.lines() {
        if line.to_lowercase().starts_with("content-length:") {
            if let Some(v) = line.split(':').nth(1) {
                let parsed = v
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid Content-Length value '{}'", v.trim()))?;
                return Ok(parsed);
            }
        }
    }
    Err(anyhow!("Content-Length header not found"))
}
