//! LSP transport abstraction (framed Content-Length messages).
//!
//! The two halves are separate so the client can read and write from
//! different tasks.
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use crate::lsp::codec::{read_message_from, write_message_to};

/// Outgoing half. `write` takes a JSON body (not including LSP headers),
/// frames it and sends it.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write(&mut self, json_body: &str) -> anyhow::Result<()>;
}

/// Incoming half. `read` returns the next JSON body with headers stripped,
/// or `None` once the peer has closed the stream.
#[async_trait]
pub trait MessageReader: Send {
    async fn read(&mut self) -> anyhow::Result<Option<String>>;
}

pub struct FramedWriter<W> {
    writer: W,
}

impl<W> FramedWriter<W> {
    pub fn new(writer: W) -> Self {
        FramedWriter { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for FramedWriter<W> {
    async fn write(&mut self, json_body: &str) -> anyhow::Result<()> {
        write_message_to(&mut self.writer, json_body).await
    }
}

pub struct FramedReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead> FramedReader<R> {
    pub fn new(reader: R) -> Self {
        FramedReader {
            reader: BufReader::new(reader),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> MessageReader for FramedReader<R> {
    async fn read(&mut self) -> anyhow::Result<Option<String>> {
        read_message_from(&mut self.reader).await
    }
}

/// A connected pair of halves.
pub struct Transport {
    reader: Box<dyn MessageReader>,
    writer: Box<dyn MessageWriter>,
}

impl Transport {
    pub fn new(reader: Box<dyn MessageReader>, writer: Box<dyn MessageWriter>) -> Self {
        Transport { reader, writer }
    }

    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Transport::new(
            Box::new(FramedReader::new(reader)),
            Box::new(FramedWriter::new(writer)),
        )
    }

    pub fn into_parts(self) -> (Box<dyn MessageReader>, Box<dyn MessageWriter>) {
        (self.reader, self.writer)
    }
}
