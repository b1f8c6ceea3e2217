pub mod client;
pub mod codec;
pub mod protocol;
pub mod stdio_transport;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientOptions, LanguageClient, ServerOptions, SynchronizeOptions};
