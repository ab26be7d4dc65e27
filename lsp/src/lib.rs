//! Minimal async LSP client used by the `cra-probe` harness.

pub mod client;
pub mod codec;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use client::{ClientError, LspClient};
pub use protocol::{
    ClientIdentity, ResponseError, UriError, completion_item_count, completion_params,
    initialize_params, path_to_file_uri,
};
pub use relay::{STDERR_PREFIX, relay_lines, spawn_relay, spawn_stderr_relay};
pub use transport::{Connection, ServerCommand, ServerProcess, ServerTarget, connect};

pub use lsp_types;
