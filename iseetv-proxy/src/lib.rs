//! Manifest rewriting, origin passthrough and upstream proxying.

pub mod error;
pub mod relay;
pub mod rewrite;
pub mod upstream;

pub use error::{ProxyError, ProxyResult};
pub use relay::{relay_manifest, RelaySettings};
pub use rewrite::{percent_encode, rewrite_base_url, rewrite_m3u8};
pub use upstream::{join_upstream, rechunk, ByteStream, UpstreamBody, UpstreamClient};
