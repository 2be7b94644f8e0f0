//! Delver Fetch - link discovery and page acquisition
//!
//! Wraps the metasearch backend, bounds concurrent fetches per host and
//! globally, and turns URLs into cleaned page text through either a hosted
//! extraction service or a local fetch-and-parse path.

pub mod admission;
pub mod extract;
pub mod hosted;
pub mod local;
pub mod pipeline;
pub mod search;

pub use admission::{AdmissionController, AdmissionPermit};
pub use hosted::HostedParserClient;
pub use local::LocalFetcher;
pub use pipeline::{classify, PageAcquirer, PageKind, PageSource};
pub use search::{SearchBackend, SearxngClient};
