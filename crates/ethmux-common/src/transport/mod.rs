pub mod http;

pub use http::{parse_body, rewrap, BoundaryError, InboundRequest, VersionCheck};
