pub mod converter;
pub mod gvr;

pub use converter::{GreetBack, VersionConverter};
pub use gvr::{GroupVersion, GroupVersionResource, convert_url, parse_url};
