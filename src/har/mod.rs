//! Recorded-traffic model: HAR ingestion, cookie jar, and the URL index.

mod archive;
mod curl;
mod types;

pub use archive::HarArchive;
pub use curl::render_curl;
pub use types::{
    BodyPayload, CookieJar, CookieRecord, HarQuality, HarValidation, Header, QueryParam,
    RequestBody, RequestId, RequestRecord, ResponseRecord, UrlInfo,
};
