//! Canonical cURL rendering of recorded requests.
//!
//! The oracle-facing components describe a request to the oracle as a cURL
//! command line. The rendering is deterministic: headers in recorded order,
//! body last.

use super::types::{BodyPayload, RequestRecord};

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Render a recorded request as a canonical cURL command.
pub fn render_curl(request: &RequestRecord) -> String {
    let mut out = String::from("curl");

    if !request.method.eq_ignore_ascii_case("GET") {
        out.push_str(" -X ");
        out.push_str(&request.method.to_uppercase());
    }

    out.push(' ');
    out.push_str(&shell_quote(&request.url));

    for header in &request.headers {
        out.push_str(" -H ");
        out.push_str(&shell_quote(&format!("{}: {}", header.name, header.value)));
    }

    if let Some(body) = &request.body {
        let text = match &body.payload {
            BodyPayload::Json(value) => value.to_string(),
            BodyPayload::Text(text) => text.clone(),
            BodyPayload::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };
        out.push_str(" --data ");
        out.push_str(&shell_quote(&text));
    }

    out
}
