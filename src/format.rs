//! Query-string and body serialization.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::{DataType, Error, Result};

const JSON: &str = "application/json;charset=UTF-8";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded;charset=UTF-8";
const HTML: &str = "text/html;charset=UTF-8";
const XML: &str = "application/xml;charset=UTF-8";

/// A body ready for the exchange together with its content type.
#[derive(Clone, Debug, PartialEq)]
pub struct FormattedBody {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Serializes query pairs as `key=value&...`, percent-encoded.
///
/// Returns an empty string for an empty map so callers can skip the `?`.
pub fn serialize_query(query: &Map<String, Value>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in query {
        serializer.append_pair(key, &plain_text(value));
    }
    serializer.finish()
}

/// Encodes `body` according to `data_type`.
pub fn format_body(body: &Value, data_type: DataType) -> Result<FormattedBody> {
    match data_type {
        DataType::Json => {
            let bytes = serde_json::to_vec(body)
                .map_err(|err| Error::build(format!("failed to encode JSON body: {err}")))?;
            Ok(FormattedBody {
                content_type: JSON.to_owned(),
                bytes: Bytes::from(bytes),
            })
        }
        DataType::FormUrlEncoded => {
            let fields = expect_object(body, "form-urlencoded")?;
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in fields {
                serializer.append_pair(key, &plain_text(value));
            }
            Ok(FormattedBody {
                content_type: FORM_URLENCODED.to_owned(),
                bytes: Bytes::from(serializer.finish()),
            })
        }
        DataType::FormData => {
            let fields = expect_object(body, "form-data")?;
            let boundary = format!("----fetch-service-{:016x}", rand::random::<u64>());
            Ok(FormattedBody {
                content_type: format!("multipart/form-data; boundary={boundary}"),
                bytes: Bytes::from(encode_multipart(fields, &boundary)),
            })
        }
        DataType::Html => Ok(FormattedBody {
            content_type: HTML.to_owned(),
            bytes: Bytes::from(plain_text(body)),
        }),
        DataType::Xml => Ok(FormattedBody {
            content_type: XML.to_owned(),
            bytes: Bytes::from(plain_text(body)),
        }),
    }
}

/// Strings are used verbatim, `null` becomes empty, everything else is JSON.
pub(crate) fn plain_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn expect_object<'a>(body: &'a Value, kind: &str) -> Result<&'a Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| Error::build(format!("{kind} body must be an object")))
}

fn encode_multipart(fields: &Map<String, Value>, boundary: &str) -> String {
    let mut out = String::new();
    for (name, value) in fields {
        out.push_str("--");
        out.push_str(boundary);
        out.push_str("\r\n");
        out.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
            name.replace('"', "%22")
        ));
        out.push_str(&plain_text(value));
        out.push_str("\r\n");
    }
    out.push_str("--");
    out.push_str(boundary);
    out.push_str("--\r\n");
    out
}
