use async_nats::HeaderMap;
use courier_broker::Headers;

/// Keeps the first value of every header.
pub fn flatten_headers(headers: Option<&HeaderMap>) -> Headers {
    let mut flat = Headers::new();

    if let Some(headers) = headers {
        for (name, values) in headers.iter() {
            if let Some(value) = values.first() {
                flat.insert(name.to_string(), value.as_str().to_string());
            }
        }
    }

    flat
}

pub fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();

    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }

    map
}
