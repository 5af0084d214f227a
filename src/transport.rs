use std::io::Read;

use reqwest::{
    StatusCode, Url,
    blocking::{Client, Response},
    header::{
        ACCEPT_ENCODING, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap,
        HeaderName, RANGE,
    },
};

use crate::{Error, Interval};

/// What the negotiation request revealed about the remote object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Head {
    /// The total length of the object, from `Content-Length`.
    pub length: Option<u64>,
    /// The raw `Accept-Ranges` value, if the server sent one.
    pub accept_ranges: Option<String>,
}

impl Head {
    /// True if the server explicitly accepts byte ranges.
    #[must_use]
    pub fn supports_ranges(&self) -> bool {
        self.accept_ranges.as_deref().is_some_and(|value| {
            value
                .split(',')
                .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
        })
    }
}

/// The network seam: one metadata request and any number of ranged reads against a single
/// remote object.
///
/// Implementations don't retry; retries and timeouts are the concern of the client underneath.
pub trait RangeTransport {
    /// The body of a ranged response.
    type Body: Read;

    /// Requests the object's metadata without its body.
    ///
    /// # Errors
    ///
    /// Fails if the request fails or the server doesn't answer with success.
    fn head(&mut self) -> Result<Head, Error>;

    /// Requests the bytes in `range` (inclusive on both ends).  The returned body yields exactly
    /// those bytes.
    ///
    /// # Errors
    ///
    /// Fails if the request fails or the response isn't a partial response for `range`.
    fn get_range(&mut self, range: Interval) -> Result<Self::Body, Error>;
}

/// A [`RangeTransport`] over HTTP(S), using a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    /// A transport for `url` using a client with default settings.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self::with_client(Client::new(), url)
    }

    /// A transport for `url` using a preconfigured client (timeouts, proxies, TLS...).
    #[must_use]
    pub const fn with_client(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    /// The URL of the remote object.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Checks that a `Content-Range` like `bytes 100-199/1000` describes `range`.
fn check_content_range(headers: &HeaderMap, range: Interval) -> Result<(), Error> {
    let value = header(headers, &CONTENT_RANGE)
        .ok_or_else(|| Error::ContentRange("missing".to_owned()))?;

    let parsed = value
        .trim()
        .strip_prefix("bytes ")
        .and_then(|rest| rest.split_once('/'))
        .and_then(|(span, _total)| span.split_once('-'))
        .and_then(|(start, end)| Some((start.parse::<u64>().ok()?, end.parse::<u64>().ok()?)));

    match parsed {
        Some((start, end)) if start == range.start && end == range.end => Ok(()),
        _ => Err(Error::ContentRange(value.to_owned())),
    }
}

impl RangeTransport for HttpTransport {
    type Body = Response;

    fn head(&mut self) -> Result<Head, Error> {
        let response = self
            .client
            .head(self.url.clone())
            .header(ACCEPT_ENCODING, "identity")
            .send()?;

        if response.status() != StatusCode::OK {
            return Err(Error::Status(response.status().as_u16()));
        }

        // Don't use Response::content_length(): for HEAD it describes the (empty) body.
        let headers = response.headers();
        Ok(Head {
            length: header(headers, &CONTENT_LENGTH).and_then(|value| value.trim().parse().ok()),
            accept_ranges: header(headers, &ACCEPT_RANGES).map(str::to_owned),
        })
    }

    fn get_range(&mut self, range: Interval) -> Result<Response, Error> {
        // Partial responses aren't whole-object representations, so keep caches out of it.
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, format!("bytes={}-{}", range.start, range.end))
            .header(ACCEPT_ENCODING, "identity")
            .header(CACHE_CONTROL, "no-cache")
            .send()?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                check_content_range(response.headers(), range)?;
                Ok(response)
            }
            StatusCode::OK => Err(Error::FullResponse),
            status => Err(Error::Status(status.as_u16())),
        }
    }
}
