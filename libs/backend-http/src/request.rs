use crate::client::{BufferedService, map_buffer_error};
use crate::config::TransportSecurity;
use crate::error::{HttpError, InvalidUriKind};
use crate::response::{HttpResponse, ResponseBody};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{Request, Response};
use http_body_util::Full;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};

#[derive(Clone, Debug)]
enum Payload {
    Empty,
    Raw(Bytes),
    /// Serialized body plus the content type used when the caller sets none
    Typed(Bytes, &'static str),
}

/// Fluent builder for a single request
///
/// Created by [`HttpClient::get`](crate::HttpClient::get) and friends.
/// Header and body errors are deferred and surface from
/// [`send()`](RequestBuilder::send) (or from `json`/`form`, which return
/// `Result` themselves).
///
/// Query strings are not composed here; build the final URL with
/// `url::Url` and pass it as a string.
#[must_use = "RequestBuilder does nothing until .send() is called"]
pub struct RequestBuilder {
    service: BufferedService,
    max_body_size: usize,
    method: http::Method,
    url: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    payload: Payload,
    cancellation: Option<CancellationToken>,
    error: Option<HttpError>,
    transport_security: TransportSecurity,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: BufferedService,
        max_body_size: usize,
        method: http::Method,
        url: String,
        transport_security: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            method,
            url,
            headers: Vec::new(),
            payload: Payload::Empty,
            cancellation: None,
            error: None,
            transport_security,
        }
    }

    fn push_header<N, V>(&mut self, name: N, value: V) -> bool
    where
        HeaderName: TryFrom<N, Error = http::header::InvalidHeaderName>,
        HeaderValue: TryFrom<V, Error = http::header::InvalidHeaderValue>,
    {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.push((name, value));
                true
            }
            (Err(e), _) => {
                self.error = Some(HttpError::InvalidHeaderName(e));
                false
            }
            (_, Err(e)) => {
                self.error = Some(HttpError::InvalidHeaderValue(e));
                false
            }
        }
    }

    /// Add a single header to the request
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_none() {
            self.push_header(name, value);
        }
        self
    }

    /// Add a header whose value is marked sensitive (hidden from `Debug`,
    /// never indexed by HTTP/2 header compression)
    pub fn sensitive_header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_none()
            && self.push_header(name, value)
            && let Some((_, value)) = self.headers.last_mut()
        {
            value.set_sensitive(true);
        }
        self
    }

    /// Add multiple headers to the request
    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        if self.error.is_some() {
            return self;
        }
        for (name, value) in headers {
            if !self.push_header(name, value) {
                break;
            }
        }
        self
    }

    /// Set request body as JSON (`application/json` unless a content type is set)
    ///
    /// # Errors
    ///
    /// Returns a previously deferred builder error, or `HttpError::Json` if
    /// serialization fails.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let bytes = serde_json::to_vec(body)?;
        self.payload = Payload::Typed(Bytes::from(bytes), "application/json");
        Ok(self)
    }

    /// Set request body as form URL-encoded fields, in the order given
    ///
    /// # Errors
    ///
    /// Returns a previously deferred builder error, or `HttpError::FormEncode`
    /// if encoding fails.
    pub fn form<K, V>(mut self, fields: &[(K, V)]) -> Result<Self, HttpError>
    where
        K: Serialize,
        V: Serialize,
    {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let encoded = serde_urlencoded::to_string(fields)?;
        self.payload = Payload::Typed(
            Bytes::from(encoded),
            "application/x-www-form-urlencoded",
        );
        Ok(self)
    }

    /// Set request body as raw bytes
    pub fn body_bytes(mut self, body: Bytes) -> Self {
        self.payload = Payload::Raw(body);
        self
    }

    /// Set request body as a string
    pub fn body_string(mut self, body: String) -> Self {
        self.payload = Payload::Raw(Bytes::from(body));
        self
    }

    /// Attach a cancellation signal to this request
    ///
    /// The token is also placed in the request extensions so middleware
    /// (such as an auth layer waiting on a token refresh) can observe it.
    /// Once cancelled, `send()` returns [`HttpError::Cancelled`].
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn validate_url(&self) -> Result<http::Uri, HttpError> {
        let uri: http::Uri =
            self.url
                .parse()
                .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
                    url: self.url.clone(),
                    kind: InvalidUriKind::ParseError,
                    reason: e.to_string(),
                })?;

        if uri.authority().is_none() {
            return Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "missing host/authority".to_owned(),
            });
        }

        match uri.scheme_str() {
            Some("https") => Ok(uri),
            Some("http") if self.transport_security == TransportSecurity::AllowInsecureHttp => {
                Ok(uri)
            }
            Some("http") => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
            Some(scheme) => Err(HttpError::InvalidScheme {
                scheme: scheme.to_owned(),
                reason: "only http:// and https:// schemes are supported".to_owned(),
            }),
            None => Err(HttpError::InvalidUri {
                url: self.url.clone(),
                kind: InvalidUriKind::MissingScheme,
                reason: "missing scheme".to_owned(),
            }),
        }
    }

    /// Send the request
    ///
    /// Every HTTP status is returned as `Ok`; use
    /// [`HttpResponse::error_for_status`] or the checked body readers to turn
    /// non-2xx into errors. When the buffer is full this waits for a slot.
    ///
    /// # Errors
    ///
    /// Returns `HttpError` for deferred builder errors, invalid URLs or
    /// schemes, transport/TLS failures, timeouts, auth layer failures and
    /// cancellation.
    pub async fn send(mut self) -> Result<HttpResponse, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let uri = self.validate_url()?;
        let mut builder = Request::builder().method(self.method).uri(uri);

        let has_content_type = self.headers.iter().any(|(name, _)| name == CONTENT_TYPE);
        let body = match self.payload {
            Payload::Empty => Bytes::new(),
            Payload::Raw(bytes) => bytes,
            Payload::Typed(bytes, content_type) => {
                if !has_content_type {
                    builder = builder.header(CONTENT_TYPE, content_type);
                }
                bytes
            }
        };
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        if let Some(token) = &self.cancellation {
            builder = builder.extension(token.clone());
        }

        let request = builder.body(Full::new(body))?;
        let max_body_size = self.max_body_size;
        let mut service = self.service;

        let call = async move {
            let ready = ServiceExt::<Request<Full<Bytes>>>::ready(&mut service)
                .await
                .map_err(map_buffer_error)?;
            let inner: Response<ResponseBody> =
                ready.call(request).await.map_err(map_buffer_error)?;
            Ok(HttpResponse {
                inner,
                max_body_size,
            })
        };

        match self.cancellation {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(HttpError::Cancelled),
                result = call => result,
            },
            None => call.await,
        }
    }
}
