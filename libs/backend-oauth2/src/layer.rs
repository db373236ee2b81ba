use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use backend_http::HttpError;
use http::header::{AUTHORIZATION, HeaderName};
use http::{Request, Response};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use crate::error::TokenError;
use crate::provider::CachingTokenProvider;

/// Tower layer that sets `<header_name>: <token_type> <access_token>` on
/// every request, using a token from a [`CachingTokenProvider`].
#[derive(Clone, Debug)]
pub struct TokenInjectionLayer {
    provider: CachingTokenProvider,
    header_name: HeaderName,
}

impl TokenInjectionLayer {
    /// Inject into `Authorization`.
    #[must_use]
    pub fn new(provider: CachingTokenProvider) -> Self {
        Self::with_header_name(provider, AUTHORIZATION)
    }

    #[must_use]
    pub fn with_header_name(provider: CachingTokenProvider, header_name: HeaderName) -> Self {
        Self {
            provider,
            header_name,
        }
    }
}

impl<S> Layer<S> for TokenInjectionLayer {
    type Service = TokenInjectionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenInjectionService {
            inner,
            provider: self.provider.clone(),
            header_name: self.header_name.clone(),
        }
    }
}

/// Service created by [`TokenInjectionLayer`].
///
/// A token failure fails the call with [`HttpError::Auth`] (source:
/// [`TokenError`]) and nothing is sent downstream. A [`CancellationToken`]
/// found in the request extensions bounds the wait for a token.
#[derive(Clone, Debug)]
pub struct TokenInjectionService<S> {
    inner: S,
    provider: CachingTokenProvider,
    header_name: HeaderName,
}

impl<S, B, ResBody> Service<Request<B>> for TokenInjectionService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Response<ResBody>, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Clone-swap: keep the service that was polled ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let provider = self.provider.clone();
        let header_name = self.header_name.clone();

        Box::pin(async move {
            let cancel = req.extensions().get::<CancellationToken>().cloned();
            let token = match &cancel {
                Some(cancel) => provider.token_with_cancellation(cancel).await,
                None => provider.token().await,
            }
            .map_err(|e| match e {
                TokenError::Cancelled => HttpError::Cancelled,
                other => HttpError::Auth(Box::new(other)),
            })?;

            let value = token.header_value()?;
            let (mut parts, body) = req.into_parts();
            parts.headers.insert(header_name, value);

            inner.call(Request::from_parts(parts, body)).await
        })
    }
}
