use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures::FutureExt as _;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_EXPIRY_SKEW, Settings};
use crate::error::TokenError;
use crate::fetcher::TokenFetcher;
use crate::token::AccessToken;

type RefreshResult = Result<Arc<AccessToken>, TokenError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Refresh policy of a [`CachingTokenProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    /// A token counts as expired this long before its nominal expiry.
    pub expiry_skew: Duration,
    /// When set, a failed refresh's error is returned to callers for this
    /// long before another fetch is attempted.
    pub failure_cooldown: Option<Duration>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            expiry_skew: DEFAULT_EXPIRY_SKEW,
            failure_cooldown: None,
        }
    }
}

impl From<&Settings> for ProviderOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            expiry_skew: settings.expiry_skew,
            failure_cooldown: settings.failure_cooldown,
        }
    }
}

#[derive(Default)]
struct RefreshState {
    inflight: Option<SharedRefresh>,
    /// Error replayed until the deadline (only with a failure cooldown).
    failure: Option<(Instant, TokenError)>,
}

struct Inner {
    fetcher: Arc<dyn TokenFetcher>,
    /// Whole-value swaps only; readers never take `state`.
    current: ArcSwapOption<AccessToken>,
    state: Mutex<RefreshState>,
    options: ProviderOptions,
}

impl Inner {
    fn fresh(&self) -> Option<Arc<AccessToken>> {
        self.current
            .load_full()
            .filter(|t| t.is_fresh(Instant::now(), self.options.expiry_skew))
    }

    async fn refresh(self: Arc<Self>) -> RefreshResult {
        tracing::debug!("refreshing OAuth2 token");
        let result = self.fetcher.fetch().await.map(Arc::new);

        let mut state = self.state.lock();
        state.inflight = None;
        match &result {
            Ok(token) => {
                self.current.store(Some(Arc::clone(token)));
                state.failure = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "OAuth2 token refresh failed");
                if let Some(cooldown) = self.options.failure_cooldown
                    && let Some(until) = Instant::now().checked_add(cooldown)
                {
                    state.failure = Some((until, e.clone()));
                }
            }
        }
        result
    }
}

enum Step {
    Ready(Arc<AccessToken>),
    Wait(SharedRefresh),
}

/// Token cache with single-flight refresh.
///
/// A fresh cached token is returned from a lock-free read. When the cache is
/// empty or stale, the first caller starts one fetch and every concurrent
/// caller awaits that same fetch and receives the same token or error.
/// Failed fetches are not cached unless a failure cooldown is configured.
///
/// Clones share one cache; separate instances never share tokens.
#[derive(Clone)]
pub struct CachingTokenProvider {
    inner: Arc<Inner>,
}

impl CachingTokenProvider {
    #[must_use]
    pub fn new(fetcher: Arc<dyn TokenFetcher>, options: ProviderOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                current: ArcSwapOption::empty(),
                state: Mutex::new(RefreshState::default()),
                options,
            }),
        }
    }

    /// The cached token if it is still fresh. Never fetches.
    #[must_use]
    pub fn cached(&self) -> Option<Arc<AccessToken>> {
        self.inner.fresh()
    }

    /// A fresh token, fetching one if needed.
    ///
    /// # Errors
    ///
    /// Returns the error of the fetch this call started or joined, or the
    /// replayed error while a failure cooldown is active.
    pub async fn token(&self) -> Result<Arc<AccessToken>, TokenError> {
        if let Some(token) = self.inner.fresh() {
            return Ok(token);
        }
        match self.join_or_start_refresh()? {
            Step::Ready(token) => Ok(token),
            Step::Wait(refresh) => refresh.await,
        }
    }

    /// Like [`token`](Self::token), but stops waiting when `cancel` fires.
    ///
    /// Only this caller's wait ends; the fetch and its other waiters carry on.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Cancelled`] once `cancel` fires, otherwise the
    /// same errors as [`token`](Self::token).
    pub async fn token_with_cancellation(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<AccessToken>, TokenError> {
        if let Some(token) = self.inner.fresh() {
            return Ok(token);
        }
        if cancel.is_cancelled() {
            return Err(TokenError::Cancelled);
        }
        let refresh = match self.join_or_start_refresh()? {
            Step::Ready(token) => return Ok(token),
            Step::Wait(refresh) => refresh,
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TokenError::Cancelled),
            result = refresh => result,
        }
    }

    /// Drop the cached token so the next call fetches a new one.
    ///
    /// A refresh already in flight is left alone.
    pub fn invalidate(&self) {
        self.inner.current.store(None);
        tracing::debug!("OAuth2 token invalidated");
    }

    fn join_or_start_refresh(&self) -> Result<Step, TokenError> {
        let mut state = self.inner.state.lock();

        // A refresh may have completed between the fast-path read and the lock.
        if let Some(token) = self.inner.fresh() {
            return Ok(Step::Ready(token));
        }
        if let Some(refresh) = &state.inflight {
            return Ok(Step::Wait(refresh.clone()));
        }
        if let Some((until, error)) = &state.failure {
            if Instant::now() < *until {
                return Err(error.clone());
            }
            state.failure = None;
        }

        // Spawned so the fetch finishes even if every waiter goes away.
        let task = tokio::spawn(Arc::clone(&self.inner).refresh());
        let inner = Arc::clone(&self.inner);
        let refresh = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(error = %e, "OAuth2 token refresh task failed");
                    inner.state.lock().inflight = None;
                    Err(TokenError::Network("OAuth2 token refresh aborted".to_owned()))
                }
            }
        }
        .boxed()
        .shared();
        state.inflight = Some(refresh.clone());
        Ok(Step::Wait(refresh))
    }
}

impl fmt::Debug for CachingTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingTokenProvider")
            .field("cached", &self.inner.current.load().is_some())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::types::SecretString;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Outcome = Result<(&'static str, Option<Duration>), TokenError>;

    /// Fetcher that replays scripted outcomes after a delay.
    struct ScriptedFetcher {
        calls: AtomicUsize,
        delay: Duration,
        script: Mutex<VecDeque<Outcome>>,
    }

    impl ScriptedFetcher {
        fn new(delay: Duration, script: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                script: Mutex::new(script.into_iter().collect()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<AccessToken, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let outcome = self
                .script
                .lock()
                .pop_front()
                .unwrap_or(Ok(("default", None)));
            outcome.map(|(value, ttl)| {
                AccessToken::new(
                    SecretString::new(value),
                    "Bearer",
                    ttl.map(|ttl| Instant::now() + ttl),
                )
            })
        }
    }

    fn provider(fetcher: &Arc<ScriptedFetcher>, options: ProviderOptions) -> CachingTokenProvider {
        let fetcher: Arc<dyn TokenFetcher> = fetcher.clone();
        CachingTokenProvider::new(fetcher, options)
    }

    fn network_error() -> TokenError {
        TokenError::Network("OAuth2 token transport error: refused".into())
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_fetch() {
        let fetcher = ScriptedFetcher::new(
            Duration::from_millis(100),
            [Ok(("T1", Some(Duration::from_secs(3600))))],
        );
        let p = provider(&fetcher, ProviderOptions::default());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let p = p.clone();
                tokio::spawn(async move { p.token().await })
            })
            .collect();

        let mut tokens = Vec::new();
        for h in handles {
            tokens.push(h.await.unwrap().unwrap());
        }

        assert_eq!(fetcher.calls(), 1);
        assert!(tokens.iter().all(|t| Arc::ptr_eq(t, &tokens[0])));
        assert_eq!(tokens[0].secret().expose(), "T1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_fetch_across_threads() {
        let fetcher = ScriptedFetcher::new(
            Duration::from_millis(50),
            [Ok(("T1", Some(Duration::from_secs(3600))))],
        );
        let p = provider(&fetcher, ProviderOptions::default());
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let p = p.clone();
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    p.token().await
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().secret().expose(), "T1");
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_token_avoids_fetch() {
        let fetcher = ScriptedFetcher::new(Duration::ZERO, [Ok(("T1", None))]);
        let p = provider(&fetcher, ProviderOptions::default());

        assert!(p.cached().is_none());
        p.token().await.unwrap();
        for _ in 0..100 {
            assert_eq!(p.token().await.unwrap().secret().expose(), "T1");
        }

        assert_eq!(fetcher.calls(), 1);
        assert!(p.cached().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_triggers_one_refresh() {
        let fetcher = ScriptedFetcher::new(
            Duration::ZERO,
            [
                Ok(("T1", Some(Duration::from_secs(60)))),
                Ok(("T2", Some(Duration::from_secs(60)))),
            ],
        );
        let p = provider(&fetcher, ProviderOptions::default());

        assert_eq!(p.token().await.unwrap().secret().expose(), "T1");

        // 49s + 10s skew is still before the 60s expiry.
        tokio::time::advance(Duration::from_secs(49)).await;
        assert_eq!(p.token().await.unwrap().secret().expose(), "T1");
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(p.cached().is_none());
        assert_eq!(p.token().await.unwrap().secret().expose(), "T2");
        assert_eq!(p.token().await.unwrap().secret().expose(), "T2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_does_not_poison_cache() {
        let fetcher = ScriptedFetcher::new(
            Duration::ZERO,
            [Err(network_error()), Ok(("T1", None))],
        );
        let p = provider(&fetcher, ProviderOptions::default());

        assert_eq!(p.token().await.unwrap_err(), network_error());
        assert!(p.cached().is_none());

        assert_eq!(p.token().await.unwrap().secret().expose(), "T1");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_share_the_same_error() {
        let fetcher = ScriptedFetcher::new(Duration::from_millis(100), [Err(network_error())]);
        let p = provider(&fetcher, ProviderOptions::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let p = p.clone();
                tokio::spawn(async move { p.token().await })
            })
            .collect();

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap_err(), network_error());
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_cooldown_replays_error_until_deadline() {
        let fetcher = ScriptedFetcher::new(
            Duration::ZERO,
            [Err(network_error()), Ok(("T1", None))],
        );
        let p = provider(
            &fetcher,
            ProviderOptions {
                failure_cooldown: Some(Duration::from_secs(5)),
                ..ProviderOptions::default()
            },
        );

        assert!(p.token().await.is_err());
        assert_eq!(p.token().await.unwrap_err(), network_error());
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(p.token().await.unwrap().secret().expose(), "T1");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_leaves_fetch_running() {
        let fetcher = ScriptedFetcher::new(Duration::from_secs(10), [Ok(("T1", None))]);
        let p = provider(&fetcher, ProviderOptions::default());

        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.token().await })
        };
        tokio::task::yield_now().await;

        let cancel = CancellationToken::new();
        let cancelled = {
            let p = p.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { p.token_with_cancellation(&cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert_eq!(cancelled.await.unwrap().unwrap_err(), TokenError::Cancelled);
        assert_eq!(waiter.await.unwrap().unwrap().secret().expose(), "T1");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_does_not_start_fetch() {
        let fetcher = ScriptedFetcher::new(Duration::ZERO, [Ok(("T1", None))]);
        let p = provider(&fetcher, ProviderOptions::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            p.token_with_cancellation(&cancel).await.unwrap_err(),
            TokenError::Cancelled
        );
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_completes_when_every_waiter_gives_up() {
        let fetcher = ScriptedFetcher::new(Duration::from_secs(1), [Ok(("T1", None))]);
        let p = provider(&fetcher, ProviderOptions::default());

        let cancel = CancellationToken::new();
        let waiter = {
            let p = p.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { p.token_with_cancellation(&cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();
        assert!(waiter.await.unwrap().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(p.cached().unwrap().secret().expose(), "T1");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refetch() {
        let fetcher = ScriptedFetcher::new(Duration::ZERO, [Ok(("T1", None)), Ok(("T2", None))]);
        let p = provider(&fetcher, ProviderOptions::default());

        assert_eq!(p.token().await.unwrap().secret().expose(), "T1");
        p.invalidate();
        assert!(p.cached().is_none());
        assert_eq!(p.token().await.unwrap().secret().expose(), "T2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn separate_providers_do_not_share_tokens() {
        let a = ScriptedFetcher::new(Duration::ZERO, [Ok(("A", None))]);
        let b = ScriptedFetcher::new(Duration::ZERO, [Ok(("B", None))]);
        let pa = provider(&a, ProviderOptions::default());
        let pb = provider(&b, ProviderOptions::default());

        assert_eq!(pa.token().await.unwrap().secret().expose(), "A");
        assert_eq!(pb.token().await.unwrap().secret().expose(), "B");
    }

    #[test]
    fn options_from_settings() {
        let s = Settings::new(
            "cid",
            SecretString::new("sec"),
            url::Url::parse("https://auth.example.com/token").unwrap(),
        )
        .with_expiry_skew(Duration::from_secs(30))
        .with_failure_cooldown(Duration::from_secs(2));
        let o = ProviderOptions::from(&s);
        assert_eq!(o.expiry_skew, Duration::from_secs(30));
        assert_eq!(o.failure_cooldown, Some(Duration::from_secs(2)));
    }
}
