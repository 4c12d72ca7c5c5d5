use super::{clone_request, debug, HttpRequest, HttpResponse, RoundTrip};
use crate::error::TransportError;
use crate::metrics::ClientMetrics;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;

use std::time::Duration;

const FIRST_RETRY_INTERVAL: Duration = Duration::from_secs(2);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(600);

/// Exponential backoff of `2^attempt` seconds, capped at 10 minutes, without jitter
#[derive(Debug)]
struct CappedBackoff(ExponentialBackoff);

impl Backoff for CappedBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        let CappedBackoff(exp) = self;
        exp.next_backoff()
    }
    fn reset(&mut self) {
        let CappedBackoff(exp) = self;
        exp.reset()
    }
}

impl Default for CappedBackoff {
    fn default() -> Self {
        let mut backoff = ExponentialBackoff {
            initial_interval: FIRST_RETRY_INTERVAL,
            current_interval: FIRST_RETRY_INTERVAL,
            max_interval: MAX_RETRY_INTERVAL,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        CappedBackoff(backoff)
    }
}

/// Wraps another round tripper, re-sending the request when no response was received at
/// all. Any response, whatever its status, is returned to the caller as is.
#[derive(Debug, Clone)]
pub struct RetryingTransport<T> {
    inner: T,
    max_retries: u32,
    debug: bool,
    metrics: ClientMetrics,
}

impl<T: RoundTrip> RetryingTransport<T> {
    pub fn new(inner: T, max_retries: u32, metrics: ClientMetrics) -> RetryingTransport<T> {
        RetryingTransport {
            inner,
            max_retries,
            debug: false,
            metrics,
        }
    }

    /// Logs method, URL, redacted headers and bodies of every exchange at debug level
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

#[async_trait]
impl<T: RoundTrip> RoundTrip for RetryingTransport<T> {
    async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if self.debug {
            debug::log_request(&request);
        }
        let mut backoff = CappedBackoff::default();
        let mut attempt = 0;
        loop {
            match self.inner.round_trip(clone_request(&request)).await {
                Ok(response) => {
                    if self.debug {
                        debug::log_response(&response);
                    }
                    return Ok(response);
                }
                Err(err) if attempt >= self.max_retries => {
                    log::error!(
                        "{} request to: {} failed after {} attempts: {}",
                        request.method(),
                        request.uri(),
                        attempt + 1,
                        err
                    );
                    return Err(TransportError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = backoff.next_backoff().unwrap_or(MAX_RETRY_INTERVAL);
                    attempt += 1;
                    log::warn!(
                        "{} request to: {} failed, retry {} of {} in {}s: {}",
                        request.method(),
                        request.uri(),
                        attempt,
                        self.max_retries,
                        delay.as_secs(),
                        err
                    );
                    self.metrics.retry();
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Fails the first `failures` calls without a response, then answers with `status`
    struct FlakyTransport {
        failures: u32,
        status: u16,
        failed: AtomicU32,
        succeeded: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32, status: u16) -> Arc<FlakyTransport> {
            Arc::new(FlakyTransport {
                failures,
                status,
                failed: AtomicU32::new(0),
                succeeded: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl RoundTrip for FlakyTransport {
        async fn round_trip(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            assert_eq!(&Bytes::from_static(b"{\"volume\":{}}"), request.body());
            if self.failed.load(Ordering::SeqCst) < self.failures {
                self.failed.fetch_add(1, Ordering::SeqCst);
                return Err(TransportError::Simulated("connection reset".to_owned()));
            }
            self.succeeded.fetch_add(1, Ordering::SeqCst);
            Ok(http::Response::builder()
                .status(self.status)
                .body(Bytes::new())
                .unwrap())
        }
    }

    fn request() -> HttpRequest {
        http::Request::builder()
            .method("POST")
            .uri("https://evs.eu-de.otc.t-systems.com/v2/p/volumes")
            .body(Bytes::from_static(b"{\"volume\":{}}"))
            .unwrap()
    }

    #[tokio::test]
    async fn retries_until_success() {
        tokio::time::pause();
        for max_retries in 0..5 {
            let flaky = FlakyTransport::new(max_retries, 201);
            let metrics = ClientMetrics::default();
            let transport = RetryingTransport::new(flaky.clone(), max_retries, metrics.clone());
            let response = transport.round_trip(request()).await.unwrap();
            assert_eq!(201, response.status().as_u16());
            assert_eq!(max_retries, flaky.failed.load(Ordering::SeqCst));
            assert_eq!(1, flaky.succeeded.load(Ordering::SeqCst));
            assert_eq!(max_retries as u64, metrics.retry_count());
        }
    }

    #[tokio::test]
    async fn http_errors_are_not_retried() {
        tokio::time::pause();
        let flaky = FlakyTransport::new(0, 502);
        let transport = RetryingTransport::new(flaky.clone(), 3, ClientMetrics::default());
        let response = transport.round_trip(request()).await.unwrap();
        assert_eq!(502, response.status().as_u16());
        assert_eq!(1, flaky.succeeded.load(Ordering::SeqCst));
        assert_eq!(0, flaky.failed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        tokio::time::pause();
        let flaky = FlakyTransport::new(10, 201);
        let transport = RetryingTransport::new(flaky.clone(), 2, ClientMetrics::default());
        let err = transport.round_trip(request()).await.unwrap_err();
        match err {
            TransportError::RetriesExhausted { attempts, ref last } => {
                assert_eq!(3, attempts);
                assert!(matches!(**last, TransportError::Simulated(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(3, flaky.failed.load(Ordering::SeqCst));
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let mut backoff = CappedBackoff::default();
        let intervals = (0..12)
            .map(|_| backoff.next_backoff().unwrap().as_secs())
            .collect::<Vec<_>>();
        assert_eq!(
            vec![2, 4, 8, 16, 32, 64, 128, 256, 512, 600, 600, 600],
            intervals
        );
    }
}
