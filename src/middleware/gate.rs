//! Rate limit gate implementation.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::rejection::Rejection;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::AdmissionStore;

type Extractor<Req> = Box<dyn Fn(&Req) -> Result<String> + Send + Sync>;
type DenyHandler<Req, Resp> = Box<dyn Fn(&Req, &str) -> Resp + Send + Sync>;
type ErrorHandler<Req, Resp> = Box<dyn Fn(&Req, &TurnstileError) -> Resp + Send + Sync>;
type Skipper<Req> = Box<dyn Fn(&Req) -> bool + Send + Sync>;
type BeforeHook<Req> = Box<dyn Fn(&Req) + Send + Sync>;

/// Outcome of passing a request through a [`RateLimitGate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission<Resp> {
    /// The skipper bypassed the check
    Skipped,
    /// The store admitted the request
    Allowed {
        /// The identifier the decision was made for
        identifier: String,
    },
    /// The request was denied or its identifier could not be extracted
    Rejected(Resp),
}

impl<Resp> Admission<Resp> {
    /// Whether the request may continue to the next handler.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Admission::Rejected(_))
    }
}

/// Translates store decisions into responses for inbound requests.
pub struct RateLimitGate<Req, Resp = Rejection> {
    store: Arc<dyn AdmissionStore>,
    extractor: Extractor<Req>,
    deny_handler: DenyHandler<Req, Resp>,
    error_handler: ErrorHandler<Req, Resp>,
    skipper: Option<Skipper<Req>>,
    before: Option<BeforeHook<Req>>,
}

impl<Req, Resp> RateLimitGate<Req, Resp>
where
    Req: 'static,
    Resp: From<Rejection> + 'static,
{
    /// Create a gate with the default deny (429) and error (403) handlers.
    pub fn new<E>(store: Arc<dyn AdmissionStore>, extractor: E) -> Self
    where
        E: Fn(&Req) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            store,
            extractor: Box::new(extractor),
            deny_handler: Box::new(|_: &Req, _: &str| Resp::from(Rejection::too_many_requests())),
            error_handler: Box::new(|_: &Req, _: &TurnstileError| Resp::from(Rejection::forbidden())),
            skipper: None,
            before: None,
        }
    }
}

impl<Req, Resp> RateLimitGate<Req, Resp> {
    /// Replace the handler invoked when the store denies a request.
    pub fn with_deny_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Req, &str) -> Resp + Send + Sync + 'static,
    {
        self.deny_handler = Box::new(handler);
        self
    }

    /// Replace the handler invoked when identifier extraction fails.
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Req, &TurnstileError) -> Resp + Send + Sync + 'static,
    {
        self.error_handler = Box::new(handler);
        self
    }

    /// Bypass the check entirely for requests matching `skipper`.
    pub fn with_skipper<F>(mut self, skipper: F) -> Self
    where
        F: Fn(&Req) -> bool + Send + Sync + 'static,
    {
        self.skipper = Some(Box::new(skipper));
        self
    }

    /// Run `hook` before each check that is not skipped.
    pub fn with_before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Req) + Send + Sync + 'static,
    {
        self.before = Some(Box::new(hook));
        self
    }

    /// Decide whether `request` may proceed.
    ///
    /// The store is only consulted when an identifier was extracted, so
    /// extraction failures never consume tokens.
    #[instrument(skip_all)]
    pub fn admit(&self, request: &Req) -> Admission<Resp> {
        if self.skipper.as_ref().is_some_and(|skip| skip(request)) {
            debug!("Rate limit check skipped");
            return Admission::Skipped;
        }

        if let Some(before) = &self.before {
            before(request);
        }

        let identifier = match (self.extractor)(request) {
            Ok(identifier) => identifier,
            Err(e) => {
                warn!(error = %e, "Failed to extract identifier");
                return Admission::Rejected((self.error_handler)(request, &e));
            }
        };

        if !self.store.allow(&identifier) {
            debug!(identifier = %identifier, "Request denied");
            return Admission::Rejected((self.deny_handler)(request, &identifier));
        }

        Admission::Allowed { identifier }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{MockClock, StoreConfig, VisitorStore};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestRequest {
        real_ip: Option<&'static str>,
    }

    impl TestRequest {
        fn with_ip(real_ip: &'static str) -> Self {
            Self {
                real_ip: if real_ip.is_empty() { None } else { Some(real_ip) },
            }
        }
    }

    #[derive(Debug, PartialEq)]
    struct Status(u16);

    impl From<Rejection> for Status {
        fn from(rejection: Rejection) -> Self {
            Status(rejection.status)
        }
    }

    fn real_ip(request: &TestRequest) -> Result<String> {
        request
            .real_ip
            .map(str::to_string)
            .ok_or_else(|| TurnstileError::Extraction("invalid identifier".to_string()))
    }

    fn test_store() -> Arc<VisitorStore<MockClock>> {
        Arc::new(VisitorStore::with_clock(StoreConfig::new(1.0, 3), MockClock::new()).unwrap())
    }

    fn status(admission: Admission<Rejection>) -> u16 {
        match admission {
            Admission::Rejected(rejection) => rejection.status,
            Admission::Allowed { .. } | Admission::Skipped => 200,
        }
    }

    #[test]
    fn test_default_handlers() {
        let gate: RateLimitGate<TestRequest> = RateLimitGate::new(test_store(), real_ip);

        let cases = [
            ("127.0.0.1", 200),
            ("127.0.0.1", 200),
            ("127.0.0.1", 200),
            ("127.0.0.1", 429),
            ("", 403),
            ("127.0.0.1", 429),
        ];

        for (i, (ip, expected)) in cases.into_iter().enumerate() {
            let admission = gate.admit(&TestRequest::with_ip(ip));
            assert_eq!(status(admission), expected, "request {}", i);
        }
    }

    #[test]
    fn test_custom_handlers() {
        let gate: RateLimitGate<TestRequest, Status> = RateLimitGate::new(test_store(), real_ip)
            .with_deny_handler(|_, _| Status(400))
            .with_error_handler(|_, _| Status(401));

        for _ in 0..3 {
            assert!(gate.admit(&TestRequest::with_ip("127.0.0.1")).is_admitted());
        }
        assert_eq!(gate.admit(&TestRequest::with_ip("127.0.0.1")), Admission::Rejected(Status(400)));
        assert_eq!(gate.admit(&TestRequest::with_ip("")), Admission::Rejected(Status(401)));
    }

    #[test]
    fn test_extraction_failure_does_not_consume_tokens() {
        let store = test_store();
        let gate: RateLimitGate<TestRequest> = RateLimitGate::new(store.clone(), real_ip);

        for _ in 0..5 {
            gate.admit(&TestRequest::with_ip(""));
        }

        assert_eq!(store.visitor_count(), 0);
    }

    #[test]
    fn test_allowed_reports_identifier() {
        let gate: RateLimitGate<TestRequest> = RateLimitGate::new(test_store(), real_ip);

        let admission = gate.admit(&TestRequest::with_ip("10.0.0.1"));
        assert_eq!(
            admission,
            Admission::Allowed {
                identifier: "10.0.0.1".to_string()
            }
        );
    }

    #[test]
    fn test_skipper_bypasses_check() {
        let store = test_store();
        let before_calls = Arc::new(AtomicUsize::new(0));
        let calls = before_calls.clone();
        let gate: RateLimitGate<TestRequest> = RateLimitGate::new(store.clone(), real_ip)
            .with_skipper(|_| true)
            .with_before(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });

        for _ in 0..10 {
            assert_eq!(gate.admit(&TestRequest::with_ip("127.0.0.1")), Admission::Skipped);
        }

        assert_eq!(store.visitor_count(), 0);
        assert_eq!(before_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_before_hook_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let gate: RateLimitGate<TestRequest> = RateLimitGate::new(test_store(), real_ip)
            .with_before(move |_| flag.store(true, Ordering::SeqCst));

        gate.admit(&TestRequest::with_ip("127.0.0.1"));

        assert!(ran.load(Ordering::SeqCst));
    }
}
