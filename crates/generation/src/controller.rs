//! Rotation controller
//!
//! ```text
//! NEED_KEY ──acquire──▶ HAVE_KEY ──call──▶ REQUESTING ──ok──▶ SUCCESS
//!    ▲                                         │
//!    │                                      failure
//!    │                                         ▼
//!    └──── ROTATE ◀──rotatable── CLASSIFY ──other──▶ FATAL
//! ```
//!
//! The controller owns a single session slot holding the key currently in
//! use. A key stays in the slot across calls until the provider rejects it
//! with a rotatable failure; it is then reported to the pool and dropped from
//! the slot so the next attempt acquires a fresh one. Every rotatable failure
//! consumes one attempt, so a call never makes more than `max_attempts`
//! provider requests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use key_pool::{Credential, CredentialPool};
use provider::{GenerationProvider, ProviderError, RotationClass};
use tracing::{debug, info, instrument, warn};

use crate::error::{GenerateError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One generation call: the prompt and how many keys it may burn through.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    prompt: String,
    max_attempts: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the attempt budget. Zero is treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Retry/rotation policy around a provider and a key pool.
///
/// Construct one per process and share it through an `Arc`; concurrent
/// `generate` calls share the session slot.
pub struct GenerationController {
    pool: Arc<dyn CredentialPool>,
    provider: Arc<dyn GenerationProvider>,
    attempt_timeout: Option<Duration>,
    current: Mutex<Option<Credential>>,
}

impl GenerationController {
    pub fn new(pool: Arc<dyn CredentialPool>, provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            pool,
            provider,
            attempt_timeout: None,
            current: Mutex::new(None),
        }
    }

    /// Bound each provider call. Expiry is a non-rotatable `Timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &Arc<dyn CredentialPool> {
        &self.pool
    }

    /// Fingerprint of the key held in the session, if any.
    pub fn current_fingerprint(&self) -> Option<String> {
        self.slot().as_ref().map(Credential::fingerprint)
    }

    /// Generate text for `request`, rotating keys on quota or auth failures.
    #[instrument(skip_all, fields(provider = self.provider.id(), pool = self.pool.id(), max_attempts = request.max_attempts()))]
    pub async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let max_attempts = request.max_attempts();
        let mut attempts = 0u32;

        while attempts < max_attempts {
            let credential = match self.held() {
                Some(credential) => credential,
                None => self.acquire().await?,
            };

            match self.call(&credential, request.prompt()).await {
                Ok(text) => {
                    metrics::counter!("generation_attempts_total", "outcome" => "success")
                        .increment(1);
                    debug!(key = %credential.fingerprint(), attempts, chars = text.len(), "generation succeeded");
                    return Ok(text);
                }
                Err(err) => match err.rotation_class() {
                    RotationClass::Rotatable => {
                        metrics::counter!("generation_attempts_total", "outcome" => "rotated")
                            .increment(1);
                        warn!(
                            key = %credential.fingerprint(),
                            error = %err,
                            attempt = attempts + 1,
                            "key rejected by provider, rotating"
                        );
                        self.rotate(&credential).await;
                        attempts += 1;
                    }
                    RotationClass::NonRotatable => {
                        metrics::counter!("generation_attempts_total", "outcome" => "failed")
                            .increment(1);
                        warn!(error = %err, kind = err.kind(), "provider failure, not rotating");
                        return Err(fail(GenerateError::Provider(err)));
                    }
                },
            }
        }

        warn!(attempts, "attempt budget spent");
        Err(fail(GenerateError::RetriesExhausted { attempts }))
    }

    async fn acquire(&self) -> Result<Credential> {
        let credential = self.pool.acquire_credential().await.map_err(|e| match e {
            key_pool::Error::NotFound(msg) => fail(GenerateError::PoolEmpty(msg)),
            other => fail(GenerateError::Pool(other.to_string())),
        })?;
        info!(key = %credential.fingerprint(), "acquired key");
        *self.slot() = Some(credential.clone());
        Ok(credential)
    }

    async fn call(&self, credential: &Credential, prompt: &str) -> provider::Result<String> {
        let request = self.provider.generate(credential.expose(), prompt);
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .unwrap_or_else(|_| Err(ProviderError::Timeout(limit))),
            None => request.await,
        }
    }

    /// Drop `credential` from the session, then report it.
    ///
    /// A failed report still counts as a rotation; the next attempt acquires
    /// a key regardless.
    async fn rotate(&self, credential: &Credential) {
        metrics::counter!("credential_rotations_total").increment(1);
        {
            let mut slot = self.slot();
            if slot.as_ref() == Some(credential) {
                *slot = None;
            }
        }
        if let Err(e) = self.pool.report_exhausted(credential).await {
            warn!(key = %credential.fingerprint(), error = %e, "failed to report exhausted key");
        }
    }

    fn held(&self) -> Option<Credential> {
        self.slot().clone()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Credential>> {
        // The slot is only ever assigned whole, so a poisoned value is intact
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn fail(err: GenerateError) -> GenerateError {
    metrics::counter!("generation_failures_total", "kind" => err.kind()).increment(1);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pool over an ordered key list: acquisition returns the first key not
    /// yet reported.
    struct ScriptedPool {
        keys: Vec<&'static str>,
        reported: Mutex<Vec<String>>,
        acquires: AtomicUsize,
        unreachable: bool,
        fail_reports: bool,
        stall_reports: bool,
    }

    impl ScriptedPool {
        fn new(keys: &[&'static str]) -> Self {
            Self {
                keys: keys.to_vec(),
                reported: Mutex::new(Vec::new()),
                acquires: AtomicUsize::new(0),
                unreachable: false,
                fail_reports: false,
                stall_reports: false,
            }
        }

        fn reported(&self) -> Vec<String> {
            self.reported.lock().unwrap().clone()
        }

        fn acquires(&self) -> usize {
            self.acquires.load(Ordering::SeqCst)
        }
    }

    impl CredentialPool for ScriptedPool {
        fn id(&self) -> &str {
            "scripted"
        }

        fn acquire_credential(
            &self,
        ) -> Pin<Box<dyn Future<Output = key_pool::Result<Credential>> + Send + '_>> {
            Box::pin(async move {
                self.acquires.fetch_add(1, Ordering::SeqCst);
                if self.unreachable {
                    return Err(key_pool::Error::Remote("connection refused".into()));
                }
                let reported = self.reported.lock().unwrap();
                self.keys
                    .iter()
                    .find(|k| !reported.iter().any(|r| r == *k))
                    .map(|k| Credential::new(*k))
                    .ok_or_else(|| key_pool::Error::NotFound("no keys".into()))
            })
        }

        fn report_exhausted<'a>(
            &'a self,
            credential: &'a Credential,
        ) -> Pin<Box<dyn Future<Output = key_pool::Result<()>> + Send + 'a>> {
            Box::pin(async move {
                self.reported
                    .lock()
                    .unwrap()
                    .push(credential.expose().to_string());
                if self.fail_reports {
                    return Err(key_pool::Error::Remote("report failed".into()));
                }
                if self.stall_reports {
                    std::future::pending::<()>().await;
                }
                Ok(())
            })
        }

        fn health(&self) -> Pin<Box<dyn Future<Output = serde_json::Value> + Send + '_>> {
            Box::pin(async { serde_json::json!({"backend": "scripted"}) })
        }
    }

    type Behaviour = Box<dyn Fn(&str) -> provider::Result<String> + Send + Sync>;

    /// Provider answering by key; records every key it was called with.
    struct ScriptedProvider {
        behaviour: Behaviour,
        calls: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl ScriptedProvider {
        fn new(behaviour: impl Fn(&str) -> provider::Result<String> + Send + Sync + 'static) -> Self {
            Self {
                behaviour: Box::new(behaviour),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl GenerationProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn generate<'a>(
            &'a self,
            api_key: &'a str,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = provider::Result<String>> + Send + 'a>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(api_key.to_string());
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                (self.behaviour)(api_key)
            })
        }
    }

    fn quota_error() -> ProviderError {
        ProviderError::Upstream {
            status: 429,
            code: Some("RESOURCE_EXHAUSTED".into()),
            reason: None,
            message: "Resource has been exhausted (e.g. check quota).".into(),
        }
    }

    fn controller(
        pool: &Arc<ScriptedPool>,
        provider: &Arc<ScriptedProvider>,
    ) -> GenerationController {
        GenerationController::new(pool.clone(), provider.clone())
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("Plan de clase sobre fracciones")
    }

    #[test]
    fn request_defaults_and_clamps_attempts() {
        assert_eq!(request().max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(request().with_max_attempts(0).max_attempts(), 1);
        assert_eq!(request().with_max_attempts(5).max_attempts(), 5);
    }

    #[tokio::test]
    async fn first_key_works() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Ok("plan".into())));
        let controller = controller(&pool, &provider);

        assert_eq!(controller.generate(&request()).await.unwrap(), "plan");
        assert_eq!(pool.acquires(), 1);
        assert!(pool.reported().is_empty());
        assert_eq!(provider.calls(), ["K1"]);
    }

    #[tokio::test]
    async fn rotates_past_rejected_key_and_keeps_the_good_one() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|key| match key {
            "K1" => Err(quota_error()),
            _ => Ok("Plan de clase...".into()),
        }));
        let controller = controller(&pool, &provider);

        let text = controller.generate(&request()).await.unwrap();
        assert_eq!(text, "Plan de clase...");
        assert_eq!(pool.reported(), ["K1"]);
        assert_eq!(provider.calls(), ["K1", "K2"]);
        assert_eq!(controller.current_fingerprint().as_deref(), Some("***"));

        // The next call reuses K2 without asking the pool again
        controller.generate(&request()).await.unwrap();
        assert_eq!(pool.acquires(), 2);
        assert_eq!(provider.calls(), ["K1", "K2", "K2"]);
    }

    #[tokio::test]
    async fn n_rotatable_failures_then_success_reports_each_key_once() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2", "K3", "K4"]));
        let provider = Arc::new(ScriptedProvider::new(|key| match key {
            "K1" | "K2" => Err(quota_error()),
            _ => Ok("ok".into()),
        }));
        let controller = controller(&pool, &provider);

        assert_eq!(controller.generate(&request()).await.unwrap(), "ok");
        assert_eq!(pool.reported(), ["K1", "K2"]);
        assert_eq!(provider.calls(), ["K1", "K2", "K3"]);
    }

    #[tokio::test]
    async fn every_attempt_rotatable_spends_the_budget() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2", "K3", "K4", "K5"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Err(quota_error())));
        let controller = controller(&pool, &provider);

        let err = controller.generate(&request()).await.unwrap_err();
        assert!(
            matches!(err, GenerateError::RetriesExhausted { attempts: 3 }),
            "got: {err:?}"
        );
        assert_eq!(pool.reported(), ["K1", "K2", "K3"]);
        assert_eq!(provider.calls().len(), 3);
        assert!(controller.current_fingerprint().is_none());
    }

    #[tokio::test]
    async fn zero_budget_still_makes_one_attempt() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Err(quota_error())));
        let controller = controller(&pool, &provider);

        let err = controller
            .generate(&request().with_max_attempts(0))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerateError::RetriesExhausted { attempts: 1 }));
        assert_eq!(provider.calls(), ["K1"]);
    }

    #[tokio::test]
    async fn non_rotatable_failure_surfaces_without_report() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|_| {
            Err(ProviderError::Transport("connection reset".into()))
        }));
        let controller = controller(&pool, &provider);

        let err = controller.generate(&request()).await.unwrap_err();
        assert!(
            matches!(err, GenerateError::Provider(ProviderError::Transport(_))),
            "got: {err:?}"
        );
        assert!(pool.reported().is_empty());
        assert_eq!(provider.calls(), ["K1"]);
        // The key was not at fault and stays in the session
        assert!(controller.current_fingerprint().is_some());
    }

    #[tokio::test]
    async fn message_only_quota_failure_rotates() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|key| match key {
            "K1" => Err(ProviderError::Other("You exceeded your current quota".into())),
            _ => Ok("ok".into()),
        }));
        let controller = controller(&pool, &provider);

        controller.generate(&request()).await.unwrap();
        assert_eq!(pool.reported(), ["K1"]);
    }

    #[tokio::test]
    async fn empty_pool_never_calls_provider() {
        let pool = Arc::new(ScriptedPool::new(&[]));
        let provider = Arc::new(ScriptedProvider::new(|_| Ok("unused".into())));
        let controller = controller(&pool, &provider);

        let err = controller.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerateError::PoolEmpty(_)), "got: {err:?}");
        assert!(err.is_saturation());
        assert!(provider.calls().is_empty());
        assert!(pool.reported().is_empty());
    }

    #[tokio::test]
    async fn pool_running_dry_mid_rotation_is_pool_empty() {
        let pool = Arc::new(ScriptedPool::new(&["K1"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Err(quota_error())));
        let controller = controller(&pool, &provider);

        let err = controller.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerateError::PoolEmpty(_)), "got: {err:?}");
        assert_eq!(pool.reported(), ["K1"]);
        assert_eq!(provider.calls(), ["K1"]);
    }

    #[tokio::test]
    async fn unreachable_pool_is_pool_error() {
        let mut pool = ScriptedPool::new(&["K1"]);
        pool.unreachable = true;
        let pool = Arc::new(pool);
        let provider = Arc::new(ScriptedProvider::new(|_| Ok("unused".into())));
        let controller = controller(&pool, &provider);

        let err = controller.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerateError::Pool(_)), "got: {err:?}");
        assert!(!err.is_saturation());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_report_still_rotates() {
        let mut pool = ScriptedPool::new(&["K1", "K2"]);
        pool.fail_reports = true;
        let pool = Arc::new(pool);
        let provider = Arc::new(ScriptedProvider::new(|key| match key {
            "K1" => Err(quota_error()),
            _ => Ok("ok".into()),
        }));
        let controller = controller(&pool, &provider);

        assert_eq!(controller.generate(&request()).await.unwrap(), "ok");
        assert_eq!(provider.calls(), ["K1", "K2"]);
    }

    #[tokio::test]
    async fn empty_text_is_success() {
        let pool = Arc::new(ScriptedPool::new(&["K1"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Ok(String::new())));
        let controller = controller(&pool, &provider);

        assert_eq!(controller.generate(&request()).await.unwrap(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out_without_rotation() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let mut provider = ScriptedProvider::new(|_| Ok("late".into()));
        provider.delay = Some(Duration::from_secs(30));
        let provider = Arc::new(provider);
        let controller =
            controller(&pool, &provider).with_attempt_timeout(Duration::from_secs(5));

        let err = controller.generate(&request()).await.unwrap_err();
        assert!(
            matches!(err, GenerateError::Provider(ProviderError::Timeout(_))),
            "got: {err:?}"
        );
        assert!(pool.reported().is_empty());
    }

    #[tokio::test]
    async fn rotation_leaves_a_newer_session_key_alone() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Ok("ok".into())));
        let controller = controller(&pool, &provider);

        // Another call already moved the session on to K2
        *controller.slot() = Some(Credential::new("K2"));
        controller.rotate(&Credential::new("K1")).await;

        assert_eq!(controller.held(), Some(Credential::new("K2")));
        assert_eq!(pool.reported(), ["K1"]);
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_key() {
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Ok("ok".into())));
        let controller = Arc::new(controller(&pool, &provider));

        // Warm the session, then fan out
        controller.generate(&request()).await.unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = controller.clone();
            handles.push(tokio::spawn(async move {
                controller.generate(&request()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(pool.acquires(), 1);
        assert!(provider.calls().iter().all(|k| k == "K1"));
    }

    #[test]
    fn rotations_and_failures_are_counted() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let pool = Arc::new(ScriptedPool::new(&["K1", "K2"]));
        let provider = Arc::new(ScriptedProvider::new(|_| Err(quota_error())));
        let controller = controller(&pool, &provider);
        let _ = runtime.block_on(controller.generate(&request()));

        let output = handle.render();
        assert!(output.contains("credential_rotations_total 2"), "got:\n{output}");
        assert!(output.contains("outcome=\"rotated\""), "got:\n{output}");
        assert!(output.contains("kind=\"pool_empty\""), "got:\n{output}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_report_leaves_no_reported_key_in_session() {
        let pool = Arc::new(ScriptedPool {
            stall_reports: true,
            ..ScriptedPool::new(&["k1", "k2"])
        });
        let provider = Arc::new(ScriptedProvider::new(|_| Err(quota_error())));
        let controller = controller(&pool, &provider);

        let request = GenerationRequest::new("plan");
        let outcome =
            tokio::time::timeout(Duration::from_secs(1), controller.generate(&request)).await;

        assert!(outcome.is_err(), "generation should still be waiting on the report");
        assert_eq!(pool.reported(), ["k1"]);
        assert_eq!(controller.current_fingerprint(), None);
    }
}
