//! Request coordinator: deduplication, offline fallback and fan-out.
//!
//! # Design
//! Each call is fingerprinted and its completion registered. Only the first
//! registrant for a fingerprint (or an explicit retry) does any work:
//!
//! - offline: the cache is read for the call's identity and the result, hit
//!   or `NoConnection`, is fanned out at once. Persistence only decides
//!   whether a response gets written;
//! - online: one exchange is spawned on the runtime. A 2xx body is written to
//!   the cache before fan-out when persistence was requested; cache failures
//!   are logged and never reach a waiter.
//!
//! Fan-out drains the registry and posts one job to the completion thread,
//! which hands the same `Outcome` to every waiter. Payloads are decoded per
//! waiter, so one waiter's decode failure is its own.
//!
//! Running exchanges are tracked by fingerprint so `cancel` can abort them.
//! Finishing and cancelling both remove the exchange under the same lock;
//! whichever gets there first owns the fan-out.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

use crate::cache::CacheStore;
use crate::codec;
use crate::completion::CompletionQueue;
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityGate;
use crate::error::{ApiError, TransportError};
use crate::fingerprint::Fingerprint;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::registry::{Completion, Outcome, Registry, Waiter};
use crate::request::RequestModel;
use crate::transfer;
use crate::types::{Payload, Persistence, Resource, STORAGE_SUFFIX};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// What happened to a call at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// First registrant (or a retry); an exchange was started.
    Dispatched,
    /// Joined an exchange that was already in flight.
    Coalesced,
    /// Served from the offline path: cache hit or `NoConnection`.
    Offline,
    /// Failed before registration, e.g. an invalid URL.
    Rejected,
}

/// Published after fan-out for calls that carry a notification name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub payload: Payload,
}

/// Identity of a callback-based call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub fingerprint: Fingerprint,
    pub route: Route,
}

/// The eventual result of one call.
///
/// Dropping a `Pending` does not cancel the exchange; other waiters may still
/// depend on it. Use `Coordinator::cancel` for that.
#[must_use = "a Pending does nothing unless awaited"]
pub struct Pending<T> {
    fingerprint: Fingerprint,
    route: Route,
    rx: oneshot::Receiver<Outcome>,
    decode: fn(&Payload) -> Result<T, ApiError>,
}

impl<T> Pending<T> {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn route(&self) -> Route {
        self.route
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, ApiError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome.and_then(|payload| (this.decode)(&payload))),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ApiError::Cancelled)),
        }
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("fingerprint", &self.fingerprint)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

fn decode_status(_: &Payload) -> Result<(), ApiError> {
    Ok(())
}

fn decode_raw(payload: &Payload) -> Result<Payload, ApiError> {
    Ok(payload.clone())
}

fn decode_file(payload: &Payload) -> Result<PathBuf, ApiError> {
    payload
        .file
        .clone()
        .ok_or_else(|| ApiError::Download("response was not stored to a file".to_string()))
}

struct Inner {
    base_url: String,
    headers: Vec<(String, String)>,
    transport: Arc<dyn Transport>,
    gate: ConnectivityGate,
    cache: CacheStore,
    registry: Registry,
    completion: CompletionQueue,
    runtime: Handle,
    exchanges: Mutex<HashMap<Fingerprint, Vec<(u64, AbortHandle)>>>,
    next_exchange: AtomicU64,
    changes: broadcast::Sender<ChangeEvent>,
}

/// What to do with a successful response besides fanning it out.
struct ExchangePlan {
    store_as: Option<String>,
    download_dir: Option<PathBuf>,
    /// Full request path, the fallback download file name.
    path: String,
    notification: Option<String>,
}

/// Deduplicating, offline-aware request coordinator. Cheap to clone; clones
/// share every collaborator.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    pub fn builder(base_url: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(base_url)
    }

    /// Reqwest transport, gate and cache assembled from `config`, spawning on
    /// the current tokio runtime.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        CoordinatorBuilder::from_config(config)?.build()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn gate(&self) -> &ConnectivityGate {
        &self.inner.gate
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.changes.subscribe()
    }

    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.registry.is_in_flight(fingerprint)
    }

    /// Callers currently waiting on `fingerprint`.
    pub fn waiting(&self, fingerprint: &Fingerprint) -> usize {
        self.inner.registry.waiting(fingerprint)
    }

    /// Single object of `T`.
    pub fn object<T: Resource>(&self, method: HttpMethod, model: impl Into<RequestModel>) -> Pending<T> {
        let model = model.into();
        let identity = T::storage_identity(model.cache_key.as_deref());
        self.pending(method, model, identity, codec::decode::<T>)
    }

    /// Collection of `T`. Shares the cache identity of `T` unless overridden.
    pub fn collection<T: Resource>(
        &self,
        method: HttpMethod,
        model: impl Into<RequestModel>,
    ) -> Pending<Vec<T>> {
        let model = model.into();
        let identity = T::storage_identity(model.cache_key.as_deref());
        self.pending(method, model, identity, codec::decode::<Vec<T>>)
    }

    /// Success or failure only; the body is ignored.
    pub fn status(&self, method: HttpMethod, model: impl Into<RequestModel>) -> Pending<()> {
        let model = model.into();
        let identity = raw_identity(&model);
        self.pending(method, model, identity, decode_status)
    }

    /// Undecoded payload.
    pub fn raw(&self, method: HttpMethod, model: impl Into<RequestModel>) -> Pending<Payload> {
        let model = model.into();
        let identity = raw_identity(&model);
        self.pending(method, model, identity, decode_raw)
    }

    /// Like `object`, delivering to `callback` on the completion thread.
    pub fn object_with<T, F>(&self, method: HttpMethod, model: impl Into<RequestModel>, callback: F) -> Ticket
    where
        T: Resource,
        F: FnOnce(Result<T, ApiError>) + Send + 'static,
    {
        let model = model.into();
        let identity = T::storage_identity(model.cache_key.as_deref());
        let completion = Completion::callback(move |outcome: Outcome| {
            callback(outcome.and_then(|payload| codec::decode::<T>(&payload)))
        });
        self.ticket(method, model, identity, completion)
    }

    pub fn collection_with<T, F>(
        &self,
        method: HttpMethod,
        model: impl Into<RequestModel>,
        callback: F,
    ) -> Ticket
    where
        T: Resource,
        F: FnOnce(Result<Vec<T>, ApiError>) + Send + 'static,
    {
        let model = model.into();
        let identity = T::storage_identity(model.cache_key.as_deref());
        let completion = Completion::callback(move |outcome: Outcome| {
            callback(outcome.and_then(|payload| codec::decode::<Vec<T>>(&payload)))
        });
        self.ticket(method, model, identity, completion)
    }

    pub fn status_with<F>(&self, method: HttpMethod, model: impl Into<RequestModel>, callback: F) -> Ticket
    where
        F: FnOnce(Result<(), ApiError>) + Send + 'static,
    {
        let model = model.into();
        let identity = raw_identity(&model);
        let completion = Completion::callback(move |outcome: Outcome| callback(outcome.map(|_| ())));
        self.ticket(method, model, identity, completion)
    }

    pub fn raw_with<F>(&self, method: HttpMethod, model: impl Into<RequestModel>, callback: F) -> Ticket
    where
        F: FnOnce(Result<Payload, ApiError>) + Send + 'static,
    {
        let model = model.into();
        let identity = raw_identity(&model);
        self.ticket(method, model, identity, Completion::callback(callback))
    }

    /// GET `model` and store the body as a file in `dir`. Resolves to the
    /// file's path. The name comes from the response's `Content-Disposition`,
    /// else from the last path segment.
    ///
    /// Identical downloads in flight coalesce; they all receive the file
    /// written to the first caller's directory.
    pub fn download(&self, model: impl Into<RequestModel>, dir: impl Into<PathBuf>) -> Pending<PathBuf> {
        let model = model.into().download_to(dir);
        let identity = raw_identity(&model);
        self.pending(HttpMethod::Get, model, identity, decode_file)
    }

    pub fn download_with<F>(&self, model: impl Into<RequestModel>, dir: impl Into<PathBuf>, callback: F) -> Ticket
    where
        F: FnOnce(Result<PathBuf, ApiError>) + Send + 'static,
    {
        let model = model.into().download_to(dir);
        let identity = raw_identity(&model);
        let completion = Completion::callback(move |outcome: Outcome| {
            callback(outcome.and_then(|payload| decode_file(&payload)))
        });
        self.ticket(HttpMethod::Get, model, identity, completion)
    }

    pub fn get<T: Resource>(&self, model: impl Into<RequestModel>) -> Pending<T> {
        self.object(HttpMethod::Get, model)
    }

    pub fn get_all<T: Resource>(&self, model: impl Into<RequestModel>) -> Pending<Vec<T>> {
        self.collection(HttpMethod::Get, model)
    }

    pub fn post<T: Resource>(&self, model: impl Into<RequestModel>) -> Pending<T> {
        self.object(HttpMethod::Post, model)
    }

    pub fn post_all<T: Resource>(&self, model: impl Into<RequestModel>) -> Pending<Vec<T>> {
        self.collection(HttpMethod::Post, model)
    }

    pub fn put<T: Resource>(&self, model: impl Into<RequestModel>) -> Pending<T> {
        self.object(HttpMethod::Put, model)
    }

    pub fn put_all<T: Resource>(&self, model: impl Into<RequestModel>) -> Pending<Vec<T>> {
        self.collection(HttpMethod::Put, model)
    }

    pub fn patch<T: Resource>(&self, model: impl Into<RequestModel>) -> Pending<T> {
        self.object(HttpMethod::Patch, model)
    }

    pub fn delete(&self, model: impl Into<RequestModel>) -> Pending<()> {
        self.status(HttpMethod::Delete, model)
    }

    /// Abort every running exchange for `fingerprint` and fan out
    /// `ApiError::Cancelled` to its waiters. Returns whether anything was
    /// running.
    pub fn cancel(&self, fingerprint: &Fingerprint) -> bool {
        let handles = self
            .inner
            .exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fingerprint)
            .unwrap_or_default();
        if handles.is_empty() {
            return false;
        }
        for (_, handle) in &handles {
            handle.abort();
        }
        debug!(%fingerprint, exchanges = handles.len(), "exchange cancelled");
        self.inner.fan_out(fingerprint, Err(ApiError::Cancelled), None);
        true
    }

    /// `cancel` for every running exchange. Returns how many fingerprints
    /// were affected.
    pub fn cancel_all(&self) -> usize {
        let running: Vec<Fingerprint> = self
            .inner
            .exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        running.iter().filter(|fingerprint| self.cancel(fingerprint)).count()
    }

    fn pending<T>(
        &self,
        method: HttpMethod,
        model: RequestModel,
        identity: String,
        decode: fn(&Payload) -> Result<T, ApiError>,
    ) -> Pending<T> {
        let (completion, rx) = Completion::channel();
        let Ticket { fingerprint, route } = self.ticket(method, model, identity, completion);
        Pending {
            fingerprint,
            route,
            rx,
            decode,
        }
    }

    fn ticket(&self, method: HttpMethod, model: RequestModel, identity: String, completion: Completion) -> Ticket {
        let fingerprint = model.fingerprint();
        let route = self.inner.submit(method, &model, &fingerprint, identity, completion);
        Ticket { fingerprint, route }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("base_url", &self.inner.base_url)
            .field("gate", &self.inner.gate)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}

/// Cache identity for calls without a response model.
fn raw_identity(model: &RequestModel) -> String {
    match &model.cache_key {
        Some(key) => key.clone(),
        None => format!("{}{STORAGE_SUFFIX}", model.fingerprint()),
    }
}

impl Inner {
    fn submit(
        self: &Arc<Self>,
        method: HttpMethod,
        model: &RequestModel,
        fingerprint: &Fingerprint,
        identity: String,
        completion: Completion,
    ) -> Route {
        let request = match model.build_http_request(method, &self.base_url, &self.headers) {
            Ok(request) => request,
            Err(e) => {
                debug!(%fingerprint, error = %e, "request rejected");
                self.completion.post(move || Waiter::new(completion).deliver(Err(e)));
                return Route::Rejected;
            }
        };

        let already_in_flight = self.registry.register(fingerprint, Waiter::new(completion));
        if already_in_flight && !model.is_retry {
            debug!(%fingerprint, "joined in-flight request");
            return Route::Coalesced;
        }

        if !self.gate.is_reachable() {
            let outcome = self.offline_outcome(fingerprint, &identity);
            match (&model.download_dir, outcome) {
                (Some(dir), Ok(payload)) => {
                    let target = transfer::download_path(dir, None, &model.full_path());
                    let inner = Arc::clone(self);
                    let fingerprint = fingerprint.clone();
                    let notification = model.notification.clone();
                    self.runtime.spawn(async move {
                        let outcome = inner.store_download(&fingerprint, payload, target).await;
                        inner.fan_out(&fingerprint, outcome, notification);
                    });
                }
                (_, outcome) => self.fan_out(fingerprint, outcome, model.notification.clone()),
            }
            return Route::Offline;
        }

        let plan = ExchangePlan {
            store_as: (model.persistence == Persistence::Cache).then_some(identity),
            download_dir: model.download_dir.clone(),
            path: model.full_path(),
            notification: model.notification.clone(),
        };
        self.dispatch(fingerprint.clone(), request, plan);
        Route::Dispatched
    }

    /// Offline calls read the cache whatever their own persistence.
    fn offline_outcome(&self, fingerprint: &Fingerprint, identity: &str) -> Outcome {
        match self.cache.read(identity) {
            Ok(Some(bytes)) => {
                debug!(%fingerprint, identity, "offline, serving cached payload");
                Ok(Payload::cached(bytes))
            }
            Ok(None) => {
                debug!(%fingerprint, identity, "offline, nothing cached");
                Err(ApiError::NoConnection)
            }
            Err(e) => {
                warn!(%fingerprint, identity, error = %e, "cache read failed");
                Err(ApiError::NoConnection)
            }
        }
    }

    fn dispatch(self: &Arc<Self>, fingerprint: Fingerprint, request: HttpRequest, plan: ExchangePlan) {
        let id = self.next_exchange.fetch_add(1, Ordering::Relaxed);
        debug!(%fingerprint, method = %request.method, url = %request.url, "dispatching");

        let inner = Arc::clone(self);
        let task_fingerprint = fingerprint.clone();
        let mut exchanges = self.exchanges.lock().unwrap_or_else(PoisonError::into_inner);
        let task = self.runtime.spawn(async move {
            let result = inner.transport.execute(request).await;
            if !inner.finish_exchange(&task_fingerprint, id) {
                return;
            }
            let outcome = inner.interpret(&task_fingerprint, result, &plan).await;
            inner.fan_out(&task_fingerprint, outcome, plan.notification);
        });
        exchanges
            .entry(fingerprint)
            .or_default()
            .push((id, task.abort_handle()));
    }

    /// Forget exchange `id`. `false` means it was cancelled meanwhile.
    fn finish_exchange(&self, fingerprint: &Fingerprint, id: u64) -> bool {
        let mut exchanges = self.exchanges.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(running) = exchanges.get_mut(fingerprint) else {
            return false;
        };
        let before = running.len();
        running.retain(|(running_id, _)| *running_id != id);
        let found = running.len() != before;
        if running.is_empty() {
            exchanges.remove(fingerprint);
        }
        found
    }

    async fn interpret(
        &self,
        fingerprint: &Fingerprint,
        result: Result<HttpResponse, TransportError>,
        plan: &ExchangePlan,
    ) -> Outcome {
        let response = result?;
        if !response.is_success() {
            debug!(%fingerprint, status = response.status, "non-success status");
            return Err(TransportError::Status {
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }
            .into());
        }
        if let Some(identity) = plan.store_as.as_deref() {
            if let Err(e) = self.cache.write(identity, &response.body) {
                warn!(%fingerprint, identity, error = %e, "cache write failed");
            }
        }
        let target = plan.download_dir.as_deref().map(|dir| {
            transfer::download_path(dir, response.header("content-disposition"), &plan.path)
        });
        let payload = Payload::network(response.body);
        match target {
            Some(target) => self.store_download(fingerprint, payload, target).await,
            None => Ok(payload),
        }
    }

    /// Write a download's body to `target`; waiters get the path in the
    /// payload. A failed write fails the call.
    async fn store_download(&self, fingerprint: &Fingerprint, mut payload: Payload, target: PathBuf) -> Outcome {
        match transfer::store_file(&target, &payload.body).await {
            Ok(()) => {
                debug!(%fingerprint, file = %target.display(), bytes = payload.body.len(), "download stored");
                payload.file = Some(target);
                Ok(payload)
            }
            Err(e) => {
                warn!(%fingerprint, file = %target.display(), error = %e, "storing download failed");
                Err(ApiError::Download(format!("{}: {e}", target.display())))
            }
        }
    }

    fn fan_out(&self, fingerprint: &Fingerprint, outcome: Outcome, notification: Option<String>) {
        let waiters = self.registry.drain(fingerprint);
        let longest_wait = waiters.iter().map(Waiter::waited).max().unwrap_or_default();
        debug!(
            %fingerprint,
            waiters = waiters.len(),
            waited_ms = longest_wait.as_millis() as u64,
            ok = outcome.is_ok(),
            "fanning out"
        );

        let event = match (notification, &outcome) {
            (Some(name), Ok(payload)) => Some(ChangeEvent {
                name,
                fingerprint: fingerprint.clone(),
                payload: payload.clone(),
            }),
            _ => None,
        };
        let changes = self.changes.clone();
        self.completion.post(move || {
            for waiter in waiters {
                let outcome = outcome.clone();
                if catch_unwind(AssertUnwindSafe(|| waiter.deliver(outcome))).is_err() {
                    error!("completion callback panicked");
                }
            }
            if let Some(event) = event {
                // No subscribers is fine.
                let _ = changes.send(event);
            }
        });
    }
}

/// Assembles a `Coordinator`.
pub struct CoordinatorBuilder {
    base_url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
    transport: Option<Arc<dyn Transport>>,
    gate: Option<ConnectivityGate>,
    cache: Option<CacheStore>,
    runtime: Option<Handle>,
}

impl CoordinatorBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: Vec::new(),
            timeout: Duration::from_secs(20),
            transport: None,
            gate: None,
            cache: None,
            runtime: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let cache = config
            .open_cache()
            .map_err(|e| ApiError::Configuration(format!("cache: {e}")))?;
        Ok(Self::new(config.base_url.clone())
            .headers(config.header_list())
            .timeout(config.timeout())
            .gate(config.gate())
            .cache(cache))
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Timeout of the default transport. Ignored when a transport is given.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn gate(mut self, gate: ConnectivityGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Runtime that exchanges are spawned on. Defaults to the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Coordinator, ApiError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| ApiError::Configuration(format!("no tokio runtime: {e}")))?,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(self.timeout)?,
        };
        let completion = CompletionQueue::start()
            .map_err(|e| ApiError::Configuration(format!("completion thread: {e}")))?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Coordinator {
            inner: Arc::new(Inner {
                base_url: self.base_url,
                headers: self.headers,
                transport,
                gate: self.gate.unwrap_or_default(),
                cache: self.cache.unwrap_or_else(CacheStore::in_memory),
                registry: Registry::new(),
                completion,
                runtime,
                exchanges: Mutex::new(HashMap::new()),
                next_exchange: AtomicU64::new(0),
                changes,
            }),
        })
    }
}

#[cfg(feature = "reqwest")]
fn default_transport(timeout: Duration) -> Result<Arc<dyn Transport>, ApiError> {
    Ok(Arc::new(crate::reqwest_transport::ReqwestTransport::new(timeout)?))
}

#[cfg(not(feature = "reqwest"))]
fn default_transport(_timeout: Duration) -> Result<Arc<dyn Transport>, ApiError> {
    Err(ApiError::Configuration(
        "no transport configured and the reqwest feature is disabled".to_string(),
    ))
}
