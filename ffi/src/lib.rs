//! C-ABI wrapper around `netcache-core`.
//!
//! # Overview
//! Exposes the coordinator through `extern "C"` functions so mobile and
//! desktop hosts can issue deduplicated, offline-aware requests without
//! linking against Rust's async runtime or serde directly. Payloads cross the
//! boundary raw; the host decodes them.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - A client handle owns a multi-threaded tokio runtime and the coordinator
//!   spawning on it.
//! - Results arrive through an `FfiCallback` on the completion thread, in a
//!   single `FfiResult` envelope. Argument errors are reported synchronously
//!   on the calling thread before `netcache_request` returns.
//! - The host owns all returned pointers and must call the matching
//!   `netcache_free_*` function to release them.

pub mod types;

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};

use netcache_core::{
    ApiError, ClientConfig, Coordinator, CoordinatorBuilder, FileUpload, Fingerprint, Params,
    RequestModel,
};
use tracing::warn;

use types::*;

/// Run an entry point body, stopping any panic at the boundary.
///
/// The client handle holds trait objects (transport, cipher) that aren't
/// `RefUnwindSafe`. After a caught panic the handle is only used through
/// its own locks, which recover from poisoning.
fn guard<R>(body: impl FnOnce() -> R) -> std::thread::Result<R> {
    catch_unwind(AssertUnwindSafe(body))
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client for `base_url` with an in-memory cache, starting online.
///
/// Returns null if `base_url` is null or not UTF-8, or if the runtime cannot
/// be started. Free with `netcache_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_client_new(base_url: *const c_char) -> *mut FfiClient {
    guard(|| {
        let Some(url) = read_str(base_url) else {
            return std::ptr::null_mut();
        };
        new_client(|runtime| Coordinator::builder(url).runtime(runtime).build())
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Create a client from a TOML configuration document (see `ClientConfig`),
/// with `NETCACHE_*` environment overrides applied.
///
/// Returns null on a null argument, a parse error, or an unusable cache file.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_client_from_config(toml: *const c_char) -> *mut FfiClient {
    guard(|| {
        let Some(raw) = read_str(toml) else {
            return std::ptr::null_mut();
        };
        let mut config = match ClientConfig::from_toml_str(raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "invalid client configuration");
                return std::ptr::null_mut();
            }
        };
        config.apply_env();
        new_client(|runtime| CoordinatorBuilder::from_config(&config)?.runtime(runtime).build())
    })
    .unwrap_or(std::ptr::null_mut())
}

fn new_client(
    build: impl FnOnce(tokio::runtime::Handle) -> Result<Coordinator, ApiError>,
) -> *mut FfiClient {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("netcache-io")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!(error = %e, "failed to start runtime");
            return std::ptr::null_mut();
        }
    };
    match build(runtime.handle().clone()) {
        Ok(coordinator) => Box::into_raw(Box::new(FfiClient {
            coordinator,
            runtime,
        })),
        Err(e) => {
            warn!(error = %e, "failed to build coordinator");
            std::ptr::null_mut()
        }
    }
}

/// Free a client. Running exchanges are aborted. Safe to call with null.
///
/// Must not be called from inside an `FfiCallback`.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_client_free(client: *mut FfiClient) {
    if !client.is_null() {
        let _ = guard(|| {
            let FfiClient {
                coordinator,
                runtime,
            } = *unsafe { Box::from_raw(client) };
            coordinator.cancel_all();
            drop(coordinator);
            runtime.shutdown_background();
        });
    }
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Push the platform's current reachability into the client.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_set_reachable(client: *const FfiClient, reachable: bool) {
    if client.is_null() {
        return;
    }
    let _ = guard(|| {
        let client = unsafe { &*client };
        client.coordinator.gate().set_reachable(reachable);
    });
}

/// Current reachability. `false` for a null client.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_is_reachable(client: *const FfiClient) -> bool {
    if client.is_null() {
        return false;
    }
    guard(|| {
        let client = unsafe { &*client };
        client.coordinator.gate().is_reachable()
    })
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Issue a request and deliver the raw payload to `callback`.
///
/// `path` may contain a query string. `params_json` is a JSON object or null.
/// `cache_key` and `notification` may be null. Identical calls in flight are
/// coalesced onto one exchange unless `is_retry` is set.
///
/// `callback` is invoked exactly once with `user_data`. Null `client`/`path`
/// and malformed `params_json` are reported synchronously, before this
/// returns `Rejected`. A null `callback` rejects the call without any
/// delivery.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn netcache_request(
    client: *const FfiClient,
    method: FfiHttpMethod,
    path: *const c_char,
    params_json: *const c_char,
    persistence: FfiPersistence,
    cache_key: *const c_char,
    notification: *const c_char,
    is_retry: bool,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> FfiRoute {
    submit(
        "netcache_request",
        Call {
            client,
            method,
            path,
            params_json,
            callback,
            user_data,
        },
        |mut model| {
            model.persistence = persistence.into();
            model.cache_key = read_str(cache_key).map(str::to_string);
            model.notification = read_str(notification).map(str::to_string);
            model.is_retry = is_retry;
            Ok(model)
        },
    )
}

/// GET `path` and store the body as a file in directory `dir`.
///
/// On success the `FfiResult` carries the body in `data` and the stored
/// file's path in `file_path`. Arguments and delivery follow
/// `netcache_request`.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_download(
    client: *const FfiClient,
    path: *const c_char,
    params_json: *const c_char,
    dir: *const c_char,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> FfiRoute {
    submit(
        "netcache_download",
        Call {
            client,
            method: FfiHttpMethod::Get,
            path,
            params_json,
            callback,
            user_data,
        },
        |model| match read_str(dir) {
            Some(dir) => Ok(model.download_to(dir)),
            None => Err(FfiResult::null_arg("dir")),
        },
    )
}

/// Send `data` as a `multipart/form-data` file part named `field_name`,
/// alongside the parameters. `data` may be null only when `data_len` is 0.
///
/// Arguments and delivery follow `netcache_request`.
#[unsafe(no_mangle)]
#[allow(clippy::too_many_arguments)]
pub extern "C" fn netcache_upload(
    client: *const FfiClient,
    method: FfiHttpMethod,
    path: *const c_char,
    params_json: *const c_char,
    field_name: *const c_char,
    file_name: *const c_char,
    mime_type: *const c_char,
    data: *const u8,
    data_len: usize,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> FfiRoute {
    submit(
        "netcache_upload",
        Call {
            client,
            method,
            path,
            params_json,
            callback,
            user_data,
        },
        |model| {
            let field_name = read_str(field_name).ok_or_else(|| FfiResult::null_arg("field_name"))?;
            let file_name = read_str(file_name).ok_or_else(|| FfiResult::null_arg("file_name"))?;
            let mime_type = read_str(mime_type).ok_or_else(|| FfiResult::null_arg("mime_type"))?;
            let bytes = match (data.is_null(), data_len) {
                (true, 0) => Vec::new(),
                (true, _) => return Err(FfiResult::null_arg("data")),
                (false, len) => unsafe { std::slice::from_raw_parts(data, len) }.to_vec(),
            };
            Ok(model.upload(FileUpload::new(field_name, file_name, mime_type, bytes)))
        },
    )
}

/// Arguments shared by every request entry point.
struct Call {
    client: *const FfiClient,
    method: FfiHttpMethod,
    path: *const c_char,
    params_json: *const c_char,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
}

/// Check the shared arguments, let `configure` finish the model, then hand it
/// to the coordinator. Argument errors go to the callback before returning.
fn submit(
    entry: &'static str,
    call: Call,
    configure: impl FnOnce(RequestModel) -> Result<RequestModel, *mut FfiResult>,
) -> FfiRoute {
    let Call {
        client,
        method,
        path,
        params_json,
        callback,
        user_data,
    } = call;
    let routed = guard(|| {
        let Some(callback) = callback else {
            warn!(entry, "called without a callback");
            return FfiRoute::Rejected;
        };
        if client.is_null() {
            callback(user_data, FfiResult::null_arg("client"));
            return FfiRoute::Rejected;
        }
        let Some(path) = read_str(path) else {
            callback(user_data, FfiResult::null_arg("path"));
            return FfiRoute::Rejected;
        };
        let params = match parse_params(params_json) {
            Ok(params) => params,
            Err(e) => {
                callback(user_data, FfiResult::from_error(&e));
                return FfiRoute::Rejected;
            }
        };
        let model = match configure(RequestModel::new(path).params(params)) {
            Ok(model) => model,
            Err(result) => {
                callback(user_data, result);
                return FfiRoute::Rejected;
            }
        };
        let client = unsafe { &*client };

        let user_data = UserData(user_data);
        let ticket = client
            .coordinator
            .raw_with(method.into(), model, move |outcome| {
                callback(user_data.into_raw(), FfiResult::from_outcome(outcome));
            });
        ticket.route.into()
    });
    routed.unwrap_or_else(|_| {
        warn!(entry, "panic in request entry point");
        if let Some(callback) = callback {
            callback(user_data, FfiResult::panic(&format!("panic in {entry}")));
        }
        FfiRoute::Rejected
    })
}

/// Abort the exchange for `fingerprint` (as returned by
/// `netcache_fingerprint`); its waiters receive `Cancelled`. Returns whether
/// an exchange was running.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_cancel(client: *const FfiClient, fingerprint: *const c_char) -> bool {
    guard(|| {
        if client.is_null() {
            return false;
        }
        let Some(fingerprint) = read_str(fingerprint) else {
            return false;
        };
        let client = unsafe { &*client };
        client.coordinator.cancel(&Fingerprint::from_raw(fingerprint))
    })
    .unwrap_or(false)
}

/// Abort every running exchange. Returns the number of fingerprints affected.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_cancel_all(client: *const FfiClient) -> u32 {
    guard(|| {
        if client.is_null() {
            return 0;
        }
        let client = unsafe { &*client };
        u32::try_from(client.coordinator.cancel_all()).unwrap_or(u32::MAX)
    })
    .unwrap_or(0)
}

/// Drop every cached payload.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_cache_clear(client: *const FfiClient) -> bool {
    guard(|| {
        if client.is_null() {
            return false;
        }
        let client = unsafe { &*client };
        match client.coordinator.cache().clear_all() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "cache clear failed");
                false
            }
        }
    })
    .unwrap_or(false)
}

/// Fingerprint of `path` + `params_json` (null = no parameters), as used for
/// deduplication and `netcache_cancel`. Free with `netcache_free_string`.
///
/// Returns null on a null path or malformed parameters.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_fingerprint(path: *const c_char, params_json: *const c_char) -> *mut c_char {
    guard(|| {
        let Some(path) = read_str(path) else {
            return std::ptr::null_mut();
        };
        match parse_params(params_json) {
            Ok(params) => c_string(Fingerprint::new(path, &params).as_str()),
            Err(_) => std::ptr::null_mut(),
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Borrow a C string. `None` for null or non-UTF-8 input.
fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn parse_params(params_json: *const c_char) -> Result<Params, ApiError> {
    if params_json.is_null() {
        return Ok(Params::new());
    }
    let raw = read_str(params_json)
        .ok_or_else(|| ApiError::Serialization("parameters are not UTF-8".to_string()))?;
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ApiError::Serialization(e.to_string()))?;
    Params::try_from(value)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiResult` handed to an `FfiCallback`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_free_result(result: *mut FfiResult) {
    if result.is_null() {
        return;
    }
    let _ = guard(|| {
        let result = unsafe { Box::from_raw(result) };
        if !result.error_message.is_null() {
            drop(unsafe { CString::from_raw(result.error_message) });
        }
        if !result.file_path.is_null() {
            drop(unsafe { CString::from_raw(result.file_path) });
        }
        if !result.data.is_null() {
            let slice = std::ptr::slice_from_raw_parts_mut(result.data, result.data_len);
            drop(unsafe { Box::from_raw(slice) });
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn netcache_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = guard(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::net::SocketAddr;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Debug)]
    struct Captured {
        code: FfiErrorCode,
        status: u16,
        from_cache: bool,
        body: Vec<u8>,
        file_path: Option<String>,
        thread: Option<String>,
    }

    extern "C" fn capture(user_data: *mut c_void, result: *mut FfiResult) {
        let tx = unsafe { &*(user_data as *const mpsc::Sender<Captured>) };
        let r = unsafe { &*result };
        let body = if r.data.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(r.data, r.data_len) }.to_vec()
        };
        let file_path = (!r.file_path.is_null())
            .then(|| unsafe { CStr::from_ptr(r.file_path) }.to_string_lossy().into_owned());
        let _ = tx.send(Captured {
            code: r.error_code,
            status: r.http_status,
            from_cache: r.from_cache,
            body,
            file_path,
            thread: std::thread::current().name().map(str::to_string),
        });
        netcache_free_result(result);
    }

    fn start_server() -> SocketAddr {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                mock_server::run(listener).await
            })
            .unwrap();
        });
        addr
    }

    fn client_for(url: &str) -> *mut FfiClient {
        let url = CString::new(url).unwrap();
        let client = netcache_client_new(url.as_ptr());
        assert!(!client.is_null());
        client
    }

    fn get(
        client: *const FfiClient,
        path: &CString,
        params: &CString,
        persistence: FfiPersistence,
        tx: &mpsc::Sender<Captured>,
    ) -> FfiRoute {
        netcache_request(
            client,
            FfiHttpMethod::Get,
            path.as_ptr(),
            params.as_ptr(),
            persistence,
            std::ptr::null(),
            std::ptr::null(),
            false,
            Some(capture),
            sender(tx),
        )
    }

    #[test]
    fn client_new_and_free() {
        let client = client_for("http://localhost:3000");
        assert!(netcache_is_reachable(client));
        netcache_client_free(client);
    }

    #[test]
    fn client_new_null_returns_null() {
        assert!(netcache_client_new(std::ptr::null()).is_null());
    }

    #[test]
    fn client_free_null_is_safe() {
        netcache_client_free(std::ptr::null_mut());
    }

    #[test]
    fn client_from_config() {
        let toml = CString::new("base_url = \"http://127.0.0.1:9\"\nstart_online = false").unwrap();
        let client = netcache_client_from_config(toml.as_ptr());
        assert!(!client.is_null());
        assert!(!netcache_is_reachable(client));
        netcache_set_reachable(client, true);
        assert!(netcache_is_reachable(client));
        netcache_client_free(client);
    }

    #[test]
    fn client_from_bad_config_returns_null() {
        let toml = CString::new("timeout_secs = \"soon\"").unwrap();
        assert!(netcache_client_from_config(toml.as_ptr()).is_null());
    }

    #[test]
    fn fingerprint_matches_core() {
        let path = CString::new("/movie").unwrap();
        let params = CString::new(r#"{"t":"Hero"}"#).unwrap();
        let raw = netcache_fingerprint(path.as_ptr(), params.as_ptr());
        assert!(!raw.is_null());
        let fingerprint = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_string();
        netcache_free_string(raw);

        let expected = Fingerprint::new("/movie", &Params::new().with("t", "Hero"));
        assert_eq!(fingerprint, expected.as_str());
    }

    #[test]
    fn fingerprint_rejects_non_object_params() {
        let path = CString::new("/movie").unwrap();
        let params = CString::new("[1,2]").unwrap();
        assert!(netcache_fingerprint(path.as_ptr(), params.as_ptr()).is_null());
        assert!(netcache_fingerprint(std::ptr::null(), std::ptr::null()).is_null());
    }

    #[test]
    fn request_null_client_reports_null_arg() {
        let (tx, rx) = mpsc::channel();
        let path = CString::new("/movie").unwrap();
        let params = CString::new("{}").unwrap();
        let route = get(std::ptr::null(), &path, &params, FfiPersistence::None, &tx);
        assert_eq!(route, FfiRoute::Rejected);
        let captured = rx.try_recv().unwrap();
        assert_eq!(captured.code, FfiErrorCode::NullArg);
    }

    #[test]
    fn request_without_callback_is_rejected() {
        let client = client_for("http://localhost:3000");
        let path = CString::new("/movie").unwrap();
        let route = netcache_request(
            client,
            FfiHttpMethod::Get,
            path.as_ptr(),
            std::ptr::null(),
            FfiPersistence::None,
            std::ptr::null(),
            std::ptr::null(),
            false,
            None,
            std::ptr::null_mut(),
        );
        assert_eq!(route, FfiRoute::Rejected);
        netcache_client_free(client);
    }

    #[test]
    fn request_with_bad_params_reports_serialization() {
        let client = client_for("http://localhost:3000");
        let (tx, rx) = mpsc::channel();
        let path = CString::new("/movie").unwrap();
        let params = CString::new("{not json").unwrap();
        let route = get(client, &path, &params, FfiPersistence::None, &tx);
        assert_eq!(route, FfiRoute::Rejected);
        assert_eq!(rx.try_recv().unwrap().code, FfiErrorCode::Serialization);
        netcache_client_free(client);
    }

    #[test]
    fn request_round_trip_then_offline_cache() {
        let addr = start_server();
        let client = client_for(&format!("http://{addr}"));
        let (tx, rx) = mpsc::channel();
        let path = CString::new("/movie").unwrap();
        let params = CString::new(r#"{"t":"Hero"}"#).unwrap();

        let route = get(client, &path, &params, FfiPersistence::Cache, &tx);
        assert_eq!(route, FfiRoute::Dispatched);
        let online = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(online.code, FfiErrorCode::Ok);
        assert!(!online.from_cache);
        assert!(String::from_utf8_lossy(&online.body).contains("\"Title\":\"Hero\""));
        assert_eq!(online.thread.as_deref(), Some(netcache_core::COMPLETION_THREAD_NAME));

        netcache_set_reachable(client, false);
        let route = get(client, &path, &params, FfiPersistence::Cache, &tx);
        assert_eq!(route, FfiRoute::Offline);
        let offline = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(offline.code, FfiErrorCode::Ok);
        assert!(offline.from_cache);
        assert_eq!(offline.body, online.body);

        assert!(netcache_cache_clear(client));
        get(client, &path, &params, FfiPersistence::Cache, &tx);
        let missing = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(missing.code, FfiErrorCode::NoConnection);

        netcache_client_free(client);
    }

    #[test]
    fn not_found_carries_http_status() {
        let addr = start_server();
        let client = client_for(&format!("http://{addr}"));
        let (tx, rx) = mpsc::channel();
        let path = CString::new("/movie").unwrap();
        let params = CString::new(r#"{"t":"Nope"}"#).unwrap();

        get(client, &path, &params, FfiPersistence::None, &tx);
        let captured = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(captured.code, FfiErrorCode::Http);
        assert_eq!(captured.status, 404);
        netcache_client_free(client);
    }

    // The callback may still be inside `send` on the completion thread after
    // the test has received the message and returned, so hand it a leaked
    // clone that outlives the test's own sender.
    fn sender(tx: &mpsc::Sender<Captured>) -> *mut c_void {
        Box::leak(Box::new(tx.clone())) as *const mpsc::Sender<Captured> as *mut c_void
    }

    #[test]
    fn upload_then_download_poster() {
        let addr = start_server();
        let client = client_for(&format!("http://{addr}"));
        let (tx, rx) = mpsc::channel();
        let dir = tempfile::tempdir().unwrap();
        let path = CString::new("/posters/Hero").unwrap();
        let params = CString::new(r#"{"caption":"Theatrical"}"#).unwrap();
        let field = CString::new("poster").unwrap();
        let file_name = CString::new("hero.png").unwrap();
        let mime = CString::new("image/png").unwrap();
        let image = b"\x89PNG-bytes";

        let route = netcache_upload(
            client,
            FfiHttpMethod::Post,
            path.as_ptr(),
            params.as_ptr(),
            field.as_ptr(),
            file_name.as_ptr(),
            mime.as_ptr(),
            image.as_ptr(),
            image.len(),
            Some(capture),
            sender(&tx),
        );
        assert_eq!(route, FfiRoute::Dispatched);
        let uploaded = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(uploaded.code, FfiErrorCode::Ok);
        assert!(uploaded.file_path.is_none());
        let receipt: mock_server::PosterReceipt = serde_json::from_slice(&uploaded.body).unwrap();
        assert_eq!(receipt.size, image.len());
        assert_eq!(receipt.caption.as_deref(), Some("Theatrical"));

        let target = CString::new(dir.path().to_str().unwrap()).unwrap();
        let route = netcache_download(
            client,
            path.as_ptr(),
            std::ptr::null(),
            target.as_ptr(),
            Some(capture),
            sender(&tx),
        );
        assert_eq!(route, FfiRoute::Dispatched);
        let downloaded = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(downloaded.code, FfiErrorCode::Ok);
        assert_eq!(downloaded.body, image);
        let stored = downloaded.file_path.unwrap();
        assert_eq!(std::path::Path::new(&stored), dir.path().join("hero.png"));
        assert_eq!(std::fs::read(&stored).unwrap(), image);

        netcache_client_free(client);
    }

    #[test]
    fn download_without_directory_reports_null_arg() {
        let client = client_for("http://localhost:3000");
        let (tx, rx) = mpsc::channel();
        let path = CString::new("/posters/Hero").unwrap();
        let route = netcache_download(
            client,
            path.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            Some(capture),
            sender(&tx),
        );
        assert_eq!(route, FfiRoute::Rejected);
        assert_eq!(rx.try_recv().unwrap().code, FfiErrorCode::NullArg);
        netcache_client_free(client);
    }

    #[test]
    fn upload_with_null_data_and_length_reports_null_arg() {
        let client = client_for("http://localhost:3000");
        let (tx, rx) = mpsc::channel();
        let path = CString::new("/posters/Hero").unwrap();
        let name = CString::new("poster").unwrap();
        let route = netcache_upload(
            client,
            FfiHttpMethod::Post,
            path.as_ptr(),
            std::ptr::null(),
            name.as_ptr(),
            name.as_ptr(),
            name.as_ptr(),
            std::ptr::null(),
            4,
            Some(capture),
            sender(&tx),
        );
        assert_eq!(route, FfiRoute::Rejected);
        let captured = rx.try_recv().unwrap();
        assert_eq!(captured.code, FfiErrorCode::NullArg);
        netcache_client_free(client);
    }

    #[test]
    fn cancel_unknown_fingerprint_is_false() {
        let client = client_for("http://localhost:3000");
        let fingerprint = CString::new("/movie#00").unwrap();
        assert!(!netcache_cancel(client, fingerprint.as_ptr()));
        assert_eq!(netcache_cancel_all(client), 0);
        netcache_client_free(client);
    }

    #[test]
    fn guard_stops_panics() {
        let client = client_for("http://localhost:3000");
        let caught = guard(|| {
            let client = unsafe { &*client };
            assert!(client.coordinator.gate().is_reachable());
            panic!("boom");
        });
        assert!(caught.is_err());
        assert!(netcache_is_reachable(client));
        netcache_client_free(client);
    }

    #[test]
    fn free_result_null_is_safe() {
        netcache_free_result(std::ptr::null_mut());
        netcache_free_string(std::ptr::null_mut());
    }
}
