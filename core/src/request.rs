//! Request model and HTTP request building.
//!
//! # Design
//! A `RequestModel` describes one logical call independently of the verb and
//! of where it will be sent. The coordinator derives two things from it: the
//! fingerprint (full path + parameters) and, when the call has to go to the
//! network, an `HttpRequest` built against the coordinator's base URL.
//! Building is pure and fails only on an unusable URL or unserializable
//! parameters, both before anything is registered.

use std::path::PathBuf;

use url::Url;

use crate::error::ApiError;
use crate::fingerprint::Fingerprint;
use crate::http::{HttpMethod, HttpRequest};
use crate::params::{ParamValue, Params};
use crate::transfer::{self, FileUpload};
use crate::types::Persistence;

const JSON: &str = "application/json";

/// One logical call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestModel {
    /// Path template; each `{}` is replaced by the next `endpoint_params` item.
    pub endpoint: String,
    pub endpoint_params: Vec<String>,
    pub params: Params,
    pub persistence: Persistence,
    /// Cache identity override.
    pub cache_key: Option<String>,
    /// Change-notification name published after fan-out.
    pub notification: Option<String>,
    pub is_retry: bool,
    /// Overrides the coordinator's base URL for this call.
    pub root_url: Option<String>,
    /// Sent as `multipart/form-data` together with the parameters.
    pub upload: Option<FileUpload>,
    /// Store a successful body as a file in this directory.
    pub download_dir: Option<PathBuf>,
}

impl RequestModel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn endpoint_param(mut self, value: impl Into<String>) -> Self {
        self.endpoint_params.push(value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Keep successful responses as last-known-good data.
    pub fn persist(mut self) -> Self {
        self.persistence = Persistence::Cache;
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn notify(mut self, name: impl Into<String>) -> Self {
        self.notification = Some(name.into());
        self
    }

    pub fn root_url(mut self, root: impl Into<String>) -> Self {
        self.root_url = Some(root.into());
        self
    }

    pub fn upload(mut self, file: FileUpload) -> Self {
        self.upload = Some(file);
        self
    }

    pub fn download_to(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Always dispatch, even if an identical call is already in flight.
    pub fn retry(mut self) -> Self {
        self.is_retry = true;
        self
    }

    /// The endpoint with its placeholders filled in. Unmatched placeholders
    /// are left as they are and extra values are ignored.
    pub fn full_path(&self) -> String {
        let mut values = self.endpoint_params.iter();
        let mut path = String::with_capacity(self.endpoint.len());
        let mut rest = self.endpoint.as_str();
        while let Some(at) = rest.find("{}") {
            path.push_str(&rest[..at]);
            match values.next() {
                Some(value) => path.push_str(value),
                None => path.push_str("{}"),
            }
            rest = &rest[at + 2..];
        }
        path.push_str(rest);
        path
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match &self.upload {
            Some(upload) => Fingerprint::with_upload(&self.full_path(), &self.params, upload),
            None => Fingerprint::new(&self.full_path(), &self.params),
        }
    }

    /// Build the exchange for `method` against `base_url` (or the model's own
    /// root), with `headers` sent ahead of the JSON content headers.
    pub fn build_http_request(
        &self,
        method: HttpMethod,
        base_url: &str,
        headers: &[(String, String)],
    ) -> Result<HttpRequest, ApiError> {
        let root = self.root_url.as_deref().unwrap_or(base_url).trim_end_matches('/');
        let path = self.full_path();
        let raw = if path.is_empty() || path.starts_with('/') {
            format!("{root}{path}")
        } else {
            format!("{root}/{path}")
        };
        let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{raw}: {e}")))?;
        if url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(raw));
        }

        let mut content_type = JSON.to_string();
        let body = match (method, &self.upload) {
            (HttpMethod::Get, None) => {
                self.params.append_to_query(&mut url);
                None
            }
            (HttpMethod::Get, Some(upload)) => {
                self.params.append_to_query(&mut url);
                let boundary = transfer::new_boundary();
                content_type = format!("multipart/form-data; boundary={boundary}");
                Some(transfer::multipart_body(&Params::new(), upload, &boundary))
            }
            (_, Some(upload)) => {
                let boundary = transfer::new_boundary();
                content_type = format!("multipart/form-data; boundary={boundary}");
                Some(transfer::multipart_body(&self.params, upload, &boundary))
            }
            (_, None) => self.params.to_json_body()?,
        };

        let mut all_headers: Vec<(String, String)> = headers
            .iter()
            .filter(|(name, _)| {
                !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("accept")
            })
            .cloned()
            .collect();
        all_headers.push(("content-type".to_string(), content_type));
        all_headers.push(("accept".to_string(), JSON.to_string()));

        Ok(HttpRequest {
            method,
            url: url.into(),
            headers: all_headers,
            body,
        })
    }
}

impl From<&str> for RequestModel {
    fn from(endpoint: &str) -> Self {
        Self::new(endpoint)
    }
}

impl From<String> for RequestModel {
    fn from(endpoint: String) -> Self {
        Self::new(endpoint)
    }
}
