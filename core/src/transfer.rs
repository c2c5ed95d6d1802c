//! File transfers: multipart uploads and downloads stored to disk.
//!
//! An upload rides on an ordinary exchange. The request body becomes
//! `multipart/form-data` with one text part per parameter and the file last.
//! A download is an ordinary exchange too; on success its body is written
//! into the requested directory and the waiters receive the file's path in
//! `Payload::file`.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::params::{ParamValue, Params};

/// A file sent as one `multipart/form-data` part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Form field the server expects the file under.
    pub field_name: String,
    /// File name including its extension, e.g. `poster.png`.
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

impl FileUpload {
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Feed everything that identifies the upload into `hasher`.
    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        for part in [
            self.field_name.as_bytes(),
            self.file_name.as_bytes(),
            self.mime_type.as_bytes(),
        ] {
            hasher.update(part);
            hasher.update([0u8]);
        }
        hasher.update(&self.data);
    }
}

pub(crate) fn new_boundary() -> String {
    format!("netcache-{}", uuid::Uuid::new_v4().simple())
}

/// Encode `params` and `upload` as a multipart body delimited by `boundary`.
///
/// Lists become repeated `key[]` parts, matching query encoding.
pub(crate) fn multipart_body(params: &Params, upload: &FileUpload, boundary: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(upload.data.len() + 256);
    for (key, value) in params.iter() {
        match value {
            ParamValue::List(items) => {
                for item in items {
                    text_part(&mut body, boundary, &format!("{key}[]"), item);
                }
            }
            ParamValue::String(s) => text_part(&mut body, boundary, key, s),
            ParamValue::Int(i) => text_part(&mut body, boundary, key, &i.to_string()),
            ParamValue::Float(f) => text_part(&mut body, boundary, key, &f.to_string()),
            ParamValue::Bool(b) => text_part(&mut body, boundary, key, &b.to_string()),
        }
    }
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            quoted(&upload.field_name),
            quoted(&upload.file_name)
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", upload.mime_type).as_bytes());
    body.extend_from_slice(&upload.data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn text_part(body: &mut Vec<u8>, boundary: &str, name: &str, value: &str) {
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", quoted(name)).as_bytes(),
    );
    body.extend_from_slice(value.as_bytes());
    body.extend_from_slice(b"\r\n");
}

fn quoted(s: &str) -> String {
    s.replace('"', "%22").replace(['\r', '\n'], "")
}

/// Where a downloaded body is stored: the `Content-Disposition` file name if
/// the server sent one, else the last segment of the request path, else
/// `download`. Names are reduced to a single path component.
pub(crate) fn download_path(dir: &Path, content_disposition: Option<&str>, request_path: &str) -> PathBuf {
    let from_header = content_disposition.and_then(disposition_file_name);
    let from_path = request_path
        .split(['?', '#'])
        .next()
        .and_then(|p| p.rsplit('/').find(|segment| !segment.is_empty()));
    let name = from_header
        .as_deref()
        .and_then(safe_file_name)
        .or_else(|| from_path.and_then(safe_file_name))
        .unwrap_or_else(|| "download".to_string());
    dir.join(name)
}

fn disposition_file_name(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn safe_file_name(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?;
    (name != "." && name != "..").then(|| name.to_string())
}

/// Write `data` to `target` through a temp file in the same directory.
pub(crate) async fn store_file(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir).await?;
    let tmp = dir.join(format!(".{}.netcache.part", uuid::Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    tokio::fs::rename(&tmp, target).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poster() -> FileUpload {
        FileUpload::new("poster", "hero.png", "image/png", &b"\x89PNG"[..])
    }

    #[test]
    fn multipart_puts_params_before_the_file() {
        let params = Params::new().with("Title", "Hero").with("tags", vec!["a", "b"]);
        let body = multipart_body(&params, &poster(), "XYZ");
        let text = String::from_utf8_lossy(&body);
        assert_eq!(
            text,
            "--XYZ\r\nContent-Disposition: form-data; name=\"Title\"\r\n\r\nHero\r\n\
             --XYZ\r\nContent-Disposition: form-data; name=\"tags[]\"\r\n\r\na\r\n\
             --XYZ\r\nContent-Disposition: form-data; name=\"tags[]\"\r\n\r\nb\r\n\
             --XYZ\r\nContent-Disposition: form-data; name=\"poster\"; filename=\"hero.png\"\r\n\
             Content-Type: image/png\r\n\r\n\u{fffd}PNG\r\n--XYZ--\r\n"
        );
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(new_boundary(), new_boundary());
    }

    #[test]
    fn download_name_prefers_content_disposition() {
        let dir = Path::new("/tmp/dl");
        assert_eq!(
            download_path(dir, Some("attachment; filename=\"hero.png\""), "/posters/Hero"),
            dir.join("hero.png")
        );
        assert_eq!(
            download_path(dir, Some("attachment; filename=plain.txt"), "/x"),
            dir.join("plain.txt")
        );
    }

    #[test]
    fn download_name_falls_back_to_path() {
        let dir = Path::new("/tmp/dl");
        assert_eq!(download_path(dir, None, "/posters/Hero?size=l"), dir.join("Hero"));
        assert_eq!(download_path(dir, Some("attachment"), "/posters/"), dir.join("posters"));
        assert_eq!(download_path(dir, None, "/"), dir.join("download"));
    }

    #[test]
    fn download_name_cannot_escape_the_directory() {
        let dir = Path::new("/tmp/dl");
        assert_eq!(
            download_path(dir, Some("attachment; filename=\"../../etc/passwd\""), "/x"),
            dir.join("passwd")
        );
        assert_eq!(download_path(dir, Some("attachment; filename=\"..\""), "/x"), dir.join("x"));
    }

    #[tokio::test]
    async fn store_file_creates_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("hero.png");
        store_file(&target, b"bytes").await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"bytes");
        let leftovers = std::fs::read_dir(target.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
