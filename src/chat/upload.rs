//! Attachment uploads to `POST /api/chat/upload`

use super::error::{ChatClientError, Result};
use super::types::{AttachedFile, UploadResponse};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Uploads a file and returns the backend's record of it
#[async_trait]
pub trait AttachmentUploader: Send + Sync {
    async fn upload(&self, path: &Path, session_id: &str) -> Result<AttachedFile>;
}

/// Multipart uploader talking to the chat backend over HTTP
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpUploader {
    pub fn new(server_url: &Url) -> Result<Self> {
        // Keep any path prefix the backend is mounted under
        let mut endpoint = server_url.clone();
        let prefix = endpoint.path().trim_end_matches('/').to_string();
        endpoint.set_path(&format!("{}/api/chat/upload", prefix));
        endpoint.set_query(None);
        endpoint.set_fragment(None);
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Upload an in-memory file
    pub async fn upload_bytes(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        session_id: &str,
    ) -> Result<AttachedFile> {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let size = bytes.len();
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime.essence_str())?;
        let form = Form::new()
            .part("file", part)
            .text("session_id", session_id.to_string());

        debug!(file = file_name, size, endpoint = %self.endpoint, "Uploading attachment");
        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatClientError::Upload(format!(
                "server returned {}: {}",
                status, body
            )));
        }

        let envelope: UploadResponse = response
            .json()
            .await
            .map_err(|e| ChatClientError::Upload(format!("invalid response body: {}", e)))?;

        match envelope {
            UploadResponse {
                status,
                file: Some(file),
                ..
            } if status == "ok" => {
                info!(file_id = %file.id, name = %file.name, "Attachment uploaded");
                Ok(file)
            }
            UploadResponse {
                status, message, ..
            } => Err(ChatClientError::Upload(
                message.unwrap_or_else(|| format!("upload status: {}", status)),
            )),
        }
    }
}

#[async_trait]
impl AttachmentUploader for HttpUploader {
    async fn upload(&self, path: &Path, session_id: &str) -> Result<AttachedFile> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        self.upload_bytes(&file_name, bytes, session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn uploader(server: &MockServer) -> HttpUploader {
        HttpUploader::new(&Url::parse(&server.uri()).unwrap()).unwrap()
    }

    #[test]
    fn test_endpoint_join() {
        let up = HttpUploader::new(&Url::parse("http://localhost:8000").unwrap()).unwrap();
        assert_eq!(up.endpoint().as_str(), "http://localhost:8000/api/chat/upload");
    }

    #[test]
    fn test_endpoint_keeps_path_prefix() {
        for base in ["http://host/app", "http://host/app/", "http://host/app?x=1"] {
            let up = HttpUploader::new(&Url::parse(base).unwrap()).unwrap();
            assert_eq!(up.endpoint().as_str(), "http://host/app/api/chat/upload", "{}", base);
        }
    }

    #[tokio::test]
    async fn test_upload_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/upload"))
            .and(body_string_contains("session-1-abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok",
                "file": {
                    "id": "f-42",
                    "name": "notes.txt",
                    "type": "text",
                    "mime_type": "text/plain",
                    "size": 5,
                    "text_preview": "hello"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("notes.txt");
        std::fs::write(&file_path, "hello").unwrap();

        let file = uploader(&server)
            .await
            .upload(&file_path, "session-1-abc")
            .await
            .unwrap();
        assert_eq!(file.id, "f-42");
        assert_eq!(file.text_preview.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_upload_rejected_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "error",
                "message": "file too large"
            })))
            .mount(&server)
            .await;

        let err = uploader(&server)
            .await
            .upload_bytes("big.bin", vec![0u8; 16], "s")
            .await
            .unwrap_err();
        match err {
            ChatClientError::Upload(msg) => assert_eq!(msg, "file too large"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat/upload"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = uploader(&server)
            .await
            .upload_bytes("a.txt", b"x".to_vec(), "s")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatClientError::Upload(ref m) if m.contains("500")));
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let up = HttpUploader::new(&Url::parse("http://127.0.0.1:9").unwrap()).unwrap();
        let err = up
            .upload(Path::new("/nonexistent/file-12345.txt"), "s")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatClientError::Io(_)));
    }
}
