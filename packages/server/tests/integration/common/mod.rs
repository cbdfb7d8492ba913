use std::net::SocketAddr;

use assets::config::{AssetConfig, StorageConfig, UploadConfig};
use assets::digest::Md5Digest;
use assets::id::IdConfig;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tempfile::TempDir;

use server::config::{AppConfig, ServerConfig};
use server::state::AppState;

pub mod routes {
    pub const UPLOADS: &str = "/api/v1/uploads";
    pub const CHUNKS: &str = "/api/v1/uploads/chunks";
    pub const ASSETS: &str = "/api/v1/assets";
    pub const DIRECTORIES: &str = "/api/v1/assets/directories";
    pub const FILES: &str = "/api/v1/assets/files";
    pub const OPENAPI: &str = "/api-docs/openapi.json";
}

pub mod fixtures {
    pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
    pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
    pub const ELF: &[u8] = &[0x7F, b'E', b'L', b'F', 2, 1, 1, 0];

    pub fn jpeg_of_len(len: usize) -> Vec<u8> {
        let mut data = JPEG.to_vec();
        data.extend((0..len.saturating_sub(JPEG.len())).map(|i| (i % 251) as u8));
        data
    }
}

pub fn md5_hex(data: &[u8]) -> String {
    Md5Digest::compute(data).to_hex()
}

/// Configuration rooted in a scratch directory.
pub fn test_config(dir: &TempDir) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            body_limit: 8 * 1024 * 1024,
        },
        storage: StorageConfig {
            root: dir.path().join("store"),
            ..Default::default()
        },
        upload: UploadConfig {
            temp_dir: dir.path().join("chunks"),
            max_file_size: 1024 * 1024,
            max_chunk_size: 64 * 1024,
            ..Default::default()
        },
        assets: AssetConfig::default(),
        ids: IdConfig::default(),
        database: None,
    }
}

/// A running test server.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub state: AppState,
    _dir: TempDir,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = test_config(&dir);

        let state = AppState::open(config, assets::id::global())
            .await
            .expect("Failed to open asset storage");
        let app = server::build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            state,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to send DELETE request");

        TestResponse::from_response(res).await
    }

    /// Post `files` as `file` parts plus plain text `fields`.
    pub async fn upload(&self, files: Vec<(&str, Vec<u8>)>, fields: &[(&str, &str)]) -> TestResponse {
        let mut form = Form::new();
        for (name, value) in fields {
            form = form.text(name.to_string(), value.to_string());
        }
        for (file_name, bytes) in files {
            let part = Part::bytes(bytes).file_name(file_name.to_string());
            form = form.part("file", part);
        }
        self.post_form(routes::UPLOADS, form).await
    }

    /// Post one chunk of `session` with its correct MD5.
    pub async fn upload_chunk(
        &self,
        session: &str,
        index: u32,
        total: u32,
        data: &[u8],
        extra: &[(&str, &str)],
    ) -> TestResponse {
        let mut form = Form::new()
            .text("name", session.to_string())
            .text("chunk", index.to_string())
            .text("chunks", total.to_string())
            .text("hash", md5_hex(data));
        for (name, value) in extra {
            form = form.text(name.to_string(), value.to_string());
        }
        let part = Part::bytes(data.to_vec()).file_name("blob");
        self.post_form(routes::CHUNKS, form.part("file", part)).await
    }

    pub async fn post_form(&self, path: &str, form: Form) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .multipart(form)
            .send()
            .await
            .expect("Failed to send multipart request");

        TestResponse::from_response(res).await
    }

    /// Storage key behind a public URL returned by the API.
    pub fn key_of(&self, url: &str) -> String {
        self.state
            .assets
            .locator()
            .normalize(url)
            .expect("URL should point into the asset root")
    }

    pub async fn stored(&self, url: &str) -> Option<Vec<u8>> {
        self.state.assets.store().get(&self.key_of(url)).await.ok()
    }
}

impl TestResponse {
    pub async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let text = res.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self { status, text, body }
    }

    pub fn code(&self) -> &str {
        self.body["code"].as_str().unwrap_or_default()
    }
}
