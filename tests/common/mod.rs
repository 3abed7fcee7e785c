#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use zenswap::config::{Config, StoreBackend};
use zenswap::routes;
use zenswap::state::AppState;
use zenswap::store;

pub const BACKENDS: [StoreBackend; 2] = [StoreBackend::Sqlite, StoreBackend::File];

pub struct TestApp {
    pub app: Router,
    pub config: Config,
    _tmp: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub bytes: Vec<u8>,
}

impl TestResponse {
    /// `name=value` pair from Set-Cookie, ready to send back.
    pub fn cookie(&self) -> String {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .unwrap_or_default()
            .to_string()
    }
}

pub async fn spawn(backend: StoreBackend) -> TestApp {
    spawn_with(backend, |_| {}).await
}

pub async fn spawn_with(backend: StoreBackend, configure: impl FnOnce(&mut Config)) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.database.backend = backend;
    config.resolve_paths(tmp.path());
    configure(&mut config);
    std::fs::create_dir_all(config.uploads_path()).unwrap();

    let store = store::open(&config).await.unwrap();
    let app = routes::app(AppState::new(store, config.clone()));
    TestApp {
        app,
        config,
        _tmp: tmp,
    }
}

impl TestApp {
    pub async fn request(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        TestResponse {
            status,
            headers,
            body,
            bytes,
        }
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.request(request).await
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None, None).await
    }

    /// Signs up a fresh user and returns their session cookie and id.
    pub async fn signup(&self, name: &str, email: &str) -> (String, String) {
        let res = self
            .send(
                Method::POST,
                "/api/auth/signup",
                None,
                Some(serde_json::json!({ "name": name, "email": email, "password": "secret-pw" })),
            )
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{:?}", res.body);
        let id = res.body["user"]["id"].as_str().unwrap().to_string();
        (res.cookie(), id)
    }

    pub async fn create_listing(&self, cookie: &str, body: Value) -> Value {
        let res = self
            .send(Method::POST, "/api/listings", Some(cookie), Some(body))
            .await;
        assert_eq!(res.status, StatusCode::CREATED, "{:?}", res.body);
        res.body
    }
}
