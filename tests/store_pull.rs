//! End-to-end pulls against a scripted Registry v2 server

use acr_image_puller::Logger;
use acr_image_puller::error::Result;
use acr_image_puller::reference::ImageReference;
use acr_image_puller::transfer::{
    CredentialResolver, Credentials, ImageStore, OciRegistrySource, ProgressEvent, Transfer,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct CannedResponse {
    status: u16,
    content_type: &'static str,
    extra_headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CannedResponse {
    fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            extra_headers: Vec::new(),
            body: body.into(),
        }
    }

    fn blob(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: "application/octet-stream",
            extra_headers: Vec::new(),
            body: body.into(),
        }
    }

    fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers
            .push((name.to_string(), value.to_string()));
        self
    }
}

struct ScriptedRegistry {
    host: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRegistry {
    /// Bind first so routes can reference the server's own address
    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        (listener, host)
    }

    /// Serve canned responses keyed by "METHOD /path"; unknown routes 404
    fn serve(listener: TcpListener, routes: HashMap<String, CannedResponse>) -> Self {
        let host = listener.local_addr().unwrap().to_string();
        let requests: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let request_log = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let Some(head) = read_head(&mut stream).await else {
                    continue;
                };
                request_log.lock().unwrap().push(head.clone());

                let route = head
                    .lines()
                    .next()
                    .map(|line| {
                        let mut parts = line.split_whitespace();
                        format!(
                            "{} {}",
                            parts.next().unwrap_or(""),
                            parts.next().unwrap_or("")
                        )
                    })
                    .unwrap_or_default();

                let response = routes.get(&route).cloned().unwrap_or(CannedResponse {
                    status: 404,
                    content_type: "application/json",
                    extra_headers: Vec::new(),
                    body: b"{}".to_vec(),
                });

                let mut header = format!(
                    "HTTP/1.1 {} SCRIPTED\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    response.status,
                    response.content_type,
                    response.body.len()
                );
                for (name, value) in &response.extra_headers {
                    header.push_str(&format!("{}: {}\r\n", name, value));
                }
                header.push_str("\r\n");

                let _ = stream.write_all(header.as_bytes()).await;
                let _ = stream.write_all(&response.body).await;
                let _ = stream.shutdown().await;
            }
        });

        Self { host, requests }
    }
}

async fn read_head(stream: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            return Some(String::from_utf8_lossy(&buf[..end]).to_string());
        }
    }
}

struct CountingResolver {
    calls: Arc<AtomicUsize>,
    credentials: Credentials,
}

#[async_trait]
impl CredentialResolver for CountingResolver {
    async fn get_credentials(&self, _image_ref: &str, _host: &str) -> Result<Credentials> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.credentials.clone())
    }
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

struct TestImage {
    config: Vec<u8>,
    layers: Vec<Vec<u8>>,
    manifest: Vec<u8>,
    manifest_digest: String,
}

fn build_test_image() -> TestImage {
    let config = br#"{"architecture":"amd64","os":"linux"}"#.to_vec();
    let layers = vec![
        b"first layer bytes".to_vec(),
        b"second layer, slightly longer".to_vec(),
    ];

    let layer_descriptors: Vec<serde_json::Value> = layers
        .iter()
        .map(|layer| {
            serde_json::json!({
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": digest_of(layer),
                "size": layer.len(),
            })
        })
        .collect();
    let manifest = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": digest_of(&config),
            "size": config.len(),
        },
        "layers": layer_descriptors,
    }))
    .unwrap();
    let manifest_digest = digest_of(&manifest);

    TestImage {
        config,
        layers,
        manifest,
        manifest_digest,
    }
}

fn blob_routes(image: &TestImage) -> HashMap<String, CannedResponse> {
    let mut routes = HashMap::new();
    routes.insert(
        format!("GET /v2/app/blobs/{}", digest_of(&image.config)),
        CannedResponse::blob(image.config.clone()),
    );
    for layer in &image.layers {
        routes.insert(
            format!("GET /v2/app/blobs/{}", digest_of(layer)),
            CannedResponse::blob(layer.clone()),
        );
    }
    routes
}

async fn run_pull(
    registry: &ScriptedRegistry,
    resolver: Arc<dyn CredentialResolver>,
    store_root: &std::path::Path,
) -> (Result<()>, Vec<String>, ImageReference) {
    let reference = ImageReference::parse(&format!("{}/app:latest", registry.host)).unwrap();
    let source = OciRegistrySource::new(
        reqwest::Client::new(),
        reference.clone(),
        resolver,
        CancellationToken::new(),
        Logger::new_quiet(),
    )
    .with_http(true);
    let store = ImageStore::open(store_root.to_str().unwrap(), "default").unwrap();

    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink = move |event: &ProgressEvent| {
        sink_events
            .lock()
            .unwrap()
            .push(format!("{} {}", event.kind, event.name));
    };

    let result = Transfer::new(2, CancellationToken::new())
        .run(&source, &store, &sink)
        .await;

    let events = events.lock().unwrap().clone();
    (result, events, reference)
}

#[tokio::test]
async fn open_registry_pull_never_consults_the_resolver() {
    let image = build_test_image();
    let (listener, _host) = ScriptedRegistry::bind().await;

    let mut routes = blob_routes(&image);
    routes.insert("GET /v2/".to_string(), CannedResponse::json(b"{}".to_vec()));
    routes.insert(
        "GET /v2/app/manifests/latest".to_string(),
        CannedResponse::json(image.manifest.clone())
            .with_header("Docker-Content-Digest", &image.manifest_digest),
    );
    let registry = ScriptedRegistry::serve(listener, routes);

    let calls = Arc::new(AtomicUsize::new(0));
    let resolver = Arc::new(CountingResolver {
        calls: Arc::clone(&calls),
        credentials: Credentials::default(),
    });

    let tmp = tempfile::tempdir().unwrap();
    let (result, events, reference) = run_pull(&registry, resolver, tmp.path()).await;
    result.unwrap();

    // No challenge was offered, so credentials were never requested
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let subject = reference.to_string();
    assert_eq!(events.first().unwrap(), &format!("resolving {}", subject));
    assert_eq!(events[1], format!("resolved {}", image.manifest_digest));
    assert_eq!(events[events.len() - 2], format!("committing {}", subject));
    assert_eq!(events.last().unwrap(), &format!("complete {}", subject));

    // One downloading/downloaded pair for the config and each layer
    let downloading = events
        .iter()
        .filter(|e| e.starts_with("downloading "))
        .count();
    let downloaded = events
        .iter()
        .filter(|e| e.starts_with("downloaded "))
        .count();
    assert_eq!(downloading, 3);
    assert_eq!(downloaded, 3);

    let image_dir = tmp
        .path()
        .join("default")
        .join(subject.replace('/', "_").replace(':', "_"));
    assert!(image_dir.join("manifest.json").is_file());
    assert!(
        image_dir
            .join(format!(
                "config_{}.json",
                digest_of(&image.config).replace(':', "_")
            ))
            .is_file()
    );
    for layer in &image.layers {
        let path = image_dir.join(digest_of(layer).replace(':', "_"));
        assert_eq!(std::fs::read(path).unwrap(), *layer);
    }
    let index = std::fs::read_to_string(image_dir.join("index.json")).unwrap();
    assert!(index.contains(&image.manifest_digest));
    assert!(index.contains(&subject));
}

#[tokio::test]
async fn challenged_pull_fetches_a_token_with_resolver_credentials() {
    let image = build_test_image();
    let (listener, host) = ScriptedRegistry::bind().await;

    let mut routes = blob_routes(&image);
    routes.insert(
        "GET /v2/".to_string(),
        CannedResponse {
            status: 401,
            content_type: "application/json",
            extra_headers: vec![(
                "WWW-Authenticate".to_string(),
                format!(r#"Bearer realm="http://{}/token",service="registry""#, host),
            )],
            body: b"{}".to_vec(),
        },
    );
    routes.insert(
        "GET /token?scope=repository%3Aapp%3Apull&service=registry".to_string(),
        CannedResponse::json(br#"{"token":"testtoken"}"#.to_vec()),
    );
    routes.insert(
        "GET /v2/app/manifests/latest".to_string(),
        CannedResponse::json(image.manifest.clone())
            .with_header("Docker-Content-Digest", &image.manifest_digest),
    );
    let registry = ScriptedRegistry::serve(listener, routes);

    let calls = Arc::new(AtomicUsize::new(0));
    let resolver = Arc::new(CountingResolver {
        calls: Arc::clone(&calls),
        credentials: Credentials {
            username: "00000000-0000-0000-0000-000000000000".to_string(),
            secret: "rt456".to_string(),
        },
    });

    let tmp = tempfile::tempdir().unwrap();
    let (result, _events, _reference) = run_pull(&registry, resolver, tmp.path()).await;
    result.unwrap();

    // The challenge triggered exactly one credential resolution
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let requests = registry.requests.lock().unwrap();
    let token_request = requests
        .iter()
        .find(|r| r.starts_with("GET /token"))
        .expect("token request must reach the realm");
    assert!(
        token_request.contains("Authorization: Basic ")
            || token_request.contains("authorization: Basic ")
    );

    let manifest_request = requests
        .iter()
        .find(|r| r.starts_with("GET /v2/app/manifests/latest"))
        .unwrap();
    assert!(
        manifest_request.contains("Bearer testtoken")
            || manifest_request.contains("bearer testtoken")
    );
}

#[tokio::test]
async fn manifest_index_narrows_to_the_matching_platform() {
    let image = build_test_image();
    let (listener, _host) = ScriptedRegistry::bind().await;

    let index = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": "sha256:0000000000000000000000000000000000000000000000000000000000000000",
                "platform": {"architecture": "arm64", "os": "linux"},
            },
            {
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": image.manifest_digest,
                "platform": {"architecture": "amd64", "os": "linux"},
            },
        ],
    }))
    .unwrap();

    let mut routes = blob_routes(&image);
    routes.insert("GET /v2/".to_string(), CannedResponse::json(b"{}".to_vec()));
    routes.insert(
        "GET /v2/app/manifests/latest".to_string(),
        CannedResponse::json(index.clone())
            .with_header("Docker-Content-Digest", &digest_of(&index)),
    );
    routes.insert(
        format!("GET /v2/app/manifests/{}", image.manifest_digest),
        CannedResponse::json(image.manifest.clone())
            .with_header("Docker-Content-Digest", &image.manifest_digest),
    );
    let registry = ScriptedRegistry::serve(listener, routes);

    let resolver = Arc::new(CountingResolver {
        calls: Arc::new(AtomicUsize::new(0)),
        credentials: Credentials::default(),
    });

    let tmp = tempfile::tempdir().unwrap();
    let (result, events, _reference) = run_pull(&registry, resolver, tmp.path()).await;
    result.unwrap();

    assert_eq!(events[1], format!("resolved {}", image.manifest_digest));
}

#[tokio::test]
async fn corrupted_blob_fails_with_a_digest_mismatch() {
    let image = build_test_image();
    let (listener, _host) = ScriptedRegistry::bind().await;

    let mut routes = blob_routes(&image);
    // Serve tampered bytes under the first layer's digest
    routes.insert(
        format!("GET /v2/app/blobs/{}", digest_of(&image.layers[0])),
        CannedResponse::blob(b"tampered bytes".to_vec()),
    );
    routes.insert("GET /v2/".to_string(), CannedResponse::json(b"{}".to_vec()));
    routes.insert(
        "GET /v2/app/manifests/latest".to_string(),
        CannedResponse::json(image.manifest.clone())
            .with_header("Docker-Content-Digest", &image.manifest_digest),
    );
    let registry = ScriptedRegistry::serve(listener, routes);

    let resolver = Arc::new(CountingResolver {
        calls: Arc::new(AtomicUsize::new(0)),
        credentials: Credentials::default(),
    });

    let tmp = tempfile::tempdir().unwrap();
    let (result, _events, _reference) = run_pull(&registry, resolver, tmp.path()).await;
    let err = result.unwrap_err();
    assert!(
        matches!(err, acr_image_puller::PullerError::Transfer(ref message) if message.contains("digest mismatch"))
    );
}
