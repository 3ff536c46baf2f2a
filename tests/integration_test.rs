//! Integration tests for crow-client
//!
//! Most tests run against a scripted HTTP server on a local socket. The
//! `#[ignore]`d ones need a real Crow server and these environment variables:
//! - CROW_SERVER_URL: server base URL (e.g. http://localhost:8080)
//! - CROW_USERNAME: account name
//! - CROW_PASSWORD: account password
//!
//! Run with: cargo test --test integration_test -- --ignored

use crow_client::{CrowClient, Outcome, Session, UploadProgress, UploadRequest};
use std::collections::{HashMap, VecDeque};
use std::env;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One request as seen by the scripted server.
#[derive(Debug, Clone)]
struct Hit {
    path: String,
    authorization: Option<String>,
    body: String,
}

type Script = HashMap<&'static str, VecDeque<(u16, &'static str)>>;

/// Serves canned responses per path, one request per connection, and records
/// every request it receives.
async fn spawn_server(script: Script) -> (String, Arc<Mutex<Vec<Hit>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(Mutex::new(Vec::new()));
    let script = Arc::new(Mutex::new(script));

    let recorded = hits.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let hits = recorded.clone();
            let script = script.clone();
            tokio::spawn(async move {
                let _ = serve_one(stream, hits, script).await;
            });
        }
    });

    (format!("http://{addr}"), hits)
}

async fn serve_one(
    mut stream: TcpStream,
    hits: Arc<Mutex<Vec<Hit>>>,
    script: Arc<Mutex<Script>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let path = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    if let Some(len) = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
    {
        while buf.len() < header_end + len {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    } else if headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    {
        while !buf.ends_with(b"0\r\n\r\n") {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }

    hits.lock().expect("hits lock").push(Hit {
        path: path.clone(),
        authorization: headers.get("authorization").cloned(),
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    });

    let (status, body) = script
        .lock()
        .expect("script lock")
        .get_mut(path.as_str())
        .and_then(VecDeque::pop_front)
        .unwrap_or((404, "not scripted"));

    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn script(entries: &[(&'static str, &[(u16, &'static str)])]) -> Script {
    entries
        .iter()
        .map(|(path, responses)| (*path, responses.iter().copied().collect()))
        .collect()
}

const LOGIN_OK: (u16, &str) = (200, r#"{"token":"access-1","refreshToken":"refresh-1"}"#);

async fn login(client: &CrowClient) -> Session {
    let mut session = Session::new();
    let request = session.login("admin", "1234");
    let outcome = client
        .execute(&mut session, request, |_| {}, |_| {})
        .await
        .expect("login sent");
    assert!(matches!(outcome, Outcome::LoggedIn), "got {outcome:?}");
    session
}

fn photo(dir: &TempDir, content: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join("cat.jpg");
    std::fs::write(&path, content).expect("write photo");
    path
}

#[tokio::test]
async fn test_expired_token_is_refreshed_and_upload_retried_once() {
    let (url, hits) = spawn_server(script(&[
        ("/login", &[LOGIN_OK]),
        ("/upload", &[(401, "expired"), (200, r#"{"status":"ok"}"#)]),
        ("/refresh", &[(200, r#"{"token":"access-2"}"#)]),
    ]))
    .await;
    let client = CrowClient::new(url);
    let mut session = login(&client).await;

    let dir = TempDir::new().expect("temp dir");
    let content = vec![7u8; 64 * 1024];
    let request = session
        .upload(UploadRequest::new(photo(&dir, &content), "pets"))
        .expect("upload request");

    let progress: Arc<Mutex<Vec<UploadProgress>>> = Arc::default();
    let seen = progress.clone();
    let mut outcomes = Vec::new();
    let outcome = client
        .execute(
            &mut session,
            request,
            move |p| seen.lock().expect("progress lock").push(p),
            |o| outcomes.push(o.to_string()),
        )
        .await
        .expect("upload sent");

    assert!(matches!(outcome, Outcome::Uploaded { .. }), "got {outcome:?}");
    assert_eq!(outcomes.len(), 3);

    let hits = hits.lock().expect("hits lock").clone();
    let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
    assert_eq!(paths, ["/login", "/upload", "/refresh", "/upload"]);

    assert_eq!(hits[1].authorization.as_deref(), Some("Bearer access-1"));
    assert!(hits[2].body.contains(r#""refreshToken":"refresh-1""#));
    assert_eq!(hits[2].authorization, None);
    assert_eq!(hits[3].authorization.as_deref(), Some("Bearer access-2"));
    assert_eq!(session.access_token(), "access-2");

    let last = *progress
        .lock()
        .expect("progress lock")
        .last()
        .expect("progress reported");
    assert_eq!(last.total, content.len() as i64);
    assert_eq!(last.percent(), Some(100));
}

#[tokio::test]
async fn test_multipart_body_only_has_path_when_folder_given() {
    let (url, hits) = spawn_server(script(&[
        ("/login", &[LOGIN_OK]),
        ("/upload", &[(200, "{}"), (200, "{}")]),
    ]))
    .await;
    let client = CrowClient::new(url);
    let session = login(&client).await;
    let dir = TempDir::new().expect("temp dir");
    let file = photo(&dir, b"not really a jpeg");

    for target in ["", "holidays/2025"] {
        let request = session
            .upload(UploadRequest::new(&file, target))
            .expect("upload request");
        let reply = client.send(request).await.expect("upload sent");
        assert!(reply.is_success());
    }

    let hits = hits.lock().expect("hits lock").clone();
    let without_path = &hits[1].body;
    let with_path = &hits[2].body;

    for body in [without_path, with_path] {
        assert!(body.contains(r#"name="photo""#));
        assert!(body.contains(r#"filename="cat.jpg""#));
        assert!(body.contains("image/jpeg"));
        assert!(body.contains("not really a jpeg"));
    }
    assert!(!without_path.contains(r#"name="path""#));
    assert!(with_path.contains(r#"name="path""#));
    assert!(with_path.contains("holidays/2025"));
}

#[tokio::test]
async fn test_rejected_refresh_ends_session() {
    let (url, hits) = spawn_server(script(&[
        ("/login", &[LOGIN_OK]),
        ("/upload", &[(401, "expired")]),
        ("/refresh", &[(401, "refresh expired")]),
    ]))
    .await;
    let client = CrowClient::new(url);
    let mut session = login(&client).await;
    let dir = TempDir::new().expect("temp dir");
    let request = session
        .upload(UploadRequest::new(photo(&dir, b"jpeg"), ""))
        .expect("upload request");

    let outcome = client
        .execute(&mut session, request, |_| {}, |_| {})
        .await
        .expect("upload sent");

    assert!(matches!(outcome, Outcome::RefreshFailed(_)), "got {outcome:?}");
    assert!(!session.can_upload());
    assert_eq!(session.refresh_token(), "");

    let paths: Vec<String> = hits
        .lock()
        .expect("hits lock")
        .iter()
        .map(|h| h.path.clone())
        .collect();
    assert_eq!(paths, ["/login", "/upload", "/refresh"]);
}

#[tokio::test]
async fn test_server_error_body_is_reported() {
    let (url, _hits) = spawn_server(script(&[(
        "/login",
        &[(500, r#"{"error":"database down"}"#)],
    )]))
    .await;
    let client = CrowClient::new(format!("{url}/"));
    let mut session = Session::new();
    let request = session.login("admin", "1234");

    let outcome = client
        .execute(&mut session, request, |_| {}, |_| {})
        .await
        .expect("login sent");

    match &outcome {
        Outcome::Failed { body, .. } => assert!(body.contains("database down")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(!session.can_upload());
}

// --- Live server ---

async fn live_session() -> Option<(CrowClient, Session)> {
    let url = env::var("CROW_SERVER_URL").ok()?;
    let username = env::var("CROW_USERNAME").ok()?;
    let password = env::var("CROW_PASSWORD").ok()?;

    let client = CrowClient::new(url);
    let mut session = Session::new();
    let request = session.login(username, password);
    let outcome = client
        .execute(&mut session, request, |_| {}, |_| {})
        .await
        .ok()?;
    matches!(outcome, Outcome::LoggedIn).then_some((client, session))
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_live_login() {
    let (_client, session) = live_session().await.expect("Failed to authenticate");
    assert!(session.can_upload());
    assert!(!session.refresh_token().is_empty());
}

#[tokio::test]
#[ignore] // Requires a running server
async fn test_live_upload() {
    let (client, mut session) = live_session().await.expect("Failed to authenticate");
    let dir = TempDir::new().expect("temp dir");
    let request = session
        .upload(UploadRequest::new(photo(&dir, b"\xFF\xD8\xFF\xD9"), "crow-client-tests"))
        .expect("upload request");

    let outcome = client
        .execute(&mut session, request, |_| {}, |_| {})
        .await
        .expect("upload sent");
    assert!(matches!(outcome, Outcome::Uploaded { .. }), "got {outcome:?}");
}
