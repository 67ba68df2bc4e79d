//! The HTTP clients against a local stub server: pacing, status mapping and session cookies.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;

use positronic_core::contract::{Committer, ContentSource, FileWrite, RepositoryApi};
use positronic_core::error::ApiError;
use positronic_core::github::{GithubClient, RepoSlug};
use positronic_core::newsblur::NewsblurClient;
use positronic_core::rate_limit::RateLimiter;

const PERIOD: Duration = Duration::from_millis(150);

struct Reply {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: &'static str,
}

fn reply(status: u16, body: &'static str) -> Reply {
    Reply {
        status,
        headers: Vec::new(),
        body,
    }
}

/// Maps a request line (`GET /path HTTP/1.1`) to the canned reply.
type Route = fn(&str) -> Reply;

struct Stub {
    addr: SocketAddr,
    /// Raw request heads and bodies, in arrival order.
    requests: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn serve(route: Route) -> Stub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests: Arc<Mutex<Vec<String>>> = Arc::default();
    let recorded = requests.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let reply = route(request.lines().next().unwrap_or_default());
                recorded.lock().unwrap().push(request);

                let mut response = format!(
                    "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n",
                    reply.status,
                    reply.body.len()
                );
                for (name, value) in &reply.headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("\r\n");
                response.push_str(reply.body);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Stub { addr, requests }
}

fn github_routes(line: &str) -> Reply {
    if line.starts_with("GET /repos/o/r/git/ref/heads/main ") {
        reply(200, r#"{"ref": "refs/heads/main", "object": {"sha": "abc"}}"#)
    } else if line.starts_with("GET /repos/o/r/git/ref/heads/gone ") {
        reply(404, r#"{"message": "Not Found"}"#)
    } else if line.starts_with("PUT /repos/o/r/contents/content/a.md ") {
        reply(409, r#"{"message": "content/a.md does not match sha"}"#)
    } else if line.starts_with("POST /repos/o/r/git/refs ") {
        reply(422, r#"{"message": "Reference already exists"}"#)
    } else {
        reply(500, "{}")
    }
}

fn github(stub: &Stub, period: Duration) -> GithubClient {
    GithubClient::new(
        &stub.url(),
        "tok",
        "o/r".parse::<RepoSlug>().unwrap(),
        Arc::new(RateLimiter::new(period)),
    )
    .unwrap()
}

#[tokio::test]
async fn github_statuses_map_to_api_errors() {
    let stub = serve(github_routes).await;
    let client = github(&stub, Duration::from_millis(1));

    let tip = client.get_ref("main").await.unwrap();
    assert_eq!(tip.name, "refs/heads/main");
    assert_eq!(tip.sha, "abc");

    let missing = client.get_ref("gone").await.unwrap_err();
    assert!(missing.is_not_found(), "got: {missing:?}");

    let conflict = client
        .put_file(FileWrite {
            branch: "b".into(),
            path: "content/a.md".into(),
            content: "body".into(),
            message: "m".into(),
            sha: Some("stale".into()),
            committer: Committer::default(),
        })
        .await
        .unwrap_err();
    match conflict {
        ApiError::Conflict { body, .. } => assert!(body.contains("does not match sha")),
        other => panic!("expected conflict, got {other:?}"),
    }

    assert!(matches!(
        client.create_ref("b", "abc").await,
        Err(ApiError::Status { status: 422, .. })
    ));

    let first = stub.requests()[0].to_lowercase();
    assert!(first.contains("authorization: bearer tok"));
    assert!(first.contains("accept: application/vnd.github+json"));
    assert!(first.contains("x-github-api-version:"));
}

#[tokio::test]
async fn github_calls_wait_for_the_limiter() {
    let stub = serve(github_routes).await;
    let client = github(&stub, PERIOD);

    let started = Instant::now();
    for _ in 0..3 {
        client.get_ref("main").await.unwrap();
    }
    assert!(
        started.elapsed() >= PERIOD * 2,
        "three calls took {:?}",
        started.elapsed()
    );
    assert_eq!(stub.requests().len(), 3);
}

fn newsblur_routes(line: &str) -> Reply {
    if line.starts_with("POST /api/login ") {
        Reply {
            status: 200,
            headers: vec![("set-cookie", "newsblur_sessionid=s3cr3t; Path=/")],
            body: r#"{"authenticated": true, "user_id": 7}"#,
        }
    } else if line.starts_with("GET /social/stories/7/?page=1&order=newest&read_filter=all ") {
        reply(
            200,
            r#"{"stories": [{"id": "s1", "story_title": "Hello", "story_permalink": "https://a",
                "comments": "nice", "shared_date": "2024-01-03 10:00:00.000000"}]}"#,
        )
    } else if line.starts_with("GET /social/stories/7/?page=2&") {
        reply(200, r#"{"stories": []}"#)
    } else {
        reply(403, r#"{"authenticated": false}"#)
    }
}

#[tokio::test]
async fn newsblur_session_cookie_rides_along_and_calls_are_paced() {
    let stub = serve(newsblur_routes).await;
    let limiter = Arc::new(RateLimiter::new(PERIOD));

    let started = Instant::now();
    let client = NewsblurClient::login(&stub.url(), "jdoe", "hunter2", limiter)
        .await
        .unwrap();
    assert_eq!(client.user_id(), 7);

    let page = client.shared_stories(1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].title, "Hello");
    assert!(client.shared_stories(2).await.unwrap().is_empty());
    assert!(started.elapsed() >= PERIOD * 2, "took {:?}", started.elapsed());

    let requests = stub.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].contains("username=jdoe"));
    assert!(requests[0].contains("password=hunter2"));
    for stories_request in &requests[1..] {
        assert!(
            stories_request
                .to_lowercase()
                .contains("cookie: newsblur_sessionid=s3cr3t"),
            "missing session cookie in {stories_request}"
        );
    }
}

#[tokio::test]
async fn newsblur_rejected_login_is_unauthenticated() {
    fn refuse(_: &str) -> Reply {
        reply(200, r#"{"authenticated": false, "errors": {"__all__": ["bad"]}}"#)
    }
    let stub = serve(refuse).await;
    let result = NewsblurClient::login(
        &stub.url(),
        "jdoe",
        "wrong",
        Arc::new(RateLimiter::new(Duration::from_millis(1))),
    )
    .await;
    assert!(matches!(result, Err(ApiError::Unauthenticated { .. })));
}
