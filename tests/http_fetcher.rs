//! `HttpFetcher` against a real local HTTP server.

use magpie::error::{FetchFailure, TransientError};
use magpie::fetch::{Fetcher, HttpFetcher};
use magpie::request::{Body, Request};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Some(std::time::Duration::from_secs(5))).unwrap()
}

#[tokio::test]
async fn ok_response_carries_status_headers_and_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/cases")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"cases": []}"#)
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/cases", server.url()), "parse");
    let response = fetcher().fetch(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(response.status, 200);
    assert_eq!(
        response.headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(&response.body[..], br#"{"cases": []}"#);
    assert!(response.url.ends_with("/cases"));
}

#[tokio::test]
async fn not_found_is_returned_not_raised() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/missing")
        .with_status(404)
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/missing", server.url()), "parse");
    let response = fetcher().fetch(&request).await.unwrap();
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn server_errors_become_transient_failures() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/flaky")
        .with_status(503)
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/flaky", server.url()), "parse");
    let err = fetcher().fetch(&request).await.unwrap_err();
    assert!(matches!(
        err,
        FetchFailure::Transient(TransientError::UnexpectedStatus { status: 503, .. })
    ));
}

#[tokio::test]
async fn rate_limiting_is_transient_too() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/limited")
        .with_status(429)
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/limited", server.url()), "parse");
    let err = fetcher().fetch(&request).await.unwrap_err();
    assert!(matches!(
        err,
        FetchFailure::Transient(TransientError::UnexpectedStatus { status: 429, .. })
    ));
}

#[tokio::test]
async fn permanent_headers_and_cookies_ride_on_the_wire() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/private")
        .match_header("authorization", "Bearer tok")
        .match_header("cookie", "session=abc")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/private", server.url()), "parse")
        .with_permanent_header("authorization", "Bearer tok")
        .with_permanent_cookie("session", "abc");
    let response = fetcher().fetch(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn permanent_headers_override_request_headers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/h")
        .match_header("x-api-key", "permanent")
        .with_status(200)
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/h", server.url()), "parse")
        .with_header("x-api-key", "per-request")
        .with_permanent_header("x-api-key", "permanent");
    fetcher().fetch(&request).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn form_bodies_are_urlencoded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/search")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body("q=smith&year=2024")
        .with_status(200)
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/search", server.url()), "parse")
        .with_method(magpie::Method::Post)
        .with_body(Body::Form(vec![
            ("q".into(), "smith".into()),
            ("year".into(), "2024".into()),
        ]));
    fetcher().fetch(&request).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn json_bodies_are_sent_as_json() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api")
        .match_header("content-type", "application/json")
        .match_body(mockito::Matcher::Json(serde_json::json!({"page": 2})))
        .with_status(200)
        .create_async()
        .await;

    let request = Request::navigate(format!("{}/api", server.url()), "parse")
        .with_method(magpie::Method::Post)
        .with_body(Body::Json(serde_json::json!({"page": 2})));
    fetcher().fetch(&request).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn connection_refused_is_a_transport_failure() {
    // Nothing listens on this port.
    let request = Request::navigate("http://127.0.0.1:1/void", "parse");
    let err = fetcher().fetch(&request).await.unwrap_err();
    assert!(matches!(
        err,
        FetchFailure::Transient(TransientError::Transport { .. })
    ));
}
