//! Public letter links: page, download, expiry and quota.

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{get, setup};

#[tokio::test]
async fn test_page_and_download_each_consume_one_access() {
    let t = setup();
    t.write("output_SPH_Oct/protected/Policy 42.pdf", "%PDF-1.4 letter");
    let record = t.state.letters.publish(
        t.path().join("output_SPH_Oct/protected/Policy 42.pdf"),
        Duration::days(30),
        2,
    );

    let (status, headers, body) = t.send_raw(get(&format!("/letters/{}", record.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/html"));
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains(&format!("/letters/{}/download", record.id)));

    let (status, headers, body) = t
        .send_raw(get(&format!("/letters/{}/download", record.id)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/pdf");
    assert_eq!(headers["cache-control"], "no-store");
    assert_eq!(
        headers["content-disposition"],
        "inline; filename=\"Policy_42.pdf\""
    );
    assert_eq!(body, b"%PDF-1.4 letter".to_vec());

    let (status, _, body) = t
        .send_raw(get(&format!("/letters/{}/download", record.id)))
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert!(String::from_utf8(body).unwrap().contains("maximum number of times"));
    assert_eq!(t.state.letters.snapshot()[0].access_count, 2);
}

#[tokio::test]
async fn test_expired_link_is_gone() {
    let t = setup();
    t.write("generated_pdfs/a.pdf", "pdf");
    let record = t.state.letters.publish(
        t.path().join("generated_pdfs/a.pdf"),
        Duration::days(1),
        10,
    );
    t.clock.advance(Duration::days(1) + Duration::seconds(1));

    let (status, _, body) = t.send_raw(get(&format!("/letters/{}", record.id))).await;
    assert_eq!(status, StatusCode::GONE);
    assert!(String::from_utf8(body).unwrap().contains("expired"));
}

#[tokio::test]
async fn test_unknown_and_malformed_ids_look_the_same() {
    let t = setup();
    let (unknown, _, unknown_body) = t.send_raw(get("/letters/0000000000000000")).await;
    let (malformed, _, malformed_body) = t.send_raw(get("/letters/..%2F..%2Fetc")).await;
    assert_eq!(unknown, StatusCode::NOT_FOUND);
    assert_eq!(malformed, StatusCode::NOT_FOUND);
    assert_eq!(unknown_body, malformed_body);
}

#[tokio::test]
async fn test_missing_file_hides_behind_not_found() {
    let t = setup();
    let record = t.state.letters.publish(
        t.path().join("generated_pdfs/gone.pdf"),
        Duration::days(30),
        10,
    );
    let (status, _, _) = t
        .send_raw(get(&format!("/letters/{}/download", record.id)))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_concurrent_downloads_never_exceed_quota() {
    let t = setup();
    t.write("generated_pdfs/a.pdf", "pdf");
    let record = t.state.letters.publish(
        t.path().join("generated_pdfs/a.pdf"),
        Duration::days(30),
        5,
    );

    let requests = (0..20).map(|_| {
        let app = t.app.clone();
        let uri = format!("/letters/{}/download", record.id);
        async move {
            use tower::ServiceExt;
            app.oneshot(get(&uri)).await.unwrap().status()
        }
    });
    let statuses = futures::future::join_all(requests).await;
    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(ok, 5);
    assert_eq!(t.state.letters.snapshot()[0].access_count, 5);
}
