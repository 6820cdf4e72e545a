//! Session against a mocked page server.

use std::time::Duration;

use comic_core::PageRecord;
use comic_renderer::decode::pixmap_from_rgba;
use comic_renderer::{CompositorConfig, ExportFormat, PageExporter};
use comic_sync::{HttpRemote, RetryConfig, SessionBuilder, SessionHandle, SyncConfig};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn red_png() -> Vec<u8> {
    let pixmap = pixmap_from_rgba(4, 4, [255, 0, 0, 255].repeat(16)).expect("pixmap");
    PageExporter::render_to_png(&pixmap).expect("png")
}

async fn mount_basics(server: &MockServer, pages: Value) {
    Mock::given(method("GET"))
        .and(path("/get-pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "pages": pages })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/save-pages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(server)
        .await;
}

async fn start_session(server: &MockServer, images: &[&str]) -> SessionHandle {
    let remote = HttpRemote::with_retry_config(server.uri(), RetryConfig::new(2, 1, 5, 1.0))
        .expect("client");
    SessionBuilder::http(remote)
        .with_config(SyncConfig::new(server.uri()))
        .with_images(images.iter().copied())
        .with_compositor(CompositorConfig {
            scale: 0.25,
            ..CompositorConfig::default()
        })
        .start()
        .await
        .expect("start")
}

async fn save_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == "/save-pages")
        .filter_map(|request| serde_json::from_slice(&request.body).ok())
        .collect()
}

#[tokio::test]
#[cfg_attr(
    target_os = "macos",
    ignore = "wiremock/reqwest system-configuration issue on macOS"
)]
async fn test_structural_edit_reaches_server() {
    let server = MockServer::start().await;
    mount_basics(&server, json!([{ "layoutName": "four-panel-grid" }])).await;

    let session = start_session(&server, &[]).await;
    session.add_page(None).await.expect("add");
    session.flush().await.expect("flush");

    let bodies = save_bodies(&server).await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["pageCount"], 2);
    assert_eq!(bodies[0]["pages"][1]["layoutName"], "four-panel-grid");
    session.shutdown().await.expect("shutdown");
}

#[tokio::test]
#[cfg_attr(
    target_os = "macos",
    ignore = "wiremock/reqwest system-configuration issue on macOS"
)]
async fn test_export_downloads_images_and_falls_back_to_local_silhouette() {
    let server = MockServer::start().await;
    mount_basics(
        &server,
        json!([{ "layoutName": "four-panel-grid", "slots": { "1": "red.png" } }]),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/uploads/red.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(red_png()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/overlays/four-panel-grid.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let session = start_session(&server, &["red.png"]).await;
    let first = session.export_pages(ExportFormat::Png).await.expect("export");
    assert_eq!(first.len(), 1);
    assert_eq!(&first[0].1[..4], b"\x89PNG");

    // Second export is served from the decoded image cache.
    let second = session.export_pages(ExportFormat::Pdf).await.expect("export");
    assert_eq!(second.len(), 1);
    assert!(second[0].0.ends_with(".pdf"));
    assert!(second[0].1.starts_with(b"%PDF"));
}

#[tokio::test]
#[cfg_attr(
    target_os = "macos",
    ignore = "wiremock/reqwest system-configuration issue on macOS"
)]
async fn test_pushed_pages_replace_local_state() {
    let server = MockServer::start().await;
    mount_basics(&server, json!([])).await;

    let pushed = vec![
        PageRecord::new("two-horizontal-angled"),
        PageRecord::new("four-panel-grid"),
    ];
    let body = format!(
        ": hello\n\nevent: pages\ndata: {}\n\n",
        json!({ "pages": pushed })
    );
    Mock::given(method("GET"))
        .and(path("/pages/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let session = start_session(&server, &[]).await;

    let mut applied = false;
    for _ in 0..100 {
        let snapshot = session.snapshot().await.expect("snapshot");
        if snapshot.pages == pushed {
            applied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(applied, "pushed pages were not applied");
    assert!(save_bodies(&server).await.is_empty());
}
