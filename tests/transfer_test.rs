use std::io::Write;
use std::time::Duration;
use vflow_upscaler::config::PipelineConfig;
use vflow_upscaler::services::transfer::{HttpFetcher, TransferError};

fn fetcher(timeout: Duration) -> HttpFetcher {
    let config = PipelineConfig {
        download_timeout: timeout,
        chunk_size: 1024,
        ..PipelineConfig::default()
    };
    HttpFetcher::new(&config).unwrap()
}

#[tokio::test]
async fn test_fetch_writes_exact_bytes() {
    let mut server = mockito::Server::new_async().await;
    let body: Vec<u8> = (0..50_000u32).map(|i| (i % 256) as u8).collect();
    let _mock = server
        .mock("GET", "/v.webm")
        .with_status(200)
        .with_header("content-type", "video/webm")
        .with_body(body.clone())
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("v.webm");
    let report = fetcher(Duration::from_secs(30))
        .fetch_to_path(&format!("{}/v.webm", server.url()), &dest, 1024 * 1024)
        .await
        .unwrap();

    assert_eq!(report.bytes, 50_000);
    assert_eq!(report.content_type.as_deref(), Some("video/webm"));
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), body);
}

#[tokio::test]
async fn test_declared_length_rejected_before_destination_exists() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/big.mp4")
        .with_status(200)
        .with_body(vec![0u8; 2048])
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("big.mp4");
    let err = fetcher(Duration::from_secs(30))
        .fetch_to_path(&format!("{}/big.mp4", server.url()), &dest, 1000)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TransferError::TooLarge {
            limit: 1000,
            declared: Some(2048)
        }
    ));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_non_video_content_type_is_not_an_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/page")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html></html>")
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let report = fetcher(Duration::from_secs(30))
        .fetch_to_path(
            &format!("{}/page", server.url()),
            &dir.path().join("page"),
            1024,
        )
        .await
        .unwrap();
    assert_eq!(report.bytes, 13);
}

#[tokio::test]
async fn test_server_error_is_transfer_failure() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/broken.mp4")
        .with_status(502)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher(Duration::from_secs(30))
        .fetch_to_path(
            &format!("{}/broken.mp4", server.url()),
            &dir.path().join("broken.mp4"),
            1024,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::TransferFailed(_)));
    assert!(err.to_string().starts_with("Failed to download video"));
}

#[tokio::test]
async fn test_unreachable_host_is_transfer_failure() {
    let dir = tempfile::tempdir().unwrap();
    let err = fetcher(Duration::from_secs(2))
        .fetch_to_path(
            "http://127.0.0.1:9/never.mp4",
            &dir.path().join("never.mp4"),
            1024,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::TransferFailed(_)));
}

#[tokio::test]
async fn test_stalled_body_times_out_and_keeps_partial_file() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/slow.mp4")
        .with_status(200)
        .with_header("content-type", "video/mp4")
        .with_chunked_body(|w| {
            w.write_all(&[1u8; 512])?;
            w.flush()?;
            std::thread::sleep(Duration::from_secs(3));
            w.write_all(&[1u8; 512])
        })
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("slow.mp4");
    let err = fetcher(Duration::from_secs(1))
        .fetch_to_path(&format!("{}/slow.mp4", server.url()), &dest, 1024 * 1024)
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::TransferFailed(_)));
    // Removing the partial file is the caller's scratch guard's job
    assert!(dest.exists());
}
