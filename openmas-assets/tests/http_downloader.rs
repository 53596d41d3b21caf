mod common;

use common::{logs, payload, TestServer};
use openmas_assets::{AssetError, AssetSourceConfig, HttpDownloader, HttpSource, SourceType};

#[tokio::test]
async fn test_streams_file_byte_for_byte_without_progress_logs() {
    let logger = logs();
    let server = TestServer::start().await;
    let data = payload(3 * 1024 * 1024);
    server.add_file("file.bin", data.clone());

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("file.bin");
    let source: AssetSourceConfig = HttpSource::new(server.url("/files/file.bin"))
        .with_progress_report(false)
        .into();

    let path = HttpDownloader::new()
        .with_interactive(false)
        .download(&source, &target)
        .await
        .unwrap();

    assert_eq!(path, target);
    assert_eq!(std::fs::read(&target).unwrap(), data);
    assert!(!dir.path().join("file.bin.partial").exists());

    let lines = logger.lines_containing(&dir.path().display().to_string());
    assert_eq!(lines.len(), 1, "unexpected log lines: {:?}", lines);
    assert!(lines[0].starts_with("Downloading asset from"));
}

#[tokio::test]
async fn test_progress_logged_per_interval() {
    let logger = logs();
    let server = TestServer::start().await;
    server.add_file("progress.bin", payload(3 * 1024 * 1024));

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("progress.bin");
    let source = AssetSourceConfig::Http(HttpSource {
        progress_report_interval_mb: Some(1.0),
        ..HttpSource::new(server.url("/files/progress.bin"))
    });

    HttpDownloader::new()
        .with_interactive(false)
        .download(&source, &target)
        .await
        .unwrap();

    let needle = dir.path().display().to_string();
    let progress: Vec<_> = logger
        .lines_containing(&needle)
        .into_iter()
        .filter(|l| l.starts_with("Downloaded "))
        .collect();
    assert_eq!(progress.len(), 3, "progress lines: {:?}", progress);

    let complete = logger
        .lines_containing(&needle)
        .into_iter()
        .filter(|l| l.starts_with("Download complete: 3.00 MB"))
        .count();
    assert_eq!(complete, 1);
}

#[tokio::test]
async fn test_http_error_status() {
    let server = TestServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing.bin");
    let url = server.url("/files/missing.bin");

    let err = HttpDownloader::new()
        .download(&AssetSourceConfig::http(&url), &target)
        .await
        .unwrap_err();

    assert!(matches!(err, AssetError::Download { .. }));
    assert!(err.to_string().contains("404"), "message: {}", err);
    assert_eq!(err.source_type(), Some(SourceType::Http));
    assert_eq!(err.source_info(), Some(url.as_str()));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_mid_stream_failure_cleans_up() {
    let server = TestServer::start().await;
    server.add_file("flaky.bin", payload(256 * 1024));

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("flaky.bin");

    let err = HttpDownloader::new()
        .with_interactive(false)
        .download(
            &AssetSourceConfig::http(server.url("/broken/flaky.bin")),
            &target,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AssetError::Download { .. }));
    assert!(!target.exists());
    assert!(!dir.path().join("flaky.bin.partial").exists());
}

#[tokio::test]
async fn test_connection_refused() {
    let dir = tempfile::tempdir().unwrap();
    let err = HttpDownloader::new()
        .download(
            &AssetSourceConfig::http("http://127.0.0.1:9/unreachable.bin"),
            &dir.path().join("unreachable.bin"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AssetError::Download { .. }));
    assert!(std::error::Error::source(&err).is_some());
}

#[tokio::test]
async fn test_rejects_non_http_source() {
    let dir = tempfile::tempdir().unwrap();
    let err = HttpDownloader::new()
        .download(
            &AssetSourceConfig::local("/tmp/whatever"),
            &dir.path().join("x"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AssetError::Configuration(_)));
}
