#![cfg(feature = "hf")]

use std::sync::Mutex;
use std::time::Duration;

use tokio::net::TcpListener;

use openmas_assets::downloaders::HF_PROGRESS_ENV;
use openmas_assets::{AssetError, AssetSourceConfig, HfDownloader, HfSource, SourceType};

// The progress switch is process-global; serialize the tests touching it.
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Nothing listens on the discard port, so every hub request fails fast.
const DEAD_ENDPOINT: &str = "http://127.0.0.1:9";

fn unreachable_downloader(cache: &tempfile::TempDir) -> HfDownloader {
    HfDownloader::new(None)
        .unwrap()
        .with_endpoint(DEAD_ENDPOINT)
        .with_cache_dir(cache.path())
}

#[tokio::test]
async fn test_env_var_unset_again_after_failed_download() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    std::env::remove_var(HF_PROGRESS_ENV);

    let cache = tempfile::tempdir().unwrap();
    let source: AssetSourceConfig = HfSource::new("org/model")
        .with_filename("model.safetensors")
        .with_progress_report(false)
        .into();

    let err = unreachable_downloader(&cache)
        .download(&source, &cache.path().join("out/model.safetensors"))
        .await
        .unwrap_err();

    assert!(matches!(err, AssetError::Download { .. }), "got {:?}", err);
    assert_eq!(err.source_type(), Some(SourceType::Hf));
    assert_eq!(err.source_info(), Some("org/model/model.safetensors"));
    assert!(std::env::var_os(HF_PROGRESS_ENV).is_none());
}

#[tokio::test]
async fn test_existing_env_value_restored_after_failed_download() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    std::env::set_var(HF_PROGRESS_ENV, "0");

    let cache = tempfile::tempdir().unwrap();
    for progress_report in [true, false] {
        let source: AssetSourceConfig = HfSource::new("org/model")
            .with_filename("model.safetensors")
            .with_progress_report(progress_report)
            .into();

        let result = unreachable_downloader(&cache)
            .download(&source, &cache.path().join("out/model.safetensors"))
            .await;

        assert!(result.is_err());
        assert_eq!(std::env::var(HF_PROGRESS_ENV).unwrap(), "0");
    }

    std::env::remove_var(HF_PROGRESS_ENV);
}

/// Hub endpoint that accepts connections, stalls for `delay`, then hangs up.
async fn stalling_endpoint(delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                drop(socket);
            });
        }
    });
    format!("http://{}", addr)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_downloads_leave_env_untouched() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    std::env::remove_var(HF_PROGRESS_ENV);

    let cache = tempfile::tempdir().unwrap();
    let quiet = HfDownloader::new(None)
        .unwrap()
        .with_endpoint(stalling_endpoint(Duration::from_millis(100)).await)
        .with_cache_dir(cache.path().join("quiet"));
    let verbose = HfDownloader::new(None)
        .unwrap()
        .with_endpoint(stalling_endpoint(Duration::from_millis(400)).await)
        .with_cache_dir(cache.path().join("verbose"));

    let quiet_source: AssetSourceConfig = HfSource::new("org/quiet")
        .with_filename("model.bin")
        .with_progress_report(false)
        .into();
    let verbose_source: AssetSourceConfig = HfSource::new("org/verbose")
        .with_filename("model.bin")
        .with_progress_report(true)
        .into();

    let quiet_target = cache.path().join("out/quiet.bin");
    let verbose_target = cache.path().join("out/verbose.bin");
    // The quiet download starts first and finishes first
    let (first, second) = tokio::join!(
        quiet.download(&quiet_source, &quiet_target),
        async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            verbose.download(&verbose_source, &verbose_target).await
        },
    );

    assert!(first.is_err());
    assert!(second.is_err());
    assert_eq!(std::env::var_os(HF_PROGRESS_ENV), None);
}

#[tokio::test]
async fn test_empty_repo_id_is_configuration_error() {
    let cache = tempfile::tempdir().unwrap();
    let err = unreachable_downloader(&cache)
        .download(
            &AssetSourceConfig::hf(""),
            &cache.path().join("out/model.bin"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AssetError::Configuration(_)));
}
