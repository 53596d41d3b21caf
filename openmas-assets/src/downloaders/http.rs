use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;

use super::partial_path;
use crate::config::{AssetSourceConfig, HttpSource, SourceType};
use crate::error::AssetError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Streams an HTTP(S) resource to disk.
///
/// Bytes go to `<target>.partial` first and are renamed into place once the
/// body has been fully received.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
    chunk_size: usize,
    progress_interval_mb: f64,
    interactive: bool,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDownloader {
    pub const DEFAULT_CHUNK_SIZE: usize = 8192;
    pub const DEFAULT_PROGRESS_INTERVAL_MB: f64 = 10.0;

    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            progress_interval_mb: Self::DEFAULT_PROGRESS_INTERVAL_MB,
            interactive: std::io::stdout().is_terminal(),
        }
    }

    /// Size of the write buffer between the network stream and the file.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Default log interval, used when the source does not set its own.
    #[must_use]
    pub fn with_progress_interval_mb(mut self, interval_mb: f64) -> Self {
        self.progress_interval_mb = interval_mb;
        self
    }

    /// Show a progress bar instead of log lines. Defaults to whether stdout is a terminal.
    #[must_use]
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub async fn download(
        &self,
        source: &AssetSourceConfig,
        target: &Path,
    ) -> Result<PathBuf, AssetError> {
        let AssetSourceConfig::Http(http) = source else {
            return Err(AssetError::Configuration(format!(
                "HttpDownloader cannot handle '{}' sources",
                source.source_type()
            )));
        };
        if http.url.trim().is_empty() {
            return Err(AssetError::Configuration(
                "'url' is required for http sources".to_string(),
            ));
        }

        info!(
            "Downloading asset from {} to {}",
            http.url,
            target.display()
        );

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| download_error(http, "Failed to create target directory", e))?;
        }

        let partial = partial_path(target);
        let result = self.stream_to(http, target, &partial).await;
        if let Err(e) = result {
            if tokio::fs::try_exists(&partial).await.unwrap_or(false) {
                match tokio::fs::remove_file(&partial).await {
                    Ok(()) => debug!("Removed partial download {}", partial.display()),
                    Err(rm) => warn!(
                        "Failed to remove partial download {}: {}",
                        partial.display(),
                        rm
                    ),
                }
            }
            return Err(e);
        }

        tokio::fs::rename(&partial, target)
            .await
            .map_err(|e| download_error(http, "Failed to move download into place", e))?;

        Ok(target.to_path_buf())
    }

    async fn stream_to(
        &self,
        http: &HttpSource,
        target: &Path,
        partial: &Path,
    ) -> Result<(), AssetError> {
        let response = self
            .client
            .get(&http.url)
            .send()
            .await
            .map_err(|e| download_error(http, "Failed to start download", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::download(format!(
                "Download of {} failed with HTTP status {}",
                http.url, status
            ))
            .with_source(SourceType::Http, &http.url));
        }

        let total_size = response.content_length();
        let file = tokio::fs::File::create(partial)
            .await
            .map_err(|e| download_error(http, "Failed to create file", e))?;
        let mut file = tokio::io::BufWriter::with_capacity(self.chunk_size, file);

        let mut progress = if http.progress_report {
            let interval_mb = http
                .progress_report_interval_mb
                .unwrap_or(self.progress_interval_mb);
            Some(Progress::new(self.interactive, total_size, interval_mb, target))
        } else {
            None
        };

        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(http, "Error while downloading", e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| download_error(http, "Failed to write to file", e))?;
            downloaded += chunk.len() as u64;

            if let Some(progress) = progress.as_mut() {
                progress.update(chunk.len() as u64, downloaded);
            }
        }

        file.flush()
            .await
            .map_err(|e| download_error(http, "Failed to flush file", e))?;

        if let Some(progress) = progress {
            progress.finish(downloaded);
        }

        Ok(())
    }
}

fn download_error(
    http: &HttpSource,
    message: &str,
    cause: impl Into<crate::error::BoxError>,
) -> AssetError {
    AssetError::download(format!("{} ({})", message, http.url))
        .with_source(SourceType::Http, &http.url)
        .with_cause(cause)
}

/// Progress reporting for one download: a bar on terminals, log lines otherwise.
enum Progress {
    Bar(ProgressBar),
    Log {
        target: String,
        total: Option<u64>,
        interval_bytes: u64,
        next_report: u64,
    },
}

impl Progress {
    fn new(interactive: bool, total: Option<u64>, interval_mb: f64, target: &Path) -> Self {
        if interactive {
            let bar = match total {
                Some(total) => ProgressBar::new(total),
                None => ProgressBar::new_spinner(),
            };
            let style = ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            Self::Bar(bar)
        } else {
            let interval_bytes = ((interval_mb * BYTES_PER_MB) as u64).max(1);
            Self::Log {
                target: target.display().to_string(),
                total,
                interval_bytes,
                next_report: interval_bytes,
            }
        }
    }

    fn update(&mut self, chunk_len: u64, downloaded: u64) {
        match self {
            Self::Bar(bar) => bar.inc(chunk_len),
            Self::Log {
                target,
                total,
                interval_bytes,
                next_report,
            } => {
                if downloaded < *next_report {
                    return;
                }
                let mb = downloaded as f64 / BYTES_PER_MB;
                match total {
                    Some(total) if *total > 0 => info!(
                        "Downloaded {:.2} MB of {:.2} MB ({:.1}%) ({})",
                        mb,
                        *total as f64 / BYTES_PER_MB,
                        downloaded as f64 * 100.0 / *total as f64,
                        target
                    ),
                    _ => info!("Downloaded {:.2} MB ({})", mb, target),
                }
                *next_report = (downloaded / *interval_bytes + 1) * *interval_bytes;
            }
        }
    }

    fn finish(self, downloaded: u64) {
        match self {
            Self::Bar(bar) => bar.finish_and_clear(),
            Self::Log { target, .. } => {
                info!(
                    "Download complete: {:.2} MB ({})",
                    downloaded as f64 / BYTES_PER_MB,
                    target
                );
            }
        }
    }
}
