//! Image acquisition.

use std::path::{Path, PathBuf};
use std::time::Duration;

use loomqc_pipeline::RgbImage;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::AcquisitionError;

/// A source of raw sheet scans.
pub trait Scanner: Send {
    /// Acquire the next scan at `dpi`. `Ok(None)` means the source is
    /// exhausted and will never produce another image.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Transient`] for conditions that clear
    /// on their own (an empty feeder) and [`AcquisitionError::Fatal`]
    /// otherwise.
    fn acquire(&mut self, dpi: u32) -> Result<Option<RgbImage>, AcquisitionError>;
}

/// Replays the PNG scans of a directory in file name order.
#[derive(Debug)]
pub struct DirectoryScanner {
    files: Vec<PathBuf>,
    next: usize,
    repeat: bool,
    interval: Duration,
}

impl DirectoryScanner {
    /// List the PNG files of `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`AcquisitionError::Fatal`] if the directory cannot be read
    /// or holds no PNG file.
    pub fn open(dir: &Path) -> Result<Self, AcquisitionError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| AcquisitionError::Fatal(format!("cannot read {}: {e}", dir.display())))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(AcquisitionError::Fatal(format!(
                "no PNG scans in {}",
                dir.display()
            )));
        }
        info!(dir = %dir.display(), scans = files.len(), "replaying scans");
        Ok(Self {
            files,
            next: 0,
            repeat: true,
            interval: Duration::ZERO,
        })
    }

    /// Stop after the last file instead of starting over.
    #[must_use]
    pub const fn once(mut self) -> Self {
        self.repeat = false;
        self
    }

    /// Pause before each scan, as a real scan would take.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Scanner for DirectoryScanner {
    fn acquire(&mut self, _dpi: u32) -> Result<Option<RgbImage>, AcquisitionError> {
        if self.next >= self.files.len() {
            if !self.repeat {
                return Ok(None);
            }
            self.next = 0;
        }
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        debug!(file = %path.display(), "opening scan");
        image::open(path)
            .map(|img| Some(img.to_rgb8()))
            .map_err(|e| AcquisitionError::Fatal(format!("cannot open {}: {e}", path.display())))
    }
}

/// Pause after a failed acquisition before trying again.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Run `scanner` on its own thread, handing scans over a channel of
/// depth one so acquisition never runs more than one sheet ahead.
///
/// Transient failures are logged and retried. Fatal failures are passed
/// on and acquisition continues after a pause. The thread stops when the
/// source is exhausted or the receiver is dropped.
///
/// # Errors
///
/// Returns the I/O error if the thread cannot be spawned.
pub fn spawn_scanner<S: Scanner + 'static>(
    mut scanner: S,
    dpi: u32,
) -> std::io::Result<mpsc::Receiver<Result<RgbImage, AcquisitionError>>> {
    let (tx, rx) = mpsc::channel(1);
    std::thread::Builder::new()
        .name("scanner".to_owned())
        .spawn(move || {
            loop {
                let message = match scanner.acquire(dpi) {
                    Ok(Some(image)) => {
                        info!(width = image.width(), height = image.height(), "scanned sheet");
                        Ok(image)
                    }
                    Ok(None) => {
                        info!("scan source exhausted");
                        break;
                    }
                    Err(AcquisitionError::Transient(message)) => {
                        debug!(%message, "waiting for scanner");
                        std::thread::sleep(RETRY_DELAY);
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "acquisition failed");
                        Err(e)
                    }
                };
                let failed = message.is_err();
                if tx.blocking_send(message).is_err() {
                    break;
                }
                if failed {
                    std::thread::sleep(RETRY_DELAY);
                }
            }
        })?;
    Ok(rx)
}
