//! OCR engines for image-only pages

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::PageBitmap;
use crate::error::{Error, Result};

const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Produces text from a rendered page
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, bitmap: &PageBitmap) -> Result<String>;
}

/// Engine used when OCR is switched off; recognizes nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn recognize(&self, _bitmap: &PageBitmap) -> Result<String> {
        Ok(String::new())
    }
}

/// Shells out to the `tesseract` binary. A run that outlives the timeout
/// is killed and reported as `TimeoutError`.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    languages: Vec<String>,
    timeout: Duration,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, languages: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            languages,
            timeout: DEFAULT_OCR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn language_arg(&self) -> String {
        if self.languages.is_empty() {
            "eng".to_string()
        } else {
            self.languages.join("+")
        }
    }

    /// Waits for `child` until the deadline, killing it once the deadline passes
    fn wait_bounded(&self, child: &mut Child) -> Result<ExitStatus> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill OCR process {}: {}", child.id(), e);
                }
                reap(child);
                return Err(Error::TimeoutError(format!(
                    "OCR exceeded {:?}",
                    self.timeout
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Collects a killed child so it does not linger as a zombie
fn reap(child: &mut Child) {
    let deadline = Instant::now() + REAP_TIMEOUT;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Ok(Some(_)) | Err(_) => return,
        }
    }
    warn!("OCR process {} did not exit after kill", child.id());
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, bitmap: &PageBitmap) -> Result<String> {
        let (bytes, suffix) = bitmap.encoded()?;
        let workdir = tempfile::Builder::new().prefix("blindreview-ocr-").tempdir()?;
        let image_path = workdir.path().join(format!("page{}", suffix));
        let mut image = File::create(&image_path)?;
        image.write_all(&bytes)?;
        image.flush()?;
        drop(image);

        // output goes to files so a chatty run cannot stall on a full pipe
        let output_base = workdir.path().join("page");
        let stderr_path = workdir.path().join("stderr.txt");

        debug!("Running OCR on {}x{} page image", bitmap.width, bitmap.height);
        let mut child = Command::new(&self.binary)
            .arg(&image_path)
            .arg(&output_base)
            .arg("-l")
            .arg(self.language_arg())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(File::create(&stderr_path)?)
            .spawn()
            .map_err(|e| {
                Error::OcrError(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        let status = self.wait_bounded(&mut child)?;
        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(Error::OcrError(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                status,
                stderr.trim()
            )));
        }

        let text = std::fs::read(output_base.with_extension("txt")).map_err(|e| {
            Error::OcrError(format!("{} produced no text output: {}", self.binary.display(), e))
        })?;
        Ok(String::from_utf8_lossy(&text).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::BitmapData;

    fn bitmap() -> PageBitmap {
        PageBitmap {
            width: 1,
            height: 1,
            data: BitmapData::Gray8(vec![255]),
        }
    }

    #[test]
    fn test_disabled_ocr_returns_nothing() {
        assert_eq!(DisabledOcr.recognize(&bitmap()).unwrap(), "");
    }

    #[test]
    fn test_missing_binary_is_an_ocr_error() {
        let ocr = TesseractOcr::new("/nonexistent/tesseract-binary", vec![]);
        let err = ocr.recognize(&bitmap()).unwrap_err();
        assert!(matches!(err, Error::OcrError(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_engine_is_killed_at_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-tesseract");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let ocr = TesseractOcr::new(&script, vec![]).with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = ocr.recognize(&bitmap()).unwrap_err();
        assert!(matches!(err, Error::TimeoutError(_)), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_text_is_read_from_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-tesseract");
        std::fs::write(&script, "#!/bin/sh\nprintf 'Jane Doe' > \"$2.txt\"\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let ocr = TesseractOcr::new(&script, vec!["eng".into()]);
        assert_eq!(ocr.recognize(&bitmap()).unwrap(), "Jane Doe");
    }

    #[test]
    fn test_language_list_is_joined() {
        let ocr = TesseractOcr::new("tesseract", vec!["eng".into(), "deu".into()]);
        assert_eq!(ocr.language_arg(), "eng+deu");
    }
}
