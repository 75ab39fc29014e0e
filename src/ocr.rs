//! OCR seam for scanned PDF pages.
//!
//! OCR engine internals stay outside the crate: [`CommandOcr`] shells out to
//! `pdftoppm` and `tesseract`, rendering a single page into a scratch
//! directory and reading recognized text from tesseract's stdout. When no
//! engine is installed the pipeline runs with [`DisabledOcr`] and pages
//! without a text layer simply contribute no text.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command;

use crate::config::OcrConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Recognize text on one page (1-based) of the PDF at `path`.
    async fn recognize_page(&self, path: &Path, page: u32) -> Result<String>;
}

/// Build the engine named by the configuration.
pub fn create_engine(config: &OcrConfig) -> Arc<dyn OcrEngine> {
    match config.engine.as_str() {
        "command" => Arc::new(CommandOcr {
            languages: config.languages.clone(),
        }),
        _ => Arc::new(DisabledOcr),
    }
}

pub struct DisabledOcr;

#[async_trait]
impl OcrEngine for DisabledOcr {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn recognize_page(&self, _path: &Path, _page: u32) -> Result<String> {
        Err(Error::Extraction("OCR engine is disabled".to_string()))
    }
}

/// External-command engine: `pdftoppm` renders the page to PNG, `tesseract`
/// reads it back as text.
pub struct CommandOcr {
    languages: String,
}

#[async_trait]
impl OcrEngine for CommandOcr {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn recognize_page(&self, path: &Path, page: u32) -> Result<String> {
        let scratch = tempfile::tempdir()?;
        let prefix = scratch.path().join("page");

        let render = Command::new("pdftoppm")
            .arg("-f")
            .arg(page.to_string())
            .arg("-l")
            .arg(page.to_string())
            .arg("-r")
            .arg("300")
            .arg("-png")
            .arg(path)
            .arg(&prefix)
            .output()
            .await
            .map_err(|e| Error::Extraction(format!("failed to run pdftoppm: {e}")))?;
        if !render.status.success() {
            return Err(Error::Extraction(format!(
                "pdftoppm failed for page {page}: {}",
                String::from_utf8_lossy(&render.stderr).trim()
            )));
        }

        // pdftoppm names its output page-<n>.png with variable zero padding
        let image = std::fs::read_dir(scratch.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|p| p.extension().is_some_and(|e| e == "png"))
            .ok_or_else(|| {
                Error::Extraction(format!("pdftoppm produced no image for page {page}"))
            })?;

        let recognize = Command::new("tesseract")
            .arg(&image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .output()
            .await
            .map_err(|e| Error::Extraction(format!("failed to run tesseract: {e}")))?;
        if !recognize.status.success() {
            return Err(Error::Extraction(format!(
                "tesseract failed for page {page}: {}",
                String::from_utf8_lossy(&recognize.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&recognize.stdout).into_owned())
    }
}
