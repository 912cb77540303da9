//! PDF page rendering through `pdftoppm`
//!
//! The PDF is written to a scratch directory, rendered to one JPEG per
//! page, and the pages are read back in page order.

use super::{PageConverter, ProviderError, ProviderResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

pub struct PdftoppmConverter {
    command: String,
    scratch_root: PathBuf,
}

impl PdftoppmConverter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            scratch_root: std::env::temp_dir(),
        }
    }
}

impl Default for PdftoppmConverter {
    fn default() -> Self {
        Self::new("pdftoppm")
    }
}

/// Page number from `page-<n>.jpg` (pdftoppm zero-pads to the page count)
fn page_number(path: &std::path::Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

#[async_trait]
impl PageConverter for PdftoppmConverter {
    async fn convert(&self, pdf: &[u8], dpi: u32) -> ProviderResult<Vec<Vec<u8>>> {
        let work_dir = self
            .scratch_root
            .join(format!("hdm-pdf-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| ProviderError::Conversion(format!("scratch dir: {}", e)))?;

        let result = self.render(&work_dir, pdf, dpi).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            debug!(dir = %work_dir.display(), error = %e, "Scratch cleanup failed");
        }
        result
    }
}

impl PdftoppmConverter {
    async fn render(
        &self,
        work_dir: &std::path::Path,
        pdf: &[u8],
        dpi: u32,
    ) -> ProviderResult<Vec<Vec<u8>>> {
        let input = work_dir.join("input.pdf");
        tokio::fs::write(&input, pdf)
            .await
            .map_err(|e| ProviderError::Conversion(format!("write input: {}", e)))?;

        let output_prefix = work_dir.join("page");
        let output = Command::new(&self.command)
            .arg("-jpeg")
            .arg("-r")
            .arg(dpi.to_string())
            .arg(&input)
            .arg(&output_prefix)
            .output()
            .await
            .map_err(|e| ProviderError::Conversion(format!("{} not runnable: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(ProviderError::Conversion(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(work_dir)
            .await
            .map_err(|e| ProviderError::Conversion(format!("read output: {}", e)))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProviderError::Conversion(format!("read output: {}", e)))?
        {
            let path = entry.path();
            let is_jpeg = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
            if let (true, Some(n)) = (is_jpeg, page_number(&path)) {
                pages.push((n, path));
            }
        }
        pages.sort_by_key(|(n, _)| *n);

        let mut images = Vec::with_capacity(pages.len());
        for (_, path) in pages {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| ProviderError::Conversion(format!("read page: {}", e)))?;
            images.push(bytes);
        }

        if images.is_empty() {
            return Err(ProviderError::Conversion("no pages rendered".into()));
        }
        debug!(pages = images.len(), dpi, "PDF rendered to images");
        Ok(images)
    }
}
