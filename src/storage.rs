use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Writes uploaded files into a local folder served under `/uploads/images`.
#[derive(Clone, Debug)]
pub struct StorageService {
    folder: PathBuf,
    public_url: String,
}

impl StorageService {
    /// Create the storage, making the folder if it doesn't exist
    pub async fn new(folder: PathBuf, public_base_url: &str) -> Result<Self> {
        tokio::fs::create_dir_all(&folder)
            .await
            .with_context(|| format!("Failed to create directory: {}", folder.display()))?;
        tracing::debug!("Created/verified uploads directory: {}", folder.display());

        Ok(Self {
            folder,
            public_url: format!("{}/uploads/images", public_base_url.trim_end_matches('/')),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Store `data` and return the stored file name.
    pub async fn write_file(&self, original_name: &str, data: &[u8]) -> Result<String> {
        let filename = format!(
            "{}{}",
            chrono::Utc::now().timestamp_millis(),
            sanitize_filename(original_name)
        );
        let path = self.folder.join(&filename);

        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write file: {}", path.display()))?;

        tracing::info!("Stored upload {} ({} bytes)", filename, data.len());
        Ok(filename)
    }

    pub fn file_url(&self, filename: &str) -> String {
        format!("{}/{}", self.public_url, filename)
    }
}

/// Keep only the final path component, restricted to a safe character set.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "cover".to_string()
    } else {
        cleaned.to_string()
    }
}
