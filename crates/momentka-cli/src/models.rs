//! Model asset management: check which ONNX files are present and download
//! the missing ones from a configured base URL.

use momentka_core::ModelPaths;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelFetchError {
    #[error(
        "no model base URL configured — set model_base_url in the config file \
         or MOMENTKA_MODEL_BASE_URL"
    )]
    NoBaseUrl,
    #[error("download of {file} failed: {source}")]
    Http {
        file: String,
        source: reqwest::Error,
    },
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Download any missing model files from `base_url/<file name>` into
/// `model_dir`. Files already on disk are left alone. Returns how many were
/// downloaded.
pub fn fetch_missing_models(model_dir: &Path, base_url: &str) -> Result<usize, ModelFetchError> {
    let paths = ModelPaths::in_dir(model_dir);
    if paths.all_present() {
        tracing::info!(dir = %model_dir.display(), "all model files present");
        return Ok(0);
    }

    fs::create_dir_all(model_dir)?;
    let base = base_url.trim_end_matches('/');
    let mut downloaded = 0;

    for target in [&paths.detector, &paths.embedder] {
        if target.exists() {
            continue;
        }
        let file = target
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let url = format!("{base}/{file}");
        tracing::info!(url, "downloading model");

        let bytes = download(&url).map_err(|source| ModelFetchError::Http {
            file: file.clone(),
            source,
        })?;

        // Temp-then-rename so an interrupted download never leaves a half
        // model at the load path.
        let tmp = target.with_extension("onnx.partial");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, target)?;
        tracing::info!(path = %target.display(), bytes = bytes.len(), "model stored");
        downloaded += 1;
    }

    Ok(downloaded)
}

fn download(url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let response = reqwest::blocking::get(url)?.error_for_status()?;
    Ok(response.bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_present_models_are_not_refetched() {
        let dir = TempDir::new().unwrap();
        let paths = ModelPaths::in_dir(dir.path());
        fs::write(&paths.detector, b"det").unwrap();
        fs::write(&paths.embedder, b"emb").unwrap();

        // Base URL is bogus; with everything present it must never be hit.
        let downloaded = fetch_missing_models(dir.path(), "http://127.0.0.1:1").unwrap();
        assert_eq!(downloaded, 0);
    }

    #[test]
    fn test_unreachable_base_url_surfaces_as_http_error() {
        let dir = TempDir::new().unwrap();
        let err = fetch_missing_models(dir.path(), "http://127.0.0.1:1").unwrap_err();
        assert!(matches!(err, ModelFetchError::Http { .. }));
    }
}
