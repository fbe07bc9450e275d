use std::path::Path;

use forge_types::{CoreError, ModelId};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

/// Stream `url` to `dest`, writing through a sibling `.ipull` marker that
/// is removed only once the transfer finishes cleanly (§6, §9). A crash or
/// kill mid-download leaves the marker behind, which `validate_artifact`
/// treats as an invalid artifact on the next attempt.
///
/// This is a plain single-file fetch; engines whose weights are split
/// across multiple repo files (processor/tokenizer/vocoder, per §4.1) call
/// this once per file and are responsible for sequencing those calls.
pub async fn fetch_to_file(model_id: &ModelId, url: &str, dest: &Path) -> Result<(), CoreError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let marker = crate::cache_layout::ipull_marker(dest);
    tokio::fs::write(&marker, b"").await?;

    let result = download_inner(model_id, url, dest).await;

    match &result {
        Ok(()) => {
            tokio::fs::remove_file(&marker).await.ok();
        }
        Err(_) => {
            // Leave the marker and the partial file in place; the next
            // prepare attempt will see both and know to retry.
        }
    }
    result
}

async fn download_inner(model_id: &ModelId, url: &str, dest: &Path) -> Result<(), CoreError> {
    let span = tracing::info_span!("download", model = %model_id, url = %url);
    let _enter = span.enter();

    let client = reqwest::Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| prepare_failed(model_id, format!("request failed: {e}")))?
        .error_for_status()
        .map_err(|e| prepare_failed(model_id, format!("bad status: {e}")))?;

    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| prepare_failed(model_id, format!("stream error: {e}")))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    tracing::debug!(bytes = written, "download complete");

    if written == 0 {
        return Err(prepare_failed(model_id, "downloaded zero bytes"));
    }
    Ok(())
}

fn prepare_failed(model_id: &ModelId, message: impl Into<String>) -> CoreError {
    CoreError::PrepareFailed {
        model_id: model_id.to_string(),
        message: message.into(),
    }
}

/// Resolve a `hf:org/repo/path/in/repo` location against the HuggingFace
/// Hub, returning a local cache path populated by `hf-hub`'s own cache
/// management. Used by engines that declare hub-native model ids instead
/// of a resolvable download URL.
pub async fn fetch_from_hub(repo: &str, file: &str) -> Result<std::path::PathBuf, CoreError> {
    let api = hf_hub::api::tokio::Api::new()
        .map_err(|e| CoreError::Internal(format!("hf-hub api init failed: {e}")))?;
    api.model(repo.to_string())
        .get(file)
        .await
        .map_err(|e| CoreError::PrepareFailed {
            model_id: repo.to_string(),
            message: format!("hf-hub fetch of '{file}' failed: {e}"),
        })
}
