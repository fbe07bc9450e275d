use std::path::{Path, PathBuf};

use forge_types::{CoreError, ModelConfig};

/// Resolve the on-disk artifact path for a model (§6 cache directory
/// layout), under `<cachePath>/models`.
///
/// - `location` (a pre-existing path, absolute or relative to the cache
///   root) wins when present — the model's artifact is not hub-mirrored.
/// - Otherwise `url` is parsed and mirrored as
///   `<host>/<org>/<repo>-<branch>/<...path>` when it looks hub-style
///   (a `resolve`/`raw`/`blob` branch segment, as HuggingFace and GitHub
///   raw-content URLs use), or `<host>/<basename>` otherwise.
pub fn artifact_path(cache_root: &Path, config: &ModelConfig) -> Result<PathBuf, CoreError> {
    let models_root = cache_root.join("models");

    if let Some(location) = &config.location {
        let p = Path::new(location);
        return Ok(if p.is_absolute() {
            p.to_path_buf()
        } else {
            models_root.join(p)
        });
    }

    let url = config.url.as_ref().ok_or_else(|| {
        CoreError::config_invalid(format!(
            "model '{}' has neither `url` nor `location`",
            config.id
        ))
    })?;

    let parsed = reqwest::Url::parse(url).map_err(|e| {
        CoreError::config_invalid(format!("model '{}': invalid url '{url}': {e}", config.id))
    })?;

    let host = parsed.host_str().unwrap_or("unknown-host").to_string();
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();

    if let Some(rel_path) = hub_style_rest(&segments) {
        let (org, repo, branch, rest) = rel_path;
        let mut path = models_root.join(&host).join(org).join(format!("{repo}-{branch}"));
        for seg in rest {
            path.push(seg);
        }
        Ok(path)
    } else {
        let basename = segments.last().copied().unwrap_or("artifact");
        Ok(models_root.join(&host).join(basename))
    }
}

/// `/org/repo/{resolve,raw,blob}/branch/...path` → `(org, repo, branch, rest)`.
fn hub_style_rest<'a>(
    segments: &[&'a str],
) -> Option<(&'a str, &'a str, &'a str, Vec<&'a str>)> {
    if segments.len() < 4 {
        return None;
    }
    let marker_idx = segments[2..]
        .iter()
        .position(|s| matches!(*s, "resolve" | "raw" | "blob"))
        .map(|i| i + 2)?;
    let org = segments[0];
    let repo = segments[1];
    if marker_idx + 1 >= segments.len() {
        return None;
    }
    let branch = segments[marker_idx + 1];
    let rest = segments[(marker_idx + 2)..].to_vec();
    if rest.is_empty() {
        return None;
    }
    Some((org, repo, branch, rest))
}

/// Sibling `.ipull` marker denoting an in-progress download (§6).
pub fn ipull_marker(artifact: &Path) -> PathBuf {
    sibling(artifact, "ipull")
}

/// Sibling `.lock` sentinel for the cross-process lock (§6, §9).
pub fn lock_sentinel(artifact: &Path) -> PathBuf {
    sibling(artifact, "lock")
}

fn sibling(artifact: &Path, suffix: &str) -> PathBuf {
    let mut name = artifact
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    artifact.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_types::{ModelId, PrepareMode, TaskKind};

    fn config_with_url(url: &str) -> ModelConfig {
        ModelConfig {
            id: ModelId::new("m").unwrap(),
            engine: "builtin.echo".into(),
            task: TaskKind::ChatCompletion,
            url: Some(url.into()),
            location: None,
            sha256: None,
            md5: None,
            min_instances: 0,
            max_instances: 1,
            ttl: std::time::Duration::from_secs(300),
            context_size: None,
            batch_size: None,
            device: Default::default(),
            prepare: PrepareMode::OnDemand,
            completion_defaults: serde_json::Value::Null,
            initial_messages: None,
            prefix: None,
            grammars: None,
            tools: None,
            extra: Default::default(),
        }
    }

    #[test]
    fn mirrors_hub_style_url() {
        let cfg = config_with_url(
            "https://huggingface.co/Qwen/Qwen2.5-0.5B-Instruct-GGUF/resolve/main/qwen2.5-0.5b.gguf",
        );
        let path = artifact_path(Path::new("/cache"), &cfg).unwrap();
        assert_eq!(
            path,
            Path::new(
                "/cache/models/huggingface.co/Qwen/Qwen2.5-0.5B-Instruct-GGUF-main/qwen2.5-0.5b.gguf"
            )
        );
    }

    #[test]
    fn falls_back_to_host_basename() {
        let cfg = config_with_url("https://example.com/weights/model.bin");
        let path = artifact_path(Path::new("/cache"), &cfg).unwrap();
        assert_eq!(path, Path::new("/cache/models/example.com/model.bin"));
    }

    #[test]
    fn location_wins_over_url() {
        let mut cfg = config_with_url("https://example.com/weights/model.bin");
        cfg.location = Some("/srv/models/model.bin".into());
        let path = artifact_path(Path::new("/cache"), &cfg).unwrap();
        assert_eq!(path, Path::new("/srv/models/model.bin"));
    }

    #[test]
    fn markers_are_siblings() {
        let artifact = Path::new("/cache/models/host/model.bin");
        assert_eq!(
            ipull_marker(artifact),
            Path::new("/cache/models/host/model.bin.ipull")
        );
        assert_eq!(
            lock_sentinel(artifact),
            Path::new("/cache/models/host/model.bin.lock")
        );
    }
}
