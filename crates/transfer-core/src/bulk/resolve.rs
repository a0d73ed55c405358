//! Name-set resolution for bulk operations.
//!
//! A spec string resolves to concrete names: `all` enumerates the source,
//! a trailing `*` is a prefix search, a `.txt` path reads one name per
//! line, anything else splits on commas.

use crate::client::{cursor, MlflowClient};
use crate::error::{Result, TransferError};
use std::path::Path;
use tracing::debug;

/// Resolve an experiment spec to experiment names.
pub async fn resolve_experiments(client: &dyn MlflowClient, spec: &str) -> Result<Vec<String>> {
    resolve(spec, |filter| async move {
        let experiments = cursor::experiments(client, filter).collect_all().await?;
        Ok(experiments.into_iter().map(|e| e.name).collect())
    })
    .await
}

/// Resolve a registered-model spec to model names.
pub async fn resolve_models(client: &dyn MlflowClient, spec: &str) -> Result<Vec<String>> {
    resolve(spec, |filter| async move {
        let models = cursor::registered_models(client, filter).collect_all().await?;
        Ok(models.into_iter().map(|m| m.name).collect())
    })
    .await
}

async fn resolve<F, Fut>(spec: &str, search: F) -> Result<Vec<String>>
where
    F: FnOnce(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<String>>>,
{
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(TransferError::BadRequest {
            message: "empty name spec".to_string(),
        });
    }
    if spec == "all" {
        return search(None).await;
    }
    if let Some(prefix) = spec.strip_suffix('*') {
        let filter = format!("name LIKE '{prefix}%'");
        debug!(filter, "prefix search");
        return search(Some(filter)).await;
    }
    if spec.ends_with(".txt") {
        return read_names_file(Path::new(spec)).await;
    }
    Ok(spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

async fn read_names_file(path: &Path) -> Result<Vec<String>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| TransferError::io_with_path(e, path))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use std::io::Write;

    #[tokio::test]
    async fn test_all_and_prefix() {
        let src = MemoryBackend::new("src");
        src.create_experiment("team-a", &[]).await.unwrap();
        src.create_experiment("team-b", &[]).await.unwrap();
        src.create_experiment("other", &[]).await.unwrap();

        let mut all = resolve_experiments(&src, "all").await.unwrap();
        all.sort();
        assert_eq!(all, vec!["other", "team-a", "team-b"]);

        let mut prefixed = resolve_experiments(&src, "team-*").await.unwrap();
        prefixed.sort();
        assert_eq!(prefixed, vec!["team-a", "team-b"]);
    }

    #[tokio::test]
    async fn test_comma_list() {
        let src = MemoryBackend::new("src");
        let names = resolve_models(&src, "m1, m2 ,m3").await.unwrap();
        assert_eq!(names, vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_names_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("names.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "m1").unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "m2").unwrap();
        drop(f);

        let src = MemoryBackend::new("src");
        let names = resolve_models(&src, path.to_str().unwrap()).await.unwrap();
        assert_eq!(names, vec!["m1", "m2"]);
    }
}
