//! Prompt exporter: `prompt.json` carrying the prompt and every version.

use super::source_system_info;
use crate::client::{cursor, MlflowClient};
use crate::error::{Result, TransferError};
use crate::format::Envelope;
use crate::models::PromptVersion;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const PROMPT_FILE: &str = "prompt.json";

pub struct PromptExporter {
    client: Arc<dyn MlflowClient>,
}

impl PromptExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self { client }
    }

    pub async fn export_prompt(&self, name: &str, out_dir: &Path) -> Result<Vec<PromptVersion>> {
        let prompts = cursor::prompts(
            self.client.as_ref(),
            Some(format!("name='{name}'")),
        )
        .collect_all()
        .await?;
        let prompt = prompts
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| TransferError::not_found("prompt", name))?;
        let mut versions = cursor::prompt_versions(self.client.as_ref(), name.to_string())
            .collect_all()
            .await?;
        versions.sort_by_key(|v| v.version);

        let envelope = Envelope::new(
            source_system_info(self.client.as_ref()).await,
            json!({ "num_versions": versions.len() }),
            json!({ "prompt": prompt, "versions": versions }),
        );
        envelope.write(&out_dir.join(PROMPT_FILE)).await?;
        info!(name, versions = versions.len(), "exported prompt");
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_prompt_versions_in_order() {
        let src = Arc::new(MemoryBackend::new("src"));
        src.register_prompt("p", "hello {name}", None, &[])
            .await
            .unwrap();
        src.register_prompt("p", "hi {name}", Some("v2"), &[])
            .await
            .unwrap();

        let out = TempDir::new().unwrap();
        let versions = PromptExporter::new(src)
            .export_prompt("p", out.path())
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[1].template, "hi {name}");
    }

    #[tokio::test]
    async fn test_missing_prompt_not_found() {
        let src = Arc::new(MemoryBackend::new("src"));
        let out = TempDir::new().unwrap();
        let err = PromptExporter::new(src)
            .export_prompt("nope", out.path())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
