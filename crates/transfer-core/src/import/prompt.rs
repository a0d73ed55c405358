//! Prompt importer with a skip-if-exists policy: re-registering versions
//! onto an existing prompt would renumber them, so a name collision skips
//! the unit unless `delete_prompt` is set.

use super::{build_import_tags, check_version_skew, destination_version};
use crate::client::MlflowClient;
use crate::compat::Feature;
use crate::error::Result;
use crate::export::PROMPT_FILE;
use crate::format::Envelope;
use crate::models::{Prompt, PromptVersion};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct PromptImportOptions {
    /// Delete a pre-existing destination prompt instead of skipping.
    pub delete_prompt: bool,
    pub import_source_tags: bool,
}

/// Whether the unit imported or was skipped on a name collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptImportOutcome {
    Imported { versions: usize },
    SkippedExisting,
}

pub struct PromptImporter {
    client: Arc<dyn MlflowClient>,
    opts: PromptImportOptions,
}

impl PromptImporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self::with_options(client, PromptImportOptions::default())
    }

    pub fn with_options(client: Arc<dyn MlflowClient>, opts: PromptImportOptions) -> Self {
        Self { client, opts }
    }

    pub async fn import_prompt(&self, input_dir: &Path) -> Result<PromptImportOutcome> {
        let envelope = Envelope::read(&input_dir.join(PROMPT_FILE)).await?;
        let dst_version = destination_version(self.client.as_ref()).await;
        if let Some(version) = &dst_version {
            version.require(Feature::Prompts)?;
        }
        check_version_skew(&envelope, dst_version.as_ref());
        let prompt: Prompt = serde_json::from_value(envelope.mlflow["prompt"].clone())?;
        let versions: Vec<PromptVersion> =
            serde_json::from_value(envelope.mlflow["versions"].clone())?;

        if self.exists(&prompt.name).await? {
            if !self.opts.delete_prompt {
                warn!(name = %prompt.name, "destination prompt exists, skipping");
                return Ok(PromptImportOutcome::SkippedExisting);
            }
            warn!(name = %prompt.name, "deleting pre-existing destination prompt");
            self.client.delete_prompt(&prompt.name).await?;
        }

        let mut ordered = versions;
        ordered.sort_by_key(|v| v.version);
        for version in &ordered {
            let tags = build_import_tags(
                &version.tags,
                self.opts.import_source_tags,
                &[
                    ("prompt_name", &version.name),
                    ("version", &version.version.to_string()),
                ],
            );
            self.client
                .register_prompt(
                    &prompt.name,
                    &version.template,
                    version.description.as_deref(),
                    &tags,
                )
                .await?;
        }
        info!(name = %prompt.name, versions = ordered.len(), "imported prompt");
        Ok(PromptImportOutcome::Imported {
            versions: ordered.len(),
        })
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let page = self
            .client
            .search_prompts(Some(&format!("name='{name}'")), 1, None)
            .await?;
        Ok(page.items.iter().any(|p| p.name == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryBackend;
    use crate::export::PromptExporter;
    use tempfile::TempDir;

    async fn export_prompt(out: &Path) -> Arc<MemoryBackend> {
        let src = Arc::new(MemoryBackend::new("src"));
        src.register_prompt("p", "hello {name}", None, &[])
            .await
            .unwrap();
        src.register_prompt("p", "hi {name}", None, &[])
            .await
            .unwrap();
        PromptExporter::new(src.clone())
            .export_prompt("p", out)
            .await
            .unwrap();
        src
    }

    #[tokio::test]
    async fn test_import_fresh_prompt() {
        let out = TempDir::new().unwrap();
        export_prompt(out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        let outcome = PromptImporter::new(dst.clone())
            .import_prompt(out.path())
            .await
            .unwrap();
        assert_eq!(outcome, PromptImportOutcome::Imported { versions: 2 });
        let v2 = dst.get_prompt_version("p", 2).await.unwrap();
        assert_eq!(v2.template, "hi {name}");
    }

    #[tokio::test]
    async fn test_skip_if_exists_preserves_destination() {
        let out = TempDir::new().unwrap();
        export_prompt(out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        dst.register_prompt("p", "different template", None, &[])
            .await
            .unwrap();
        let outcome = PromptImporter::new(dst.clone())
            .import_prompt(out.path())
            .await
            .unwrap();
        assert_eq!(outcome, PromptImportOutcome::SkippedExisting);
        let v1 = dst.get_prompt_version("p", 1).await.unwrap();
        assert_eq!(v1.template, "different template");
    }

    #[tokio::test]
    async fn test_delete_prompt_overrides_skip() {
        let out = TempDir::new().unwrap();
        export_prompt(out.path()).await;

        let dst = Arc::new(MemoryBackend::new("dst"));
        dst.register_prompt("p", "old", None, &[]).await.unwrap();
        let importer = PromptImporter::with_options(
            dst.clone(),
            PromptImportOptions {
                delete_prompt: true,
                import_source_tags: false,
            },
        );
        let outcome = importer.import_prompt(out.path()).await.unwrap();
        assert_eq!(outcome, PromptImportOutcome::Imported { versions: 2 });
        let v1 = dst.get_prompt_version("p", 1).await.unwrap();
        assert_eq!(v1.template, "hello {name}");
    }
}
