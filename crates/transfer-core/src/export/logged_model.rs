//! Logged-model exporter: `logged_model.json` plus the model's own
//! artifact tree.

use super::source_system_info;
use crate::client::MlflowClient;
use crate::compat::{BackendVersion, Feature};
use crate::error::Result;
use crate::format::{Envelope, ARTIFACTS_DIR};
use crate::models::LoggedModel;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const LOGGED_MODEL_FILE: &str = "logged_model.json";

pub struct LoggedModelExporter {
    client: Arc<dyn MlflowClient>,
}

impl LoggedModelExporter {
    pub fn new(client: Arc<dyn MlflowClient>) -> Self {
        Self { client }
    }

    pub async fn export_logged_model(
        &self,
        model_id: &str,
        out_dir: &Path,
    ) -> Result<LoggedModel> {
        if let Ok(version) = self.client.server_version().await {
            BackendVersion::parse(&version)?.require(Feature::LoggedModels)?;
        }
        let model = self.client.get_logged_model(model_id).await?;
        let artifacts = self
            .client
            .list_logged_model_artifacts(model_id, None)
            .await?;
        if !artifacts.is_empty() {
            self.client
                .download_logged_model_artifacts(model_id, "", &out_dir.join(ARTIFACTS_DIR))
                .await?;
        }
        let envelope = Envelope::new(
            source_system_info(self.client.as_ref()).await,
            json!({ "num_artifacts": artifacts.len() }),
            json!({ "logged_model": model }),
        );
        envelope.write(&out_dir.join(LOGGED_MODEL_FILE)).await?;
        info!(model_id, "exported logged model");
        Ok(model)
    }
}
