use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde::Serialize;
use tracing::info;

use crate::billing::{QuotaGate, QuotaStatus};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::generation::{DreamAnalysis, DreamGenerator, DreamInput};

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analysis: DreamAnalysis,
    pub quota: QuotaStatus,
}

// key: dreams-analyze -> usage-billed generation
pub async fn analyze_dream(
    Extension(gate): Extension<QuotaGate>,
    Extension(generator): Extension<Arc<dyn DreamGenerator>>,
    AuthUser { user_id }: AuthUser,
    Json(input): Json<DreamInput>,
) -> AppResult<Json<AnalyzeResponse>> {
    if input.content.trim().is_empty() {
        return Err(AppError::BadRequest("Dream content required".into()));
    }

    if !gate.check_and_consume(&user_id).await? {
        let status = gate.status(&user_id).await?;
        return Err(AppError::QuotaExceeded {
            upgrade: status.recommended_upgrade,
        });
    }

    let analysis = generator
        .analyze(&input)
        .await
        .map_err(|err| AppError::Message(format!("analysis failed: {err:#}")))?;
    info!(%user_id, generator = generator.name(), "analysed dream");

    let quota = gate.status(&user_id).await?;
    Ok(Json(AnalyzeResponse { analysis, quota }))
}
