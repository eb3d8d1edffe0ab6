use actix_web::{HttpResponse, post, web};
use serde_json::json;
use tracing::info;

use titan_auth::AuthContext;

use crate::error::{AppError, TitanError};
use crate::model::{AppState, response::Result};

/// Reload the permission table from its configured source
#[post("/permissions/reload")]
pub async fn reload(
    data: web::Data<AppState>,
    auth: web::ReqData<AuthContext>,
) -> std::result::Result<HttpResponse, AppError> {
    let source = data.permission_source.as_ref().ok_or_else(|| {
        TitanError::IllegalArgument("no permission source configured".to_string())
    })?;

    let summary = data.permissions.reload_from(source.as_ref()).await?;
    info!(
        user = %auth.username(),
        generation = summary.generation,
        "Permission table reloaded on request"
    );

    Ok(Result::<serde_json::Value>::http_success(json!({
        "generation": summary.generation,
        "entries": summary.entries,
        "paths": summary.paths,
        "misconfigured": summary.misconfigured,
    })))
}
