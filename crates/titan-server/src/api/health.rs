use actix_web::{HttpResponse, Responder, get, web};
use serde_json::json;

use crate::model::{AppState, response::Result};

#[get("/health")]
pub async fn health(data: web::Data<AppState>) -> impl Responder {
    let table = data.permissions.snapshot();
    let cache = data.interceptor.stats();
    Result::<serde_json::Value>::http_success(json!({
        "status": "UP",
        "permissionGeneration": table.generation(),
        "permissionEntries": table.entry_count(),
        "cache": {
            "hits": cache.hits(),
            "misses": cache.misses(),
            "bypasses": cache.bypasses(),
        },
    }))
}

/// Landing page rejected callers are pointed at
#[get("/api/denied")]
pub async fn denied() -> impl Responder {
    HttpResponse::Forbidden().json(Result::new(
        titan_common::error::ACCESS_DENIED.code,
        "access denied".to_string(),
        (),
    ))
}
