//! Assembles the application state from configuration

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use titan_auth::model::{POLICY_ADMIN, PermissionRequirement};
use titan_auth::service::evaluator::PermissionEvaluator;
use titan_auth::service::permission::{
    FilePermissionSource, PermissionSource, PermissionStore, ReloadTask,
};
use titan_auth::service::pipeline::AuthorizationPipeline;
use titan_auth::service::policy::{PolicyRegistry, RoutePolicies};
use titan_auth::service::token::TokenValidator;
use titan_cache::{CallInterceptor, MokaCacheStore};

use crate::model::{AppState, Configuration};
use crate::service::post::{CachedPostService, InMemoryPostService, register_cache_rules};

/// Static route policies for paths the permission table does not cover
pub fn route_policies() -> RoutePolicies {
    RoutePolicies::new().route("/api/permissions/reload", POLICY_ADMIN)
}

/// Build the shared state. The permission table is loaded once here and
/// startup fails if the configured source cannot be read.
pub async fn build_state(configuration: Configuration) -> anyhow::Result<AppState> {
    let permissions = Arc::new(PermissionStore::new(configuration.auth_path_case_sensitive()));

    let permission_source: Option<Arc<dyn PermissionSource>> = configuration
        .permission_source()
        .map(|path| Arc::new(FilePermissionSource::new(path)) as Arc<dyn PermissionSource>);

    match &permission_source {
        Some(source) => {
            permissions
                .reload_from(source.as_ref())
                .await
                .with_context(|| format!("loading permission table from {}", source.describe()))?;
        }
        None => info!("No permission source configured, every unmapped path is governed by the unmapped policy"),
    }

    let requirement = configuration.permission_requirement(permissions.clone())?;
    info!("Authorization configured: {:?}", requirement);
    let pipeline = Arc::new(pipeline(&requirement));

    let cache_settings = configuration.cache_settings()?;
    let interceptor = Arc::new(register_cache_rules(
        CallInterceptor::from_settings(
            MokaCacheStore::shared(cache_settings.max_capacity),
            &cache_settings,
        ),
        cache_settings.rule(),
    ));
    info!(
        enabled = cache_settings.enabled,
        mode = %cache_settings.mode,
        ttl_secs = cache_settings.default_ttl.as_secs(),
        "Call interceptor configured"
    );

    let posts = Arc::new(CachedPostService::new(
        InMemoryPostService::new(),
        interceptor.clone(),
    ));

    Ok(AppState {
        configuration,
        pipeline,
        permissions,
        permission_source,
        interceptor,
        posts,
    })
}

fn pipeline(requirement: &PermissionRequirement) -> AuthorizationPipeline {
    AuthorizationPipeline::new(
        TokenValidator::from_requirement(requirement),
        Arc::new(PermissionEvaluator::from_requirement(
            requirement,
            PolicyRegistry::with_defaults(),
        )),
        route_policies(),
    )
}

/// Start periodic permission reloads when a source and an interval are configured
pub fn start_permission_reload(state: &AppState) -> Option<ReloadTask> {
    let interval = state.configuration.permission_reload_interval()?;
    let source = state.permission_source.clone()?;
    Some(state.permissions.clone().start_reload_task(source, interval))
}
