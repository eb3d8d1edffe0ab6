//! Application state shared across all handlers

use std::sync::Arc;

use titan_auth::service::permission::{PermissionSource, PermissionStore};
use titan_auth::service::pipeline::AuthorizationPipeline;
use titan_cache::CallInterceptor;

use super::config::Configuration;
use crate::service::post::PostService;

pub struct AppState {
    pub configuration: Configuration,
    pub pipeline: Arc<AuthorizationPipeline>,
    pub permissions: Arc<PermissionStore>,
    /// Where reloads read the permission table from, if anywhere
    pub permission_source: Option<Arc<dyn PermissionSource>>,
    pub interceptor: Arc<CallInterceptor>,
    pub posts: Arc<dyn PostService>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("configuration", &self.configuration)
            .field("permissions", &self.permissions)
            .field(
                "permission_source",
                &self.permission_source.as_ref().map(|s| s.describe()),
            )
            .finish_non_exhaustive()
    }
}
