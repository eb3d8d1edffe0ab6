// Authorization middleware for Actix-web
// Runs the authorization pipeline in front of every service in the wrapped
// scope. Rejected requests never reach a handler.

use actix_service::forward_ready;
use actix_utils::future::{Ready, ok};
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    web::Data,
};
use futures::future::LocalBoxFuture;
use titan_common::{ACCESS_TOKEN, AUTHORIZATION_HEADER, BEARER_PREFIX};

use crate::model::{AppState, response::ErrorResult};

pub struct Authorization;

impl<S, B> Transform<S, ServiceRequest> for Authorization
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthorizationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthorizationMiddleware { service })
    }
}

pub struct AuthorizationMiddleware<S> {
    service: S,
}

/// Extract the credential using 3 sources in priority order:
/// 1. `Authorization: Bearer <token>` header
/// 2. `accessToken` HTTP header
/// 3. `accessToken` query parameter
fn extract_token(req: &ServiceRequest) -> Option<String> {
    if let Some(header_val) = req.headers().get(AUTHORIZATION_HEADER)
        && let Ok(s) = header_val.to_str()
        && let Some(token) = s.trim().strip_prefix(BEARER_PREFIX)
    {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(header_val) = req.headers().get(ACCESS_TOKEN)
        && let Ok(s) = header_val.to_str()
    {
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=')
                && key == ACCESS_TOKEN
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }
    }

    None
}

impl<S, B> Service<ServiceRequest> for AuthorizationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let Some(app_state) = req.app_data::<Data<AppState>>().cloned() else {
            tracing::error!("AppState not found in request app_data");
            let response = HttpResponse::InternalServerError().finish();
            return Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) });
        };

        let token = extract_token(&req);
        // Percent-decoded path, the same one the router matches handlers on
        let path = req.match_info().as_str().to_string();

        match app_state.pipeline.authorize(token.as_deref(), &path) {
            Ok(authorized) => {
                let res = authorized.dispatch(|context| {
                    req.extensions_mut().insert(context);
                    self.service.call(req)
                });
                Box::pin(async move { res.await.map(ServiceResponse::map_into_left_body) })
            }
            Err(rejection) => {
                let response = ErrorResult::http_response(&rejection, &path);
                Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) })
            }
        }
    }
}
