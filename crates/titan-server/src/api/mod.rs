//! HTTP routes
//!
//! Everything under `/api` is wrapped by the authorization middleware except
//! the denied landing page, which is registered ahead of the scope.

use actix_web::web;

use crate::middleware::auth::Authorization;

pub mod health;
pub mod permission;
pub mod post;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health).service(health::denied).service(
        web::scope("/api")
            .wrap(Authorization)
            .service(post::list_posts)
            .service(post::create_post)
            .service(post::get_post)
            .service(post::delete_post)
            .service(permission::reload),
    );
}
