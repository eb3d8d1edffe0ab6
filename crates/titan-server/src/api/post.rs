use actix_web::{HttpResponse, delete, get, post, web};

use titan_auth::AuthContext;

use crate::error::AppError;
use crate::model::{AppState, response::Result};
use crate::service::post::{NewPost, PageQuery, Post};

#[get("/posts")]
pub async fn list_posts(
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> std::result::Result<HttpResponse, AppError> {
    let posts = data.posts.list_posts(query.into_inner()).await?;
    Ok(Result::<Vec<Post>>::http_success(posts))
}

#[get("/posts/{id}")]
pub async fn get_post(
    data: web::Data<AppState>,
    id: web::Path<u64>,
) -> std::result::Result<HttpResponse, AppError> {
    let post = data.posts.get_post(id.into_inner()).await?;
    Ok(Result::<Post>::http_success(post))
}

#[post("/posts")]
pub async fn create_post(
    data: web::Data<AppState>,
    auth: web::ReqData<AuthContext>,
    body: web::Json<NewPost>,
) -> std::result::Result<HttpResponse, AppError> {
    let post = data
        .posts
        .create_post(auth.username(), body.into_inner())
        .await?;
    Ok(Result::<Post>::http_success(post))
}

#[delete("/posts/{id}")]
pub async fn delete_post(
    data: web::Data<AppState>,
    id: web::Path<u64>,
) -> std::result::Result<HttpResponse, AppError> {
    data.posts.delete_post(id.into_inner()).await?;
    Ok(Result::<bool>::http_success(true))
}
