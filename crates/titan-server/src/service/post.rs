//! Blog post service
//!
//! [`InMemoryPostService`] holds the posts; [`CachedPostService`] wraps any
//! [`PostService`] so reads go through the call interceptor and writes evict
//! what they made stale.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use titan_cache::{CacheRule, CallInterceptor};
use titan_common::TitanError;
use tracing::{debug, warn};

pub const OP_GET_POST: &str = "getPost";
pub const OP_LIST_POSTS: &str = "listPosts";

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    20
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_size(),
        }
    }
}

#[async_trait]
pub trait PostService: Send + Sync {
    async fn get_post(&self, id: u64) -> Result<Post, TitanError>;

    async fn list_posts(&self, page: PageQuery) -> Result<Vec<Post>, TitanError>;

    async fn create_post(&self, author: &str, post: NewPost) -> Result<Post, TitanError>;

    async fn delete_post(&self, id: u64) -> Result<(), TitanError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPostService {
    posts: RwLock<BTreeMap<u64, Post>>,
    next_id: AtomicU64,
}

impl InMemoryPostService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostService for InMemoryPostService {
    async fn get_post(&self, id: u64) -> Result<Post, TitanError> {
        self.posts
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| TitanError::NotFound(format!("post {}", id)))
    }

    async fn list_posts(&self, page: PageQuery) -> Result<Vec<Post>, TitanError> {
        if page.page == 0 || page.size == 0 || page.size > MAX_PAGE_SIZE {
            return Err(TitanError::IllegalArgument(format!(
                "page must be >= 1 and size within 1..={}",
                MAX_PAGE_SIZE
            )));
        }

        // Widened so a huge page number lands past the end instead of wrapping
        let skip = u64::from(page.page - 1) * u64::from(page.size);
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        Ok(self
            .posts
            .read()
            .values()
            .skip(skip)
            .take(page.size as usize)
            .cloned()
            .collect())
    }

    async fn create_post(&self, author: &str, post: NewPost) -> Result<Post, TitanError> {
        if post.title.trim().is_empty() {
            return Err(TitanError::IllegalArgument("title must not be blank".to_string()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = Post {
            id,
            title: post.title,
            body: post.body,
            author: author.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        self.posts.write().insert(id, created.clone());
        debug!(id, author = %author, "Post created");
        Ok(created)
    }

    async fn delete_post(&self, id: u64) -> Result<(), TitanError> {
        match self.posts.write().remove(&id) {
            Some(_) => Ok(()),
            None => Err(TitanError::NotFound(format!("post {}", id))),
        }
    }
}

/// Register the read operations [`CachedPostService`] routes through the cache
pub fn register_cache_rules(interceptor: CallInterceptor, rule: CacheRule) -> CallInterceptor {
    interceptor
        .register(OP_GET_POST, rule)
        .register(OP_LIST_POSTS, rule)
}

/// Caching decorator over any [`PostService`]
pub struct CachedPostService<S> {
    inner: S,
    interceptor: Arc<CallInterceptor>,
}

impl<S: PostService> CachedPostService<S> {
    pub fn new(inner: S, interceptor: Arc<CallInterceptor>) -> Self {
        Self { inner, interceptor }
    }

    async fn evict_lists(&self) {
        let removed = self.interceptor.invalidate_operation(OP_LIST_POSTS).await;
        debug!(removed, "Evicted cached post listings");
    }
}

#[async_trait]
impl<S: PostService> PostService for CachedPostService<S> {
    async fn get_post(&self, id: u64) -> Result<Post, TitanError> {
        self.interceptor
            .call(OP_GET_POST, &id, || self.inner.get_post(id))
            .await
    }

    async fn list_posts(&self, page: PageQuery) -> Result<Vec<Post>, TitanError> {
        self.interceptor
            .call(OP_LIST_POSTS, &page, || self.inner.list_posts(page))
            .await
    }

    async fn create_post(&self, author: &str, post: NewPost) -> Result<Post, TitanError> {
        let created = self.inner.create_post(author, post).await?;
        self.evict_lists().await;
        Ok(created)
    }

    async fn delete_post(&self, id: u64) -> Result<(), TitanError> {
        self.inner.delete_post(id).await?;
        if let Err(e) = self.interceptor.invalidate_key(OP_GET_POST, &id).await {
            warn!("Failed to evict cached post {}: {}", id, e);
        }
        self.evict_lists().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use titan_cache::MokaCacheStore;

    use super::*;

    /// Counts calls reaching the wrapped service
    #[derive(Default)]
    struct CountingPostService {
        inner: InMemoryPostService,
        gets: AtomicUsize,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl PostService for Arc<CountingPostService> {
        async fn get_post(&self, id: u64) -> Result<Post, TitanError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.get_post(id).await
        }

        async fn list_posts(&self, page: PageQuery) -> Result<Vec<Post>, TitanError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list_posts(page).await
        }

        async fn create_post(&self, author: &str, post: NewPost) -> Result<Post, TitanError> {
            self.inner.create_post(author, post).await
        }

        async fn delete_post(&self, id: u64) -> Result<(), TitanError> {
            self.inner.delete_post(id).await
        }
    }

    fn new_post(title: &str) -> NewPost {
        NewPost {
            title: title.to_string(),
            body: "body".to_string(),
        }
    }

    fn cached() -> (Arc<CachedPostService<Arc<CountingPostService>>>, Arc<CountingPostService>) {
        let counting = Arc::new(CountingPostService::default());
        let interceptor = register_cache_rules(
            CallInterceptor::new(MokaCacheStore::shared(100)),
            CacheRule::new(Duration::from_secs(60)),
        );
        (
            Arc::new(CachedPostService::new(counting.clone(), Arc::new(interceptor))),
            counting,
        )
    }

    #[tokio::test]
    async fn test_in_memory_crud() {
        let service = InMemoryPostService::new();
        let created = service.create_post("alice", new_post("hello")).await.unwrap();
        assert_eq!(created.id, 1);
        assert_eq!(created.author, "alice");

        assert_eq!(service.get_post(1).await.unwrap(), created);
        assert_eq!(service.list_posts(PageQuery::default()).await.unwrap().len(), 1);

        service.delete_post(1).await.unwrap();
        assert!(matches!(service.get_post(1).await, Err(TitanError::NotFound(_))));
        assert!(service.delete_post(1).await.is_err());
    }

    #[tokio::test]
    async fn test_validation() {
        let service = InMemoryPostService::new();
        assert!(matches!(
            service.create_post("alice", new_post("  ")).await,
            Err(TitanError::IllegalArgument(_))
        ));
        assert!(
            service
                .list_posts(PageQuery { page: 0, size: 10 })
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_paging() {
        let service = InMemoryPostService::new();
        for i in 0..5 {
            service.create_post("alice", new_post(&format!("p{}", i))).await.unwrap();
        }
        let page = service.list_posts(PageQuery { page: 2, size: 2 }).await.unwrap();
        let ids: Vec<u64> = page.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_page_far_past_the_end_is_empty() {
        let service = InMemoryPostService::new();
        service.create_post("alice", new_post("only")).await.unwrap();

        let page = service
            .list_posts(PageQuery {
                page: 50_000_000,
                size: 100,
            })
            .await
            .unwrap();
        assert!(page.is_empty());

        let page = service
            .list_posts(PageQuery {
                page: u32::MAX,
                size: MAX_PAGE_SIZE,
            })
            .await
            .unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_cached_get_hits_inner_once() {
        let (service, counting) = cached();
        let created = service.create_post("alice", new_post("hello")).await.unwrap();

        let first = service.get_post(created.id).await.unwrap();
        let second = service.get_post(created.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(counting.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_get_post_invokes_once() {
        let (service, counting) = cached();
        for i in 0..5 {
            service.create_post("alice", new_post(&format!("p{}", i))).await.unwrap();
        }

        let a = tokio::spawn({
            let service = service.clone();
            async move { service.get_post(5).await }
        });
        let b = tokio::spawn({
            let service = service.clone();
            async move { service.get_post(5).await }
        });

        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a, b);
        assert_eq!(counting.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_during_read_is_not_served_from_cache() {
        let (service, counting) = cached();
        service.create_post("alice", new_post("doomed")).await.unwrap();

        let read = tokio::spawn({
            let service = service.clone();
            async move { service.get_post(1).await }
        });
        while counting.gets.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        service.delete_post(1).await.unwrap();
        assert_eq!(read.await.unwrap().unwrap().id, 1);

        assert!(matches!(service.get_post(1).await, Err(TitanError::NotFound(_))));
        assert_eq!(counting.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_post_is_not_cached() {
        let (service, counting) = cached();
        assert!(service.get_post(9).await.is_err());
        assert!(service.get_post(9).await.is_err());
        assert_eq!(counting.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_writes_evict_stale_reads() {
        let (service, counting) = cached();
        service.create_post("alice", new_post("one")).await.unwrap();

        assert_eq!(service.list_posts(PageQuery::default()).await.unwrap().len(), 1);
        assert_eq!(service.list_posts(PageQuery::default()).await.unwrap().len(), 1);
        assert_eq!(counting.lists.load(Ordering::SeqCst), 1);

        service.create_post("alice", new_post("two")).await.unwrap();
        assert_eq!(service.list_posts(PageQuery::default()).await.unwrap().len(), 2);
        assert_eq!(counting.lists.load(Ordering::SeqCst), 2);

        service.get_post(1).await.unwrap();
        service.delete_post(1).await.unwrap();
        assert!(service.get_post(1).await.is_err());
        assert_eq!(service.list_posts(PageQuery::default()).await.unwrap().len(), 1);
    }
}
