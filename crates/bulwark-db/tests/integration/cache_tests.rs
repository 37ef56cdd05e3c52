use bulwark_core::models::{CachedImage, ExtractionResult, ExtractionStatus};
use bulwark_core::testutil::make_test_entry;
use bulwark_core::traits::CacheStore;
use bulwark_db::{Database, ImageCacheRepository, ReaderCacheRepository};

use crate::common::setup_test_db;

const URL: &str = "https://news.example/story";

#[tokio::test]
async fn reader_entry_round_trips() {
    let (pool, _container) = setup_test_db().await;
    let repo = ReaderCacheRepository::new(pool);

    assert!(repo.get(URL).await.unwrap().is_none());

    let entry = make_test_entry(ExtractionStatus::Success);
    CacheStore::set(&repo, URL, &entry).await.unwrap();

    let cached = CacheStore::<ExtractionResult>::get(&repo, URL)
        .await
        .unwrap()
        .expect("entry should be cached");
    assert_eq!(cached.title, entry.title);
    assert_eq!(cached.paragraphs, entry.paragraphs);
    assert_eq!(cached.status, ExtractionStatus::Success);
    assert!(repo.updated_at(URL).await.unwrap().is_some());
}

#[tokio::test]
async fn reader_upsert_is_last_write_wins() {
    let (pool, _container) = setup_test_db().await;
    let repo = ReaderCacheRepository::new(pool.clone());

    repo.upsert(URL, &ExtractionResult::error(URL, "HTTP 500"))
        .await
        .unwrap();
    repo.upsert(URL, &make_test_entry(ExtractionStatus::Fallback))
        .await
        .unwrap();

    let cached = repo.get(URL).await.unwrap().unwrap();
    assert_eq!(cached.status, ExtractionStatus::Fallback);

    let (rows, status): (i64, String) =
        sqlx::query_as("SELECT COUNT(*), MAX(status) FROM reader_cache")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(rows, 1);
    assert_eq!(status, "fallback");
}

#[tokio::test]
async fn image_round_trips_and_overwrites() {
    let (pool, _container) = setup_test_db().await;
    let repo = ImageCacheRepository::new(pool);
    let url = "https://img.example/a.png";

    let first = CachedImage {
        bytes: vec![0x89, b'P', b'N', b'G'],
        content_type: "image/png".into(),
        cache_control: "public, max-age=60".into(),
    };
    repo.upsert(url, &first).await.unwrap();
    assert_eq!(repo.get(url).await.unwrap(), Some(first));

    let second = CachedImage {
        bytes: vec![0xff, 0xd8, 0xff],
        content_type: "image/jpeg".into(),
        cache_control: "public, max-age=3600".into(),
    };
    CacheStore::set(&repo, url, &second).await.unwrap();
    assert_eq!(repo.get(url).await.unwrap(), Some(second));
}

#[tokio::test]
async fn health_check_and_repeat_migration_succeed() {
    let (pool, _container) = setup_test_db().await;
    let db = Database::from_pool(pool);

    db.health_check().await.unwrap();
    db.migrate().await.unwrap();
}
