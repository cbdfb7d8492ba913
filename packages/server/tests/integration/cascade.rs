use std::sync::Arc;

use assets::{AssetLifecycle, ReleaseReport};
use assets::config::AssetConfig;
use assets::resolve::AssetLocator;
use assets::storage::{FilesystemObjectStore, ObjectStore};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use tempfile::TempDir;

use server::cascade::{self, ArticleMedia};
use server::config::DatabaseConfig;
use server::entity::{article, comment, reply, user};

use crate::common::fixtures::PNG;

struct Fixture {
    db: DatabaseConnection,
    store: Arc<dyn ObjectStore>,
    lifecycle: AssetLifecycle,
    _dir: TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> = Arc::new(
            FilesystemObjectStore::new(dir.path().join("store"), 1024 * 1024)
                .await
                .unwrap(),
        );
        let config = AssetConfig::default();
        let lifecycle = AssetLifecycle::new(
            store.clone(),
            AssetLocator::new(&config.public_prefix, &config.root),
            &config.protected,
        );

        let mut db_config = DatabaseConfig::new("sqlite::memory:");
        db_config.max_connections = 1;
        let db = server::database::init_db(&db_config).await.unwrap();

        Self {
            db,
            store,
            lifecycle,
            _dir: dir,
        }
    }

    /// Store a placeholder object and return its public URL.
    async fn object(&self, key: &str) -> String {
        self.store.put(key, PNG, "image/png").await.unwrap();
        format!("/upload/{key}")
    }

    async fn exists(&self, key: &str) -> bool {
        self.store.head(key).await.is_ok()
    }

    async fn user(&self, id: i64, avatar: Option<String>) {
        user::ActiveModel {
            id: Set(id),
            username: Set(format!("user{id}")),
            avatar: Set(avatar),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();
    }

    async fn article(&self, id: i64, content: &str, cover: Option<String>, video: Option<String>) {
        self.user(id * 100, None).await;
        article::ActiveModel {
            id: Set(id),
            title: Set(format!("Article {id}")),
            content: Set(content.to_string()),
            cover: Set(cover),
            video: Set(video),
            author_id: Set(id * 100),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();
    }

    async fn comment(&self, id: i64, article_id: i64, content: &str) {
        comment::ActiveModel {
            id: Set(id),
            content: Set(content.to_string()),
            article_id: Set(article_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();
    }

    async fn reply(&self, id: i64, comment_id: i64, content: &str) {
        reply::ActiveModel {
            id: Set(id),
            content: Set(content.to_string()),
            comment_id: Set(comment_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn deleting_article_releases_exactly_its_assets() {
    let fx = Fixture::new().await;
    let first = fx.object("image/article/1.png").await;
    let second = fx.object("image/article/2.png").await;
    let comment_image = fx.object("image/comment/3.png").await;
    fx.object("image/article/4.png").await;

    fx.article(
        1,
        &format!(
            "Intro ![chart]({first}) ![map]({second} \"Map\") ![ext](https://cdn.example.com/x.png)"
        ),
        None,
        None,
    )
    .await;
    fx.comment(10, 1, &format!("Look ![c]({comment_image})")).await;
    fx.reply(100, 10, &format!("Same one ![again]({first})")).await;

    let report = cascade::delete_article(&fx.db, &fx.lifecycle, 1)
        .await
        .unwrap()
        .await
        .unwrap();

    assert_eq!(report.deleted, 3);
    assert_eq!(report.failed, 0);
    assert!(!fx.exists("image/article/1.png").await);
    assert!(!fx.exists("image/article/2.png").await);
    assert!(!fx.exists("image/comment/3.png").await);
    assert!(fx.exists("image/article/4.png").await);

    assert!(article::Entity::find_by_id(1).one(&fx.db).await.unwrap().is_none());
    assert!(comment::Entity::find_by_id(10).one(&fx.db).await.unwrap().is_none());
    assert!(reply::Entity::find_by_id(100).one(&fx.db).await.unwrap().is_none());
}

#[tokio::test]
async fn deleting_missing_article_is_not_found() {
    let fx = Fixture::new().await;

    let err = cascade::delete_article(&fx.db, &fx.lifecycle, 99).await.unwrap_err();

    assert!(matches!(err, server::error::AppError::NotFound(_)));
}

#[tokio::test]
async fn deleting_comment_keeps_article_assets() {
    let fx = Fixture::new().await;
    let cover = fx.object("image/article/1.png").await;
    let comment_image = fx.object("image/comment/2.png").await;
    fx.article(1, "", Some(cover), None).await;
    fx.comment(10, 1, &format!("![c]({comment_image})")).await;
    fx.reply(100, 10, "plain").await;

    let report = cascade::delete_comment(&fx.db, &fx.lifecycle, 10)
        .await
        .unwrap()
        .await
        .unwrap();

    assert_eq!(report.deleted, 1);
    assert!(fx.exists("image/article/1.png").await);
    assert!(!fx.exists("image/comment/2.png").await);
    assert!(reply::Entity::find_by_id(100).one(&fx.db).await.unwrap().is_none());
}

#[tokio::test]
async fn replacing_avatar_releases_only_the_old_one() {
    let fx = Fixture::new().await;
    let old = fx.object("image/user/1.png").await;
    let new = fx.object("image/user/2.png").await;
    fx.user(1, Some(old)).await;

    let (updated, release) = cascade::replace_avatar(&fx.db, &fx.lifecycle, 1, Some(new.clone()))
        .await
        .unwrap();
    let report = release.await.unwrap();

    assert_eq!(updated.avatar, Some(new));
    assert_eq!(report.deleted, 1);
    assert!(!fx.exists("image/user/1.png").await);
    assert!(fx.exists("image/user/2.png").await);
}

#[tokio::test]
async fn protected_default_avatar_is_never_released() {
    let fx = Fixture::new().await;
    let default_avatar = fx.object("image/avatar.png").await;
    let new = fx.object("image/user/2.png").await;
    fx.user(1, Some(default_avatar)).await;

    let (_, release) = cascade::replace_avatar(&fx.db, &fx.lifecycle, 1, Some(new))
        .await
        .unwrap();

    assert_eq!(release.await.unwrap().deleted, 0);
    assert!(fx.exists("image/avatar.png").await);
}

#[tokio::test]
async fn updating_media_releases_dropped_references() {
    let fx = Fixture::new().await;
    let kept = fx.object("image/article/1.png").await;
    let dropped = fx.object("image/article/2.png").await;
    let old_cover = fx.object("image/article/3.png").await;
    let video = fx.object("video/article/4.mp4").await;
    fx.article(
        1,
        &format!("![a]({kept}) ![b]({dropped})"),
        Some(old_cover),
        Some(video.clone()),
    )
    .await;

    let media = ArticleMedia {
        content: Some(format!("only ![a]({kept})")),
        cover: Some(None),
        video: None,
    };
    let (updated, release) = cascade::update_article_media(&fx.db, &fx.lifecycle, 1, media)
        .await
        .unwrap();
    let report = release.await.unwrap();

    assert_eq!(report.deleted, 2);
    assert_eq!(updated.cover, None);
    assert_eq!(updated.video, Some(video));
    assert!(fx.exists("image/article/1.png").await);
    assert!(!fx.exists("image/article/2.png").await);
    assert!(!fx.exists("image/article/3.png").await);
    assert!(fx.exists("video/article/4.mp4").await);
}

#[tokio::test]
async fn moving_assets_between_columns_keeps_them() {
    let fx = Fixture::new().await;
    let inline = fx.object("image/article/9.png").await;
    let old_cover = fx.object("image/article/10.png").await;
    fx.article(1, &format!("![a]({inline})"), Some(old_cover.clone()), None)
        .await;

    let media = ArticleMedia {
        content: Some(format!("text only, old cover inline ![c]({old_cover})")),
        cover: Some(Some(inline.clone())),
        video: None,
    };
    let (updated, release) = cascade::update_article_media(&fx.db, &fx.lifecycle, 1, media)
        .await
        .unwrap();
    let report = release.await.unwrap();

    assert_eq!(report, ReleaseReport::default());
    assert_eq!(updated.cover, Some(inline));
    assert!(fx.exists("image/article/9.png").await);
    assert!(fx.exists("image/article/10.png").await);
}

#[tokio::test]
async fn rewriting_prefix_updates_links_and_columns() {
    let fx = Fixture::new().await;
    fx.user(1, Some("/upload/image/user/1.png".into())).await;
    fx.article(
        2,
        "![a](/upload/image/article/1.png) and [link](/upload/doc.pdf)",
        Some("/upload/image/article/2.png".into()),
        None,
    )
    .await;
    fx.comment(10, 2, "no links").await;
    fx.reply(100, 10, "![r](/upload/image/comment/3.png)").await;

    let report = cascade::rewrite_asset_prefix(&fx.db, "/upload/", "https://cdn.example.com/upload/")
        .await
        .unwrap();

    assert_eq!(report.users, 1);
    assert_eq!(report.articles, 1);
    assert_eq!(report.comments, 0);
    assert_eq!(report.replies, 1);

    let a = article::Entity::find_by_id(2).one(&fx.db).await.unwrap().unwrap();
    assert_eq!(
        a.content,
        "![a](https://cdn.example.com/upload/image/article/1.png) and [link](/upload/doc.pdf)"
    );
    assert_eq!(a.cover.as_deref(), Some("https://cdn.example.com/upload/image/article/2.png"));
    let u = user::Entity::find_by_id(1).one(&fx.db).await.unwrap().unwrap();
    assert_eq!(u.avatar.as_deref(), Some("https://cdn.example.com/upload/image/user/1.png"));
}
