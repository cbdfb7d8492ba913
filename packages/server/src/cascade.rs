//! Entity writes that own stored assets.
//!
//! Every helper performs its database writes in one transaction, commits,
//! and only then hands the references it dropped to [`AssetLifecycle`].
//! The returned handle resolves once the background deletes finish; callers
//! that don't care may drop it.

use std::borrow::Cow;
use std::collections::HashMap;

use assets::lifecycle::{self, AssetLifecycle, EntityNode, ReleaseReport};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::entity::{article, comment, reply, user};
use crate::error::AppError;

/// Media columns of an article to overwrite. `None` leaves a column as is;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct ArticleMedia {
    pub content: Option<String>,
    pub cover: Option<Option<String>>,
    pub video: Option<Option<String>>,
}

/// Rows touched by a public-prefix migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteReport {
    pub users: u64,
    pub articles: u64,
    pub comments: u64,
    pub replies: u64,
}

impl RewriteReport {
    pub fn total(&self) -> u64 {
        self.users + self.articles + self.comments + self.replies
    }
}

fn article_node(article: &article::Model) -> EntityNode {
    EntityNode::new()
        .with_field(article.cover.clone())
        .with_field(article.video.clone())
        .with_content(article.content.clone())
}

fn reply_node(reply: &reply::Model) -> EntityNode {
    EntityNode::new().with_content(reply.content.clone())
}

fn comment_node(comment: &comment::Model, replies: &[reply::Model]) -> EntityNode {
    replies.iter().fold(
        EntityNode::new().with_content(comment.content.clone()),
        |node, r| node.with_child(reply_node(r)),
    )
}

async fn replies_of<C: ConnectionTrait>(
    db: &C,
    comment_ids: &[i64],
) -> Result<HashMap<i64, Vec<reply::Model>>, AppError> {
    if comment_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let replies = reply::Entity::find()
        .filter(reply::Column::CommentId.is_in(comment_ids.iter().copied()))
        .all(db)
        .await?;

    let mut grouped: HashMap<i64, Vec<reply::Model>> = HashMap::new();
    for r in replies {
        grouped.entry(r.comment_id).or_default().push(r);
    }
    Ok(grouped)
}

/// Delete an article with its comments and replies, then release every
/// asset the removed rows referenced.
#[instrument(skip(db, lifecycle))]
pub async fn delete_article(
    db: &DatabaseConnection,
    lifecycle: &AssetLifecycle,
    id: i64,
) -> Result<JoinHandle<ReleaseReport>, AppError> {
    let txn = db.begin().await?;

    let article = article::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Article {id} not found")))?;
    let comments = comment::Entity::find()
        .filter(comment::Column::ArticleId.eq(id))
        .all(&txn)
        .await?;
    let comment_ids: Vec<i64> = comments.iter().map(|c| c.id).collect();
    let replies = replies_of(&txn, &comment_ids).await?;

    let tree = comments.iter().fold(article_node(&article), |node, c| {
        let children = replies.get(&c.id).map(Vec::as_slice).unwrap_or_default();
        node.with_child(comment_node(c, children))
    });

    if !comment_ids.is_empty() {
        reply::Entity::delete_many()
            .filter(reply::Column::CommentId.is_in(comment_ids.iter().copied()))
            .exec(&txn)
            .await?;
    }
    comment::Entity::delete_many()
        .filter(comment::Column::ArticleId.eq(id))
        .exec(&txn)
        .await?;
    article::Entity::delete_by_id(id).exec(&txn).await?;

    txn.commit().await?;

    info!(
        article_id = id,
        comments = comments.len(),
        "Deleted article"
    );
    Ok(lifecycle.release_tree(&tree))
}

/// Delete a comment with its replies, then release their embedded assets.
#[instrument(skip(db, lifecycle))]
pub async fn delete_comment(
    db: &DatabaseConnection,
    lifecycle: &AssetLifecycle,
    id: i64,
) -> Result<JoinHandle<ReleaseReport>, AppError> {
    let txn = db.begin().await?;

    let comment = comment::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Comment {id} not found")))?;
    let replies = replies_of(&txn, &[id]).await?;
    let tree = comment_node(
        &comment,
        replies.get(&id).map(Vec::as_slice).unwrap_or_default(),
    );

    reply::Entity::delete_many()
        .filter(reply::Column::CommentId.eq(id))
        .exec(&txn)
        .await?;
    comment::Entity::delete_by_id(id).exec(&txn).await?;

    txn.commit().await?;

    info!(comment_id = id, "Deleted comment");
    Ok(lifecycle.release_tree(&tree))
}

/// Point a user at a new avatar and release the previous one unless it is
/// unchanged or a protected default.
#[instrument(skip(db, lifecycle))]
pub async fn replace_avatar(
    db: &DatabaseConnection,
    lifecycle: &AssetLifecycle,
    user_id: i64,
    avatar: Option<String>,
) -> Result<(user::Model, JoinHandle<ReleaseReport>), AppError> {
    let txn = db.begin().await?;

    let existing = user::Entity::find_by_id(user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))?;
    let previous = existing.avatar.clone();

    let mut active: user::ActiveModel = existing.into();
    active.avatar = Set(avatar.clone());
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    let handle = lifecycle.release_replaced(previous.as_deref(), avatar.as_deref());
    Ok((updated, handle))
}

/// Overwrite an article's media columns and release whatever the updated
/// row no longer references in any column.
#[instrument(skip(db, lifecycle, media))]
pub async fn update_article_media(
    db: &DatabaseConnection,
    lifecycle: &AssetLifecycle,
    id: i64,
    media: ArticleMedia,
) -> Result<(article::Model, JoinHandle<ReleaseReport>), AppError> {
    let txn = db.begin().await?;

    let existing = article::Entity::find_by_id(id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Article {id} not found")))?;

    let mut dropped = Vec::new();
    if let Some(content) = &media.content {
        dropped.extend(lifecycle.dropped_from_content(&existing.content, content));
    }
    if let Some(cover) = &media.cover {
        dropped.extend(lifecycle.replaced(existing.cover.as_deref(), cover.as_deref()));
    }
    if let Some(video) = &media.video {
        dropped.extend(lifecycle.replaced(existing.video.as_deref(), video.as_deref()));
    }

    let mut active: article::ActiveModel = existing.into();
    if let Some(content) = media.content {
        active.content = Set(content);
    }
    if let Some(cover) = media.cover {
        active.cover = Set(cover);
    }
    if let Some(video) = media.video {
        active.video = Set(video);
    }
    active.updated_at = Set(Utc::now());
    let updated = active.update(&txn).await?;

    txn.commit().await?;

    let dropped = lifecycle.unreferenced(dropped, &article_node(&updated));
    Ok((updated, lifecycle.spawn_release(dropped)))
}

fn rewrite_field(value: &Option<String>, from: &str, to: &str) -> Option<String> {
    let rest = value.as_deref()?.strip_prefix(from)?;
    Some(format!("{to}{rest}"))
}

/// Move every stored reference from the `from` public prefix to `to`:
/// image links inside content plus the single-asset columns.
#[instrument(skip(db))]
pub async fn rewrite_asset_prefix(
    db: &DatabaseConnection,
    from: &str,
    to: &str,
) -> Result<RewriteReport, AppError> {
    if from.is_empty() {
        return Err(AppError::Validation("Source prefix must not be empty".into()));
    }

    let txn = db.begin().await?;
    let mut report = RewriteReport::default();

    for u in user::Entity::find().all(&txn).await? {
        if let Some(avatar) = rewrite_field(&u.avatar, from, to) {
            let mut active: user::ActiveModel = u.into();
            active.avatar = Set(Some(avatar));
            active.update(&txn).await?;
            report.users += 1;
        }
    }

    for a in article::Entity::find().all(&txn).await? {
        let content = lifecycle::rewrite_asset_prefix(&a.content, from, to).into_owned();
        let cover = rewrite_field(&a.cover, from, to);
        let video = rewrite_field(&a.video, from, to);
        if content == a.content && cover.is_none() && video.is_none() {
            continue;
        }
        let mut active: article::ActiveModel = a.into();
        active.content = Set(content);
        if cover.is_some() {
            active.cover = Set(cover);
        }
        if video.is_some() {
            active.video = Set(video);
        }
        active.update(&txn).await?;
        report.articles += 1;
    }

    for c in comment::Entity::find().all(&txn).await? {
        let Cow::Owned(content) = lifecycle::rewrite_asset_prefix(&c.content, from, to)
        else {
            continue;
        };
        if content == c.content {
            continue;
        }
        let mut active: comment::ActiveModel = c.into();
        active.content = Set(content);
        active.update(&txn).await?;
        report.comments += 1;
    }

    for r in reply::Entity::find().all(&txn).await? {
        let Cow::Owned(content) = lifecycle::rewrite_asset_prefix(&r.content, from, to)
        else {
            continue;
        };
        if content == r.content {
            continue;
        }
        let mut active: reply::ActiveModel = r.into();
        active.content = Set(content);
        active.update(&txn).await?;
        report.replies += 1;
    }

    txn.commit().await?;

    info!(
        from,
        to,
        rows = report.total(),
        "Rewrote asset prefix"
    );
    Ok(report)
}
