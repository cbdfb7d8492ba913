use assets::service::{DirectoryNode, FileEntry, FilePage, FileQuery};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query for `DELETE /assets`.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DeleteAssetQuery {
    /// Public URL, relative path or storage key of the asset.
    #[param(example = "/upload/image/user/7243124430342144.png")]
    pub path: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DirectoryQuery {
    /// Only return folders below this key prefix.
    #[param(example = "image")]
    pub prefix: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FileListQuery {
    /// Folder to list, e.g. `image/article`.
    pub prefix: Option<String>,
    /// Case-insensitive substring of the file name.
    pub keyword: Option<String>,
    /// Page number (1-based, default 1).
    #[param(example = 1)]
    pub page: Option<u64>,
    /// Items per page (default 20, max 100).
    #[param(example = 20)]
    pub page_size: Option<u64>,
}

impl From<FileListQuery> for FileQuery {
    fn from(q: FileListQuery) -> Self {
        Self {
            prefix: q.prefix,
            keyword: q.keyword,
            page: q.page,
            page_size: q.page_size,
        }
    }
}

/// A folder in the asset tree.
#[derive(Serialize, utoipa::ToSchema)]
pub struct DirectoryResponse {
    #[schema(example = "article")]
    pub name: String,
    /// Full key prefix, e.g. `image/article`.
    #[schema(example = "image/article")]
    pub prefix: String,
    #[schema(no_recursion)]
    pub children: Vec<DirectoryResponse>,
}

impl From<DirectoryNode> for DirectoryResponse {
    fn from(node: DirectoryNode) -> Self {
        Self {
            name: node.name,
            prefix: node.prefix,
            children: node.children.into_iter().map(Self::from).collect(),
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct FileResponse {
    #[schema(example = "7243124430342144.png")]
    pub name: String,
    #[schema(example = "image/article/7243124430342144.png")]
    pub key: String,
    #[schema(example = "/upload/image/article/7243124430342144.png")]
    pub url: String,
    /// Size in bytes.
    #[schema(example = 142857)]
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl From<FileEntry> for FileResponse {
    fn from(entry: FileEntry) -> Self {
        Self {
            name: entry.name,
            key: entry.key,
            url: entry.url,
            size: entry.size,
            last_modified: entry.last_modified,
        }
    }
}

/// One page of stored files, newest first.
#[derive(Serialize, utoipa::ToSchema)]
pub struct FileListResponse {
    /// Matching files across all pages.
    #[schema(example = 47)]
    pub total: u64,
    pub list: Vec<FileResponse>,
}

impl From<FilePage> for FileListResponse {
    fn from(page: FilePage) -> Self {
        Self {
            total: page.total,
            list: page.list.into_iter().map(FileResponse::from).collect(),
        }
    }
}
