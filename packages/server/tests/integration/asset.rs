use crate::common::fixtures::{JPEG, PNG};
use crate::common::{TestApp, routes};

async fn upload_one(app: &TestApp, bytes: &[u8], fields: &[(&str, &str)]) -> String {
    let res = app.upload(vec![("f", bytes.to_vec())], fields).await;
    assert_eq!(res.status, 201, "upload failed: {}", res.text);
    res.body["urls"][0].as_str().unwrap().to_string()
}

mod delete_asset {
    use super::*;

    #[tokio::test]
    async fn deletes_by_public_url() {
        let app = TestApp::spawn().await;
        let url = upload_one(&app, PNG, &[]).await;

        let res = app.delete(&format!("{}?path={url}", routes::ASSETS)).await;

        assert_eq!(res.status, 204, "{}", res.text);
        assert!(app.stored(&url).await.is_none());
    }

    #[tokio::test]
    async fn deletes_by_full_url_and_bare_key() {
        let app = TestApp::spawn().await;
        let first = upload_one(&app, PNG, &[]).await;
        let second = upload_one(&app, JPEG, &[]).await;

        let full = format!("/upload/{}", app.key_of(&first));
        let res = app.delete(&format!("{}?path={full}", routes::ASSETS)).await;
        assert_eq!(res.status, 204, "{}", res.text);

        let key = app.key_of(&second);
        let res = app.delete(&format!("{}?path={key}", routes::ASSETS)).await;
        assert_eq!(res.status, 204, "{}", res.text);
    }

    #[tokio::test]
    async fn missing_asset_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app
            .delete(&format!("{}?path=/upload/image/1.png", routes::ASSETS))
            .await;

        assert_eq!(res.status, 404);
        assert_eq!(res.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn outside_root_is_forbidden() {
        let app = TestApp::spawn().await;

        for path in ["/upload/../config.toml", "https://evil.example.com/image/a.png"] {
            let res = app
                .client
                .delete(app.url(routes::ASSETS))
                .query(&[("path", path)])
                .send()
                .await
                .unwrap();
            assert_eq!(res.status().as_u16(), 403, "path {path}");
        }
    }
}

mod browse {
    use super::*;

    #[tokio::test]
    async fn directories_form_a_tree() {
        let app = TestApp::spawn().await;
        upload_one(&app, PNG, &[("module", "user")]).await;
        upload_one(&app, PNG, &[("path", "gallery/2024")]).await;

        let res = app.get(routes::DIRECTORIES).await;

        assert_eq!(res.status, 200, "{}", res.text);
        let roots = res.body.as_array().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0]["name"], "image");
        let children: Vec<&str> = roots[0]["children"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(children, ["gallery", "user"]);
        assert_eq!(roots[0]["children"][0]["children"][0]["prefix"], "image/gallery/2024");
    }

    #[tokio::test]
    async fn files_are_paginated() {
        let app = TestApp::spawn().await;
        for _ in 0..3 {
            upload_one(&app, PNG, &[("module", "article")]).await;
        }
        upload_one(&app, JPEG, &[("module", "user")]).await;

        let res = app
            .get(&format!("{}?prefix=image/article&page=1&page_size=2", routes::FILES))
            .await;

        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["total"], 3);
        let list = res.body["list"].as_array().unwrap();
        assert_eq!(list.len(), 2);
        let first = &list[0];
        assert!(first["url"].as_str().unwrap().starts_with("/upload/image/article/"));
        assert_eq!(first["size"], PNG.len());

        let last = app
            .get(&format!("{}?prefix=image/article&page=2&page_size=2", routes::FILES))
            .await;
        assert_eq!(last.body["list"].as_array().unwrap().len(), 1);

        let beyond = app
            .get(&format!("{}?page={}&page_size=100", routes::FILES, u64::MAX))
            .await;
        assert_eq!(beyond.status, 200, "{}", beyond.text);
        assert_eq!(beyond.body["total"], 4);
        assert!(beyond.body["list"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn keyword_filters_file_names() {
        let app = TestApp::spawn().await;
        upload_one(&app, PNG, &[]).await;
        upload_one(&app, JPEG, &[]).await;

        let res = app.get(&format!("{}?keyword=.JPG", routes::FILES)).await;

        assert_eq!(res.body["total"], 1);
        assert!(res.body["list"][0]["name"].as_str().unwrap().ends_with(".jpg"));
    }

    #[tokio::test]
    async fn invalid_prefix_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.get(&format!("{}?prefix=../secret", routes::FILES)).await;

        assert_eq!(res.status, 400);
    }
}

mod serve {
    use super::*;

    #[tokio::test]
    async fn streams_with_sniffed_type_and_etag() {
        let app = TestApp::spawn().await;
        let url = upload_one(&app, JPEG, &[]).await;

        let res = app.client.get(app.url(&url)).send().await.unwrap();

        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(res.headers()["content-type"], "image/jpeg");
        let etag = res.headers()["etag"].to_str().unwrap().to_string();
        assert!(res.headers().contains_key("cache-control"));
        assert_eq!(res.bytes().await.unwrap().as_ref(), JPEG);

        let cached = app
            .client
            .get(app.url(&url))
            .header("If-None-Match", etag)
            .send()
            .await
            .unwrap();
        assert_eq!(cached.status().as_u16(), 304);
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let app = TestApp::spawn().await;

        let res = app.get("/upload/image/42.png").await;

        assert_eq!(res.status, 404);
    }
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = TestApp::spawn().await;

    let res = app.get(routes::OPENAPI).await;

    assert_eq!(res.status, 200);
    let paths = res.body["paths"].as_object().unwrap();
    assert!(paths.keys().any(|p| p.starts_with("/api/v1/uploads")));
    assert!(paths.contains_key("/api/v1/assets/files"));
}
