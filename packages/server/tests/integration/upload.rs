use crate::common::fixtures::{ELF, JPEG, PNG, jpeg_of_len};
use crate::common::{TestApp, md5_hex, routes};

mod direct_upload {
    use super::*;

    #[tokio::test]
    async fn stores_file_under_sniffed_kind() {
        let app = TestApp::spawn().await;

        let res = app.upload(vec![("photo.png", PNG.to_vec())], &[]).await;

        assert_eq!(res.status, 201, "{}", res.text);
        let url = res.body["urls"][0].as_str().unwrap();
        assert!(url.starts_with("/upload/image/"), "{url}");
        assert!(url.ends_with(".png"));
        assert_eq!(app.stored(url).await.unwrap(), PNG);
    }

    #[tokio::test]
    async fn spooled_files_are_removed_from_scratch_root() {
        let app = TestApp::spawn().await;

        let res = app.upload(vec![("a", PNG.to_vec()), ("b", ELF.to_vec())], &[]).await;
        assert_eq!(res.status, 415, "{}", res.text);
        let res = app.upload(vec![("c", PNG.to_vec())], &[]).await;
        assert_eq!(res.status, 201, "{}", res.text);

        let scratch = &app.state.config.upload.temp_dir;
        for _ in 0..50 {
            let leftovers = std::fs::read_dir(scratch)
                .map(|entries| entries.count())
                .unwrap_or(0);
            if leftovers == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("spooled uploads left behind in {}", scratch.display());
    }

    #[tokio::test]
    async fn jpeg_named_png_is_stored_as_jpeg() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(vec![("avatar.png", JPEG.to_vec())], &[("module", "user")])
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        let url = res.body["urls"][0].as_str().unwrap();
        assert!(url.starts_with("/upload/image/user/"), "{url}");
        assert!(url.ends_with(".jpg"), "{url}");
    }

    #[tokio::test]
    async fn returns_urls_in_field_order() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(
                vec![("a", PNG.to_vec()), ("b", JPEG.to_vec())],
                &[("path", "gallery/2024")],
            )
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        let urls = res.body["urls"].as_array().unwrap();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].as_str().unwrap().ends_with(".png"));
        assert!(urls[1].as_str().unwrap().ends_with(".jpg"));
        assert!(
            urls.iter()
                .all(|u| u.as_str().unwrap().starts_with("/upload/image/gallery/2024/"))
        );
    }

    #[tokio::test]
    async fn legacy_module_code_is_accepted() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(vec![("x", PNG.to_vec())], &[("module", "2")])
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert!(
            res.body["urls"][0]
                .as_str()
                .unwrap()
                .starts_with("/upload/image/article/")
        );
    }

    #[tokio::test]
    async fn missing_file_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.upload(vec![], &[("module", "user")]).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn unknown_module_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(vec![("x", PNG.to_vec())], &[("module", "gallery")])
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn traversal_in_path_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(vec![("x", PNG.to_vec())], &[("path", "../etc")])
            .await;

        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn unrecognized_bytes_are_unsupported() {
        let app = TestApp::spawn().await;

        let res = app
            .upload(vec![("notes.png", b"just some text".to_vec())], &[])
            .await;

        assert_eq!(res.status, 415);
        assert_eq!(res.code(), "UNSUPPORTED_MEDIA");
    }

    #[tokio::test]
    async fn blocked_executables_are_unsupported() {
        let app = TestApp::spawn().await;

        let res = app.upload(vec![("tool", ELF.to_vec())], &[]).await;

        assert_eq!(res.status, 415);
        assert_eq!(res.code(), "UNSUPPORTED_MEDIA");
    }

    #[tokio::test]
    async fn accept_list_restricts_kinds() {
        let app = TestApp::spawn().await;

        let refused = app
            .upload(vec![("x", PNG.to_vec())], &[("accept", "video,audio")])
            .await;
        assert_eq!(refused.status, 415);

        let allowed = app
            .upload(vec![("x", PNG.to_vec())], &[("accept", "video, image")])
            .await;
        assert_eq!(allowed.status, 201, "{}", allowed.text);
    }

    #[tokio::test]
    async fn oversized_file_is_refused() {
        let app = TestApp::spawn().await;
        let limit = app.state.config.upload.max_file_size as usize;

        let res = app
            .upload(vec![("big.jpg", jpeg_of_len(limit + 1))], &[])
            .await;

        assert_eq!(res.status, 413);
        assert_eq!(res.code(), "PAYLOAD_TOO_LARGE");
    }

    #[tokio::test]
    async fn replace_releases_previous_upload() {
        let app = TestApp::spawn().await;
        let first = app.upload(vec![("a", PNG.to_vec())], &[("module", "user")]).await;
        let old_url = first.body["urls"][0].as_str().unwrap().to_string();

        let replace = format!("{old_url};");
        let second = app
            .upload(
                vec![("b", JPEG.to_vec())],
                &[("module", "user"), ("replace", replace.as_str())],
            )
            .await;
        assert_eq!(second.status, 201, "{}", second.text);

        for _ in 0..50 {
            if app.stored(&old_url).await.is_none() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(app.stored(&old_url).await.is_none());
        let new_url = second.body["urls"][0].as_str().unwrap();
        assert!(app.stored(new_url).await.is_some());
    }
}

mod chunked_upload {
    use super::*;

    fn split(data: &[u8], parts: usize) -> Vec<Vec<u8>> {
        let size = data.len().div_ceil(parts);
        data.chunks(size).map(<[u8]>::to_vec).collect()
    }

    #[tokio::test]
    async fn out_of_order_chunks_merge_into_one_file() {
        let app = TestApp::spawn().await;
        let file = jpeg_of_len(10_000);
        let chunks = split(&file, 3);
        let file_hash = md5_hex(&file);
        let extra = [("module", "article"), ("file_hash", file_hash.as_str())];

        let res = app.upload_chunk("holiday", 3, 3, &chunks[2], &extra).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["status"], "progress");
        assert_eq!(res.body["received"], 1);
        assert_eq!(res.body["total"], 3);

        let res = app.upload_chunk("holiday", 1, 3, &chunks[0], &extra).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["received"], 2);

        let res = app.upload_chunk("holiday", 2, 3, &chunks[1], &extra).await;
        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["status"], "complete");
        let url = res.body["url"].as_str().unwrap();
        assert!(url.starts_with("/upload/image/article/"), "{url}");
        assert!(url.ends_with(".jpg"));
        assert_eq!(app.stored(url).await.unwrap(), file);
    }

    #[tokio::test]
    async fn resent_chunk_is_reported_as_duplicate() {
        let app = TestApp::spawn().await;
        let file = jpeg_of_len(4_000);
        let chunks = split(&file, 2);

        let first = app.upload_chunk("again", 1, 2, &chunks[0], &[]).await;
        assert_eq!(first.body["status"], "progress");

        let again = app.upload_chunk("again", 1, 2, &chunks[0], &[]).await;
        assert_eq!(again.status, 200);
        assert_eq!(again.body["status"], "duplicate");
        assert_eq!(again.body["received"], 1);

        let done = app.upload_chunk("again", 2, 2, &chunks[1], &[]).await;
        assert_eq!(done.status, 201, "{}", done.text);
    }

    #[tokio::test]
    async fn wrong_chunk_hash_is_rejected() {
        let app = TestApp::spawn().await;
        let form = reqwest::multipart::Form::new()
            .text("name", "bad")
            .text("chunk", "1")
            .text("chunks", "2")
            .text("hash", md5_hex(b"something else"))
            .part(
                "file",
                reqwest::multipart::Part::bytes(JPEG.to_vec()).file_name("blob"),
            );

        let res = app.post_form(routes::CHUNKS, form).await;

        assert_eq!(res.status, 422);
        assert_eq!(res.code(), "CHECKSUM_MISMATCH");
    }

    #[tokio::test]
    async fn index_beyond_total_is_rejected() {
        let app = TestApp::spawn().await;

        let res = app.upload_chunk("range", 4, 3, JPEG, &[]).await;

        assert_eq!(res.status, 400);
        assert_eq!(res.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn missing_metadata_is_rejected() {
        let app = TestApp::spawn().await;
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(JPEG.to_vec()).file_name("blob"),
        );

        let res = app.post_form(routes::CHUNKS, form).await;

        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn oversized_chunk_is_refused() {
        let app = TestApp::spawn().await;
        let limit = app.state.config.upload.max_chunk_size as usize;

        let res = app
            .upload_chunk("huge", 1, 2, &jpeg_of_len(limit + 1), &[])
            .await;

        assert_eq!(res.status, 413);
    }
}
