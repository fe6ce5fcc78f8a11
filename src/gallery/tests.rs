use super::*;
use crate::core::Session;
use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;

fn gallery(server: &MockServer) -> Gallery {
    Gallery::new(&FirebaseStorage::new_with_url(
        Session::new(),
        "bucket".to_string(),
        server.url("/v0"),
    ))
}

fn mock_metadata(server: &MockServer, encoded: &str, token: &str) {
    let path = format!("/v0/b/bucket/o/{}", encoded);
    let token = token.to_string();
    server.mock(move |when, then| {
        when.method(GET).path(path);
        then.status(200).json_body(json!({
            "name": "ignored",
            "bucket": "bucket",
            "downloadTokens": token
        }));
    });
}

#[tokio::test]
async fn test_load_resolves_urls() {
    let server = MockServer::start();
    let gallery = gallery(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path("/v0/b/bucket/o")
            .query_param("prefix", "images/");
        then.status(200).json_body(json!({
            "items": [
                { "name": "images/a.png", "bucket": "bucket" },
                { "name": "images/b.png", "bucket": "bucket" }
            ]
        }));
    });
    mock_metadata(&server, "images%2Fa.png", "ta");
    mock_metadata(&server, "images%2Fb.png", "tb");

    let images = gallery.load().await.unwrap();

    assert_eq!(images.len(), 2);
    assert_eq!(images[0].path, "images/a.png");
    assert_eq!(
        images[0].url,
        server.url("/v0/b/bucket/o/images%2Fa.png?alt=media&token=ta")
    );
    assert_eq!(images[1].path, "images/b.png");
    assert_eq!(gallery.images(), images);
}

#[tokio::test]
async fn test_upload_prepends_and_completes_progress() {
    let server = MockServer::start();
    let gallery = gallery(&server);

    server.mock(|when, then| {
        when.method(GET).path("/v0/b/bucket/o");
        then.status(200).json_body(json!({
            "items": [{ "name": "images/old.png", "bucket": "bucket" }]
        }));
    });
    mock_metadata(&server, "images%2Fold.png", "told");
    mock_metadata(&server, "images%2Fnew.png", "tnew");
    let upload = server.mock(|when, then| {
        when.method(POST)
            .path("/v0/b/bucket/o")
            .query_param("name", "images/new.png")
            .header("content-type", "image/png");
        then.status(200).json_body(json!({ "name": "images/new.png", "bucket": "bucket" }));
    });

    gallery.load().await.unwrap();
    let progress = gallery.progress();

    let image = gallery
        .upload("/tmp/photos/new.png", vec![1u8; 1000], "image/png")
        .await
        .unwrap();

    upload.assert();
    assert_eq!(image.path, "images/new.png");
    let paths: Vec<String> = gallery.images().into_iter().map(|i| i.path).collect();
    assert_eq!(paths, vec!["images/new.png", "images/old.png"]);
    assert_eq!(progress.borrow().percent(), 100.0);
    assert!(!gallery.is_uploading());
}

#[tokio::test]
async fn test_upload_rejects_empty_name() {
    let server = MockServer::start();
    let gallery = gallery(&server);

    let upload = server.mock(|when, then| {
        when.method(POST).path("/v0/b/bucket/o");
        then.status(200).json_body(json!({}));
    });

    let result = gallery.upload("photos/", vec![1u8], "image/png").await;
    assert!(matches!(result, Err(GalleryError::InvalidName(_))));
    upload.assert_hits(0);
}

#[tokio::test]
async fn test_second_upload_is_busy() {
    let server = MockServer::start();
    let gallery = gallery(&server);

    server.mock(|when, then| {
        when.method(POST).path("/v0/b/bucket/o");
        then.status(200)
            .delay(Duration::from_millis(300))
            .json_body(json!({ "name": "images/a.png" }));
    });
    mock_metadata(&server, "images%2Fa.png", "ta");

    let first = tokio::spawn({
        let gallery = gallery.clone();
        async move { gallery.upload("a.png", vec![1u8; 10], "image/png").await }
    });
    while !gallery.is_uploading() {
        tokio::task::yield_now().await;
    }

    let second = gallery.upload("b.png", vec![2u8; 10], "image/png").await;
    assert!(matches!(second, Err(GalleryError::Busy)));

    first.await.unwrap().unwrap();
    assert!(!gallery.is_uploading());
    assert_eq!(gallery.images().len(), 1);
}

#[tokio::test]
async fn test_failed_upload_clears_flag() {
    let server = MockServer::start();
    let gallery = gallery(&server);

    server.mock(|when, then| {
        when.method(POST).path("/v0/b/bucket/o");
        then.status(403).json_body(json!({
            "error": { "code": 403, "message": "Permission denied." }
        }));
    });

    let result = gallery.upload("a.png", vec![1u8; 10], "image/png").await;
    assert!(matches!(result, Err(GalleryError::Storage(StorageError::ApiError(_)))));
    assert!(!gallery.is_uploading());
    assert!(gallery.images().is_empty());
}

#[tokio::test]
async fn test_delete_removes_from_list() {
    let server = MockServer::start();
    let gallery = gallery(&server);

    server.mock(|when, then| {
        when.method(GET).path("/v0/b/bucket/o");
        then.status(200).json_body(json!({
            "items": [
                { "name": "images/a.png" },
                { "name": "images/b.png" }
            ]
        }));
    });
    mock_metadata(&server, "images%2Fa.png", "ta");
    mock_metadata(&server, "images%2Fb.png", "tb");
    let delete = server.mock(|when, then| {
        when.method(DELETE).path("/v0/b/bucket/o/images%2Fa.png");
        then.status(204);
    });

    gallery.load().await.unwrap();
    gallery.delete("images/a.png").await.unwrap();

    delete.assert();
    let paths: Vec<String> = gallery.images().into_iter().map(|i| i.path).collect();
    assert_eq!(paths, vec!["images/b.png"]);
}
