//! Integration tests for the dataset index and change notice endpoints.

mod common;

use axum::http::StatusCode;
use common::body_json;
use melon_core::storage::Storage;
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: refresh picks up images that appeared in storage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn refresh_indexes_new_images() {
    let app = common::build_test_app().await;
    app.storage
        .put("dataset/train/a.jpg", vec![1, 2, 3])
        .await
        .unwrap();
    app.storage
        .put("dataset/train/notes.txt", vec![1])
        .await
        .unwrap();

    let response = app.post_empty("/api/v1/dataset/refresh").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["data"]["added"], 1);
    assert_eq!(json["data"]["removed"], 0);
    assert_eq!(json["data"]["total"], 1);
}

// ---------------------------------------------------------------------------
// Test: upload stores the image and returns 201
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_image_returns_201() {
    let app = common::build_test_app().await;

    let response = app
        .post_bytes(
            "/api/v1/dataset/images?set=valid&filename=field_1.jpg",
            vec![0xFF, 0xD8, 0xFF],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(response).await;
    assert_eq!(json["data"]["path"], "dataset/valid/field_1.jpg");
    assert_eq!(json["data"]["set"], "valid");
    assert!(app.storage.get("dataset/valid/field_1.jpg").await.is_ok());
}

#[tokio::test]
async fn upload_rejects_bad_input() {
    let app = common::build_test_app().await;

    let empty = app
        .post_bytes("/api/v1/dataset/images?set=train&filename=a.jpg", Vec::new())
        .await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let bad_set = app
        .post_bytes("/api/v1/dataset/images?set=holdout&filename=a.jpg", vec![1])
        .await;
    assert_eq!(bad_set.status(), StatusCode::BAD_REQUEST);

    let traversal = app
        .post_bytes("/api/v1/dataset/images?set=train&filename=../a.jpg", vec![1])
        .await;
    assert_eq!(traversal.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: stats count annotated and unannotated images per set
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stats_split_by_set() {
    let app = common::build_test_app().await;
    app.seed_images(&["dataset/train/a.jpg", "dataset/train/b.jpg", "dataset/test/c.jpg"])
        .await;
    app.post_json(
        "/api/v1/annotations",
        json!({ "image_path": "dataset/train/a.jpg", "detection_label": "non_melon" }),
    )
    .await;

    let json = body_json(app.get("/api/v1/dataset/stats").await).await;
    let sets = json["data"].as_array().unwrap();
    let train = sets.iter().find(|s| s["set"] == "train").unwrap();
    assert_eq!(train["total"], 2);
    assert_eq!(train["annotated"], 1);
    assert_eq!(train["unannotated"], 1);
    let test = sets.iter().find(|s| s["set"] == "test").unwrap();
    assert_eq!(test["unannotated"], 1);
}

// ---------------------------------------------------------------------------
// Test: quality on an empty dataset reports a single issue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quality_of_an_empty_dataset() {
    let app = common::build_test_app().await;
    let response = app.get("/api/v1/dataset/quality").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let issues = json["data"]["issues"].as_array().unwrap();
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0]["kind"], "empty_dataset");
    assert_eq!(json["data"]["total_annotated"], 0);
}

// ---------------------------------------------------------------------------
// Test: quality flags split and class imbalance with recommendations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quality_flags_a_train_only_all_ripe_dataset() {
    let app = common::build_test_app().await;
    let paths = ["dataset/train/a.jpg", "dataset/train/b.jpg", "dataset/train/c.jpg"];
    app.seed_images(&paths).await;
    for path in paths {
        let response = app
            .post_json(
                "/api/v1/annotations",
                json!({
                    "image_path": path,
                    "detection_label": "melon",
                    "boxes": [
                        { "x": 0.1, "y": 0.1, "width": 0.3, "height": 0.4, "ripeness": "ripe" }
                    ]
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let json = body_json(app.get("/api/v1/dataset/quality").await).await;
    let data = &json["data"];
    assert_eq!(data["total_annotated"], 3);
    assert_eq!(data["composition"][0]["set"], "train");
    assert_eq!(data["composition"][0]["ripe_boxes"], 3);

    let kinds: Vec<(String, String)> = data["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| {
            (
                i["kind"].as_str().unwrap().to_string(),
                i["set"].as_str().unwrap_or("-").to_string(),
            )
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("split_ratio".to_string(), "train".to_string()),
            ("split_ratio".to_string(), "valid".to_string()),
            ("split_ratio".to_string(), "test".to_string()),
            ("detector_imbalance".to_string(), "train".to_string()),
            ("classifier_imbalance".to_string(), "train".to_string()),
        ]
    );
    assert_eq!(data["recommendations"].as_array().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// Test: change notice shows until acknowledged
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notification_clears_after_acknowledge() {
    let app = common::build_test_app().await;

    let fresh = body_json(app.get("/api/v1/dataset/changes/notification").await).await;
    assert_eq!(fresh["data"]["show_notification"], false);

    app.seed_images(&["dataset/train/a.jpg", "dataset/train/b.jpg"]).await;

    let notice = body_json(app.get("/api/v1/dataset/changes/notification").await).await;
    assert_eq!(notice["data"]["show_notification"], true);
    assert_eq!(notice["data"]["summary"]["type_display"], "Image Added");
    assert_eq!(notice["data"]["summary"]["items_affected"], 2);

    let ack = app.post_empty("/api/v1/dataset/changes/acknowledge").await;
    assert_eq!(ack.status(), StatusCode::OK);
    assert_eq!(body_json(ack).await["data"]["seen_version"], 1);

    let after = body_json(app.get("/api/v1/dataset/changes/notification").await).await;
    assert_eq!(after["data"]["show_notification"], false);
}

#[tokio::test]
async fn acknowledging_an_older_version_keeps_the_notice() {
    let app = common::build_test_app().await;
    app.seed_images(&["dataset/train/a.jpg"]).await;
    app.post_json(
        "/api/v1/annotations",
        json!({ "image_path": "dataset/train/a.jpg", "detection_label": "non_melon" }),
    )
    .await;

    let current = body_json(app.get("/api/v1/dataset/changes/current").await).await;
    assert_eq!(current["data"]["version"], 2);
    assert_eq!(current["data"]["last_change_type"], "annotation_added");

    app.post_empty("/api/v1/dataset/changes/acknowledge?version=1").await;

    let notice = body_json(app.get("/api/v1/dataset/changes/notification").await).await;
    assert_eq!(notice["data"]["show_notification"], true);
    assert_eq!(notice["data"]["seen_version"], 1);
}

// ---------------------------------------------------------------------------
// Test: history is newest first and honours the limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn history_is_newest_first() {
    let app = common::build_test_app().await;
    app.seed_images(&["dataset/train/a.jpg"]).await;
    app.post_json(
        "/api/v1/annotations",
        json!({ "image_path": "dataset/train/a.jpg", "detection_label": "non_melon" }),
    )
    .await;

    let json = body_json(app.get("/api/v1/dataset/changes/history?limit=1").await).await;
    let entries = json["data"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["version"], 2);
    assert_eq!(entries[0]["change_type"], "annotation_added");
}
