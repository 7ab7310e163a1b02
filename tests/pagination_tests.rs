mod common;

use autocrud::AutoCrudConfig;
use axum::http::StatusCode;
use common::{column, get, qs, setup_app_with, setup_test_app};
use serde_json::{Value, json};

#[tokio::test]
async fn test_first_page_is_partial_content() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_limit=2").await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header("pagination-count"), Some("6"));
    assert_eq!(response.header("pagination-page"), Some("1"));
    assert_eq!(response.header("pagination-num-pages"), Some("3"));
    assert_eq!(response.header("pagination-page-size"), Some("2"));

    let body = response.json();
    assert_eq!(column(&body, "ArtistList", "ArtistId"), vec![json!(1), json!(2)]);
    assert_eq!(body["_meta"]["first"], "/artist?_page=1&_limit=2");
    assert_eq!(body["_meta"]["prev"], Value::Null);
    assert_eq!(body["_meta"]["next"], "/artist?_page=2&_limit=2");
    assert_eq!(body["_meta"]["last"], "/artist?_page=3&_limit=2");

    let link = response.header("link").unwrap();
    assert!(link.contains("</artist?_page=2&_limit=2>; rel=next"), "{link}");
    assert!(!link.contains("rel=prev"), "{link}");
}

#[tokio::test]
async fn test_last_page_is_ok() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_page=3&_limit=2").await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(column(&body, "ArtistList", "ArtistId"), vec![json!(5), json!(6)]);
    assert_eq!(body["_meta"]["prev"], "/artist?_page=2&_limit=2");
    assert_eq!(body["_meta"]["next"], Value::Null);
}

#[tokio::test]
async fn test_page_past_the_end_is_no_content() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_page=4&_limit=2").await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert!(response.body.is_empty());
    assert_eq!(response.header("pagination-count"), Some("6"));
    assert_eq!(response.header("pagination-page"), Some("4"));
}

#[tokio::test]
async fn test_navigation_keeps_filters() {
    let app = setup_test_app().await;

    let uri = format!("/album?ArtistId={}&_sort=-AlbumId&_limit=1", qs("1;2"));
    let response = get(&app, &uri).await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header("pagination-count"), Some("4"));
    let body = response.json();
    assert_eq!(body["AlbumList"][0]["AlbumId"], 4);
    assert_eq!(
        body["_meta"]["next"],
        "/album?ArtistId=1%3B2&_sort=-AlbumId&_page=2&_limit=1"
    );
}

#[tokio::test]
async fn test_empty_result_is_a_complete_first_page() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?ArtistId=999").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("pagination-count"), Some("0"));
    assert_eq!(response.json()["ArtistList"], json!([]));
}

#[tokio::test]
async fn test_bad_pagination_values_are_reported() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_page=abc&_limit=-1").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json()["details"]["invalid"],
        json!(["_page", "_limit"])
    );
}

#[tokio::test]
async fn test_limit_is_clamped_to_max_limit() {
    let app = setup_app_with(AutoCrudConfig {
        max_limit: Some(4),
        ..AutoCrudConfig::default()
    })
    .await;

    let response = get(&app, "/artist?_limit=100").await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header("pagination-page-size"), Some("4"));
    assert_eq!(response.json()["ArtistList"].as_array().unwrap().len(), 4);

    let response = get(&app, "/artist").await;
    assert_eq!(response.header("pagination-page-size"), Some("4"));
}

#[tokio::test]
async fn test_unlimited_listing_without_max_limit() {
    let app = setup_app_with(AutoCrudConfig {
        max_limit: None,
        ..AutoCrudConfig::default()
    })
    .await;

    let response = get(&app, "/track").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("pagination-num-pages"), Some("1"));
    assert_eq!(response.json()["TrackList"].as_array().unwrap().len(), 7);
}
