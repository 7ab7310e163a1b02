mod common;

use axum::http::StatusCode;
use common::{column, get, send, setup_test_app};
use serde_json::json;

#[tokio::test]
async fn test_fetch_with_payload() {
    let app = setup_test_app().await;

    let payload = json!({
        "fields": ["Title"],
        "filters": [
            {"model": "Album", "field": "ArtistId", "op": "in", "value": [1, 2]},
            {"model": "Artist", "field": "Name", "op": "like", "value": "ac%"}
        ],
        "sorting": [{"field": "Title", "direction": "desc"}]
    });
    let response = send(&app, "FETCH", "/album", Some(payload), &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(
        column(&body, "AlbumList", "Title"),
        vec![
            json!("Restless and Wild"),
            json!("Let There Be Rock"),
            json!("For Those About To Rock We Salute You"),
            json!("Balls to the Wall"),
        ]
    );
    assert!(body["AlbumList"][0].get("AlbumId").is_none());
}

#[tokio::test]
async fn test_fetch_related_columns_and_pagination() {
    let app = setup_test_app().await;

    let payload = json!({
        "related": {"Album": ["Title"]},
        "filters": [{"field": "ArtistId", "op": "<=", "value": 3}],
        "pagination": {"page": 1, "limit": 2}
    });
    let response = send(&app, "FETCH", "/artist", Some(payload), &[]).await;
    assert_eq!(response.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header("pagination-count"), Some("3"));
    let body = response.json();
    let albums = body["ArtistList"][0]["AlbumList"].as_array().unwrap();
    assert_eq!(albums.len(), 2);
    assert_eq!(albums[0]["Title"], "For Those About To Rock We Salute You");
    assert!(albums[0].get("ArtistId").is_none());
}

#[tokio::test]
async fn test_empty_fetch_lists_everything() {
    let app = setup_test_app().await;

    let response = send(&app, "FETCH", "/artist", None, &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["ArtistList"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_post_override_becomes_fetch() {
    let app = setup_test_app().await;
    let payload = json!({"filters": [{"field": "ArtistId", "op": "==", "value": 2}]});

    let response = send(
        &app,
        "POST",
        "/artist",
        Some(payload.clone()),
        &[("x-http-method-override", "FETCH")],
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(column(&response.json(), "ArtistList", "Name"), vec![json!("Accept")]);

    let response = send(&app, "POST", "/artist?_method=FETCH", Some(payload), &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(column(&response.json(), "ArtistList", "Name"), vec![json!("Accept")]);

    // Nothing was inserted
    assert_eq!(get(&app, "/artist/7").await.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fetch_reports_invalid_parts() {
    let app = setup_test_app().await;

    let payload = json!({
        "fields": ["pippo"],
        "filters": [
            {"field": "Name", "op": "approx", "value": "x"},
            {"field": "ArtistId", "op": "==", "value": "abc"}
        ],
        "sorting": [{"field": "Name", "direction": "sideways"}]
    });
    let response = send(&app, "FETCH", "/artist", Some(payload), &[]).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json()["details"]["invalid"],
        json!(["pippo", "op=approx", "ArtistId=\"abc\"", "direction=sideways"])
    );
}

#[tokio::test]
async fn test_fetch_with_malformed_payload_is_unprocessable() {
    let app = setup_test_app().await;

    let response = send(&app, "FETCH", "/artist", Some(json!({"where": 1})), &[]).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);

    let response = send(&app, "FETCH", "/artist", Some(json!({"filters": "Name"})), &[]).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_fetch_is_not_served_on_items() {
    let app = setup_test_app().await;

    let response = send(&app, "FETCH", "/artist/1", None, &[]).await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(response.header("allow").unwrap().contains("FETCH"));
}

#[tokio::test]
async fn test_csv_export() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_export=&ArtistId=1;2").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("text/csv; charset=utf-8"));
    assert_eq!(
        response.header("content-disposition"),
        Some("attachment; filename=Artist.csv")
    );
    assert_eq!(response.header("total-rows"), Some("2"));
    assert_eq!(response.header("total-columns"), Some("2"));
    assert_eq!(
        response.text(),
        "\"ArtistId\";\"Name\"\n\"1\";\"AC/DC\"\n\"2\";\"Accept\"\n"
    );
}

#[tokio::test]
async fn test_csv_export_flattens_relations() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_export=acdc&_related=Album&ArtistId=1").await;
    assert_eq!(
        response.header("content-disposition"),
        Some("attachment; filename=acdc.csv")
    );
    assert_eq!(response.header("total-rows"), Some("2"));
    let text = response.text();
    let header = text.lines().next().unwrap();
    assert_eq!(
        header,
        "\"AlbumList.AlbumId\";\"AlbumList.ArtistId\";\"AlbumList.Title\";\"ArtistId\";\"Name\""
    );
}

#[tokio::test]
async fn test_as_table_flattens_items() {
    let app = setup_test_app().await;

    let response = get(&app, "/album?_as_table&_related=Artist&AlbumId=2").await;
    assert_eq!(response.status, StatusCode::OK);
    let row = &response.json()["AlbumList"][0];
    assert_eq!(row["Artist.Name"], "Accept");
    assert_eq!(row["Title"], "Balls to the Wall");
    assert!(row.get("_links").is_none());
    assert!(row.get("Artist").is_none());
}
