mod common;

use axum::http::StatusCode;
use common::{column, get, qs, send, setup_test_app};
use serde_json::json;

fn ids(body: &serde_json::Value, key: &str, pk: &str) -> Vec<i64> {
    column(body, key, pk)
        .into_iter()
        .map(|v| v.as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_list_returns_every_row_in_key_order() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist").await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(body["ArtistList"][0]["Name"], "AC/DC");
    assert_eq!(body["ArtistList"][0]["_links"]["self"], "/artist/1");
}

#[tokio::test]
async fn test_equality_and_list_filters() {
    let app = setup_test_app().await;

    let body = get(&app, "/artist?ArtistId=3").await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![3]);

    let body = get(&app, &format!("/artist?ArtistId={}", qs("1;2;5"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![1, 2, 5]);

    let body = get(&app, &format!("/artist?ArtistId={}", qs("!1;2;5"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![3, 4, 6]);
}

#[tokio::test]
async fn test_repeated_keys_are_a_disjunction() {
    let app = setup_test_app().await;

    let body = get(&app, "/artist?ArtistId=1&ArtistId=5").await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![1, 5]);

    // Different keys still combine with AND
    let body = get(
        &app,
        &format!("/artist?ArtistId=1&ArtistId=5&Name={}", qs("Alice In Chains")),
    )
    .await
    .json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![5]);
}

#[tokio::test]
async fn test_comparison_prefixes() {
    let app = setup_test_app().await;

    let body = get(&app, "/track?Milliseconds=__gt__300000").await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![1, 2, 5]);

    let body = get(&app, "/track?Milliseconds=__lte__252051").await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![3, 4, 7]);

    let body = get(&app, "/track?UnitPrice=__gte__1.5").await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![6]);

    let body = get(&app, "/track?UnitPrice=__lt__0.5").await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![7]);
}

#[tokio::test]
async fn test_range_and_negated_range() {
    let app = setup_test_app().await;

    let body = get(&app, &format!("/artist?ArtistId={}", qs("(2;4)"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![2, 3, 4]);

    let body = get(&app, &format!("/artist?ArtistId={}", qs("!(2;4)"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![1, 5, 6]);
}

#[tokio::test]
async fn test_null_tokens() {
    let app = setup_test_app().await;

    let body = get(&app, "/track?Composer=null").await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![2, 7]);

    let body = get(&app, "/track?AlbumId=!null").await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_like_is_case_insensitive_prefix_match() {
    let app = setup_test_app().await;

    let body = get(&app, &format!("/artist?Name={}", qs("%al%"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![4, 5]);

    let body = get(&app, &format!("/artist?Name={}", qs("!%Al%"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![1, 2, 3, 6]);

    // Wildcards inside the pattern are kept
    let body = get(&app, &format!("/artist?Name={}", qs("%%chains"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![5]);
}

#[tokio::test]
async fn test_escaped_value_is_a_literal() {
    let app = setup_test_app().await;

    // `\null` is the string "null", not IS NULL
    let body = get(&app, &format!("/track?Composer={}", qs("\\null"))).await.json();
    assert_eq!(body["TrackList"], json!([]));
}

#[tokio::test]
async fn test_sorting() {
    let app = setup_test_app().await;

    let body = get(&app, "/artist?_sort=-ArtistId").await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![6, 5, 4, 3, 2, 1]);

    let body = get(&app, &format!("/track?_sort={}", qs("-UnitPrice;Milliseconds"))).await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![6, 3, 4, 5, 2, 1, 7]);
}

#[tokio::test]
async fn test_sorting_by_related_field_breaks_ties_by_key() {
    let app = setup_test_app().await;

    let body = get(&app, "/album?_sort=Artist.Name").await.json();
    assert_eq!(ids(&body, "AlbumList", "AlbumId"), vec![1, 4, 2, 3, 5]);
}

#[tokio::test]
async fn test_fields_projection_keeps_links() {
    let app = setup_test_app().await;

    let body = get(&app, "/artist?_fields=Name&ArtistId=2").await.json();
    let item = &body["ArtistList"][0];
    assert_eq!(item["Name"], "Accept");
    assert!(item.get("ArtistId").is_none());
    assert_eq!(item["_links"]["self"], "/artist/2");
}

#[tokio::test]
async fn test_no_links_drops_links_and_meta() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_no_links&ArtistId=1").await;
    let body = response.json();
    assert!(body["ArtistList"][0].get("_links").is_none());
    assert!(body.get("_meta").is_none());
    assert!(response.header("link").is_none());
}

#[tokio::test]
async fn test_dotted_filter_on_related_field() {
    let app = setup_test_app().await;

    let body = get(&app, &format!("/album?Artist.Name={}", qs("AC/DC"))).await.json();
    assert_eq!(ids(&body, "AlbumList", "AlbumId"), vec![1, 4]);

    let body = get(&app, &format!("/artist?Album.Title={}", qs("%%wall%"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![2]);
}

#[tokio::test]
async fn test_related_expansion() {
    let app = setup_test_app().await;

    let body = get(&app, &format!("/artist?_related=Album&ArtistId={}", qs("1;4"))).await.json();
    let artists = body["ArtistList"].as_array().unwrap();
    let titles: Vec<_> = artists[0]["AlbumList"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["Title"].as_str().unwrap())
        .collect();
    assert_eq!(
        titles,
        vec!["For Those About To Rock We Salute You", "Let There Be Rock"]
    );
    assert_eq!(artists[1]["AlbumList"], json!([]));

    let body = get(&app, "/album?_extended&AlbumId=5").await.json();
    let album = &body["AlbumList"][0];
    assert_eq!(album["Artist"]["Name"], "Aerosmith");
    assert_eq!(album["TrackList"][0]["Name"], "Walk On Water");
}

#[tokio::test]
async fn test_search_across_text_columns() {
    let app = setup_test_app().await;

    let body = get(&app, "/album?_search=rock").await.json();
    assert_eq!(ids(&body, "AlbumList", "AlbumId"), vec![1, 4]);

    let body = get(&app, "/track?_search=baltes").await.json();
    assert_eq!(ids(&body, "TrackList", "TrackId"), vec![3, 4]);
}

#[tokio::test]
async fn test_like_matches_non_ascii_values() {
    let app = setup_test_app().await;
    let response = send(&app, "POST", "/artist", Some(json!({"Name": "Beyoncé"})), &[]).await;
    assert_eq!(response.status, StatusCode::CREATED);

    for pattern in ["%Beyoncé", "%beyoncé", "%%yoncé", "%%é"] {
        let body = get(&app, &format!("/artist?Name={}", qs(pattern))).await.json();
        assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![7], "{pattern}");
    }

    let body = get(&app, &format!("/artist?_search={}", qs("yoncé"))).await.json();
    assert_eq!(ids(&body, "ArtistList", "ArtistId"), vec![7]);
}

#[tokio::test]
async fn test_invalid_tokens_are_accumulated() {
    let app = setup_test_app().await;

    let response = get(
        &app,
        "/artist?pippo=1&ArtistId=abc&_sort=Bogus&_fields=Nope&_page=0",
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let invalid = response.json()["details"]["invalid"].clone();
    let invalid: Vec<&str> = invalid
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    for token in ["pippo", "ArtistId=abc", "Bogus", "Nope", "_page"] {
        assert!(invalid.contains(&token), "missing {token} in {invalid:?}");
    }
}

#[tokio::test]
async fn test_unknown_relation_in_related_is_rejected() {
    let app = setup_test_app().await;

    let response = get(&app, "/artist?_related=Genre").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["details"]["invalid"], json!(["Genre"]));
}
