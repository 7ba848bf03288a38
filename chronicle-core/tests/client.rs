use std::time::Duration;

use chronicle_core::{ApiErrorClass, DiskClient, ResourceType};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_resource_sends_oauth_header_and_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources"))
        .and(query_param("path", "disk:/Chronicle/campaign/quest_log.html"))
        .and(header("authorization", "OAuth test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "disk:/Chronicle/campaign/quest_log.html",
            "name": "quest_log.html",
            "type": "file",
            "size": 8,
            "modified": "2024-01-01T00:00:00+00:00",
            "md5": "0f343b0931126a20f133d67c2b018a3b"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let resource = client
        .get_resource("disk:/Chronicle/campaign/quest_log.html")
        .await
        .unwrap();

    assert_eq!(resource.resource_type, ResourceType::File);
    assert_eq!(resource.name, "quest_log.html");
    assert_eq!(
        resource.md5.as_deref(),
        Some("0f343b0931126a20f133d67c2b018a3b")
    );
}

#[tokio::test]
async fn get_resource_with_fields_joins_filter() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources"))
        .and(query_param("path", "disk:/Chronicle/campaign/journal.html"))
        .and(query_param("fields", "path,name,type,md5,modified"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "path": "disk:/Chronicle/campaign/journal.html",
            "name": "journal.html",
            "type": "file",
            "md5": "abc",
            "modified": "2024-05-01T10:00:00+00:00"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let resource = client
        .get_resource_with_fields(
            "disk:/Chronicle/campaign/journal.html",
            Some(&["path", "name", "type", "md5", "modified"]),
        )
        .await
        .unwrap();

    assert_eq!(resource.size, None);
    assert_eq!(resource.modified.as_deref(), Some("2024-05-01T10:00:00+00:00"));
}

#[tokio::test]
async fn missing_resource_is_reported_as_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "DiskNotFoundError",
            "description": "Resource not found."
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .get_resource("disk:/Chronicle/missing")
        .await
        .expect_err("expected 404");

    assert!(err.is_not_found());
    assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
}

#[tokio::test]
async fn create_folder_uses_put() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/disk/resources"))
        .and(query_param("path", "disk:/Chronicle/campaign"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "href": "https://cloud-api.yandex.net/v1/disk/resources?path=disk%3A%2FChronicle%2Fcampaign",
            "method": "GET",
            "templated": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    client.create_folder("disk:/Chronicle/campaign").await.unwrap();
}

#[tokio::test]
async fn create_existing_folder_reports_conflict() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/v1/disk/resources"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": "DiskPathPointsToExistentDirectoryError"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client
        .create_folder("disk:/Chronicle/campaign")
        .await
        .expect_err("expected 409");
    assert!(err.is_already_exists());
}

#[tokio::test]
async fn upload_link_sends_overwrite_flag() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources/upload"))
        .and(query_param("path", "disk:/Chronicle/campaign/settings.json"))
        .and(query_param("overwrite", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "href": "https://uploader.example/put/settings.json",
            "method": "PUT",
            "templated": false
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let link = client
        .get_upload_link("disk:/Chronicle/campaign/settings.json", true)
        .await
        .unwrap();

    assert_eq!(link.href.as_str(), "https://uploader.example/put/settings.json");
    assert_eq!(link.method, "PUT");
}

#[tokio::test]
async fn download_link_returns_href() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources/download"))
        .and(query_param("path", "disk:/Chronicle/campaign/journal.html"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "href": "https://downloader.example/journal.html",
            "method": "GET",
            "templated": false
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
    let link = client
        .get_download_link("disk:/Chronicle/campaign/journal.html")
        .await
        .unwrap();

    assert_eq!(link.href.as_str(), "https://downloader.example/journal.html");
}

#[tokio::test]
async fn unauthorized_is_classified_as_auth() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "UnauthorizedError",
            "description": "Unauthorized"
        })))
        .mount(&server)
        .await;

    let client = DiskClient::with_base_url(&server.uri(), "expired").unwrap();
    let err = client
        .get_resource("disk:/Chronicle")
        .await
        .expect_err("expected 401");
    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
}

#[tokio::test]
async fn slow_server_surfaces_as_transport_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/disk/resources"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client =
        DiskClient::with_timeout(&server.uri(), "test-token", Duration::from_millis(50)).unwrap();
    let err = client
        .get_resource("disk:/Chronicle")
        .await
        .expect_err("expected timeout");
    assert!(err.is_transport());
    assert_eq!(err.classification(), None);
}
