use std::path::Path;

use chronicle_core::{ApiErrorClass, DiskClient, DiskError, Resource, ResourceType};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::paths::remote_path_in;
use super::remote::{DownloadOutcome, RemoteError, RemoteMeta, RemoteStore};
use super::transfer::{TransferClient, TransferError};

const META_FIELDS: &[&str] = &["path", "name", "type", "md5", "modified"];

/// [`RemoteStore`] backed by the Disk REST API. Containers are folder paths.
pub struct DiskRemote {
    client: DiskClient,
    transfer: TransferClient,
}

impl DiskRemote {
    pub fn new(client: DiskClient) -> Result<Self, RemoteError> {
        let transfer = TransferClient::new().map_err(RemoteError::from)?;
        Ok(Self { client, transfer })
    }

    async fn file_meta(&self, path: &str) -> Result<Option<RemoteMeta>, RemoteError> {
        match self
            .client
            .get_resource_with_fields(path, Some(META_FIELDS))
            .await
        {
            Ok(resource) => meta_from_resource(&resource).map(Some),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl RemoteStore for DiskRemote {
    async fn resolve_container(&self, name: &str, parent: &str) -> Result<String, RemoteError> {
        let path = remote_path_in(parent, name);
        match self.client.get_resource(&path).await {
            Ok(resource) if resource.resource_type == ResourceType::Dir => return Ok(resource.path),
            Ok(resource) => {
                return Err(RemoteError::Api(format!(
                    "{} exists but is not a folder",
                    resource.path
                )));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }

        match self.client.create_folder(&path).await {
            Ok(()) => {
                tracing::info!(container = %path, "created remote folder");
                Ok(path)
            }
            Err(err) if err.is_already_exists() => Ok(path),
            Err(err) => Err(err.into()),
        }
    }

    async fn upload(
        &self,
        container: &str,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<RemoteMeta, RemoteError> {
        let path = remote_path_in(container, remote_name);
        let link = self.client.get_upload_link(&path, true).await?;
        self.transfer
            .upload_from_path(link.href.as_str(), local_path)
            .await?;
        self.file_meta(&path).await?.ok_or_else(|| {
            RemoteError::Api(format!("{path} is missing right after upload"))
        })
    }

    async fn download(
        &self,
        container: &str,
        remote_name: &str,
        dest: &Path,
    ) -> Result<DownloadOutcome, RemoteError> {
        let path = remote_path_in(container, remote_name);
        let Some(meta) = self.file_meta(&path).await? else {
            return Ok(DownloadOutcome::NotFound);
        };
        let link = match self.client.get_download_link(&path).await {
            Ok(link) => link,
            Err(err) if err.is_not_found() => return Ok(DownloadOutcome::NotFound),
            Err(err) => return Err(err.into()),
        };
        self.transfer
            .download_to_path(link.href.as_str(), dest, Some(&meta.fingerprint))
            .await?;
        Ok(DownloadOutcome::Downloaded)
    }

    async fn metadata(
        &self,
        container: &str,
        remote_name: &str,
    ) -> Result<Option<RemoteMeta>, RemoteError> {
        self.file_meta(&remote_path_in(container, remote_name)).await
    }
}

fn meta_from_resource(resource: &Resource) -> Result<RemoteMeta, RemoteError> {
    if resource.resource_type != ResourceType::File {
        return Err(RemoteError::Api(format!("{} is not a file", resource.path)));
    }
    let fingerprint = resource
        .md5
        .clone()
        .ok_or_else(|| RemoteError::Api(format!("{} has no md5 checksum", resource.path)))?;
    let modified_at = parse_modified(resource.modified.as_deref())?.unwrap_or_default();
    Ok(RemoteMeta {
        fingerprint: fingerprint.to_ascii_lowercase(),
        modified_at,
    })
}

fn parse_modified(value: Option<&str>) -> Result<Option<i64>, RemoteError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .map_err(|err| RemoteError::Api(format!("unparseable modification time {value}: {err}")))?;
    Ok(Some(parsed.unix_timestamp()))
}

impl From<DiskError> for RemoteError {
    fn from(err: DiskError) -> Self {
        if err.is_transport() {
            return RemoteError::Transport(err.to_string());
        }
        match err.classification() {
            Some(ApiErrorClass::Auth) => RemoteError::Auth(err.to_string()),
            _ => RemoteError::Api(err.to_string()),
        }
    }
}

impl From<TransferError> for RemoteError {
    fn from(err: TransferError) -> Self {
        if err.is_transport() {
            return RemoteError::Transport(err.to_string());
        }
        match err {
            TransferError::Io(io) => RemoteError::LocalIo(io),
            other => RemoteError::Api(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::remote::FailureClass;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTAINER: &str = "disk:/Chronicle/campaign";

    fn make_remote(server: &MockServer) -> DiskRemote {
        let client = DiskClient::with_base_url(&server.uri(), "test-token").unwrap();
        DiskRemote::new(client).unwrap()
    }

    fn file_json(name: &str, md5: &str, modified: &str) -> serde_json::Value {
        json!({
            "path": format!("{CONTAINER}/{name}"),
            "name": name,
            "type": "file",
            "md5": md5,
            "modified": modified
        })
    }

    #[tokio::test]
    async fn resolve_container_returns_existing_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", CONTAINER))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "path": CONTAINER,
                "name": "campaign",
                "type": "dir"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let remote = make_remote(&server);
        let id = remote
            .resolve_container("campaign", "disk:/Chronicle")
            .await
            .unwrap();
        assert_eq!(id, CONTAINER);
    }

    #[tokio::test]
    async fn resolve_container_creates_missing_folder() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": "DiskNotFoundError"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", CONTAINER))
            .and(header("authorization", "OAuth test-token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "href": "https://cloud-api.yandex.net/v1/disk/resources",
                "method": "GET",
                "templated": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let remote = make_remote(&server);
        let id = remote
            .resolve_container("campaign", "disk:/Chronicle")
            .await
            .unwrap();
        assert_eq!(id, CONTAINER);
    }

    #[tokio::test]
    async fn metadata_parses_md5_and_modified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", format!("{CONTAINER}/quest_log.html")))
            .and(query_param("fields", "path,name,type,md5,modified"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json(
                "quest_log.html",
                "ABCDEF",
                "2024-01-01T00:00:00+00:00",
            )))
            .mount(&server)
            .await;

        let remote = make_remote(&server);
        let meta = remote
            .metadata(CONTAINER, "quest_log.html")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(meta.fingerprint, "abcdef");
        assert_eq!(meta.modified_at, 1_704_067_200);
    }

    #[tokio::test]
    async fn metadata_for_missing_object_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let remote = make_remote(&server);
        assert_eq!(remote.metadata(CONTAINER, "journal.html").await.unwrap(), None);
    }

    #[tokio::test]
    async fn upload_puts_body_and_reads_back_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources/upload"))
            .and(query_param("path", format!("{CONTAINER}/journal.html")))
            .and(query_param("overwrite", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "href": format!("{}/put/journal.html", server.uri()),
                "method": "PUT",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/put/journal.html"))
            .and(body_bytes(b"<p>A</p>"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .and(query_param("path", format!("{CONTAINER}/journal.html")))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json(
                "journal.html",
                "0d1b08c34858921bc7c662b228acb7ba",
                "2024-01-01T00:00:05+00:00",
            )))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("journal.html");
        std::fs::write(&source, b"<p>A</p>").unwrap();

        let remote = make_remote(&server);
        let meta = remote
            .upload(CONTAINER, &source, "journal.html")
            .await
            .unwrap();
        assert_eq!(meta.fingerprint, "0d1b08c34858921bc7c662b228acb7ba");
        assert_eq!(meta.modified_at, 1_704_067_205);
    }

    #[tokio::test]
    async fn download_verifies_and_replaces_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(file_json(
                "quest_log.html",
                "5d41402abc4b2a76b9719d911017c592",
                "2024-01-01T00:00:00+00:00",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources/download"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "href": format!("{}/get/quest_log.html", server.uri()),
                "method": "GET",
                "templated": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/get/quest_log.html"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("quest_log.html");
        std::fs::write(&dest, b"stale").unwrap();

        let remote = make_remote(&server);
        let outcome = remote
            .download(CONTAINER, "quest_log.html", &dest)
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::Downloaded);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn download_of_missing_object_reports_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let dest = dir.path().join("quest_log.html");
        let remote = make_remote(&server);
        let outcome = remote
            .download(CONTAINER, "quest_log.html", &dest)
            .await
            .unwrap();
        assert_eq!(outcome, DownloadOutcome::NotFound);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn expired_session_maps_to_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "UnauthorizedError"
            })))
            .mount(&server)
            .await;

        let remote = make_remote(&server);
        let err = remote
            .metadata(CONTAINER, "journal.html")
            .await
            .expect_err("expected auth failure");
        assert_eq!(err.class(), FailureClass::Auth);
    }

    #[tokio::test]
    async fn quota_errors_map_to_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/disk/resources/upload"))
            .respond_with(ResponseTemplate::new(507).set_body_json(json!({
                "error": "DiskInsufficientStorageError"
            })))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let source = dir.path().join("journal.html");
        std::fs::write(&source, b"x").unwrap();

        let remote = make_remote(&server);
        let err = remote
            .upload(CONTAINER, &source, "journal.html")
            .await
            .expect_err("expected quota failure");
        assert_eq!(err.class(), FailureClass::Api);
    }

    #[tokio::test]
    async fn unreachable_server_maps_to_transport() {
        let client = DiskClient::with_base_url("http://127.0.0.1:9", "test-token").unwrap();
        let remote = DiskRemote::new(client).unwrap();
        let err = remote
            .metadata(CONTAINER, "journal.html")
            .await
            .expect_err("expected connection failure");
        assert_eq!(err.class(), FailureClass::Transport);
    }
}
