use chrono::{TimeZone, Utc};
use image_tag_crawler::batch::{BatchResolutionDriver, ImageCoordinate, Mapping};
use image_tag_crawler::config::{AuthScheme, RegistryEndpoint, RegistryKind};
use image_tag_crawler::error::RegistryError;
use image_tag_crawler::logging::Logger;
use image_tag_crawler::registry::{ClientFactory, DockerHubClient, OciClient, RegistryClient, RegistryClients};
use image_tag_crawler::resolver::{HistoricalResolver, Period};
use image_tag_crawler::tags::TagQuery;
use mockito::{Matcher, Server};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

fn hub_client(server: &Server) -> DockerHubClient {
    let endpoint = RegistryEndpoint::docker_hub()
        .with_base_url(server.url())
        .with_min_delay(Duration::ZERO)
        .with_page_size(2);
    DockerHubClient::new(endpoint, Logger::new_quiet()).unwrap()
}

fn oci_client(kind: RegistryKind, endpoint: RegistryEndpoint) -> OciClient {
    OciClient::new(kind, endpoint.with_min_delay(Duration::ZERO), Logger::new_quiet()).unwrap()
}

fn page_query(page: &str) -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("page".into(), page.into()),
        Matcher::UrlEncoded("page_size".into(), "2".into()),
    ])
}

#[tokio::test]
async fn test_docker_hub_follows_pages() {
    let mut server = Server::new_async().await;
    let next = format!("{}/v2/repositories/library/demo/tags?page=2", server.url());

    let page1 = server
        .mock("GET", "/v2/repositories/library/demo/tags")
        .match_query(page_query("1"))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "next": next,
                "results": [
                    {"name": "1.0.0", "last_updated": "2024-01-01T00:00:00Z",
                     "images": [{"digest": "sha256:a", "size": 10}]},
                    {"name": "1.1.0", "last_updated": "2024-01-11T00:00:00Z"}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let page2 = server
        .mock("GET", "/v2/repositories/library/demo/tags")
        .match_query(page_query("2"))
        .with_body(
            json!({
                "next": null,
                "results": [
                    {"name": "1.1.0-rc1", "last_updated": "2024-01-16T00:00:00Z"},
                    {"name": "1.1.0", "last_updated": "2024-01-11T00:00:00Z"}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let tags = hub_client(&server).try_list_tags(&TagQuery::all("demo")).await.unwrap();

    page1.assert_async().await;
    page2.assert_async().await;
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["1.0.0", "1.1.0", "1.1.0-rc1"]);
    assert_eq!(tags[0].digest.as_deref(), Some("sha256:a"));
    assert_eq!(tags[0].size, Some(10));
    assert_eq!(
        tags[1].created,
        Some(Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_docker_hub_listing_failure() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/repositories/library/missing/tags")
        .match_query(Matcher::Any)
        .with_status(404)
        .with_body(r#"{"message":"object not found"}"#)
        .create_async()
        .await;

    let client = hub_client(&server);
    let query = TagQuery::all("missing");

    let err = client.try_list_tags(&query).await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
    assert!(client.list_tags(&query).await.is_empty());
}

#[tokio::test]
async fn test_docker_hub_single_tag() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/repositories/bitnami/redis/tags/7.2.4")
        .with_body(json!({"name": "7.2.4", "tag_last_pushed": "2024-02-02T10:00:00Z"}).to_string())
        .create_async()
        .await;

    let tag = hub_client(&server)
        .get_tag_metadata("bitnami/redis", "7.2.4")
        .await
        .unwrap();
    assert_eq!(tag.name, "7.2.4");
    assert_eq!(
        tag.created,
        Some(Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap())
    );
}

#[tokio::test]
async fn test_historical_lookup_against_docker_hub() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/repositories/library/demo/tags")
        .match_query(page_query("1"))
        .with_body(
            json!({
                "next": null,
                "results": [
                    {"name": "1.0.0", "last_updated": "2024-01-01T00:00:00Z"},
                    {"name": "1.1.0", "last_updated": "2024-01-11T00:00:00Z"},
                    {"name": "1.1.0-rc1", "last_updated": "2024-01-16T00:00:00Z"},
                    {"name": "latest", "last_updated": "2024-01-21T00:00:00Z"}
                ]
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let resolver = HistoricalResolver::new(Arc::new(hub_client(&server)), Logger::new_quiet());
    let now = Utc.with_ymd_and_hms(2024, 1, 13, 0, 0, 0).unwrap();
    let periods = vec![Period::new("current", 0), Period::new("last_week", 7)];

    let resolution = resolver
        .find_for_periods(&TagQuery::new("demo"), &periods, now)
        .await
        .unwrap();

    assert_eq!(resolution.get("current").map(|t| t.name.as_str()), Some("1.1.0"));
    assert_eq!(resolution.get("last_week").map(|t| t.name.as_str()), Some("1.0.0"));
}

#[tokio::test]
async fn test_oci_challenge_flow() {
    let mut server = Server::new_async().await;
    let challenge = format!(
        r#"Bearer realm="{}/token",service="registry.test",scope="repository:team/app:pull""#,
        server.url()
    );

    let challenge_request = server
        .mock("GET", "/v2/team/app/tags/list")
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .with_header("www-authenticate", &challenge)
        .create_async()
        .await;
    let token = server
        .mock("GET", "/token")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("service".into(), "registry.test".into()),
            Matcher::UrlEncoded("scope".into(), "repository:team/app:pull".into()),
        ]))
        .with_body(r#"{"token":"secret"}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/team/app/tags/list")
        .match_query(Matcher::UrlEncoded("n".into(), "100".into()))
        .match_header("authorization", "Bearer secret")
        .with_body(r#"{"name":"team/app","tags":["1.0.0","latest"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/team/app/manifests/1.0.0")
        .match_header("authorization", "Bearer secret")
        .with_header("docker-content-digest", "sha256:manifest1")
        .with_body(
            json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "config": {"digest": "sha256:cfg1", "size": 100},
                "layers": [{"digest": "sha256:l1", "size": 300}, {"digest": "sha256:l2", "size": 700}]
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/v2/team/app/blobs/sha256:cfg1")
        .match_header("authorization", "Bearer secret")
        .with_body(r#"{"created":"2024-03-01T12:00:00.5Z","architecture":"amd64"}"#)
        .create_async()
        .await;

    let client = oci_client(RegistryKind::Oci, RegistryEndpoint::oci(server.url()));
    let tags = client.try_list_tags(&TagQuery::new("team/app")).await.unwrap();

    challenge_request.assert_async().await;
    token.assert_async().await;
    assert_eq!(tags.len(), 1);
    let tag = &tags[0];
    assert_eq!(tag.name, "1.0.0");
    assert_eq!(tag.digest.as_deref(), Some("sha256:manifest1"));
    assert_eq!(tag.size, Some(1000));
    assert_eq!(tag.created.map(|c| c.timestamp()), Some(1_709_294_400));
    assert_eq!(tag.metadata["schemaVersion"], json!(2));
}

#[tokio::test]
async fn test_oci_open_registry_needs_no_token() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/app/tags/list")
        .with_body(r#"{"tags":[]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/app/tags/list")
        .match_query(Matcher::Any)
        .match_header("authorization", Matcher::Missing)
        .with_body(r#"{"tags":["2.0"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/app/manifests/2.0")
        .with_body(r#"{"schemaVersion":2}"#)
        .create_async()
        .await;

    let client = oci_client(RegistryKind::Oci, RegistryEndpoint::oci(server.url()));
    let tags = client.try_list_tags(&TagQuery::all("app")).await.unwrap();

    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].created, None);
    assert!(client.token_cache().cached("app").is_some());
}

#[tokio::test]
async fn test_chainguard_anonymous_token() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("GET", "/token")
        .match_query(Matcher::UrlEncoded(
            "scope".into(),
            "repository:chainguard/python:pull".into(),
        ))
        .with_body(r#"{"access_token":"anon"}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/chainguard/python/tags/list")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer anon")
        .with_body(r#"{"tags":["3.12.1","3.12.1-dev"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/chainguard/python/manifests/3.12.1")
        .match_header("authorization", "Bearer anon")
        .with_body(r#"{"schemaVersion":2,"config":{"digest":"sha256:c"},"layers":[]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/chainguard/python/blobs/sha256:c")
        .with_body(r#"{"created":"2024-05-05T05:05:05Z"}"#)
        .create_async()
        .await;

    let client = oci_client(
        RegistryKind::Chainguard,
        RegistryEndpoint::chainguard().with_base_url(server.url()),
    );
    let tags = client.try_list_tags(&TagQuery::new("python")).await.unwrap();

    // The token is fetched once and reused for every request of the repository.
    token.assert_async().await;
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["3.12.1"]);
    assert_eq!(tags[0].size, None);
    assert!(tags[0].created.is_some());
}

#[tokio::test]
async fn test_oci_follows_link_pagination() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/app/tags/list")
        .match_query(Matcher::Exact("n=100".into()))
        .with_header("link", r#"</v2/app/tags/list?n=100&last=b>; rel="next""#)
        .with_body(r#"{"tags":["a","b"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/app/tags/list")
        .match_query(Matcher::UrlEncoded("last".into(), "b".into()))
        .with_body(r#"{"tags":["b","c"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/v2/app/manifests/".into()))
        .with_status(404)
        .create_async()
        .await;

    let endpoint = RegistryEndpoint::new(server.url(), AuthScheme::None);
    let client = oci_client(RegistryKind::Oci, endpoint);
    let tags = client.try_list_tags(&TagQuery::all("app")).await.unwrap();

    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_metadata_failure_keeps_name_only_tag() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/app/tags/list")
        .match_query(Matcher::Any)
        .with_body(r#"{"tags":["1.0.0","1.1.0"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/app/manifests/1.0.0")
        .with_body(r#"{"schemaVersion":2,"layers":[{"size":5}]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/app/manifests/1.1.0")
        .with_status(500)
        .with_body("boom")
        .create_async()
        .await;

    let endpoint = RegistryEndpoint::new(server.url(), AuthScheme::None);
    let client = oci_client(RegistryKind::Mcr, endpoint);
    let tags = client.try_list_tags(&TagQuery::new("app")).await.unwrap();

    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].size, Some(5));
    assert_eq!(tags[1].name, "1.1.0");
    assert!(tags[1].created.is_none() && tags[1].digest.is_none() && tags[1].metadata.is_empty());
}

#[tokio::test]
async fn test_oci_index_is_followed_to_platform_manifest() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/app/manifests/2.0.0")
        .with_header("docker-content-digest", "sha256:index")
        .with_body(
            json!({
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": [
                    {"digest": "sha256:arm", "platform": {"os": "linux", "architecture": "arm64"}},
                    {"digest": "sha256:amd", "platform": {"os": "linux", "architecture": "amd64"}}
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;
    let child = server
        .mock("GET", "/v2/app/manifests/sha256:amd")
        .with_body(
            json!({
                "schemaVersion": 2,
                "config": {"digest": "sha256:cfg"},
                "layers": [{"size": 40}, {"size": 2}]
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/v2/app/blobs/sha256:cfg")
        .with_body(r#"{"created":"2023-11-30T23:59:59Z"}"#)
        .create_async()
        .await;

    let endpoint = RegistryEndpoint::new(server.url(), AuthScheme::None);
    let client = oci_client(RegistryKind::Oci, endpoint);
    let tag = client.get_tag_metadata("app", "2.0.0").await.unwrap();

    child.assert_async().await;
    assert_eq!(tag.digest.as_deref(), Some("sha256:index"));
    assert_eq!(tag.size, Some(42));
    assert_eq!(
        tag.created,
        Some(Utc.with_ymd_and_hms(2023, 11, 30, 23, 59, 59).unwrap())
    );
}

#[tokio::test]
async fn test_oci_token_failure_is_not_cached() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("GET", "/token")
        .match_query(Matcher::Any)
        .with_status(403)
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/chainguard/app/tags/list")
        .match_query(Matcher::Any)
        .with_status(401)
        .create_async()
        .await;

    let client = oci_client(
        RegistryKind::Chainguard,
        RegistryEndpoint::chainguard().with_base_url(server.url()),
    );
    let query = TagQuery::new("app");

    // Listing proceeds unauthenticated and fails on the registry's 401.
    assert!(client.try_list_tags(&query).await.is_err());
    assert!(client.try_list_tags(&query).await.is_err());
    token.assert_async().await;
    assert!(client.token_cache().cached("chainguard/app").is_none());
}

const SHORT_TIMEOUT: Duration = Duration::from_millis(500);

/// Listing endpoint that answers, then holds the body well past `SHORT_TIMEOUT`.
///
/// The body trickles leading whitespace so the writer notices a dropped
/// connection within one tick; the mock server is single-threaded and would
/// otherwise stall every other request until the writer finished.
async fn stalled_listing(server: &mut Server, repository: &str) -> mockito::Mock {
    server
        .mock("GET", format!("/v2/repositories/library/{}/tags", repository).as_str())
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            for _ in 0..60 {
                std::thread::sleep(Duration::from_millis(50));
                w.write_all(b" ")?;
            }
            w.write_all(br#"{"next": null, "results": [{"name": "9.9.9"}]}"#)
        })
        .create_async()
        .await
}

async fn quick_listing(server: &mut Server, repository: &str) -> mockito::Mock {
    server
        .mock("GET", format!("/v2/repositories/library/{}/tags", repository).as_str())
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "next": null,
                "results": [{"name": "1.0.0", "last_updated": "2024-01-01T00:00:00Z"}]
            })
            .to_string(),
        )
        .create_async()
        .await
}

#[tokio::test]
async fn test_stalled_listing_times_out() {
    let mut server = Server::new_async().await;
    let _slow = stalled_listing(&mut server, "slow").await;

    let endpoint = RegistryEndpoint::docker_hub()
        .with_base_url(server.url())
        .with_min_delay(Duration::ZERO)
        .with_timeout(SHORT_TIMEOUT);
    let client = DockerHubClient::new(endpoint, Logger::new_quiet()).unwrap();
    let query = TagQuery::all("slow");

    let started = std::time::Instant::now();
    let result = client.try_list_tags(&query).await;
    assert!(matches!(result, Err(RegistryError::Network(_))), "got {:?}", result);
    assert!(started.elapsed() < Duration::from_secs(2));

    assert!(client.list_tags(&query).await.is_empty());
}

#[tokio::test]
async fn test_timed_out_mapping_is_the_only_failure() {
    let mut server = Server::new_async().await;
    let _slow = stalled_listing(&mut server, "slow").await;
    let _demo = quick_listing(&mut server, "demo").await;
    let _other = quick_listing(&mut server, "other").await;

    let clients = RegistryClients::new(Logger::new_quiet()).with_endpoint(
        RegistryKind::DockerHub,
        RegistryEndpoint::docker_hub()
            .with_base_url(server.url())
            .with_min_delay(Duration::ZERO)
            .with_timeout(SHORT_TIMEOUT),
    );
    let clients = Arc::new(clients);
    let hub = |image: &str| ImageCoordinate::new(RegistryKind::DockerHub, image);
    let mappings = vec![
        Mapping::new(hub("demo"), hub("other")),
        Mapping::new(hub("slow"), hub("demo")),
        Mapping::new(hub("other"), hub("demo")),
    ];

    let mut reports = Vec::new();
    for workers in [1, 3] {
        let report = BatchResolutionDriver::new(Arc::clone(&clients) as Arc<dyn ClientFactory>, Logger::new_quiet())
            .with_periods(vec![Period::new("current", 0)])
            .with_workers(workers)
            .with_now(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
            .resolve_all(mappings.clone())
            .await;

        let failed: Vec<usize> = report
            .results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.error.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(failed, vec![1], "workers = {}", workers);
        assert!(report.results[1].upstream_versions.is_none());
        assert_eq!(report.statistics.resolved, 2, "workers = {}", workers);
        assert_eq!(report.statistics.failed, 1, "workers = {}", workers);
        let current = report.results[0].upstream_versions.as_ref().unwrap().get("current");
        assert_eq!(current.map(|t| t.name.as_str()), Some("1.0.0"));
        reports.push(report);
    }
    assert_eq!(reports[0].results, reports[1].results);
}

#[tokio::test]
async fn test_docker_hub_repository_discovery() {
    let mut server = Server::new_async().await;
    let next = format!("{}/v2/repositories/library?page=2", server.url());
    server
        .mock("GET", "/v2/repositories/library")
        .match_query(page_query("1"))
        .with_body(json!({"next": next, "results": [{"name": "python"}, {"name": "node"}]}).to_string())
        .create_async()
        .await;
    server
        .mock("GET", "/v2/repositories/library")
        .match_query(page_query("2"))
        .with_body(json!({"next": null, "results": [{"name": "redis"}, {"name": "nginx"}]}).to_string())
        .create_async()
        .await;
    let bitnami = server
        .mock("GET", "/v2/repositories/bitnami")
        .match_query(page_query("1"))
        .with_body(json!({"next": "", "results": [{"name": "redis"}]}).to_string())
        .expect(1)
        .create_async()
        .await;

    let client = hub_client(&server);
    assert_eq!(
        client.try_list_repositories(None, 3).await.unwrap(),
        vec!["python", "node", "redis"]
    );
    assert_eq!(
        client.try_list_repositories(Some("bitnami"), 10).await.unwrap(),
        vec!["bitnami/redis"]
    );
    bitnami.assert_async().await;
}

#[tokio::test]
async fn test_chainguard_catalog_discovery() {
    let mut server = Server::new_async().await;
    let token = server
        .mock("GET", "/token")
        .match_query(Matcher::UrlEncoded("scope".into(), "registry:catalog:*".into()))
        .with_body(r#"{"token":"cat"}"#)
        .expect(1)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/_catalog")
        .match_query(Matcher::Exact("n=100".into()))
        .match_header("authorization", "Bearer cat")
        .with_header("link", r#"</v2/_catalog?n=100&last=go>; rel="next""#)
        .with_body(r#"{"repositories":["chainguard/python","acme/app","chainguard/go"]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/_catalog")
        .match_query(Matcher::Exact("n=100&last=go".into()))
        .match_header("authorization", "Bearer cat")
        .with_body(r#"{"repositories":["chainguard/static"]}"#)
        .create_async()
        .await;

    let client = oci_client(
        RegistryKind::Chainguard,
        RegistryEndpoint::chainguard().with_base_url(server.url()),
    );
    let repositories = client.try_list_repositories(None, 100).await.unwrap();

    token.assert_async().await;
    assert_eq!(
        repositories,
        vec!["chainguard/python", "chainguard/go", "chainguard/static"]
    );
    assert!(client.token_cache().cached("_catalog").is_some());
    assert!(client.token_cache().cached("chainguard/python").is_none());
}

#[tokio::test]
async fn test_catalog_challenge_uses_catalog_scope() {
    let mut server = Server::new_async().await;
    let realm = format!("{}/auth", server.url());
    server
        .mock("GET", "/v2/_catalog")
        .match_query(Matcher::Any)
        .match_header("authorization", Matcher::Missing)
        .with_status(401)
        .with_header(
            "www-authenticate",
            &format!(r#"Bearer realm="{}",service="reg""#, realm),
        )
        .create_async()
        .await;
    server
        .mock("GET", "/auth")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("service".into(), "reg".into()),
            Matcher::UrlEncoded("scope".into(), "registry:catalog:*".into()),
        ]))
        .with_body(r#"{"token":"cat"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/v2/_catalog")
        .match_query(Matcher::Exact("n=100".into()))
        .match_header("authorization", "Bearer cat")
        .with_body(r#"{"repositories":["a","b","c"]}"#)
        .create_async()
        .await;

    let client = oci_client(RegistryKind::Oci, RegistryEndpoint::oci(server.url()));
    assert_eq!(client.try_list_repositories(None, 2).await.unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_missing_catalog_reads_as_no_repositories() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/v2/_catalog")
        .match_query(Matcher::Any)
        .with_status(404)
        .create_async()
        .await;

    let endpoint = RegistryEndpoint::new(server.url(), AuthScheme::None);
    let client = oci_client(RegistryKind::Mcr, endpoint);

    assert!(matches!(
        client.try_list_repositories(Some("dotnet"), 10).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(client.list_repositories(Some("dotnet"), 10).await.is_empty());
}
