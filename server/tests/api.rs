use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use sitesearch_core::config::{DelaySettings, IndexingSettings, OrchestratorSettings, SiteConfig};
use sitesearch_core::html::clean_html;
use sitesearch_core::{IndexBuilder, LemmaExtractor, Settings, SiteStatus, Store};
use sitesearch_server::{build_app, AppState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(sites: &[&str]) -> Settings {
    Settings {
        sites: sites
            .iter()
            .map(|url| SiteConfig { url: url.to_string(), name: "Новости".to_string() })
            .collect(),
        indexing: IndexingSettings {
            min_delay_ms: 0,
            max_retries: 1,
            delays: DelaySettings { default: 0, site_specific: HashMap::new() },
            ..IndexingSettings::default()
        },
        orchestrator: OrchestratorSettings {
            monitor_interval_ms: 20,
            stop_grace_ms: 500,
            ..OrchestratorSettings::default()
        },
        ..Settings::default()
    }
}

/// Ten pages under https://news.ru; only /horses mentions "жеребец", three times.
fn build_tiny_index(store: &Store) {
    let site = store.recreate_site("https://news.ru", "Новости").unwrap();
    let builder = IndexBuilder::new(store.clone(), Arc::new(LemmaExtractor::russian()));
    let add = |path: &str, title: &str, body: &str| {
        let html = format!("<html><head><title>{title}</title></head><body><p>{body}</p></body></html>");
        let page = store.save_page(site.id, path, 200, &html).unwrap();
        builder.index_page_content(&page, &clean_html(&html)).unwrap();
    };
    add("/horses", "Кони", "Жеребец, жеребец и ещё раз жеребец");
    for i in 0..9 {
        add(&format!("/news/{i}"), "Сводка", "Погода сегодня");
    }
    store.set_site_status(site.id, SiteStatus::Indexed, None).unwrap();
}

async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body: Bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let store = Store::temporary().unwrap();
    build_tiny_index(&store);
    let app = build_app(AppState::new(settings(&["https://news.ru"]), store));

    let (status, json) = call(app, "GET", "/api/search?query=%D0%B6%D0%B5%D1%80%D0%B5%D0%B1%D0%B5%D1%86").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], true);
    assert_eq!(json["count"], 1);
    let hit = &json["data"][0];
    assert_eq!(hit["site"], "https://news.ru");
    assert_eq!(hit["siteName"], "Новости");
    assert_eq!(hit["uri"], "/horses");
    assert_eq!(hit["title"], "Кони");
    assert_eq!(hit["relevance"], 1.0);
    assert!(hit["snippet"].as_str().unwrap().contains("<b>"));
}

#[tokio::test]
async fn search_errors_are_reported_in_body() {
    let store = Store::temporary().unwrap();
    let app = build_app(AppState::new(settings(&[]), store.clone()));

    let (status, json) = call(app.clone(), "GET", "/api/search?query=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], false);
    assert!(json["error"].is_string());

    let (_, json) = call(app.clone(), "GET", "/api/search?query=%D0%BA%D0%BE%D1%82").await;
    assert_eq!(json["result"], false);

    build_tiny_index(&store);
    let (_, json) = call(app, "GET", "/api/search?query=%D0%BA%D0%BE%D1%82&site=https://other.ru").await;
    assert_eq!(json["result"], false);
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn search_paginates() {
    let store = Store::temporary().unwrap();
    build_tiny_index(&store);
    let site = store.find_site_by_url("https://news.ru").unwrap().unwrap();
    let builder = IndexBuilder::new(store.clone(), Arc::new(LemmaExtractor::russian()));
    for i in 0..3 {
        let page = store.save_page(site.id, &format!("/more/{i}"), 200, "<p>жеребец</p>").unwrap();
        builder.index_page_content(&page, "жеребец").unwrap();
    }
    let app = build_app(AppState::new(settings(&[]), store));

    let (_, json) = call(app, "GET", "/api/search?query=%D0%B6%D0%B5%D1%80%D0%B5%D0%B1%D0%B5%D1%86&offset=1&limit=2").await;
    assert_eq!(json["count"], 4);
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
    assert_eq!(json["data"][0]["title"], "Без названия");
}

#[tokio::test]
async fn statistics_reports_totals_and_details() {
    let store = Store::temporary().unwrap();
    build_tiny_index(&store);
    let app = build_app(AppState::new(settings(&[]), store));

    let (status, json) = call(app, "GET", "/api/statistics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], true);
    let stats = &json["statistics"];
    assert_eq!(stats["total"]["sites"], 1);
    assert_eq!(stats["total"]["pages"], 10);
    assert_eq!(stats["total"]["indexing"], false);
    assert_eq!(stats["detailed"][0]["status"], "INDEXED");
    assert!(stats["detailed"][0]["statusTime"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn indexing_guards_answer_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>медленно</p>").set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;
    let app = build_app(AppState::new(settings(&[server.uri().as_str()]), Store::temporary().unwrap()));

    let (status, json) = call(app.clone(), "GET", "/api/stopIndexing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "indexing not running");

    let (status, json) = call(app.clone(), "GET", "/api/startIndexing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], true);

    let (status, json) = call(app.clone(), "GET", "/api/startIndexing").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "indexing already running");

    let (_, json) = call(app.clone(), "GET", "/api/statistics").await;
    assert_eq!(json["statistics"]["total"]["indexing"], true);

    let (status, _) = call(app, "GET", "/api/stopIndexing").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn index_page_rejects_foreign_urls() {
    let store = Store::temporary().unwrap();
    let app = build_app(AppState::new(settings(&["https://news.ru"]), store.clone()));

    let (status, json) = call(app.clone(), "POST", "/api/indexPage?url=https://elsewhere.ru/page").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["result"], false);
    assert_eq!(json["error"], "could not index page");
    assert!(store.sites().unwrap().is_empty());

    let (status, _) = call(app, "POST", "/api/indexPage").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn index_page_indexes_configured_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><head><title>Т</title></head><body>Жеребец</body></html>"))
        .mount(&server)
        .await;
    let store = Store::temporary().unwrap();
    let app = build_app(AppState::new(settings(&[server.uri().as_str()]), store.clone()));

    let uri = format!("/api/indexPage?url={}/page", server.uri());
    let (status, json) = call(app, "POST", &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"], true);
    assert_eq!(store.total_pages(), 1);
}

#[tokio::test]
async fn malformed_paging_is_reported_in_body() {
    let store = Store::temporary().unwrap();
    build_tiny_index(&store);
    let app = build_app(AppState::new(settings(&[]), store));
    let query = "/api/search?query=%D0%B6%D0%B5%D1%80%D0%B5%D0%B1%D0%B5%D1%86";

    for paging in ["offset=-1", "limit=abc", "offset=1.5"] {
        let (status, json) = call(app.clone(), "GET", &format!("{query}&{paging}")).await;
        assert_eq!(status, StatusCode::OK, "{paging}");
        assert_eq!(json["result"], false, "{paging}");
        assert!(json["error"].is_string(), "{paging}");
        assert_eq!(json["count"], 0);
    }

    let (_, json) = call(app, "GET", &format!("{query}&offset=&limit=")).await;
    assert_eq!(json["result"], true);
    assert_eq!(json["count"], 1);
}
