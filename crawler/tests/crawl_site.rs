use sitesearch_core::config::{DelaySettings, IndexingSettings};
use sitesearch_core::{IndexBuilder, LemmaExtractor, SiteStatus, Store};
use sitesearch_crawler::{CrawlError, SiteCrawler};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings() -> IndexingSettings {
    IndexingSettings {
        timeout_ms: 2_000,
        min_delay_ms: 0,
        max_retries: 2,
        max_depth: 2,
        max_concurrent_pages: 4,
        delays: DelaySettings { default: 0, site_specific: HashMap::new() },
        ..IndexingSettings::default()
    }
}

fn page_html(title: &str, body: &str, links: &[&str]) -> String {
    let anchors: String = links.iter().map(|href| format!(r#"<a href="{href}">ссылка</a>"#)).collect();
    format!("<html><head><title>{title}</title></head><body><p>{body}</p>{anchors}</body></html>")
}

async fn mount(server: &MockServer, at: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(server)
        .await;
}

fn crawler_for(store: &Store, url: &str, settings: &IndexingSettings, cancel: CancellationToken) -> SiteCrawler {
    let site = store.recreate_site(url, "Тестовый сайт").unwrap();
    let builder = IndexBuilder::new(store.clone(), Arc::new(LemmaExtractor::russian()));
    SiteCrawler::new(site, settings, store.clone(), builder, cancel).unwrap()
}

async fn small_site() -> MockServer {
    let server = MockServer::start().await;
    mount(
        &server,
        "/",
        page_html(
            "Главная",
            "Магазин электроники",
            &["/a", "/b/", "a", "/login", "/x.php", "/list?page=2", "https://example.org/", "mailto:shop@example.org", "/deep/1"],
        ),
    )
    .await;
    mount(&server, "/a", page_html("Смартфоны", "Новые смартфоны в наличии", &["/", "/a/child"])).await;
    mount(&server, "/b/", page_html("Ноутбуки", "Лёгкие ноутбуки", &[])).await;
    mount(&server, "/a/child", page_html("Чехлы", "Чехлы для смартфонов", &[])).await;
    mount(&server, "/deep/1", page_html("Глубже", "Первый уровень", &["/deep/2"])).await;
    mount(&server, "/deep/2", page_html("Ещё глубже", "Второй уровень", &["/deep/3"])).await;
    mount(&server, "/deep/3", page_html("Слишком глубоко", "Третий уровень", &[])).await;
    server
}

#[tokio::test]
async fn crawls_site_breadth_first_within_limits() {
    let server = small_site().await;
    let store = Store::temporary().unwrap();
    let crawler = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());

    let report = crawler.crawl_site().await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.saved, 6);
    assert_eq!(report.failed, 0);

    let site_id = crawler.site().id;
    for path in ["/", "/a", "/b", "/a/child", "/deep/1", "/deep/2"] {
        assert!(store.find_page_by_path(site_id, path).unwrap().is_some(), "{path}");
    }
    for path in ["/deep/3", "/login", "/x.php", "/list"] {
        assert!(store.find_page_by_path(site_id, path).unwrap().is_none(), "{path}");
    }
    assert_eq!(store.count_pages(site_id).unwrap(), 6);
    assert_eq!(store.site(site_id).unwrap().unwrap().status, SiteStatus::Indexed);
}

#[tokio::test]
async fn lemma_frequency_matches_pages_with_postings() {
    let server = small_site().await;
    let store = Store::temporary().unwrap();
    let crawler = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());
    crawler.crawl_site().await.unwrap();

    let lemmas = store.lemmas_for_site(crawler.site().id).unwrap();
    assert!(!lemmas.is_empty());
    for lemma in lemmas {
        let pages = store.pages_with_lemma(lemma.id).unwrap();
        assert_eq!(lemma.frequency, pages.len() as u64, "{}", lemma.lemma);
    }
}

#[tokio::test]
async fn stops_admitting_at_page_cap() {
    let server = MockServer::start().await;
    let links: Vec<String> = (0..10).map(|i| format!("/p{i}")).collect();
    let refs: Vec<&str> = links.iter().map(String::as_str).collect();
    mount(&server, "/", page_html("Список", "Каталог товаров", &refs)).await;
    for link in &links {
        mount(&server, link, page_html("Товар", "Описание товара", &[])).await;
    }

    let store = Store::temporary().unwrap();
    let settings = IndexingSettings { max_pages_per_site: 3, ..settings() };
    let crawler = crawler_for(&store, &server.uri(), &settings, CancellationToken::new());
    let report = crawler.crawl_site().await.unwrap();

    assert_eq!(report.discovered, 3);
    assert_eq!(report.saved, 3);
    assert_eq!(store.count_pages(crawler.site().id).unwrap(), 3);
}

#[tokio::test]
async fn retries_server_errors_and_abandons_exhausted_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount(&server, "/", page_html("Главная", "Добро пожаловать", &["/gone"])).await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let store = Store::temporary().unwrap();
    let crawler = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());
    let report = crawler.crawl_site().await.unwrap();

    assert_eq!(report.saved, 1);
    assert_eq!(report.failed, 1);
    assert!(store.find_page_by_path(crawler.site().id, "/gone").unwrap().is_none());
}

#[tokio::test]
async fn cancellation_leaves_status_to_the_canceller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page_html("Медленно", "Очень медленная страница", &[]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let store = Store::temporary().unwrap();
    let cancel = CancellationToken::new();
    let settings = IndexingSettings { timeout_ms: 10_000, ..settings() };
    let crawler = crawler_for(&store, &server.uri(), &settings, cancel.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    let report = tokio::time::timeout(Duration::from_secs(3), crawler.crawl_site())
        .await
        .expect("crawl should stop promptly")
        .unwrap();
    canceller.await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.saved, 0);
    assert_eq!(store.site(crawler.site().id).unwrap().unwrap().status, SiteStatus::Indexing);
}

#[tokio::test]
async fn rerun_is_idempotent() {
    let server = small_site().await;
    let store = Store::temporary().unwrap();

    let first = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());
    first.crawl_site().await.unwrap();
    let pages = store.total_pages();
    let lemmas = store.total_lemmas();

    let second = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());
    second.crawl_site().await.unwrap();
    assert_eq!(store.total_pages(), pages);
    assert_eq!(store.total_lemmas(), lemmas);
    assert_eq!(store.sites().unwrap().len(), 1);
}

#[tokio::test]
async fn single_page_replaces_existing_page() {
    let server = MockServer::start().await;
    mount(&server, "/", page_html("Главная", "Рыжая кошка", &[])).await;

    let store = Store::temporary().unwrap();
    let crawler = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());
    crawler.crawl_site().await.unwrap();
    let site_id = crawler.site().id;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_html("Главная", "Рыжая собака", &[])))
        .with_priority(1)
        .mount(&server)
        .await;
    let page = crawler.crawl_single_page(&format!("{}/", server.uri())).await.unwrap();
    assert_eq!(page.path, "/");
    assert_eq!(store.count_pages(site_id).unwrap(), 1);

    let extractor = LemmaExtractor::russian();
    let stem = |word: &str| extractor.extract_set(word).into_iter().next().unwrap();
    assert_eq!(store.find_lemma(site_id, &stem("кошка")).unwrap().unwrap().frequency, 0);
    assert_eq!(store.find_lemma(site_id, &stem("собака")).unwrap().unwrap().frequency, 1);
    assert_eq!(store.find_lemma(site_id, &stem("рыжая")).unwrap().unwrap().frequency, 1);
}

#[tokio::test]
async fn single_page_surfaces_http_errors() {
    let server = MockServer::start().await;
    let store = Store::temporary().unwrap();
    let crawler = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());

    let missing = crawler.crawl_single_page(&format!("{}/missing", server.uri())).await;
    assert!(matches!(missing, Err(CrawlError::Http { code: 404, .. })));

    let outside = crawler.crawl_single_page("https://example.org/page").await;
    assert!(matches!(outside, Err(CrawlError::OutsideSite(_))));
    assert_eq!(store.count_pages(crawler.site().id).unwrap(), 0);
}

#[tokio::test]
async fn relative_links_resolve_against_the_fetched_url() {
    let server = MockServer::start().await;
    mount(&server, "/", page_html("Главная", "Каталог магазина", &["/catalog/", "/old"])).await;
    mount(&server, "/catalog/", page_html("Каталог", "Все товары", &["item1"])).await;
    mount(&server, "/catalog/item1", page_html("Товар", "Первый товар", &[])).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new/"))
        .mount(&server)
        .await;
    mount(&server, "/new/", page_html("Новое", "Переехавший раздел", &["page"])).await;
    mount(&server, "/new/page", page_html("Страница", "Страница раздела", &[])).await;

    let store = Store::temporary().unwrap();
    let crawler = crawler_for(&store, &server.uri(), &settings(), CancellationToken::new());
    let report = crawler.crawl_site().await.unwrap();
    assert_eq!(report.failed, 0);

    let site_id = crawler.site().id;
    for path in ["/", "/catalog", "/catalog/item1", "/old", "/new/page"] {
        assert!(store.find_page_by_path(site_id, path).unwrap().is_some(), "{path}");
    }
    let requested: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert!(!requested.iter().any(|p| p == "/item1" || p == "/page"), "{requested:?}");
}

#[tokio::test]
async fn exclude_patterns_reject_linked_paths() {
    let server = MockServer::start().await;
    mount(&server, "/", page_html("Главная", "Разделы сайта", &["/private/doc", "/public"])).await;
    mount(&server, "/private/doc", page_html("Закрыто", "Служебный документ", &[])).await;
    mount(&server, "/public", page_html("Открыто", "Публичная страница", &[])).await;

    let store = Store::temporary().unwrap();
    let settings = IndexingSettings { exclude_patterns: vec!["/private/.*".to_string()], ..settings() };
    let crawler = crawler_for(&store, &server.uri(), &settings, CancellationToken::new());
    let report = crawler.crawl_site().await.unwrap();

    assert_eq!(report.saved, 2);
    let site_id = crawler.site().id;
    assert!(store.find_page_by_path(site_id, "/public").unwrap().is_some());
    assert!(store.find_page_by_path(site_id, "/private/doc").unwrap().is_none());
}

#[tokio::test]
async fn per_domain_depth_overrides_global_depth() {
    let server = MockServer::start().await;
    mount(&server, "/", page_html("Главная", "Начало", &["/a"])).await;
    mount(&server, "/a", page_html("Первый", "Первый уровень", &["/b"])).await;
    mount(&server, "/b", page_html("Второй", "Второй уровень", &[])).await;

    let store = Store::temporary().unwrap();
    let settings = IndexingSettings {
        max_depth: 5,
        site_depths: HashMap::from([("127.0.0.1".to_string(), 1)]),
        ..settings()
    };
    let crawler = crawler_for(&store, &server.uri(), &settings, CancellationToken::new());
    crawler.crawl_site().await.unwrap();

    let site_id = crawler.site().id;
    assert!(store.find_page_by_path(site_id, "/a").unwrap().is_some());
    assert!(store.find_page_by_path(site_id, "/b").unwrap().is_none());
}

#[tokio::test]
async fn per_domain_delay_paces_fetches() {
    let server = MockServer::start().await;
    mount(&server, "/", page_html("Главная", "Единственная страница", &[])).await;

    let store = Store::temporary().unwrap();
    let settings = IndexingSettings {
        delays: DelaySettings { default: 0, site_specific: HashMap::from([("127.0.0.1".to_string(), 300)]) },
        ..settings()
    };
    let crawler = crawler_for(&store, &server.uri(), &settings, CancellationToken::new());
    let report = crawler.crawl_site().await.unwrap();

    assert_eq!(report.saved, 1);
    assert!(report.elapsed_ms >= 300, "elapsed {} ms", report.elapsed_ms);
}

#[tokio::test]
async fn long_crawls_touch_site_status() {
    let server = MockServer::start().await;
    let mut links = vec!["/slow".to_string()];
    links.extend((0..120).map(|i| format!("/p{i}")));
    let refs: Vec<&str> = links.iter().map(String::as_str).collect();
    mount(&server, "/", page_html("Список", "Большой каталог", &refs)).await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page_html("Медленно", "Медленная страница", &[]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page_html("Товар", "Описание товара", &[])))
        .with_priority(10)
        .mount(&server)
        .await;

    let store = Store::temporary().unwrap();
    let cancel = CancellationToken::new();
    let settings = IndexingSettings { timeout_ms: 10_000, ..settings() };
    let crawler = crawler_for(&store, &server.uri(), &settings, cancel.clone());
    let site = crawler.site().clone();
    let crawl = tokio::spawn(async move { crawler.crawl_site().await });

    let touched = tokio::time::timeout(Duration::from_secs(4), async {
        loop {
            let current = store.site(site.id).unwrap().unwrap();
            if current.status_time > site.status_time {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("status should be touched after 100 pages");
    assert_eq!(touched.status, SiteStatus::Indexing);
    assert!(store.count_pages(site.id).unwrap() >= 100);

    cancel.cancel();
    let report = crawl.await.unwrap().unwrap();
    assert!(report.cancelled);
}
