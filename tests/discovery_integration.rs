//! End-to-end discovery tests against a mocked search endpoint.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use skillshelf_core::auth::CookieStore;
use skillshelf_core::client::ApiClient;
use skillshelf_core::config::EngineConfig;
use skillshelf_core::discovery::{
    DiscoveryController, DiscoveryOptions, read_result_file,
};
use skillshelf_core::events::EventBus;
use skillshelf_core::progress::ProgressTracker;
use skillshelf_core::search::{SearchAdapter, SearchApi};
use skillshelf_core::skills::{Skill, SkillList};

fn test_config(server: &MockServer, dir: &Path) -> EngineConfig {
    EngineConfig {
        base_url: server.uri(),
        book_ids_dir: dir.join("book_ids"),
        progress_file: dir.join("output/progress.json"),
        request_delay_ms: 0,
        skill_delay_ms: 0,
        workers: 1,
        ..EngineConfig::default()
    }
}

fn controller(
    server: &MockServer,
    dir: &Path,
    strict: bool,
) -> (DiscoveryController, Arc<ProgressTracker>) {
    let config = test_config(server, dir);
    let client = Arc::new(ApiClient::new(Arc::new(CookieStore::empty()), 10, 30));
    let adapter = SearchAdapter::new(client, server.uri(), SearchApi::V2);
    let tracker =
        Arc::new(ProgressTracker::open(&config.progress_file, None).expect("tracker opens"));
    let events = Arc::new(EventBus::new());
    (
        DiscoveryController::new(adapter, config, strict, events, Arc::clone(&tracker)),
        tracker,
    )
}

fn skill_list(skills: Vec<Skill>) -> SkillList {
    SkillList {
        skills,
        lenient: false,
        catalog: Vec::new(),
    }
}

fn book_item(index: u32) -> serde_json::Value {
    serde_json::json!({
        "archive_id": format!("arch-{index}"),
        "isbn": format!("97815000000{index:02}"),
        "title": format!("Protocol Buffers in Practice, Volume {index}"),
        "format": "book",
        "language": "en",
        "url": format!("https://example.com/api/v1/book/97815000000{index:02}/"),
    })
}

#[tokio::test]
async fn narrow_skill_discovers_all_books() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    let items: Vec<serde_json::Value> = (0..12).map(book_item).collect();
    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .and(query_param("page", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": items,
            "next": format!("{}/api/v2/search/?page=1", server.uri()),
            "total": 12
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [],
            "next": null,
            "total": 12
        })))
        .mount(&server)
        .await;

    let (controller, tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![Skill {
        name: "Protocol Buffers".to_string(),
        expected: Some(12),
    }]);

    let summary = controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("discovery runs");

    assert_eq!(summary.successful_skills, 1);
    assert_eq!(summary.total_books_discovered, 12);
    assert!(summary.failed_skills.is_empty());

    let file = read_result_file(&dir.path().join("book_ids/protocol_buffers_books.json"))
        .expect("result file exists");
    assert_eq!(file.skill_name, "Protocol Buffers");
    assert_eq!(file.total_books, 12);
    assert_eq!(file.books.len(), 12);

    // No identifier appears twice
    let mut ids: Vec<&str> = file.books.iter().map(|b| b.id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 12);

    // Every record satisfies the output invariants
    for book in &file.books {
        assert!(!book.id.is_empty());
        assert!(book.title.len() >= 5);
    }

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.skill_stats.completed, 1);
    assert_eq!(snapshot.skill_stats.failed, 0);
    assert_eq!(snapshot.book_stats.total, 12);
}

#[tokio::test]
async fn broad_skill_is_skipped_without_a_result_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    // No search mock: a request would 404 and fail the test via the summary.
    let (controller, tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![Skill {
        name: "Business".to_string(),
        expected: Some(8000),
    }]);

    let summary = controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("discovery runs");

    assert_eq!(summary.skipped_skills, vec!["Business".to_string()]);
    assert_eq!(summary.successful_skills, 0);
    assert!(!dir.path().join("book_ids/business_books.json").exists());
    assert!(
        tracker
            .snapshot()
            .skills_skipped
            .contains(&"Business".to_string())
    );
}

#[tokio::test]
async fn boundary_expected_count_exactly_at_cap_is_processed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [book_item(1)],
            "next": null,
            "total": 1
        })))
        .mount(&server)
        .await;

    let (controller, _tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![
        Skill {
            name: "Exactly At Cap".to_string(),
            expected: Some(500),
        },
        Skill {
            name: "One Over Cap".to_string(),
            expected: Some(501),
        },
    ]);

    let summary = controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("discovery runs");

    assert_eq!(summary.successful_skills, 1);
    assert_eq!(summary.skipped_skills, vec!["One Over Cap".to_string()]);
}

#[tokio::test]
async fn chapter_titled_items_never_reach_the_result_file() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [
                book_item(1),
                {
                    "archive_id": "arch-chapter",
                    "isbn": "9781234567890",
                    "title": "Chapter 3: The Compiler",
                    "format": "book",
                    "language": "en"
                },
            ],
            "next": null,
            "total": 2
        })))
        .mount(&server)
        .await;

    let (controller, _tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![Skill {
        name: "Compilers".to_string(),
        expected: Some(10),
    }]);

    controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("discovery runs");

    let file = read_result_file(&dir.path().join("book_ids/compilers_books.json"))
        .expect("result file exists");
    assert_eq!(file.total_books, 1);
    assert!(file.books.iter().all(|b| b.isbn != "9781234567890"));
}

#[tokio::test]
async fn second_run_skips_existing_result_files() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [book_item(1)],
            "next": null,
            "total": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (controller, _tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![Skill {
        name: "Rust Programming".to_string(),
        expected: Some(1),
    }]);

    let first = controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("first run");
    assert_eq!(first.successful_skills, 1);

    let second = controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("second run");
    assert_eq!(second.already_discovered, 1);
    assert_eq!(second.successful_skills, 0);
}

#[tokio::test]
async fn transient_failures_are_retried_then_succeed() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    // First hit fails, the retry succeeds.
    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [book_item(1)],
            "next": null,
            "total": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (controller, _tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![Skill {
        name: "Retry Topic".to_string(),
        expected: Some(1),
    }]);

    let summary = controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("discovery runs");
    assert_eq!(summary.successful_skills, 1);
}

#[tokio::test]
async fn one_failing_skill_does_not_abort_the_run() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .and(query_param("topics", "Unknown Topic"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v2/search/"))
        .and(query_param("topics", "Known Topic"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [book_item(2)],
            "next": null,
            "total": 1
        })))
        .mount(&server)
        .await;

    let (controller, tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![
        Skill {
            name: "Unknown Topic".to_string(),
            expected: Some(5),
        },
        Skill {
            name: "Known Topic".to_string(),
            expected: Some(5),
        },
    ]);

    let summary = controller
        .run(&skills, &DiscoveryOptions::default())
        .await
        .expect("discovery runs");

    assert_eq!(summary.successful_skills, 1);
    assert!(summary.failed_skills.contains_key("Unknown Topic"));
    assert!(
        tracker
            .snapshot()
            .skills_failed
            .contains_key("Unknown Topic")
    );
}

#[tokio::test]
async fn dry_run_issues_no_requests() {
    let server = MockServer::start().await;
    let dir = TempDir::new().expect("tempdir");

    // Any request would panic: nothing is mounted and requests 404, which
    // would show up as a failed skill below.
    let (controller, _tracker) = controller(&server, dir.path(), false);
    let skills = skill_list(vec![Skill {
        name: "Anything".to_string(),
        expected: Some(3),
    }]);

    let summary = controller
        .run(
            &skills,
            &DiscoveryOptions {
                dry_run: true,
                ..DiscoveryOptions::default()
            },
        )
        .await
        .expect("dry run");

    assert_eq!(summary.skills_processed, 1);
    assert!(summary.failed_skills.is_empty());
    assert!(!dir.path().join("book_ids/anything_books.json").exists());
}
