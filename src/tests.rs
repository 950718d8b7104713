#[cfg(test)]
mod integration_tests {
    use crate::blank::tests::{blank_png, busy_png};
    use crate::testutil::{SimulatedBackend, SimulatedPage};
    use crate::{CaptureRequest, CliRunner, Config, ErrorKind, ResultSink};
    use std::io::Write;
    use std::path::Path;
    use std::sync::Arc;
    use tokio_test::assert_ok;

    fn config_for(dir: &Path, workers: usize) -> Config {
        Config {
            output_dir: dir.to_path_buf(),
            num_concurrent: workers,
            emit_json: false,
            ..Default::default()
        }
    }

    fn png_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".png"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_with_mixed_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let mut list = tempfile::NamedTempFile::new().unwrap();
        writeln!(list, "https://ok.example/").unwrap();
        writeln!(list).unwrap();
        writeln!(list, "  https://slow.example/  ").unwrap();
        writeln!(list, "http://example.com").unwrap();

        let backend = SimulatedBackend::new()
            .with_page("https://slow.example/", SimulatedPage::timing_out())
            .with_page(
                "https://late.example/",
                SimulatedPage::ok().frames(vec![blank_png(), busy_png()]),
            );

        let runner = CliRunner::with_config(
            config_for(dir.path(), 3),
            vec![
                "https://late.example/".to_string(),
                "http://example.com:80".to_string(),
                "https://ok.example/".to_string(),
            ],
            vec![list.path().to_path_buf()],
        );

        let summary = assert_ok!(runner.run_with_backend(Arc::new(backend.clone())).await);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results.len(), 4);
        assert_eq!(summary.metrics.blank_retries, 1);
        assert!(summary.results.iter().all(|r| r.url != "https://slow.example/"));

        assert_eq!(
            png_files(dir.path()),
            vec![
                "example.com_http_80.png",
                "late.example_https_443.png",
                "ok.example_https_443.png",
            ]
        );

        let late = std::fs::read(dir.path().join("late.example_https_443.png")).unwrap();
        assert_eq!(late, busy_png());

        let calls = backend.calls();
        assert_eq!(calls.contexts_opened, 5);
        assert_eq!(calls.contexts_closed, 5);
        assert!(calls.backend_closed);
    }

    #[tokio::test]
    async fn test_results_serialize_like_the_json_dump() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CliRunner::with_config(
            config_for(dir.path(), 1),
            vec!["https://ok.example".to_string()],
            Vec::<std::path::PathBuf>::new(),
        );

        let summary = assert_ok!(runner.run_with_backend(Arc::new(SimulatedBackend::new())).await);
        let json = serde_json::to_value(&summary.results).unwrap();
        let record = &json[0];

        assert_eq!(record["url"], "https://ok.example/");
        assert_eq!(record["request"]["method"], "GET");
        assert_eq!(record["response"]["status"], 200);
        assert_eq!(record["response"]["port"], 443);
        assert!(record["response"]["response_data"].is_string());
        assert!(record["screenshot_data"]
            .as_str()
            .unwrap()
            .starts_with("iVBORw0KGgo"));
        assert_eq!(record["retried"], false);
    }

    #[tokio::test]
    async fn test_empty_input_finishes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::new();
        let runner = CliRunner::with_config(
            config_for(dir.path(), 5),
            Vec::new(),
            Vec::<std::path::PathBuf>::new(),
        );

        let summary = assert_ok!(runner.run_with_backend(Arc::new(backend.clone())).await);

        assert_eq!(summary.total, 0);
        assert!(summary.results.is_empty());
        assert!(png_files(dir.path()).is_empty());
        assert!(backend.calls().backend_closed);
    }

    #[tokio::test]
    async fn test_unreadable_url_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SimulatedBackend::new();
        let runner = CliRunner::with_config(
            config_for(dir.path(), 2),
            vec!["https://ok.example".to_string()],
            vec![dir.path().join("missing.txt")],
        );

        let err = runner
            .run_with_backend(Arc::new(backend.clone()))
            .await
            .unwrap_err();
        let cause = err.downcast_ref::<crate::CaptureError>().unwrap();

        assert_eq!(cause.kind(), ErrorKind::Fatal);
        assert_eq!(backend.calls().contexts_opened, 0);
    }

    #[tokio::test]
    async fn test_unusable_output_directory_is_fatal() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let backend = SimulatedBackend::new();
        let runner = CliRunner::with_config(
            config_for(file.path(), 2),
            vec!["https://ok.example".to_string()],
            Vec::<std::path::PathBuf>::new(),
        );

        let err = runner
            .run_with_backend(Arc::new(backend.clone()))
            .await
            .unwrap_err();

        assert!(err.downcast_ref::<crate::CaptureError>().unwrap().is_fatal());
        assert_eq!(backend.calls().contexts_opened, 0);
    }

    #[tokio::test]
    async fn test_colliding_urls_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CliRunner::with_config(
            config_for(dir.path(), 2),
            vec![
                "http://example.com".to_string(),
                "http://example.com:80/about".to_string(),
            ],
            Vec::<std::path::PathBuf>::new(),
        );

        let summary = assert_ok!(runner.run_with_backend(Arc::new(SimulatedBackend::new())).await);

        assert_eq!(summary.results.len(), 2);
        assert_eq!(png_files(dir.path()), vec!["example.com_http_80.png"]);
        assert_eq!(
            ResultSink::output_filename(&CaptureRequest::parse("http://example.com").unwrap()),
            ResultSink::output_filename(&CaptureRequest::parse("http://example.com:80/about").unwrap())
        );
    }
}
