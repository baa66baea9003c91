//! Integration tests for netenrich

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Config that keeps all state inside `dir` and points the registry at a
/// closed local port, so runs never leave the machine
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    let content = format!(
        r#"
[enrichment]
registries = ["arin"]
max_attempts = 1
throttle_rate = 50

[cache]
path = '{}'

[progress]
path = '{}'

[registry]
timeout_secs = 2

[registry.base_urls]
arin = "http://127.0.0.1:9/rdap"
"#,
        dir.join("cache.json").display(),
        dir.join("progress.json").display()
    );
    std::fs::write(&path, content).unwrap();
    path
}

mod cli_tests {
    use super::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn netenrich() -> Command {
        cargo_bin_cmd!("netenrich")
    }

    #[test]
    fn help_displays() {
        netenrich()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Registry enrichment"));
    }

    #[test]
    fn version_displays() {
        netenrich()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("netenrich"));
    }

    #[test]
    fn config_path() {
        netenrich()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        netenrich()
            .arg("--config")
            .arg(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[enrichment]"))
            .stdout(predicate::str::contains("max_attempts = 1"));
    }

    #[test]
    fn config_env_var_respected() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        netenrich()
            .env("NETENRICH_CONFIG", &config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains(temp.path().to_string_lossy().as_ref()));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.toml");
        std::fs::write(&config, "[enrichment]\nparallelism = 0\n").unwrap();

        netenrich()
            .arg("--config")
            .arg(&config)
            .arg("progress")
            .assert()
            .failure()
            .stderr(predicate::str::contains("parallelism"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn progress_without_saved_run() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        netenrich()
            .arg("--config")
            .arg(&config)
            .arg("progress")
            .assert()
            .success()
            .stdout(predicate::str::contains("No saved progress"));
    }

    #[test]
    fn enrich_missing_input_fails() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        netenrich()
            .arg("--config")
            .arg(&config)
            .args(["enrich", "does-not-exist.txt"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid input file"));
    }

    #[test]
    fn enrich_rejects_zero_ttl_override() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let input = temp.path().join("ranges.txt");
        std::fs::write(&input, "192.0.2.1\n").unwrap();

        netenrich()
            .arg("--config")
            .arg(&config)
            .arg("enrich")
            .arg(&input)
            .args(["--ttl-hours", "0"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--ttl-hours must be at least 1"));
        assert!(!temp.path().join("progress.json").exists());
    }

    #[test]
    fn enrich_flags_malformed_ranges() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let input = temp.path().join("ranges.txt");
        std::fs::write(&input, "not-an-ip\n300.1.1.1\n").unwrap();

        netenrich()
            .arg("--config")
            .arg(&config)
            .arg("enrich")
            .arg(&input)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": \"malformed\""));
    }

    #[test]
    fn unreachable_registry_is_a_soft_failure_and_run_completes() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());
        let input = temp.path().join("ranges.json");
        let output = temp.path().join("out.json");
        std::fs::write(&input, r#"[{"range": "192.0.2.1", "source": "masscan"}]"#).unwrap();

        netenrich()
            .arg("--config")
            .arg(&config)
            .arg("enrich")
            .arg(&input)
            .arg("--output")
            .arg(&output)
            .assert()
            .success();

        let records: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(records[0]["status"], "failed");
        assert_eq!(records[0]["source"], "masscan");

        netenrich()
            .arg("--config")
            .arg(&config)
            .args(["progress", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"completed\": true"))
            .stdout(predicate::str::contains("\"totalRecords\": 1"));

        netenrich()
            .arg("--config")
            .arg(&config)
            .args(["progress", "--reset"])
            .assert()
            .success();
        assert!(!temp.path().join("progress.json").exists());
    }

    #[test]
    fn cache_stats_on_empty_cache() {
        let temp = TempDir::new().unwrap();
        let config = write_config(temp.path());

        netenrich()
            .arg("--config")
            .arg(&config)
            .args(["cache", "stats", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"total\": 0"));
    }
}

mod pipeline_tests {
    use async_trait::async_trait;
    use netenrich::cache::{CacheStore, RegistryInfo};
    use netenrich::key::CacheKey;
    use netenrich::pipeline::{CancelToken, Coordinator, RetryPolicy, RunOptions};
    use netenrich::progress::ProgressTracker;
    use netenrich::record::{EnrichmentRecord, RecordStatus};
    use netenrich::registry::RegistryClient;
    use netenrich::EnrichResult;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Answers every lookup and counts calls
    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RegistryClient for CountingClient {
        async fn lookup(&self, key: &CacheKey) -> EnrichResult<RegistryInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RegistryInfo {
                registry: Some("test".to_string()),
                cidr: Some(key.to_string()),
                asn: Some("AS64496".to_string()),
                ..Default::default()
            })
        }

        fn client_name(&self) -> &'static str {
            "counting"
        }
    }

    async fn open(dir: &Path, client: Arc<CountingClient>) -> Coordinator {
        let cache = CacheStore::open(dir.join("cache.json"), chrono::Duration::hours(1), 5).await;
        let tracker = ProgressTracker::new(dir.join("progress.json"), 5, 3, 200);
        let options = RunOptions {
            parallelism: 3,
            throttle_rate: 200,
            retry: RetryPolicy::default().without_jitter(),
        };
        Coordinator::new(Arc::new(cache), Arc::new(tracker), client, options)
    }

    fn input() -> Vec<EnrichmentRecord> {
        ["10.0.0.1", "10.0.0.1", "2001:db8::1", "198.51.100.0/24", "bogus"]
            .into_iter()
            .map(EnrichmentRecord::new)
            .collect()
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let temp = TempDir::new().unwrap();

        let first = Arc::new(CountingClient::default());
        let outcome = open(temp.path(), first.clone())
            .await
            .run(input(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(first.calls.load(Ordering::SeqCst), 3);
        assert!(outcome.progress.completed);
        assert_eq!(outcome.progress.total_records, 3);
        assert_eq!(outcome.records[4].status, RecordStatus::Malformed);
        assert_eq!(
            outcome.records[3].enrichment.as_ref().unwrap().cidr.as_deref(),
            Some("198.51.100.0/24")
        );

        // Same input again: nothing is looked up, everything served from cache
        let second = Arc::new(CountingClient::default());
        let outcome = open(temp.path(), second.clone())
            .await
            .run(input(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.records[0].status, RecordStatus::Cached);
        assert_eq!(outcome.records[0].enrichment.as_ref().unwrap().asn.as_deref(), Some("AS64496"));
    }

    #[tokio::test]
    async fn run_finishes_within_rate_budget() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(CountingClient::default());
        let records: Vec<_> = (0..20)
            .map(|i| EnrichmentRecord::new(format!("192.0.2.{}", i)))
            .collect();

        let start = std::time::Instant::now();
        let outcome = open(temp.path(), client.clone())
            .await
            .run(records, &CancelToken::new())
            .await
            .unwrap();

        // 20 lookups at 200/s need at least 19 intervals of 5ms
        assert!(start.elapsed() >= Duration::from_millis(95));
        assert_eq!(client.calls.load(Ordering::SeqCst), 20);
        assert!(outcome.progress.completed);
    }
}
