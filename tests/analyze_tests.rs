use anyhow::anyhow;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use repolines::engine::{
    Analyzer, ArchiveFetcher, Cache, CountingReader, DisabledCache, Fetch, MemoryCache,
    unpack_archive,
};
use repolines::pipeline::{
    CancellationToken, ConcurrencyLimiter, EntryKind, FileOps, RequestFs, RetryPolicy, StdFs,
};
use repolines::utils::Config;
use repolines::{AnalysisError, CachedValue, RepositorySource, Response, TransferMetrics};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const REPO: &str = "https://github.com/acme/widgets";

/// What the fake fetcher does once it has been handed the working directory.
#[derive(Clone, Copy)]
enum Behavior {
    /// Write `a.py` (3 lines) and `b.py` (5 lines) and report `bytes` transferred.
    Succeed { bytes: u64 },
    /// Block until the request deadline trips.
    Hang,
    /// Fail with a transfer error.
    Unreachable,
    /// Write `count` one-line Python files spread over ten directories.
    ManyFiles { count: usize },
    /// Like `Succeed`, but report `bytes` only through the return value.
    ReportOnly { bytes: u64 },
}

struct FakeFetcher {
    behavior: Behavior,
    calls: AtomicUsize,
    last_dest: Mutex<Option<PathBuf>>,
}

impl FakeFetcher {
    fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_dest: Mutex::new(None),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_dest(&self) -> Option<PathBuf> {
        self.last_dest.lock().unwrap().clone()
    }
}

impl Fetch for FakeFetcher {
    fn fetch(
        &self,
        _source: &RepositorySource,
        dest: &Path,
        fs: &RequestFs,
        metrics: &TransferMetrics,
    ) -> Result<u64, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_dest.lock().unwrap() = Some(dest.to_path_buf());
        match self.behavior {
            Behavior::Succeed { bytes } => {
                fs.write(&dest.join("a.py"), b"1\n2\n3")?;
                fs.create_dir_all(&dest.join("lib"))?;
                fs.write(&dest.join("lib/b.py"), b"1\n2\n3\n4\n5")?;
                fs.write(&dest.join("README"), b"ignored\n")?;
                metrics.add(bytes);
                Ok(bytes)
            }
            Behavior::Hang => {
                metrics.add(512);
                fs.cancel().sleep(Duration::from_secs(30))?;
                Ok(512)
            }
            Behavior::Unreachable => Err(AnalysisError::transfer(
                "Failed to fetch repository: connection refused",
            )),
            Behavior::ManyFiles { count } => {
                for i in 0..count {
                    let dir = dest.join(format!("pkg{}", i % 10));
                    fs.create_dir_all(&dir)?;
                    fs.write(&dir.join(format!("m{i}.py")), b"x = 1")?;
                }
                metrics.add(count as u64);
                Ok(count as u64)
            }
            Behavior::ReportOnly { bytes } => {
                fs.write(&dest.join("a.py"), b"1\n2\n3")?;
                Ok(bytes)
            }
        }
    }
}

/// `StdFs` whose file reads each take `delay`.
struct SlowReads {
    delay: Duration,
}

impl FileOps for SlowReads {
    fn read_dir(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        StdFs.read_dir(dir)
    }

    fn entry_kind(&self, path: &Path) -> std::io::Result<EntryKind> {
        StdFs.entry_kind(path)
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::thread::sleep(self.delay);
        StdFs.read(path)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        StdFs.create_dir_all(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        StdFs.write(path, contents)
    }
}

/// Memory cache that records traffic.
struct SpyCache {
    inner: MemoryCache,
    gets: AtomicUsize,
    sets: Mutex<Vec<(String, CachedValue, u64)>>,
}

impl SpyCache {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryCache::new(16),
            gets: AtomicUsize::new(0),
            sets: Mutex::new(Vec::new()),
        })
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn sets(&self) -> Vec<(String, CachedValue, u64)> {
        self.sets.lock().unwrap().clone()
    }
}

impl Cache for SpyCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<CachedValue>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &CachedValue, ttl_secs: u64) -> anyhow::Result<()> {
        self.sets
            .lock()
            .unwrap()
            .push((key.to_string(), value.clone(), ttl_secs));
        self.inner.set(key, value, ttl_secs)
    }

    fn name(&self) -> &'static str {
        "spy"
    }
}

/// Backend that is always down.
struct BrokenCache;

impl Cache for BrokenCache {
    fn get(&self, _key: &str) -> anyhow::Result<Option<CachedValue>> {
        Err(anyhow!("connection refused"))
    }

    fn set(&self, _key: &str, _value: &CachedValue, _ttl_secs: u64) -> anyhow::Result<()> {
        Err(anyhow!("connection refused"))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

fn analyzer(config: Config, cache: Arc<dyn Cache>, fetcher: Arc<dyn Fetch>) -> Analyzer {
    Analyzer::new(config, cache, fetcher).with_retry_policy(RetryPolicy {
        max_retries: 10,
        base_delay: Duration::from_millis(1),
    })
}

fn short_timeout() -> Config {
    Config {
        analysis_timeout: Duration::from_secs(1),
        ..Config::default()
    }
}

// --- success path ---

#[test]
fn test_success_is_cached_and_served_without_refetch() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::Succeed { bytes: 1_000 });
    let analyzer = analyzer(Config::default(), cache.clone(), fetcher.clone());

    let first = analyzer.analyze(REPO);
    assert_eq!(first.status(), 200);
    assert_eq!(
        first.body(),
        serde_json::json!({ "stats": { "Python": 8 }, "totalLines": 8 })
    );

    let sets = cache.sets();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].0, format!("repo:{REPO}"));
    assert_eq!(sets[0].2, 86_400);

    let second = analyzer.analyze(REPO);
    assert_eq!(second, first);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.sets().len(), 1);
}

#[test]
fn test_success_ttl_grows_with_transfer_size() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::Succeed { bytes: 100_000_000 });
    let analyzer = analyzer(Config::default(), cache.clone(), fetcher);

    assert_eq!(analyzer.analyze(REPO).status(), 200);
    assert_eq!(cache.sets()[0].2, 1_000_000);
}

#[test]
fn test_success_ttl_uses_reported_byte_count() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::ReportOnly { bytes: 100_000_000 });
    let analyzer = analyzer(Config::default(), cache.clone(), fetcher);

    assert_eq!(analyzer.analyze(REPO).status(), 200);
    assert_eq!(cache.sets()[0].2, 1_000_000);
}

#[test]
fn test_working_directory_removed_after_success() {
    let fetcher = FakeFetcher::new(Behavior::Succeed { bytes: 10 });
    let analyzer = analyzer(Config::default(), Arc::new(DisabledCache), fetcher.clone());

    assert_eq!(analyzer.analyze(REPO).status(), 200);
    let dest = fetcher.last_dest().unwrap();
    assert!(!dest.exists(), "{} left behind", dest.display());
}

#[test]
fn test_disabled_cache_fetches_every_time() {
    let fetcher = FakeFetcher::new(Behavior::Succeed { bytes: 10 });
    let analyzer = analyzer(Config::default(), Arc::new(DisabledCache), fetcher.clone());

    assert_eq!(analyzer.analyze(REPO).status(), 200);
    assert_eq!(analyzer.analyze(REPO).status(), 200);
    assert_eq!(fetcher.calls(), 2);
}

#[test]
fn test_cache_key_uses_url_as_given() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::Succeed { bytes: 10 });
    let analyzer = analyzer(Config::default(), cache.clone(), fetcher.clone());

    assert_eq!(analyzer.analyze(REPO).status(), 200);
    assert_eq!(analyzer.analyze(&format!("{REPO}.git")).status(), 200);
    assert_eq!(fetcher.calls(), 2);
}

// --- timeout path ---

#[test]
fn test_timeout_is_408_then_replayed_as_400() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::Hang);
    let analyzer = analyzer(short_timeout(), cache.clone(), fetcher.clone());

    let first = analyzer.analyze(REPO);
    assert_eq!(first, Response::TimedOut("Analysis timed out after 1 seconds".into()));
    assert_eq!(
        first.body(),
        serde_json::json!({ "error": "Analysis timed out after 1 seconds" })
    );

    let sets = cache.sets();
    assert_eq!(sets.len(), 1);
    assert!(matches!(&sets[0].1, CachedValue::Failure(f) if f.error == "Analysis timed out after 1 seconds"));
    assert_eq!(sets[0].2, 31_536_000);

    let second = analyzer.analyze(REPO);
    assert_eq!(second, Response::BadRequest("Analysis timed out after 1 seconds".into()));
    assert_eq!(fetcher.calls(), 1);

    let dest = fetcher.last_dest().unwrap();
    assert!(!dest.exists());
}

#[test]
fn test_timeout_during_traversal_is_408_then_replayed_as_400() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::ManyFiles { count: 400 });
    let analyzer = analyzer(short_timeout(), cache.clone(), fetcher.clone()).with_file_ops(
        Arc::new(SlowReads {
            delay: Duration::from_millis(200),
        }),
    );

    let start = Instant::now();
    let first = analyzer.analyze(REPO);
    let elapsed = start.elapsed();
    assert_eq!(first, Response::TimedOut("Analysis timed out after 1 seconds".into()));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    let sets = cache.sets();
    assert_eq!(sets.len(), 1);
    assert!(matches!(&sets[0].1, CachedValue::Failure(f) if f.error == "Analysis timed out after 1 seconds"));
    assert_eq!(sets[0].2, 31_536_000);

    let second = analyzer.analyze(REPO);
    assert_eq!(second, Response::BadRequest("Analysis timed out after 1 seconds".into()));
    assert_eq!(fetcher.calls(), 1);
    assert!(!fetcher.last_dest().unwrap().exists());
}

#[test]
fn test_timeout_still_408_when_negative_write_fails() {
    struct ReadOnlyCache(MemoryCache);

    impl Cache for ReadOnlyCache {
        fn get(&self, key: &str) -> anyhow::Result<Option<CachedValue>> {
            self.0.get(key)
        }

        fn set(&self, _key: &str, _value: &CachedValue, _ttl_secs: u64) -> anyhow::Result<()> {
            Err(anyhow!("read-only replica"))
        }

        fn name(&self) -> &'static str {
            "read-only"
        }
    }

    let fetcher = FakeFetcher::new(Behavior::Hang);
    let analyzer = analyzer(
        short_timeout(),
        Arc::new(ReadOnlyCache(MemoryCache::new(4))),
        fetcher.clone(),
    );
    assert_eq!(analyzer.analyze(REPO).status(), 408);
}

// --- other failures ---

#[test]
fn test_transfer_error_is_500_and_not_cached() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::Unreachable);
    let analyzer = analyzer(Config::default(), cache.clone(), fetcher.clone());

    let first = analyzer.analyze(REPO);
    assert_eq!(first.status(), 500);
    assert_eq!(
        first.body(),
        serde_json::json!({ "error": "Failed to fetch repository: connection refused" })
    );
    assert!(cache.sets().is_empty());

    assert_eq!(analyzer.analyze(REPO).status(), 500);
    assert_eq!(fetcher.calls(), 2);
}

#[test]
fn test_validation_error_touches_neither_cache_nor_fetch() {
    let cache = SpyCache::new();
    let fetcher = FakeFetcher::new(Behavior::Succeed { bytes: 10 });
    let analyzer = analyzer(Config::default(), cache.clone(), fetcher.clone());

    for url in ["", "not a url", "ftp://github.com/a/b", "https://evil.test/a/b"] {
        assert_eq!(analyzer.analyze(url).status(), 400, "{url:?}");
    }
    assert_eq!(cache.gets(), 0);
    assert!(cache.sets().is_empty());
    assert_eq!(fetcher.calls(), 0);
}

#[test]
fn test_cache_read_failure_is_500_without_fetch() {
    let fetcher = FakeFetcher::new(Behavior::Succeed { bytes: 10 });
    let analyzer = analyzer(Config::default(), Arc::new(BrokenCache), fetcher.clone());

    let response = analyzer.analyze(REPO);
    assert_eq!(response.status(), 500);
    assert_eq!(fetcher.calls(), 0);
}

#[test]
fn test_archive_fetcher_rejects_url_without_repo_path() {
    let analyzer = analyzer(
        Config::default(),
        Arc::new(DisabledCache),
        Arc::new(ArchiveFetcher::new().unwrap()),
    );
    let response = analyzer.analyze("https://github.com/only-owner");
    assert_eq!(response.status(), 500);
}

#[test]
fn test_exit_codes() {
    use repolines::engine::exit_code;
    assert_eq!(exit_code(&Response::Ok(Default::default())), 0);
    assert_eq!(exit_code(&Response::BadRequest("x".into())), 2);
    assert_eq!(exit_code(&Response::TimedOut("x".into())), 3);
    assert_eq!(exit_code(&Response::Failed("x".into())), 1);
}

// --- archive unpacking ---

fn file_header(size: usize) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(size as u64);
    header.set_mode(0o644);
    header
}

fn gzip_tar(build: impl FnOnce(&mut tar::Builder<GzEncoder<Vec<u8>>>)) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    build(&mut builder);
    builder.into_inner().unwrap().finish().unwrap()
}

fn test_fs(cancel: CancellationToken) -> RequestFs {
    RequestFs::new(
        Arc::new(StdFs),
        Arc::new(ConcurrencyLimiter::new(4)),
        cancel,
        RetryPolicy::default(),
    )
}

#[test]
fn test_unpack_strips_top_level_and_skips_links() {
    let archive = gzip_tar(|b| {
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        b.append_data(&mut dir, "widgets-HEAD/", std::io::empty()).unwrap();

        let body = b"fn main() {}\n";
        b.append_data(&mut file_header(body.len()), "widgets-HEAD/src/main.rs", &body[..])
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        b.append_link(&mut link, "widgets-HEAD/latest", "src/main.rs")
            .unwrap();
    });

    let dest = TempDir::new().unwrap();
    let fs = test_fs(CancellationToken::with_timeout(Duration::from_secs(60)));
    let metrics = TransferMetrics::new();
    let reader = CountingReader::new(&archive[..], metrics.clone(), fs.cancel().clone());
    unpack_archive(GzDecoder::new(reader), dest.path(), &fs).unwrap();

    assert_eq!(
        std::fs::read_to_string(dest.path().join("src/main.rs")).unwrap(),
        "fn main() {}\n"
    );
    assert!(!dest.path().join("widgets-HEAD").exists());
    assert!(!dest.path().join("latest").exists());
    let counted = metrics.bytes_transferred();
    assert!(counted > 0 && counted <= archive.len() as u64);
}

#[test]
fn test_unpack_copies_hard_link_targets() {
    let archive = gzip_tar(|b| {
        let body = b"1\n2\n3";
        b.append_data(&mut file_header(body.len()), "widgets-HEAD/a.py", &body[..])
            .unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Link);
        link.set_size(0);
        link.set_mode(0o644);
        b.append_link(&mut link, "widgets-HEAD/lib/b.py", "widgets-HEAD/a.py")
            .unwrap();

        let mut dangling = tar::Header::new_gnu();
        dangling.set_entry_type(tar::EntryType::Link);
        dangling.set_size(0);
        dangling.set_mode(0o644);
        b.append_link(&mut dangling, "widgets-HEAD/c.py", "widgets-HEAD/absent.py")
            .unwrap();
    });

    let dest = TempDir::new().unwrap();
    let fs = test_fs(CancellationToken::with_timeout(Duration::from_secs(60)));
    unpack_archive(GzDecoder::new(&archive[..]), dest.path(), &fs).unwrap();

    assert_eq!(
        std::fs::read_to_string(dest.path().join("lib/b.py")).unwrap(),
        "1\n2\n3"
    );
    assert!(!dest.path().join("c.py").exists());

    let result = repolines::pipeline::traverse(dest.path(), &fs).unwrap();
    assert_eq!(result.stats["Python"], 6);
}

#[test]
fn test_unpack_rejects_parent_dir_entries() {
    let archive = gzip_tar(|b| {
        let body = b"pwned";
        let mut header = file_header(body.len());
        let name = b"widgets-HEAD/../../evil.py";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_cksum();
        b.append(&header, &body[..]).unwrap();
    });

    let dest = TempDir::new().unwrap();
    let inner = dest.path().join("work");
    std::fs::create_dir(&inner).unwrap();
    let fs = test_fs(CancellationToken::with_timeout(Duration::from_secs(60)));
    let err = unpack_archive(GzDecoder::new(&archive[..]), &inner, &fs).unwrap_err();
    assert!(matches!(err, AnalysisError::Transfer(_)));
    assert!(!dest.path().join("evil.py").exists());
}

#[test]
fn test_counting_reader_stops_after_cancellation() {
    let data = vec![7u8; 4096];
    let metrics = TransferMetrics::new();
    let mut reader = CountingReader::new(
        &data[..],
        metrics.clone(),
        CancellationToken::with_timeout(Duration::ZERO),
    );
    let mut buf = [0u8; 16];
    assert!(reader.read(&mut buf).is_err());
    assert_eq!(metrics.bytes_transferred(), 0);
}

#[test]
fn test_unpack_cancelled_is_cancelled_error() {
    let archive = gzip_tar(|b| {
        let body = b"x";
        b.append_data(&mut file_header(1), "widgets-HEAD/a.py", &body[..])
            .unwrap();
    });
    let dest = TempDir::new().unwrap();
    let fs = test_fs(CancellationToken::with_timeout(Duration::ZERO));
    let reader = CountingReader::new(&archive[..], TransferMetrics::new(), fs.cancel().clone());
    let err = unpack_archive(GzDecoder::new(reader), dest.path(), &fs).unwrap_err();
    assert!(err.is_cancelled());
}
