use alnumid::{
    AllocationContext, Catalog, CsvBatchStore, Engine, Error, GenerationRequest,
    HmacTokenEncoder, LinkResolver, QuotaPolicy, ReconcilePolicy, Reconciler, Resolution,
    StorageLayout, SystemClock,
};
use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Resolves every token except on the first `skip_passes` calls.
#[derive(Default)]
struct FakeLinks {
    skip_passes: usize,
    calls: AtomicUsize,
}

impl LinkResolver for FakeLinks {
    async fn resolve(&self, tokens: &[String]) -> HashMap<String, Resolution> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.skip_passes {
            return HashMap::new();
        }
        tokens
            .iter()
            .map(|t| {
                let link = Resolution::Resolved(format!("https://s.example/{t}"));
                (t.clone(), link)
            })
            .collect()
    }
}

/// Resolves everything, but holds the very first call back so that the run
/// reaching the resolver first is the last one to finish.
#[derive(Default)]
struct SlowFirstLinks {
    calls: AtomicUsize,
}

impl LinkResolver for SlowFirstLinks {
    async fn resolve(&self, tokens: &[String]) -> HashMap<String, Resolution> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        tokens
            .iter()
            .map(|t| (t.clone(), Resolution::Resolved(format!("https://s.example/{t}"))))
            .collect()
    }
}

type TestEngine = Engine<HmacTokenEncoder, FakeLinks, CsvBatchStore>;

fn engine(root: &Path, width: usize, max_ids: u64, links: FakeLinks) -> TestEngine {
    engine_with(root, width, max_ids, links, None)
}

fn engine_with<R: LinkResolver>(
    root: &Path,
    width: usize,
    max_ids: u64,
    links: R,
    max_passes: Option<u32>,
) -> Engine<HmacTokenEncoder, R, CsvBatchStore> {
    let layout = StorageLayout::under(root);
    let clock = Arc::new(SystemClock);
    let policy = QuotaPolicy {
        max_ids,
        ..QuotaPolicy::default()
    };
    let context = AllocationContext::new(&layout, width, policy, clock.clone()).unwrap();

    let mut catalog = Catalog::default();
    catalog.insert("AL", "Alpha Lubricant", "RED", "Red").unwrap();
    catalog.insert("AL", "Alpha Lubricant", "BLK", "Black").unwrap();

    let reconciler = Reconciler::new(
        links,
        ReconcilePolicy {
            max_passes,
            stall_backoff: Duration::from_millis(1),
        },
    );
    Engine::new(
        Arc::new(context),
        Arc::new(catalog),
        HmacTokenEncoder::load_or_create(&layout.token_key_path).unwrap(),
        reconciler,
        CsvBatchStore::new(&layout.tracking_dir, &layout.result_dir),
        clock,
    )
}

fn request(colors: &[&str], count: u64) -> GenerationRequest {
    GenerationRequest {
        category: "AL".into(),
        colors: colors.iter().map(|c| (*c).to_owned()).collect(),
        special_code: String::new(),
        count,
    }
}

/// `(suffix, identifier, short_link)` of every row in a tracking file.
fn tracking_rows(path: &Path) -> Vec<(String, String, String)> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let (suffix, identifier, link) = (col("suffix"), col("identifier"), col("short_link"));
    reader
        .records()
        .map(|r| {
            let r = r.unwrap();
            (
                r[suffix].to_owned(),
                r[identifier].to_owned(),
                r[link].to_owned(),
            )
        })
        .collect()
}

#[tokio::test]
async fn first_batch_starts_at_zero_and_is_fully_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path(), 6, 100, FakeLinks::default());

    let admitted = engine.admit(&request(&["RED"], 3)).unwrap();
    assert_eq!(admitted.remaining, 97);
    let report = engine.run(admitted).await;
    assert!(report.is_success());

    let persisted = report.outcomes[0].result.as_ref().unwrap();
    let rows = tracking_rows(&persisted.tracking);
    let suffixes: Vec<_> = rows.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(suffixes, ["000000", "000001", "000002"]);
    assert_eq!(rows[0].1, "ALRED000000");
    assert!(rows.iter().all(|r| r.2.starts_with("https://s.example/")));

    let result = fs::read_to_string(&persisted.result).unwrap();
    assert_eq!(result.lines().count(), 4);
    assert!(result.lines().nth(1).unwrap().starts_with("Alpha Lubricant,Red,https://"));
}

#[tokio::test]
async fn later_runs_resume_after_the_last_batch() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = engine(dir.path(), 2, 1_000, FakeLinks::default());
        let admitted = engine.admit(&request(&["RED"], 12)).unwrap();
        assert!(engine.run(admitted).await.is_success());
    }

    // A fresh context has no reservations and must rely on the files.
    let engine = engine(dir.path(), 2, 1_000, FakeLinks::default());
    let admitted = engine.admit(&request(&["RED"], 2)).unwrap();
    let report = engine.run(admitted).await;
    let rows = tracking_rows(&report.outcomes[0].result.as_ref().unwrap().tracking);
    let suffixes: Vec<_> = rows.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(suffixes, ["0C", "0D"]);
}

#[tokio::test]
async fn width_growth_survives_restarts() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = engine(dir.path(), 1, 1_000, FakeLinks::default());
        let admitted = engine.admit(&request(&["RED"], 36)).unwrap();
        assert!(engine.run(admitted).await.is_success());
    }

    let engine = engine(dir.path(), 1, 1_000, FakeLinks::default());
    let admitted = engine.admit(&request(&["RED"], 2)).unwrap();
    let report = engine.run(admitted).await;
    let rows = tracking_rows(&report.outcomes[0].result.as_ref().unwrap().tracking);
    let suffixes: Vec<_> = rows.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(suffixes, ["10", "11"]);

    let width = fs::read_to_string(StorageLayout::under(dir.path()).widths_dir.join("AL_RED.txt"));
    assert_eq!(width.unwrap().trim(), "2");
}

#[tokio::test]
async fn keys_are_independent_and_charged_per_color() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path(), 4, 100, FakeLinks::default());

    let admitted = engine.admit(&request(&["RED", "BLK"], 5)).unwrap();
    assert_eq!(admitted.charged, 10);
    assert_eq!(engine.context().remaining().unwrap(), 90);

    let report = engine.run(admitted).await;
    assert_eq!(report.outcomes.len(), 2);
    for outcome in &report.outcomes {
        let rows = tracking_rows(&outcome.result.as_ref().unwrap().tracking);
        assert_eq!(rows[0].0, "0000");
        assert!(rows[0].1.starts_with(&format!("AL{}", outcome.key.color())));
    }
}

#[tokio::test]
async fn unresolved_tokens_are_retried_before_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let links = FakeLinks {
        skip_passes: 2,
        ..FakeLinks::default()
    };
    let engine = engine(dir.path(), 6, 100, links);

    let admitted = engine.admit(&request(&["RED"], 3)).unwrap();
    let report = engine.run(admitted).await;
    let rows = tracking_rows(&report.outcomes[0].result.as_ref().unwrap().tracking);
    assert!(rows.iter().all(|r| !r.2.is_empty()));
}

#[tokio::test]
async fn stalled_resolution_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let links = FakeLinks {
        skip_passes: usize::MAX,
        ..FakeLinks::default()
    };
    let engine = engine_with(dir.path(), 6, 100, links, Some(3));

    let admitted = engine.admit(&request(&["RED"], 3)).unwrap();
    let report = engine.run(admitted).await;
    assert!(!report.is_success());
    let (_, err) = report.failures().next().unwrap();
    assert!(matches!(err, Error::ResolutionStalled { passes: 3, .. }));
    assert!(!StorageLayout::under(dir.path()).tracking_dir.exists());
}

#[tokio::test]
async fn rejected_requests_leave_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path(), 6, 100, FakeLinks::default());

    let err = engine.admit(&request(&["RED", "BLK"], 60)).unwrap_err();
    assert!(matches!(
        err,
        Error::QuotaExceeded {
            requested: 120,
            remaining: 100
        }
    ));
    assert!(engine.admit(&request(&["RED"], 0)).unwrap_err().is_rejection());
    assert!(engine.admit(&request(&["GRN"], 1)).unwrap_err().is_rejection());
    assert_eq!(engine.context().remaining().unwrap(), 100);
    assert!(!StorageLayout::under(dir.path()).tracking_dir.exists());
}

#[tokio::test]
async fn overlapping_runs_on_one_key_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut issued = Vec::new();
    {
        let engine = engine_with(dir.path(), 6, 100, SlowFirstLinks::default(), None);
        let first = engine.admit(&request(&["RED"], 3)).unwrap();
        let second = engine.admit(&request(&["RED"], 3)).unwrap();
        let (a, b) = tokio::join!(engine.run(first), engine.run(second));
        for report in [a, b] {
            assert!(report.is_success());
            let rows = tracking_rows(&report.outcomes[0].result.as_ref().unwrap().tracking);
            issued.extend(rows.into_iter().map(|r| r.0));
        }
    }
    issued.sort();
    issued.dedup();
    assert_eq!(issued.len(), 6);

    let engine = engine(dir.path(), 6, 100, FakeLinks::default());
    let admitted = engine.admit(&request(&["RED"], 3)).unwrap();
    let report = engine.run(admitted).await;
    let rows = tracking_rows(&report.outcomes[0].result.as_ref().unwrap().tracking);
    let after: Vec<_> = rows.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(after, ["000006", "000007", "000008"]);
}
