/// End-to-end tests for `ListViewState`, the headless list state machine.
///
/// These drive a real `Browser` over a temporary tree and pump
/// `process_events()` the way a frontend would once per frame.
use assetsleuth_core::collab::{ImageThumbnailCache, MemoryBookmarkDb};
use assetsleuth_core::config::{BrowserConfig, Settings};
use assetsleuth_core::filter::{FlagFilter, SortRole, SortSpec};
use assetsleuth_core::model::BucketState;
use assetsleuth_core::{Browser, Location, RecordFlags, RecordKind};
use assetsleuth_view::{ListViewState, ViewPhase};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn write_bytes(path: &Path, n: usize) {
    let mut f = fs::File::create(path).unwrap();
    f.write_all(&vec![0u8; n]).unwrap();
}

/// `<tmp>/job/assets/hero/comp/` with a three-frame sequence and two
/// standalone files of different sizes.
fn make_temp_tree() -> TempDir {
    let tmp = tempfile::Builder::new().prefix("view").tempdir().unwrap();
    let comp = tmp.path().join("job/assets/hero/comp");
    fs::create_dir_all(&comp).unwrap();
    for frame in 1..=3 {
        write_bytes(&comp.join(format!("beauty.{frame:04}.exr")), 10);
    }
    write_bytes(&comp.join("notes.txt"), 500);
    write_bytes(&comp.join("review.mov"), 200);
    tmp
}

fn make_browser(tmp: &TempDir, deep_scan: bool) -> Arc<Browser> {
    let config = BrowserConfig {
        info_workers: 1,
        thumbnail_workers: 1,
        generate_thumbnails: false,
        deep_scan,
        ..BrowserConfig::default()
    };
    let location =
        Location::new(tmp.path().to_string_lossy(), "job", "assets").with_asset("hero");
    Arc::new(Browser::new(
        location,
        config,
        Arc::new(MemoryBookmarkDb::new()),
        Arc::new(ImageThumbnailCache::new(tmp.path().join("cache"))),
        Settings::in_memory(),
    ))
}

/// Pump `process_events()` until `done` holds or the deadline expires.
fn pump_until(state: &mut ListViewState, mut done: impl FnMut(&ListViewState) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        state.process_events();
        if done(state) {
            return;
        }
        assert!(Instant::now() < deadline, "condition not met within 30 seconds");
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn row_names(state: &ListViewState) -> Vec<String> {
    state
        .visible_records()
        .into_iter()
        .map(|r| r.display_name.to_string())
        .collect()
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[test]
fn new_state_is_idle() {
    let tmp = make_temp_tree();
    let state = ListViewState::new(make_browser(&tmp, false), RecordKind::Sequence);
    assert_eq!(state.phase, ViewPhase::Idle);
    assert!(state.rows.is_empty());
}

#[test]
fn open_folder_becomes_ready() {
    let tmp = make_temp_tree();
    let mut state = ListViewState::new(make_browser(&tmp, false), RecordKind::Sequence);
    state.open_folder("comp");

    assert_eq!(state.phase, ViewPhase::Ready);
    assert!(state.last_error.is_none());
    assert!(matches!(
        state.bucket_state(),
        BucketState::Populated | BucketState::Enriching(_)
    ));
    assert_eq!(
        row_names(&state),
        vec!["beauty.[0].exr", "notes.txt", "review.mov"]
    );

    state.set_kind(RecordKind::File);
    assert_eq!(state.rows.len(), 5);
}

#[test]
fn missing_folder_reports_error() {
    let tmp = make_temp_tree();
    let mut state = ListViewState::new(make_browser(&tmp, false), RecordKind::File);
    state.open_folder("lighting");
    assert_eq!(state.phase, ViewPhase::Ready);
    assert!(state.last_error.is_some());
    assert!(state.rows.is_empty());
}

#[test]
fn opening_requests_visible_enrichment() {
    let tmp = make_temp_tree();
    let mut state = ListViewState::new(make_browser(&tmp, false), RecordKind::Sequence);
    state.open_folder("comp");
    pump_until(&mut state, |s| {
        s.visible_records().iter().all(|r| r.info_loaded)
    });
    let sequence = &state.visible_records()[0];
    assert_eq!(sequence.frame_range.as_deref(), Some("0001-0003"));
}

// ── Events ────────────────────────────────────────────────────────────────────

#[test]
fn events_from_a_superseded_reset_are_dropped() {
    let tmp = make_temp_tree();
    let browser = make_browser(&tmp, false);
    let mut state = ListViewState::new(Arc::clone(&browser), RecordKind::Sequence);
    state.open_folder("comp");
    pump_until(&mut state, |s| {
        s.visible_records().iter().all(|r| r.info_loaded)
    });

    // Enrich the flat bucket through a second list, then reset before the
    // first list drains those updates.
    let mut flat = ListViewState::new(Arc::clone(&browser), RecordKind::File);
    flat.open_folder("comp");
    assert!(browser.wait_idle(Duration::from_secs(30)));
    browser.request_reset("comp").unwrap();

    flat.process_events();
    assert!(flat.stale_events > 0, "updates for the old generation are dropped");
    assert_eq!(flat.phase, ViewPhase::Ready);
    assert_eq!(flat.rows.len(), 5);
}

#[test]
fn selection_follows_record_across_sort() {
    let tmp = make_temp_tree();
    let browser = make_browser(&tmp, true);
    let mut state = ListViewState::new(Arc::clone(&browser), RecordKind::Sequence);
    state.open_folder("comp");
    assert!(browser.wait_idle(Duration::from_secs(30)));
    state.process_events();

    state.select_row(1);
    let selected = browser
        .get("comp", RecordKind::Sequence, state.selected_id().unwrap())
        .unwrap();
    assert_eq!(selected.display_name, "notes.txt");

    state.set_sort(SortSpec {
        role: SortRole::Size,
        descending: true,
    });
    assert_eq!(
        row_names(&state),
        vec!["notes.txt", "review.mov", "beauty.[0].exr"]
    );
    assert_eq!(state.selected_row(), Some(0));

    state.clear_selection();
    assert_eq!(state.selected_row(), None);
}

#[test]
fn filters_refresh_rows() {
    let tmp = make_temp_tree();
    let browser = make_browser(&tmp, false);
    let mut state = ListViewState::new(Arc::clone(&browser), RecordKind::Sequence);
    state.open_folder("comp");

    state.set_text_query("--beauty");
    assert_eq!(row_names(&state), vec!["notes.txt", "review.mov"]);

    browser
        .set_record_flag("comp", RecordKind::Sequence, 2, RecordFlags::FAVOURITE, true)
        .unwrap();
    state.set_flag_filter(FlagFilter::Favourite, true);
    assert_eq!(row_names(&state), vec!["review.mov"]);
}

// ── Viewport ──────────────────────────────────────────────────────────────────

#[test]
fn window_is_clamped_to_rows() {
    let tmp = make_temp_tree();
    let mut state = ListViewState::new(make_browser(&tmp, false), RecordKind::File);
    state.open_folder("comp");

    state.set_viewport(3, 10);
    assert_eq!(state.window(), 3..5);
    state.set_viewport(100, 2);
    assert_eq!(state.window(), 4..5);
}
