/// AssetSleuth View: headless list state for frontends.
///
/// This crate holds no widgets. A frontend owns one [`ListViewState`] per
/// list, calls [`ListViewState::process_events`] once per frame and paints
/// [`ListViewState::visible_records`]. Business logic lives in
/// `assetsleuth-core`.
pub mod state;

pub use state::{ListViewState, ViewPhase, MAX_EVENTS_PER_FRAME};
