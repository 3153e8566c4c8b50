// Viewer session: the event feed, replay, map layers and location cascade wired together.
// Every host interaction goes through here so the pieces stay consistent with each other:
// a new event list resets the replay, the replay decides what the layers see, and the
// cascade's location feeds both the user marker and the nearest-event panel.

use tracing::{debug, info};

use crate::error::{DataFetchError, ViewerError};
use crate::feed::{EventFeed, FilterCriteria};
use crate::geo::{nearest_event, NearestEvent};
use crate::geolocation::{Capabilities, CascadeCommand, CascadeInput, GeolocationCascade, Transition};
use crate::layers::{HoverPhase, LayerManager, LayerSettings};
use crate::playback::{FrameDriver, FrameHandle, PlaybackEngine, PlaybackPhase};
use crate::stats::EventStats;
use crate::summary::SummaryCache;
use crate::surface::MapSurface;
use crate::types::{
    EpochMillis, EventId, Notice, NoticeSink, SeismicEvent, SelectionSink, UserLocation, ViewerConfig,
};

pub struct Viewer {
    config: ViewerConfig,
    filters: FilterCriteria,
    feed: EventFeed,
    playback: PlaybackEngine,
    layers: LayerManager,
    geolocation: GeolocationCascade,
    summaries: SummaryCache,
}

impl Viewer {
    pub fn new(config: ViewerConfig, capabilities: Capabilities) -> Result<Self, ViewerError> {
        config.validate()?;
        info!(
            playback_duration_ms = config.playback_duration_ms,
            cluster_radius_px = config.cluster_radius_px,
            "viewer created"
        );
        Ok(Viewer {
            filters: FilterCriteria::default(),
            feed: EventFeed::new(),
            playback: PlaybackEngine::new(config.playback_duration_ms),
            layers: LayerManager::new(LayerSettings::from(&config)),
            geolocation: GeolocationCascade::new(config.geolocation, capabilities),
            summaries: SummaryCache::new(config.summary_cache_capacity),
            config,
        })
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn filters(&self) -> &FilterCriteria {
        &self.filters
    }

    pub fn feed(&self) -> &EventFeed {
        &self.feed
    }

    pub fn playback(&self) -> &PlaybackEngine {
        &self.playback
    }

    pub fn layers(&self) -> &LayerManager {
        &self.layers
    }

    pub fn geolocation(&self) -> &GeolocationCascade {
        &self.geolocation
    }

    pub fn events(&self) -> &[SeismicEvent] {
        self.feed.events()
    }

    /// What the map shows right now: the replay cutoff applied to the feed.
    pub fn visible_events(&self) -> Vec<SeismicEvent> {
        self.playback.visible(self.feed.events())
    }

    pub fn user_location(&self) -> Option<UserLocation> {
        self.geolocation.location()
    }

    /// URL the host should fetch for the current filters.
    pub fn query_url(&mut self, now: EpochMillis) -> String {
        self.feed.begin_fetch();
        self.filters.query_url(now)
    }

    /// Feed a fetch result back. On success the replay restarts over the new list.
    pub fn apply_fetch(
        &mut self,
        outcome: Result<&str, DataFetchError>,
        now: EpochMillis,
        frames: &mut dyn FrameDriver,
        notices: &mut dyn NoticeSink,
    ) -> bool {
        let replaced = self.feed.apply(outcome, now, notices);
        if replaced {
            self.playback.reset_for(self.feed.events(), frames);
        }
        replaced
    }

    /// Replace the filters. Returns true when the feed must be re-fetched;
    /// display-only toggles take effect on the next render.
    pub fn set_filters(&mut self, filters: FilterCriteria) -> bool {
        let refetch = !self.filters.same_query(&filters);
        debug!(refetch, "filters changed");
        self.filters = filters;
        refetch
    }

    pub fn reset_filters(&mut self) -> bool {
        self.set_filters(FilterCriteria::default())
    }

    pub fn toggle_playback(&mut self, frames: &mut dyn FrameDriver, notices: &mut dyn NoticeSink) -> PlaybackPhase {
        let before = self.playback.state().phase;
        let after = self.playback.toggle(frames);
        match (before, after) {
            (PlaybackPhase::Idle, PlaybackPhase::Running) => notices.notify(Notice::info(
                "Timeline Playing",
                "Replaying seismic events chronologically",
            )),
            (PlaybackPhase::Running, PlaybackPhase::Idle) => {
                notices.notify(Notice::info("Timeline Paused", "Seismic playback stopped"))
            }
            _ => {}
        }
        after
    }

    /// Frame callback from the host.
    pub fn tick(&mut self, frames: &mut dyn FrameDriver, handle: FrameHandle, now_ms: f64) -> bool {
        self.playback.on_frame(frames, handle, now_ms)
    }

    pub fn render(&mut self, surface: &mut dyn MapSurface, now: EpochMillis, selection: &mut dyn SelectionSink) {
        let visible = self.visible_events();
        self.layers.render(
            surface,
            &visible,
            self.filters.display_mode(),
            self.geolocation.location(),
            now,
            selection,
        );
    }

    pub fn on_zoom(&mut self, surface: &mut dyn MapSurface) {
        self.layers.on_zoom_changed(surface);
    }

    pub fn on_hover(&mut self, surface: &mut dyn MapSurface, id: &EventId, phase: HoverPhase) {
        self.layers.on_hover(surface, id, phase);
    }

    pub fn on_click(&mut self, id: &EventId, selection: &mut dyn SelectionSink) -> bool {
        self.layers.on_click(id, selection)
    }

    pub fn on_cluster_click(&mut self, surface: &mut dyn MapSurface, index: usize) -> bool {
        self.layers.on_cluster_click(surface, index)
    }

    pub fn close_details(&mut self, selection: &mut dyn SelectionSink) {
        self.layers.clear_selection(selection);
    }

    /// Start the location cascade. The automatic trigger fires once per session;
    /// a manual one restarts unless a run is already in flight.
    pub fn locate(&mut self, manual: bool, notices: &mut dyn NoticeSink) -> Vec<CascadeCommand> {
        let transition = if manual {
            self.geolocation.request()
        } else {
            self.geolocation.auto_start()
        };
        forward(transition, notices)
    }

    pub fn geolocation_signal(&mut self, input: CascadeInput, notices: &mut dyn NoticeSink) -> Vec<CascadeCommand> {
        let transition = self.geolocation.handle(input);
        forward(transition, notices)
    }

    /// Nearest event in the loaded feed to the user, if located.
    pub fn nearest(&self) -> Option<NearestEvent> {
        let user = self.geolocation.location()?;
        nearest_event(user.position(), self.feed.events())
    }

    pub fn stats(&self) -> EventStats {
        EventStats::from_events(self.feed.events())
    }

    /// Summary text for an event in the feed. `regenerate` drops any cached text first.
    pub fn summary(&mut self, id: &EventId, regenerate: bool) -> Option<String> {
        let event = self.feed.events().iter().find(|e| &e.id == id)?;
        if regenerate {
            self.summaries.invalidate(id);
        }
        Some(self.summaries.get_or_summarize(event))
    }

    /// Store externally produced summary text for an event.
    pub fn store_summary(&mut self, id: EventId, text: String) {
        self.summaries.insert(id, text);
    }

    /// Unmount: cancel frames, clear the map and the selection, drop the event list,
    /// stop the cascade. Returns the host commands needed to release geolocation resources.
    pub fn teardown(
        &mut self,
        surface: &mut dyn MapSurface,
        frames: &mut dyn FrameDriver,
        selection: &mut dyn SelectionSink,
    ) -> Vec<CascadeCommand> {
        info!("viewer teardown");
        self.playback.teardown(frames);
        self.layers.teardown(surface, selection);
        self.feed.clear();
        self.summaries.clear();
        self.geolocation.cancel().commands
    }
}

fn forward(transition: Transition, notices: &mut dyn NoticeSink) -> Vec<CascadeCommand> {
    for notice in transition.notices {
        notices.notify(notice);
    }
    transition.commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geolocation::{PermissionState, RunId, Signal};
    use crate::playback::FrameTokens;
    use crate::surface::HeadlessSurface;
    use crate::types::{NoticeLevel, SelectionChange};

    const FEED: &str = r#"{"features":[
        {"id":"old","properties":{"mag":2.1,"place":"A","time":1000},"geometry":{"coordinates":[10.0,10.0,5.0]}},
        {"id":"mid","properties":{"mag":4.2,"place":"B","time":2000},"geometry":{"coordinates":[20.0,20.0,80.0]}},
        {"id":"new","properties":{"mag":6.3,"place":"C","time":3000},"geometry":{"coordinates":[30.0,30.0,400.0]}}
    ]}"#;

    struct Harness {
        viewer: Viewer,
        surface: HeadlessSurface,
        frames: FrameTokens,
        notices: Vec<Notice>,
        selection: Vec<SelectionChange>,
    }

    impl Harness {
        fn new() -> Self {
            let viewer = Viewer::new(ViewerConfig::default(), Capabilities::default()).unwrap();
            Harness {
                viewer,
                surface: HeadlessSurface::new(2.0),
                frames: FrameTokens::default(),
                notices: Vec::new(),
                selection: Vec::new(),
            }
        }

        fn load(&mut self, body: &str) -> bool {
            self.viewer.query_url(EpochMillis::from_millis(10_000));
            self.viewer
                .apply_fetch(Ok(body), EpochMillis::from_millis(10_000), &mut self.frames, &mut self.notices)
        }

        fn render(&mut self) {
            let mut batch = crate::surface::OpBatch::new(self.surface.zoom);
            self.viewer
                .render(&mut batch, EpochMillis::from_millis(10_000), &mut self.selection);
            self.surface.apply(&batch.ops);
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let config = ViewerConfig {
            cluster_radius_px: 0.0,
            ..ViewerConfig::default()
        };
        assert!(Viewer::new(config, Capabilities::default()).is_err());
    }

    #[test]
    fn fetch_render_and_select() {
        let mut h = Harness::new();
        assert!(h.load(FEED));
        h.render();
        assert_eq!(h.surface.points.len(), 3);
        assert!(h.surface.violations.is_empty());

        assert!(h.viewer.on_click(&EventId::new("mid"), &mut h.selection));
        assert!(matches!(&h.selection[0], SelectionChange::Selected { event } if event.id.as_str() == "mid"));
        h.viewer.close_details(&mut h.selection);
        assert_eq!(h.selection[1], SelectionChange::Deselected);
    }

    #[test]
    fn failed_refresh_keeps_map_contents() {
        let mut h = Harness::new();
        h.load(FEED);
        h.render();
        let replaced = h.viewer.apply_fetch(
            Err(DataFetchError::Network("offline".into())),
            EpochMillis::from_millis(20_000),
            &mut h.frames,
            &mut h.notices,
        );
        assert!(!replaced);
        h.render();
        assert_eq!(h.surface.points.len(), 3);
        assert_eq!(h.notices.last().map(|n| n.level), Some(NoticeLevel::Error));
    }

    #[test]
    fn playback_toggles_and_filters_the_map() {
        let mut h = Harness::new();
        h.load(FEED);

        let phase = h.viewer.toggle_playback(&mut h.frames, &mut h.notices);
        assert_eq!(phase, PlaybackPhase::Running);
        assert_eq!(h.notices.last().unwrap().title, "Timeline Playing");

        let first = h.frames.requested.unwrap();
        assert!(h.viewer.tick(&mut h.frames, first, 0.0));
        let second = h.frames.requested.unwrap();
        // Halfway through a 30s replay.
        assert!(h.viewer.tick(&mut h.frames, second, 15_000.0));
        h.render();
        let mut shown: Vec<&str> = h.surface.points.keys().map(EventId::as_str).collect();
        shown.sort_unstable();
        assert_eq!(shown, vec!["mid", "old"]);

        let phase = h.viewer.toggle_playback(&mut h.frames, &mut h.notices);
        assert_eq!(phase, PlaybackPhase::Idle);
        assert_eq!(h.notices.last().unwrap().title, "Timeline Paused");
        assert!(h.frames.requested.is_none());
    }

    #[test]
    fn play_without_events_is_silent() {
        let mut h = Harness::new();
        let phase = h.viewer.toggle_playback(&mut h.frames, &mut h.notices);
        assert_eq!(phase, PlaybackPhase::Idle);
        assert!(h.notices.is_empty());
    }

    #[test]
    fn display_toggles_do_not_refetch() {
        let mut h = Harness::new();
        h.load(FEED);
        h.render();
        let filters = FilterCriteria {
            show_clusters: true,
            show_heatmap: true,
            ..*h.viewer.filters()
        };
        assert!(!h.viewer.set_filters(filters));
        h.render();
        assert!(h.surface.points.is_empty());
        assert_eq!(h.surface.cluster_group.as_ref().map(|g| g.member_count()), Some(3));
        assert!(h.surface.heatmap.is_some());
        assert!(h.surface.violations.is_empty());

        let narrowed = FilterCriteria {
            magnitude_range: [4.0, 10.0],
            ..filters
        };
        assert!(h.viewer.set_filters(narrowed));
    }

    #[test]
    fn location_flows_into_marker_and_nearest() {
        let mut h = Harness::new();
        h.load(FEED);

        let commands = h.viewer.locate(false, &mut h.notices);
        assert!(matches!(commands[0], CascadeCommand::QueryPermission { run: RunId(1) }));
        assert!(h.viewer.locate(false, &mut h.notices).is_empty());

        h.viewer.geolocation_signal(
            CascadeInput { run: RunId(1), signal: Signal::Permission { state: PermissionState::Granted } },
            &mut h.notices,
        );
        h.viewer.geolocation_signal(
            CascadeInput { run: RunId(1), signal: Signal::FixAcquired { lat: 29.0, lng: 29.0 } },
            &mut h.notices,
        );
        assert_eq!(h.notices.last().unwrap().title, "Location detected");

        let nearest = h.viewer.nearest().unwrap();
        assert_eq!(nearest.event.id.as_str(), "new");

        h.render();
        assert!(h.surface.user_marker.is_some());
        assert_eq!(h.surface.flights.len(), 1);
    }

    #[test]
    fn stats_and_summaries_cover_the_feed() {
        let mut h = Harness::new();
        h.load(FEED);
        let stats = h.viewer.stats();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.largest_magnitude, 6.3);

        let id = EventId::new("new");
        let text = h.viewer.summary(&id, false).unwrap();
        assert!(text.starts_with("M6.3 near C"));
        h.viewer.store_summary(id.clone(), "custom".into());
        assert_eq!(h.viewer.summary(&id, false).as_deref(), Some("custom"));
        assert_ne!(h.viewer.summary(&id, true).as_deref(), Some("custom"));
        assert!(h.viewer.summary(&EventId::new("missing"), false).is_none());
    }

    #[test]
    fn teardown_releases_everything() {
        let mut h = Harness::new();
        h.load(FEED);
        h.render();
        assert!(h.viewer.on_click(&EventId::new("mid"), &mut h.selection));
        h.selection.clear();
        h.viewer.toggle_playback(&mut h.frames, &mut h.notices);
        h.viewer.locate(true, &mut h.notices);

        let mut batch = crate::surface::OpBatch::new(h.surface.zoom);
        let commands = h.viewer.teardown(&mut batch, &mut h.frames, &mut h.selection);
        h.surface.apply(&batch.ops);

        assert!(h.surface.points.is_empty());
        assert_eq!(h.selection, vec![SelectionChange::Deselected]);
        assert!(h.viewer.events().is_empty());
        assert_eq!(h.viewer.feed().generation(), 0);
        assert!(h.surface.violations.is_empty());
        assert!(h.frames.requested.is_none());
        assert!(commands.iter().any(|c| matches!(c, CascadeCommand::CancelDeadline { .. })));
        assert!(!h.viewer.geolocation().in_flight());
    }
}
