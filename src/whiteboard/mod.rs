//! Whiteboard: derived views over a session state
//!
//! Every mode is an independent pure projection of `SessionState`. Nothing
//! here is stored; views are recomputed whenever they are asked for, and any
//! notion of "now" is the timestamp of the last applied event.

mod views;

use crate::session::SessionState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use views::{
    BackgroundTasksView, CoffeeView, HeatCell, HeatMapView, HistogramBar, NewsView, OrgChartView,
    OrgNode, ProductivityView, SafetyView, TickerLine, TimelineLane, TimelineView, TodoView,
    ToolHistogramView, WeatherCondition, WeatherView, ACTIVITY_WINDOW,
};

/// Whiteboard display mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Todo,
    BackgroundTasks,
    ToolHistogram,
    OrgChart,
    Productivity,
    Weather,
    Safety,
    Timeline,
    News,
    Coffee,
    HeatMap,
}

impl ViewMode {
    pub const ALL: [ViewMode; 11] = [
        ViewMode::Todo,
        ViewMode::BackgroundTasks,
        ViewMode::ToolHistogram,
        ViewMode::OrgChart,
        ViewMode::Productivity,
        ViewMode::Weather,
        ViewMode::Safety,
        ViewMode::Timeline,
        ViewMode::News,
        ViewMode::Coffee,
        ViewMode::HeatMap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Todo => "todo",
            ViewMode::BackgroundTasks => "background_tasks",
            ViewMode::ToolHistogram => "tool_histogram",
            ViewMode::OrgChart => "org_chart",
            ViewMode::Productivity => "productivity",
            ViewMode::Weather => "weather",
            ViewMode::Safety => "safety",
            ViewMode::Timeline => "timeline",
            ViewMode::News => "news",
            ViewMode::Coffee => "coffee",
            ViewMode::HeatMap => "heat_map",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised mode name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown view mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for ViewMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ViewMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}

/// One mode's payload, tagged with its mode name
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ViewPayload {
    Todo(TodoView),
    BackgroundTasks(BackgroundTasksView),
    ToolHistogram(ToolHistogramView),
    OrgChart(OrgChartView),
    Productivity(ProductivityView),
    Weather(WeatherView),
    Safety(SafetyView),
    Timeline(TimelineView),
    News(NewsView),
    Coffee(CoffeeView),
    HeatMap(HeatMapView),
}

impl ViewPayload {
    pub fn mode(&self) -> ViewMode {
        match self {
            ViewPayload::Todo(_) => ViewMode::Todo,
            ViewPayload::BackgroundTasks(_) => ViewMode::BackgroundTasks,
            ViewPayload::ToolHistogram(_) => ViewMode::ToolHistogram,
            ViewPayload::OrgChart(_) => ViewMode::OrgChart,
            ViewPayload::Productivity(_) => ViewMode::Productivity,
            ViewPayload::Weather(_) => ViewMode::Weather,
            ViewPayload::Safety(_) => ViewMode::Safety,
            ViewPayload::Timeline(_) => ViewMode::Timeline,
            ViewPayload::News(_) => ViewMode::News,
            ViewPayload::Coffee(_) => ViewMode::Coffee,
            ViewPayload::HeatMap(_) => ViewMode::HeatMap,
        }
    }
}

/// Project a session state into one whiteboard mode
pub fn project(state: &SessionState, mode: ViewMode) -> ViewPayload {
    match mode {
        ViewMode::Todo => ViewPayload::Todo(views::todo(state)),
        ViewMode::BackgroundTasks => ViewPayload::BackgroundTasks(views::background_tasks(state)),
        ViewMode::ToolHistogram => ViewPayload::ToolHistogram(views::tool_histogram(state)),
        ViewMode::OrgChart => ViewPayload::OrgChart(views::org_chart(state)),
        ViewMode::Productivity => ViewPayload::Productivity(views::productivity(state)),
        ViewMode::Weather => ViewPayload::Weather(views::weather(state)),
        ViewMode::Safety => ViewPayload::Safety(views::safety(state)),
        ViewMode::Timeline => ViewPayload::Timeline(views::timeline(state)),
        ViewMode::News => ViewPayload::News(views::news(state)),
        ViewMode::Coffee => ViewPayload::Coffee(views::coffee(state)),
        ViewMode::HeatMap => ViewPayload::HeatMap(views::heat_map(state)),
    }
}

/// Successes over all finished tool uses, as a percentage; 100 when none
pub fn success_rate(state: &SessionState) -> f64 {
    let counters = &state.counters;
    let finished = counters.successes + counters.failures;
    if finished == 0 {
        return 100.0;
    }
    counters.successes as f64 / finished as f64 * 100.0
}

/// Tool uses since the last compaction against `ACTIVITY_WINDOW`, capped at 100
pub fn activity_level(state: &SessionState) -> f64 {
    let recent = state.counters.tool_uses_since_compaction as f64;
    (recent / ACTIVITY_WINDOW as f64 * 100.0).min(100.0)
}
