use super::{activity_level, success_rate};
use crate::events::{BackgroundTaskStatus, TodoItem, TodoStatus};
use crate::session::{
    Agent, AgentRole, AgentStatus, BackgroundTask, NewsItem, SessionState, ToolCategory,
};
use crate::types::AgentId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Tool uses that count as a fully busy office
pub const ACTIVITY_WINDOW: u64 = 50;

/// Opening price of the productivity ticker
const TICKER_BASE_PRICE: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TodoView {
    pub items: Vec<TodoItem>,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub completion_pct: f64,
}

pub(super) fn todo(state: &SessionState) -> TodoView {
    let count = |status: TodoStatus| state.todos.iter().filter(|t| t.status == status).count();
    let total = state.todos.len();
    let completed = count(TodoStatus::Completed);
    TodoView {
        items: state.todos.clone(),
        total,
        pending: count(TodoStatus::Pending),
        in_progress: count(TodoStatus::InProgress),
        completed,
        completion_pct: percent(completed as u64, total as u64),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackgroundTasksView {
    /// Most recently updated first
    pub tasks: Vec<BackgroundTask>,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub killed: usize,
}

pub(super) fn background_tasks(state: &SessionState) -> BackgroundTasksView {
    let count = |status: BackgroundTaskStatus| {
        state
            .background_tasks
            .iter()
            .filter(|t| t.status == status)
            .count()
    };
    BackgroundTasksView {
        tasks: state.background_tasks.iter().cloned().collect(),
        running: count(BackgroundTaskStatus::Running),
        completed: count(BackgroundTaskStatus::Completed),
        failed: count(BackgroundTaskStatus::Failed),
        killed: count(BackgroundTaskStatus::Killed),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBar {
    pub category: ToolCategory,
    pub count: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolHistogramView {
    pub total: u64,
    /// One bar per category, zero counts included
    pub bars: Vec<HistogramBar>,
}

pub(super) fn tool_histogram(state: &SessionState) -> ToolHistogramView {
    let total = state.counters.tool_uses;
    let bars = ToolCategory::ALL
        .into_iter()
        .map(|category| {
            let count = state
                .counters
                .by_category
                .get(&category)
                .copied()
                .unwrap_or(0);
            HistogramBar {
                category,
                count,
                percent: percent(count, total),
            }
        })
        .collect();
    ToolHistogramView { total, bars }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgNode {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub current_tool: Option<String>,
    pub task_description: Option<String>,
    pub tool_uses: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgChartView {
    pub boss: Option<OrgNode>,
    /// Employees in hiring order, departed ones included
    pub employees: Vec<OrgNode>,
    pub active: usize,
    pub departed: usize,
}

pub(super) fn org_chart(state: &SessionState) -> OrgChartView {
    let node = |agent: &Agent| OrgNode {
        id: agent.id.clone(),
        name: agent.name.clone(),
        role: agent.role,
        status: agent.status,
        current_tool: agent.current_tool.clone(),
        task_description: agent.task_description.clone(),
        tool_uses: agent.tool_uses,
    };

    let mut employees: Vec<&Agent> = state
        .agents
        .values()
        .filter(|a| a.role == AgentRole::Employee)
        .collect();
    employees.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));

    OrgChartView {
        boss: state.boss().map(node),
        active: employees.iter().filter(|a| a.is_active()).count(),
        departed: employees.iter().filter(|a| !a.is_active()).count(),
        employees: employees.into_iter().map(node).collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickerLine {
    pub label: String,
    pub value: String,
}

/// Tongue-in-cheek stock ticker built from the session counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductivityView {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_pct: f64,
    pub lines: Vec<TickerLine>,
}

pub(super) fn productivity(state: &SessionState) -> ProductivityView {
    let c = &state.counters;
    let price = ticker_price(c.code_written, c.successes, c.failures);

    // Change against the price before the most recent outcome
    let previous = if c.tool_uses == 0 {
        price
    } else if c.consecutive_successes > 0 {
        ticker_price(c.code_written, c.successes.saturating_sub(1), c.failures)
    } else {
        ticker_price(c.code_written, c.successes, c.failures.saturating_sub(1))
    };
    let change = round2(price - previous);

    let symbol = state
        .project_name
        .as_deref()
        .map(ticker_symbol)
        .unwrap_or_else(|| "AGNT".to_string());

    ProductivityView {
        symbol,
        price,
        change,
        change_pct: if previous > 0.0 {
            round2(change / previous * 100.0)
        } else {
            0.0
        },
        lines: vec![
            line("Tool calls", c.tool_uses.to_string()),
            line("Code written", c.code_written.to_string()),
            line("Success rate", format!("{:.1}%", success_rate(state))),
            line("Best streak", c.best_streak.to_string()),
            line("Hires", state.lifespans.len().saturating_sub(1).to_string()),
            line("Coffee breaks", c.compactions.to_string()),
        ],
    }
}

fn ticker_price(code_written: u64, successes: u64, failures: u64) -> f64 {
    let raw = TICKER_BASE_PRICE + code_written as f64 * 2.5 + successes as f64 * 0.5
        - failures as f64 * 1.5;
    round2(raw.max(1.0))
}

fn ticker_symbol(project: &str) -> String {
    let symbol: String = project
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect::<String>()
        .to_ascii_uppercase();
    if symbol.is_empty() {
        "AGNT".to_string()
    } else {
        symbol
    }
}

fn line(label: &str, value: String) -> TickerLine {
    TickerLine {
        label: label.to_string(),
        value,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherCondition {
    Sunny,
    PartlyCloudy,
    Cloudy,
    Rainy,
    Stormy,
}

/// Session health as a weather report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherView {
    pub condition: WeatherCondition,
    pub success_rate: f64,
    pub activity_level: f64,
    /// Busier sessions run hotter
    pub temperature: i64,
    pub forecast: String,
}

pub(super) fn weather(state: &SessionState) -> WeatherView {
    let rate = success_rate(state);
    let activity = activity_level(state);

    let condition = match rate {
        r if r >= 90.0 => WeatherCondition::Sunny,
        r if r >= 75.0 => WeatherCondition::PartlyCloudy,
        r if r >= 50.0 => WeatherCondition::Cloudy,
        r if r >= 25.0 => WeatherCondition::Rainy,
        _ => WeatherCondition::Stormy,
    };
    let forecast = match (condition, activity >= 50.0) {
        (WeatherCondition::Sunny, true) => "Clear skies and a busy office",
        (WeatherCondition::Sunny, false) => "Clear skies, light traffic",
        (WeatherCondition::PartlyCloudy, _) => "Mostly fine with the odd failed call",
        (WeatherCondition::Cloudy, _) => "Overcast, failures building up",
        (WeatherCondition::Rainy, _) => "Showers of failed tool calls",
        (WeatherCondition::Stormy, _) => "Storm warning: most tool calls are failing",
    };

    WeatherView {
        condition,
        success_rate: round2(rate),
        activity_level: round2(activity),
        temperature: 55 + (activity * 0.4).round() as i64,
        forecast: forecast.to_string(),
    }
}

/// "N tool calls without an incident" board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyView {
    pub consecutive_successes: u64,
    pub best_streak: u64,
    pub total_incidents: u64,
    pub last_incident_at: Option<DateTime<Utc>>,
    /// Seconds between the last incident and the last event
    pub seconds_since_incident: Option<i64>,
}

pub(super) fn safety(state: &SessionState) -> SafetyView {
    let c = &state.counters;
    let seconds_since_incident = match (state.last_incident_at, state.last_event_at) {
        (Some(incident), Some(now)) => Some((now - incident).num_seconds().max(0)),
        _ => None,
    };
    SafetyView {
        consecutive_successes: c.consecutive_successes,
        best_streak: c.best_streak,
        total_incidents: c.failures,
        last_incident_at: state.last_incident_at,
        seconds_since_incident,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineLane {
    pub agent_id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Up to the end time, or the last event for agents still working
    pub duration_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineView {
    pub started_at: Option<DateTime<Utc>>,
    /// Right edge of the chart: session end or last event
    pub now: Option<DateTime<Utc>>,
    pub lanes: Vec<TimelineLane>,
}

pub(super) fn timeline(state: &SessionState) -> TimelineView {
    let now = state.ended_at.or(state.last_event_at);
    let mut lanes: Vec<TimelineLane> = state
        .lifespans
        .iter()
        .map(|(id, span)| {
            let end = span.ended_at.or(now).unwrap_or(span.started_at);
            TimelineLane {
                agent_id: id.clone(),
                name: span.name.clone(),
                role: span.role,
                started_at: span.started_at,
                ended_at: span.ended_at,
                duration_secs: (end - span.started_at).num_seconds().max(0),
            }
        })
        .collect();
    lanes.sort_by(|a, b| {
        let rank = |role: AgentRole| matches!(role, AgentRole::Employee) as u8;
        rank(a.role)
            .cmp(&rank(b.role))
            .then(a.started_at.cmp(&b.started_at))
            .then(a.agent_id.cmp(&b.agent_id))
    });

    TimelineView {
        started_at: state.started_at,
        now,
        lanes,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsView {
    /// Oldest first
    pub items: Vec<NewsItem>,
    pub latest: Option<NewsItem>,
}

pub(super) fn news(state: &SessionState) -> NewsView {
    NewsView {
        items: state.news.iter().cloned().collect(),
        latest: state.news.back().cloned(),
    }
}

/// Context compactions as coffee breaks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoffeeView {
    pub cups: u64,
    pub tool_uses_since_break: u64,
    pub last_break_at: Option<DateTime<Utc>>,
}

pub(super) fn coffee(state: &SessionState) -> CoffeeView {
    CoffeeView {
        cups: state.counters.compactions,
        tool_uses_since_break: state.counters.tool_uses_since_compaction,
        last_break_at: state.last_compaction_at,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatCell {
    pub file: String,
    pub edits: u64,
    /// Edits relative to the hottest file, 0.0..=1.0
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatMapView {
    /// Hottest first, ties by name
    pub files: Vec<HeatCell>,
    pub total_edits: u64,
    pub max_edits: u64,
}

pub(super) fn heat_map(state: &SessionState) -> HeatMapView {
    let edits = &state.counters.file_edits;
    let max_edits = edits.values().copied().max().unwrap_or(0);
    let mut files: Vec<HeatCell> = edits
        .iter()
        .map(|(file, &count)| HeatCell {
            file: file.clone(),
            edits: count,
            intensity: if max_edits == 0 {
                0.0
            } else {
                round2(count as f64 / max_edits as f64)
            },
        })
        .collect();
    files.sort_by(|a, b| b.edits.cmp(&a.edits).then(a.file.cmp(&b.file)));

    HeatMapView {
        files,
        total_edits: edits.values().sum(),
        max_edits,
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 / whole as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventKind};
    use crate::session::state::NEWS_CAPACITY;
    use crate::session::{replay, NewsCategory};
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::seconds(secs)
    }

    fn state(events: &[Event]) -> SessionState {
        replay(SessionState::new("s1".into()), events)
    }

    fn edit(secs: i64, path: &str) -> Event {
        let mut event = Event::tool_use_end("s1", t(secs), "Edit", true);
        if let EventKind::ToolUseEnd(data) = &mut event.kind {
            data.file_path = Some(path.to_string());
        }
        event
    }

    #[test]
    fn test_histogram_has_every_category() {
        let s = state(&[
            Event::tool_use_end("s1", t(0), "Read", true),
            Event::tool_use_end("s1", t(1), "Edit", true),
            Event::tool_use_end("s1", t(2), "Edit", true),
            Event::tool_use_end("s1", t(3), "Bash", true),
        ]);
        let view = tool_histogram(&s);
        assert_eq!(view.total, 4);
        assert_eq!(view.bars.len(), ToolCategory::ALL.len());
        let count = |cat| view.bars.iter().find(|b| b.category == cat).unwrap().count;
        assert_eq!(count(ToolCategory::Read), 1);
        assert_eq!(count(ToolCategory::Edit), 2);
        assert_eq!(count(ToolCategory::Bash), 1);
        assert_eq!(count(ToolCategory::Other), 0);
        assert_eq!(view.bars[1].percent, 50.0);
    }

    #[test]
    fn test_todo_counts() {
        let s = state(&[Event::todo_write(
            "s1",
            t(0),
            vec![
                TodoItem::new("1", "a", TodoStatus::Completed),
                TodoItem::new("2", "b", TodoStatus::InProgress),
                TodoItem::new("3", "c", TodoStatus::Pending),
                TodoItem::new("4", "d", TodoStatus::Completed),
            ],
        )]);
        let view = todo(&s);
        assert_eq!(view.total, 4);
        assert_eq!(view.completed, 2);
        assert_eq!(view.completion_pct, 50.0);
    }

    #[test]
    fn test_weather_follows_success_rate() {
        let sunny = state(&[Event::tool_use_end("s1", t(0), "Read", true)]);
        assert_eq!(weather(&sunny).condition, WeatherCondition::Sunny);

        let stormy = state(&[
            Event::tool_use_end("s1", t(0), "Read", false),
            Event::tool_use_end("s1", t(1), "Read", false),
        ]);
        assert_eq!(weather(&stormy).condition, WeatherCondition::Stormy);

        let empty = SessionState::new("s1".into());
        let view = weather(&empty);
        assert_eq!(view.success_rate, 100.0);
        assert_eq!(view.activity_level, 0.0);
    }

    #[test]
    fn test_safety_board_uses_event_time() {
        let s = state(&[
            Event::tool_use_end("s1", t(0), "Bash", false),
            Event::tool_use_end("s1", t(90), "Bash", true),
        ]);
        let view = safety(&s);
        assert_eq!(view.consecutive_successes, 1);
        assert_eq!(view.total_incidents, 1);
        assert_eq!(view.seconds_since_incident, Some(90));
    }

    #[test]
    fn test_timeline_freezes_after_stop() {
        let s = state(&[
            Event::session_start("s1", t(0)),
            Event::subagent_start("s1", t(10), "a1", Some("Scout".into())),
            Event::subagent_stop("s1", t(40), "a1"),
            Event::session_stop("s1", t(600)),
        ]);
        let view = timeline(&s);
        assert_eq!(view.lanes.len(), 2);
        assert_eq!(view.lanes[0].role, AgentRole::Boss);
        assert_eq!(view.lanes[0].duration_secs, 40);
        assert_eq!(view.lanes[1].name, "Scout");
        assert_eq!(view.lanes[1].duration_secs, 30);
    }

    #[test]
    fn test_timeline_running_agent_uses_last_event() {
        let s = state(&[
            Event::session_start("s1", t(0)),
            Event::subagent_start("s1", t(5), "a1", None),
            Event::tool_use_end("s1", t(25), "Read", true),
        ]);
        let view = timeline(&s);
        let lane = view.lanes.iter().find(|l| l.agent_id.as_str() == "a1").unwrap();
        assert_eq!(lane.ended_at, None);
        assert_eq!(lane.duration_secs, 20);
    }

    #[test]
    fn test_org_chart() {
        let s = state(&[
            Event::session_start("s1", t(0)),
            Event::subagent_start("s1", t(1), "b", None),
            Event::subagent_start("s1", t(2), "a", None),
            Event::subagent_stop("s1", t(3), "b"),
        ]);
        let view = org_chart(&s);
        assert_eq!(view.boss.unwrap().status, AgentStatus::Delegating);
        assert_eq!(view.employees[0].id.as_str(), "b");
        assert_eq!(view.active, 1);
        assert_eq!(view.departed, 1);
    }

    #[test]
    fn test_heat_map_ordering() {
        let s = state(&[
            edit(0, "/x/b.rs"),
            edit(1, "/x/a.rs"),
            edit(2, "/y/b.rs"),
        ]);
        let view = heat_map(&s);
        assert_eq!(view.files[0].file, "b.rs");
        assert_eq!(view.files[0].intensity, 1.0);
        assert_eq!(view.files[1].file, "a.rs");
        assert_eq!(view.files[1].intensity, 0.5);
        assert_eq!(view.total_edits, 3);
    }

    #[test]
    fn test_coffee_counter() {
        let s = state(&[
            Event::context_compaction("s1", t(0)),
            Event::tool_use_end("s1", t(1), "Read", true),
            Event::context_compaction("s1", t(2)),
            Event::tool_use_end("s1", t(3), "Read", true),
        ]);
        let view = coffee(&s);
        assert_eq!(view.cups, 2);
        assert_eq!(view.tool_uses_since_break, 1);
        assert_eq!(view.last_break_at, Some(t(2)));
    }

    #[test]
    fn test_coffee_survives_news_rollover() {
        let mut events = vec![Event::context_compaction("s1", t(0))];
        for i in 0..(NEWS_CAPACITY as i64 + 5) {
            events.push(Event::subagent_start("s1", t(1 + i), format!("a{}", i), None));
        }
        let s = state(&events);
        assert!(s.news.iter().all(|n| n.category != NewsCategory::Coffee));

        let view = coffee(&s);
        assert_eq!(view.cups, 1);
        assert_eq!(view.last_break_at, Some(t(0)));
    }

    #[test]
    fn test_productivity_ticker() {
        let mut start = Event::session_start("s1", t(0));
        if let EventKind::SessionStart(data) = &mut start.kind {
            data.project_name = Some("office-viz".into());
        }
        let s = state(&[start, edit(1, "/a.rs")]);
        let view = productivity(&s);
        assert_eq!(view.symbol, "OFFI");
        assert_eq!(view.price, 103.0);
        assert_eq!(view.change, 0.5);

        let s = replay(s, &[Event::tool_use_end("s1", t(2), "Bash", false)]);
        let view = productivity(&s);
        assert_eq!(view.price, 101.5);
        assert_eq!(view.change, -1.5);
    }

    #[test]
    fn test_news_view() {
        let s = state(&[
            Event::subagent_start("s1", t(0), "a1", None),
            Event::context_compaction("s1", t(1)),
        ]);
        let view = news(&s);
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.latest.unwrap().category, NewsCategory::Coffee);
    }
}
