//! Property tests for the reducer and the reorder window

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use officeviz_core::events::BackgroundTaskStatus;
use officeviz_core::session::reorder::ReorderBuffer;
use officeviz_core::session::state::{BACKGROUND_TASK_CAPACITY, NEWS_CAPACITY};
use officeviz_core::session::{apply, replay, AgentStatus, SessionState};
use officeviz_core::whiteboard::{project, ViewMode};
use officeviz_core::Event;
use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Op {
    Start,
    Stop,
    ToolStart(&'static str),
    ToolEnd(&'static str, bool),
    Hire(u8),
    Fire(u8),
    Compact,
    Background(u8, u8),
}

const TOOLS: [&str; 8] = ["Read", "Edit", "Write", "Bash", "Grep", "Task", "WebFetch", "Custom"];

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Start),
        1 => Just(Op::Stop),
        3 => prop::sample::select(TOOLS.to_vec()).prop_map(Op::ToolStart),
        6 => (prop::sample::select(TOOLS.to_vec()), any::<bool>())
            .prop_map(|(tool, ok)| Op::ToolEnd(tool, ok)),
        2 => (0u8..6).prop_map(Op::Hire),
        2 => (0u8..8).prop_map(Op::Fire),
        1 => Just(Op::Compact),
        2 => (0u8..14, 0u8..4).prop_map(|(id, status)| Op::Background(id, status)),
    ]
}

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::seconds(seconds)
}

fn to_events(ops: &[Op]) -> Vec<Event> {
    ops.iter()
        .enumerate()
        .map(|(i, op)| {
            let ts = at(i as i64);
            let event = match op {
                Op::Start => Event::session_start("s", ts),
                Op::Stop => Event::session_stop("s", ts),
                Op::ToolStart(tool) => Event::tool_use_start("s", ts, *tool),
                Op::ToolEnd(tool, ok) => Event::tool_use_end("s", ts, *tool, *ok),
                Op::Hire(n) => Event::subagent_start("s", ts, format!("a{}", n), None),
                Op::Fire(n) => Event::subagent_stop("s", ts, format!("a{}", n)),
                Op::Compact => Event::context_compaction("s", ts),
                Op::Background(id, status) => {
                    let status = match status {
                        0 => BackgroundTaskStatus::Running,
                        1 => BackgroundTaskStatus::Completed,
                        2 => BackgroundTaskStatus::Failed,
                        _ => BackgroundTaskStatus::Killed,
                    };
                    Event::background_task("s", ts, format!("bg-{}", id), status)
                }
            };
            event.with_sequence(i as u64 + 1)
        })
        .collect()
}

fn empty() -> SessionState {
    SessionState::new("s".into())
}

proptest! {
    #[test]
    fn prop_replay_is_deterministic(ops in prop::collection::vec(op_strategy(), 0..80)) {
        let events = to_events(&ops);
        let once = replay(empty(), &events);
        let twice = replay(empty(), &events);
        prop_assert_eq!(&once, &twice);

        // Folding step by step is the same as replaying
        let mut stepped = empty();
        for event in &events {
            stepped = apply(stepped, event).0;
        }
        prop_assert_eq!(&once, &stepped);
        prop_assert_eq!(once.last_sequence, events.len() as u64);

        for mode in ViewMode::ALL {
            prop_assert_eq!(project(&once, mode), project(&twice, mode));
        }
    }

    #[test]
    fn prop_counters_are_conserved(ops in prop::collection::vec(op_strategy(), 0..120)) {
        let events = to_events(&ops);
        let state = replay(empty(), &events);
        let counters = &state.counters;

        let ends = ops.iter().filter(|op| matches!(op, Op::ToolEnd(..))).count() as u64;
        let failures = ops.iter().filter(|op| matches!(op, Op::ToolEnd(_, false))).count() as u64;
        let compactions = ops.iter().filter(|op| matches!(op, Op::Compact)).count() as u64;

        prop_assert_eq!(counters.tool_uses, ends);
        prop_assert_eq!(counters.failures, failures);
        prop_assert_eq!(counters.successes + counters.failures, counters.tool_uses);
        prop_assert_eq!(counters.by_category.values().sum::<u64>(), counters.tool_uses);
        prop_assert_eq!(counters.compactions, compactions);
        prop_assert!(counters.consecutive_successes <= counters.best_streak);
        prop_assert!(counters.tool_uses_since_compaction <= counters.tool_uses);

        prop_assert!(state.news.len() <= NEWS_CAPACITY);
        prop_assert!(state.background_tasks.len() <= BACKGROUND_TASK_CAPACITY);
        let mut task_ids: Vec<_> = state.background_tasks.iter().map(|t| t.task_id.clone()).collect();
        task_ids.sort();
        task_ids.dedup();
        prop_assert_eq!(task_ids.len(), state.background_tasks.len());
    }

    #[test]
    fn prop_stop_freezes_every_lifespan(ops in prop::collection::vec(op_strategy(), 0..60)) {
        let mut events = to_events(&ops);
        let seq = events.len() as u64 + 1;
        events.push(Event::session_stop("s", at(seq as i64)).with_sequence(seq));
        let state = replay(empty(), &events);

        for (id, lifespan) in &state.lifespans {
            prop_assert!(lifespan.ended_at.is_some(), "lifespan of {} left open", id);
        }
        for agent in state.agents.values() {
            prop_assert!(agent.status != AgentStatus::Working);
            prop_assert!(agent.current_tool.is_none());
        }
    }

    #[test]
    fn prop_reorder_window_restores_order(
        order in Just((1u64..=24).collect::<Vec<u64>>()).prop_shuffle()
    ) {
        let mut buffer = ReorderBuffer::new(1, 64, Duration::from_secs(60));
        let now = Instant::now();
        let mut released = Vec::new();
        for seq in order {
            let event = Event::context_compaction("s", at(seq as i64)).with_sequence(seq);
            let ready = buffer.offer(event, now).unwrap();
            released.extend(ready.into_iter().filter_map(|e| e.sequence));
        }
        prop_assert_eq!(released, (1u64..=24).collect::<Vec<u64>>());
        prop_assert_eq!(buffer.pending_len(), 0);
        prop_assert_eq!(buffer.next_expected(), 25);
    }
}
