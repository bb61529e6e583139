//! Wall-clock simulation mode (§4.3's second scheduler mode, §6.5 control
//! surface). Grounded in the teacher crate's `main_live_cmd.rs` live
//! trading loop: a `tokio::select!` over a cycle interval and a shutdown
//! signal, generalized into the day-phase state machine and an in-process
//! `mpsc` command queue instead of raw ctrl-C handling.

use crate::scheduler::{DayPhase, Scheduler};
use crate::strategy::{SchedulePoint, Strategy};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};

/// A control-surface command (§6.5): the operator's side of the pause/
/// resume/query interface. Distinct from strategy hooks — these arrive
/// from outside the run, not from strategy logic.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    Pause,
    Resume,
    Query,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimState {
    Running,
    Paused,
}

const DEFAULT_TOLERANCE: Duration = Duration::from_secs(60);

/// Where the phase machine is within a single trading day. Each tick
/// advances `virtual_time` by `tick_interval` and re-evaluates which
/// schedule points are now due; `points` carries a `fired` flag per point
/// so a point is called exactly once, even if several ticks land inside
/// its tolerance window.
struct DayCursor {
    date: NaiveDate,
    phase: DayPhase,
    virtual_time: NaiveTime,
    points: Vec<(SchedulePoint, bool)>,
    fills: usize,
}

/// Drives a `Scheduler` through the day-phase state machine one tick at a
/// time, honoring `ControlCommand`s sent over `commands`. `Pause` stops
/// advancing `virtual_time` until `Resume`; `Shutdown` ends the loop after
/// the in-flight phase finishes (no partial-phase mutation, per §7's Fatal-
/// error guarantee). A schedule point whose `virtual_time` has already
/// passed it by more than `tolerance` still fires — it just fires late,
/// and a warning is logged rather than the point being skipped.
pub struct SimulationDriver<S: Strategy> {
    scheduler: Scheduler<S>,
    tick_interval: Duration,
    end_date: NaiveDate,
    tolerance: Duration,
}

impl<S: Strategy> SimulationDriver<S> {
    pub fn new(scheduler: Scheduler<S>, tick_interval: Duration, end_date: NaiveDate) -> Self {
        SimulationDriver {
            scheduler,
            tick_interval,
            end_date,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// The driven scheduler, for callers that need to pull results
    /// (equity history, position snapshots) out after `run` completes.
    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    fn open_close(&self) -> (NaiveTime, NaiveTime) {
        let points = self.scheduler.schedule_points();
        let open = points.first().map(|p| p.time).unwrap_or_default();
        let close = points.last().copied().map(|p| p.time).unwrap_or(open);
        (open, close)
    }

    /// Find the next trading day at or after `from`, `None` once the
    /// calendar or `end_date` is exhausted.
    fn next_trading_day(&self, from: NaiveDate) -> Option<NaiveDate> {
        if from > self.end_date {
            return None;
        }
        if self.scheduler.calendar.is_trading_day(from) {
            Some(from)
        } else {
            self.scheduler
                .calendar
                .next_day(from)
                .filter(|&d| d <= self.end_date)
        }
    }

    fn start_day(&self, date: NaiveDate) -> DayCursor {
        let (open, _) = self.open_close();
        DayCursor {
            date,
            phase: DayPhase::BeforeTrading,
            virtual_time: open,
            points: self.scheduler.schedule_points().into_iter().map(|p| (p, false)).collect(),
            fills: 0,
        }
    }

    /// Run until every trading day through `end_date` is processed or a
    /// `Shutdown` command arrives. Returns the number of days processed.
    pub async fn run(
        &mut self,
        start_date: NaiveDate,
        mut commands: mpsc::Receiver<ControlCommand>,
    ) -> anyhow::Result<usize> {
        self.scheduler.initialize(start_date)?;

        let mut state = SimState::Running;
        let mut cursor = self.next_trading_day(start_date).map(|d| self.start_day(d));
        let mut ticker = interval(self.tick_interval);
        let mut processed = 0usize;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if state == SimState::Paused {
                        continue;
                    }
                    let Some(day) = cursor.as_mut() else { break };

                    match day.phase {
                        DayPhase::Closed => unreachable!("a DayCursor is only created for a trading day"),
                        DayPhase::BeforeTrading => {
                            self.scheduler.before_trading_at(day.date, day.virtual_time);
                            day.phase = DayPhase::Trading;
                        }
                        DayPhase::Trading => {
                            day.virtual_time = day
                                .virtual_time
                                .overflowing_add_signed(ChronoDuration::from_std(self.tick_interval).unwrap_or(ChronoDuration::zero()))
                                .0;
                            for (point, fired) in day.points.iter_mut() {
                                if *fired || point.time > day.virtual_time {
                                    continue;
                                }
                                let lateness = day.virtual_time - point.time;
                                if lateness > ChronoDuration::from_std(self.tolerance).unwrap_or(ChronoDuration::zero()) {
                                    warn!(
                                        date = %day.date,
                                        label = point.label,
                                        scheduled = %point.time,
                                        fired_at = %day.virtual_time,
                                        "schedule point fired outside tolerance window",
                                    );
                                }
                                day.fills += self.scheduler.handle_bar_at(day.date, *point)?;
                                *fired = true;
                            }
                            if day.points.iter().all(|(_, fired)| *fired) {
                                day.phase = DayPhase::AfterTrading;
                            }
                        }
                        DayPhase::AfterTrading => {
                            let (_, close) = self.open_close();
                            self.scheduler.after_trading_at(day.date, close);
                            day.phase = DayPhase::Settlement;
                        }
                        DayPhase::Settlement => {
                            self.scheduler.settle_day(day.date, day.fills)?;
                            processed += 1;
                            let next = self.next_trading_day(
                                self.scheduler.calendar.next_day(day.date).unwrap_or(day.date),
                            );
                            cursor = next.map(|d| self.start_day(d));
                            if cursor.is_none() {
                                break;
                            }
                        }
                    }
                }
                Some(cmd) = commands.recv() => {
                    match cmd {
                        ControlCommand::Pause => {
                            info!("simulation paused by control command");
                            state = SimState::Paused;
                        }
                        ControlCommand::Resume => {
                            info!("simulation resumed by control command");
                            state = SimState::Running;
                        }
                        ControlCommand::Query => {
                            info!(?state, "simulation status queried");
                        }
                        ControlCommand::Shutdown => {
                            warn!("simulation shutdown requested, stopping after current phase");
                            break;
                        }
                    }
                }
            }
        }

        self.scheduler.finalize(self.end_date);
        Ok(processed)
    }
}
