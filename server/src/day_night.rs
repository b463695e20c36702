//! Round clock and the day/night countdown.
//!
//! The cycle owns the only [`Countdown`] allowed to flip the phase. Everything
//! else learns about phase changes through the [`Transition`] values returned
//! from [`DayNightCycle::tick`] and [`DayNightCycle::toggle`], which the game
//! state fans out to the subsystems that care.

use crate::config::RoundConfig;
use crate::events::Outbox;
use crate::timer::Countdown;
use log::info;
use shared::{ClockView, Event, Phase, RoundStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    DayStarted { day: u32 },
    NightStarted { day: u32 },
    GameOver { day: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundClock {
    pub day: u32,
    pub phase: Phase,
    pub max_days: u32,
}

#[derive(Debug)]
pub struct DayNightCycle {
    clock: RoundClock,
    status: RoundStatus,
    countdown: Countdown,
    day_duration: f32,
    night_duration: f32,
    warning_threshold: f32,
    last_announced: Option<u32>,
}

impl DayNightCycle {
    pub fn new(config: &RoundConfig) -> Self {
        Self {
            clock: RoundClock {
                day: 1,
                phase: Phase::Day,
                max_days: config.max_days,
            },
            status: RoundStatus::Lobby,
            countdown: Countdown::idle(),
            day_duration: config.day_duration,
            night_duration: config.night_duration,
            warning_threshold: config.warning_threshold,
            last_announced: None,
        }
    }

    pub fn clock(&self) -> RoundClock {
        self.clock
    }

    pub fn phase(&self) -> Phase {
        self.clock.phase
    }

    pub fn day(&self) -> u32 {
        self.clock.day
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == RoundStatus::Running
    }

    pub fn is_night(&self) -> bool {
        self.is_running() && self.clock.phase == Phase::Night
    }

    pub fn seconds_left(&self) -> f32 {
        self.countdown.remaining().unwrap_or(0.0)
    }

    /// Opens day one and starts its countdown.
    pub fn start_round(&mut self, outbox: &mut Outbox) -> Transition {
        self.status = RoundStatus::Running;
        self.clock.day = 1;
        self.clock.phase = Phase::Day;
        self.restart_countdown(self.day_duration);
        info!("Round started, day 1 of {}", self.clock.max_days);
        outbox.all(Event::PhaseChanged {
            phase: Phase::Day,
            day: 1,
        });
        outbox.all(Event::DayStarted { day: 1 });
        Transition::DayStarted { day: 1 }
    }

    /// Flips the phase. Entering day advances the day index, and running out
    /// of days ends the round instead of starting a new day.
    pub fn toggle(&mut self, outbox: &mut Outbox) -> Option<Transition> {
        if !self.is_running() {
            return None;
        }

        match self.clock.phase {
            Phase::Day => {
                self.clock.phase = Phase::Night;
                self.restart_countdown(self.night_duration);
                let day = self.clock.day;
                info!("Night {} begins", day);
                outbox.all(Event::PhaseChanged {
                    phase: Phase::Night,
                    day,
                });
                outbox.all(Event::NightStarted { day });
                Some(Transition::NightStarted { day })
            }
            Phase::Night => {
                self.clock.day += 1;
                if self.clock.day > self.clock.max_days {
                    self.status = RoundStatus::Over;
                    self.countdown.stop();
                    self.last_announced = None;
                    let day = self.clock.max_days;
                    info!("Game over after {} days", day);
                    outbox.all(Event::GameOver { day });
                    return Some(Transition::GameOver { day });
                }
                self.clock.phase = Phase::Day;
                self.restart_countdown(self.day_duration);
                let day = self.clock.day;
                info!("Day {} begins", day);
                outbox.all(Event::PhaseChanged {
                    phase: Phase::Day,
                    day,
                });
                outbox.all(Event::DayStarted { day });
                Some(Transition::DayStarted { day })
            }
        }
    }

    /// Announces the remaining time whenever the whole-second value changes,
    /// then toggles once the countdown runs out.
    pub fn tick(&mut self, dt: f32, outbox: &mut Outbox) -> Option<Transition> {
        if !self.is_running() {
            return None;
        }

        if let Some(seconds_left) = self.countdown.whole_seconds_left() {
            if self.last_announced != Some(seconds_left) {
                self.last_announced = Some(seconds_left);
                outbox.all(Event::TimeRemaining {
                    seconds_left,
                    warning: self.seconds_left() <= self.warning_threshold,
                    night: self.clock.phase == Phase::Night,
                });
            }
        }

        if self.countdown.advance(dt) {
            return self.toggle(outbox);
        }
        None
    }

    /// Movement rule for one participant under the current clock.
    pub fn may_move(&self, is_carrier: bool, hidden: bool) -> bool {
        if hidden {
            return false;
        }
        match self.status {
            RoundStatus::Lobby => true,
            RoundStatus::Running | RoundStatus::Over => {
                self.clock.phase == Phase::Day || is_carrier
            }
        }
    }

    pub fn view(&self) -> ClockView {
        ClockView {
            status: self.status,
            phase: self.clock.phase,
            day: self.clock.day.min(self.clock.max_days),
            max_days: self.clock.max_days,
            seconds_left: self.seconds_left(),
        }
    }

    fn restart_countdown(&mut self, seconds: f32) {
        self.countdown.start(seconds);
        self.last_announced = None;
    }
}
