//! Subscription run-state machine, persisted as a string column.
//!
//! `None -> Queued -> Running -> (Stopped | Expired | Error)`. Terminal
//! states are only ever left through a fresh deploy.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    None,
    Queued,
    Running,
    Stopped,
    Expired,
    Error,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::None => "none",
            RunState::Queued => "queued",
            RunState::Running => "running",
            RunState::Stopped => "stopped",
            RunState::Expired => "expired",
            RunState::Error => "error",
        }
    }

    /// True once the state machine has reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Stopped | RunState::Expired | RunState::Error)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(RunState::None),
            "queued" => Ok(RunState::Queued),
            "running" => Ok(RunState::Running),
            "stopped" => Ok(RunState::Stopped),
            "expired" => Ok(RunState::Expired),
            "error" => Ok(RunState::Error),
            other => Err(anyhow::anyhow!("unknown run state '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for state in [
            RunState::None,
            RunState::Queued,
            RunState::Running,
            RunState::Stopped,
            RunState::Expired,
            RunState::Error,
        ] {
            assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        }
    }

    #[test]
    fn rejects_unknown_state() {
        assert!("paused".parse::<RunState>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(RunState::Stopped.is_terminal());
        assert!(RunState::Expired.is_terminal());
        assert!(RunState::Error.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::Queued.is_terminal());
    }
}
