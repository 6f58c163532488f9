//! Trailing time windows for aggregate queries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("unknown time window '{0}', expected 1h, 3h, 1d, 7d, 30d or an hour count")]
    Unknown(String),
}

/// A trailing window ending now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Window {
    OneHour,
    ThreeHours,
    #[default]
    OneDay,
    SevenDays,
    ThirtyDays,
    /// Explicit hour count.
    Hours(u32),
}

impl Window {
    pub fn hours(self) -> u32 {
        match self {
            Window::OneHour => 1,
            Window::ThreeHours => 3,
            Window::OneDay => 24,
            Window::SevenDays => 24 * 7,
            Window::ThirtyDays => 24 * 30,
            Window::Hours(h) => h,
        }
    }
}

impl FromStr for Window {
    type Err = WindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1h" => Ok(Window::OneHour),
            "3h" => Ok(Window::ThreeHours),
            "1d" => Ok(Window::OneDay),
            "7d" => Ok(Window::SevenDays),
            "30d" => Ok(Window::ThirtyDays),
            other => match other.parse::<u32>() {
                Ok(h) if h > 0 => Ok(Window::Hours(h)),
                _ => Err(WindowError::Unknown(other.to_string())),
            },
        }
    }
}

impl TryFrom<String> for Window {
    type Error = WindowError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::OneHour => f.write_str("1h"),
            Window::ThreeHours => f.write_str("3h"),
            Window::OneDay => f.write_str("1d"),
            Window::SevenDays => f.write_str("7d"),
            Window::ThirtyDays => f.write_str("30d"),
            Window::Hours(h) => write!(f, "{}", h),
        }
    }
}

impl From<Window> for String {
    fn from(w: Window) -> Self {
        w.to_string()
    }
}
