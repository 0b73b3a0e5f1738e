//! Session screens.

use serde::{Deserialize, Serialize};

/// Screen shown by the session. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    /// Sample invite preview
    #[default]
    Sample,
    /// Photo picker
    Upload,
    /// Names, date and venue form
    Form,
    /// Generation in progress
    Loading,
    /// Finished invite
    Result,
}

impl Screen {
    pub fn as_str(&self) -> &'static str {
        match self {
            Screen::Sample => "sample",
            Screen::Upload => "upload",
            Screen::Form => "form",
            Screen::Loading => "loading",
            Screen::Result => "result",
        }
    }
}

impl std::fmt::Display for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
