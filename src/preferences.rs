// src/preferences.rs
//! User preferences and change notification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSystem::Metric => write!(f, "metric"),
            UnitSystem::Imperial => write!(f, "imperial"),
        }
    }
}

impl FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            other => Err(format!("unknown unit system: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    FollowSystem,
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
            Theme::FollowSystem => write!(f, "system"),
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" | "follow_system" => Ok(Theme::FollowSystem),
            other => Err(format!("unknown theme: {}", other)),
        }
    }
}

/// Preference values handed to formatters and views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub units: UnitSystem,
    pub theme: Theme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceChange {
    Units(UnitSystem),
    Theme(Theme),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Box<dyn Fn(&PreferenceChange) + Send + Sync>;

/// Holds the current preferences and notifies subscribers about changes
pub struct PreferenceRegistry {
    current: Preferences,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_id: u64,
}

impl PreferenceRegistry {
    pub fn new(initial: Preferences) -> Self {
        Self {
            current: initial,
            subscribers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn current(&self) -> Preferences {
        self.current
    }

    pub fn subscribe<F>(&mut self, callback: F) -> SubscriptionId
    where
        F: Fn(&PreferenceChange) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Returns false when the id was not subscribed
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn set_units(&mut self, units: UnitSystem) {
        if self.current.units != units {
            self.current.units = units;
            self.notify(PreferenceChange::Units(units));
        }
    }

    pub fn set_theme(&mut self, theme: Theme) {
        if self.current.theme != theme {
            self.current.theme = theme;
            self.notify(PreferenceChange::Theme(theme));
        }
    }

    fn notify(&self, change: PreferenceChange) {
        tracing::debug!("Preference changed: {:?}", change);
        for (_, subscriber) in &self.subscribers {
            subscriber(&change);
        }
    }
}

impl Default for PreferenceRegistry {
    fn default() -> Self {
        Self::new(Preferences::default())
    }
}
