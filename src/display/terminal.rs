// src/display/terminal.rs
//! Terminal view of the running recording

use crate::{
    error::Result,
    gps::LocationFix,
    preferences::Preferences,
    recorder::TrackingState,
    refresh::{RefreshFrame, RefreshSink},
    track::Track,
    units,
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::io::{self, Stdout, Write};

pub struct TerminalDisplay<W: Write = Stdout> {
    out: W,
    preferences: Preferences,
    clear_screen: bool,
}

impl TerminalDisplay<Stdout> {
    pub fn new(preferences: Preferences) -> Self {
        Self {
            out: io::stdout(),
            preferences,
            clear_screen: true,
        }
    }
}

impl<W: Write> TerminalDisplay<W> {
    /// Render into any writer without clearing the screen
    pub fn with_writer(out: W, preferences: Preferences) -> Self {
        Self {
            out,
            preferences,
            clear_screen: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
    }

    fn render_header(&mut self, frame: &RefreshFrame) -> Result<()> {
        let (state_color, state_text) = match frame.state {
            TrackingState::Active => (Color::Red, "● RECORDING"),
            TrackingState::Paused => (Color::Yellow, "❚❚ PAUSED"),
            TrackingState::Stopped => (Color::DarkGrey, "■ STOPPED"),
        };
        queue!(
            self.out,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\nTrackbook\n"),
            Print("=".repeat(60)),
            Print("\n"),
            SetForegroundColor(state_color),
            Print(format!("{}\n\n", state_text)),
            ResetColor
        )?;
        Ok(())
    }

    fn render_location(&mut self, fix: Option<&LocationFix>, location_error: bool) -> Result<()> {
        queue!(self.out, SetForegroundColor(Color::Yellow), Print("LOCATION:\n"), ResetColor)?;

        if location_error {
            queue!(
                self.out,
                SetForegroundColor(Color::Red),
                Print("  No location provider is active\n"),
                ResetColor
            )?;
        }

        match fix {
            Some(fix) => {
                let units = self.preferences.units;
                queue!(
                    self.out,
                    Print(format!("  Latitude:  {}\n", LocationFix::format_coordinate(fix.latitude))),
                    Print(format!("  Longitude: {}\n", LocationFix::format_coordinate(fix.longitude))),
                    Print(format!("  Altitude:  {}\n", units::distance_to_string(fix.altitude, units))),
                    Print(format!(
                        "  Accuracy:  {}\n",
                        units::distance_to_string(fix.accuracy as f64, units)
                    )),
                    Print(format!("  Source:    {} ({}s ago)\n\n", fix.provider, fix.age_seconds()))
                )?;
            }
            None => {
                queue!(self.out, Print("  Waiting for a fix...\n\n"))?;
            }
        }
        Ok(())
    }

    fn render_track(&mut self, track: &Track) -> Result<()> {
        let units = self.preferences.units;
        queue!(
            self.out,
            SetForegroundColor(Color::Cyan),
            Print("TRACK:\n"),
            ResetColor,
            Print(format!("  Name:      {}\n", track.name)),
            Print(format!("  Waypoints: {}\n", track.way_points.len())),
            Print(format!("  Distance:  {}\n", units::distance_to_string(track.distance as f64, units))),
            Print(format!("  Duration:  {}\n", units::duration_to_string(track.duration))),
            Print(format!(
                "  Velocity:  {}\n",
                units::velocity_to_string(track.distance as f64, track.duration, units)
            ))
        )?;

        if !track.is_empty() {
            queue!(
                self.out,
                Print(format!(
                    "  Altitude:  {} - {}\n",
                    units::distance_to_string(track.min_altitude, units),
                    units::distance_to_string(track.max_altitude, units)
                )),
                Print(format!(
                    "  Elevation: +{} / -{}\n",
                    units::distance_to_string(track.positive_elevation, units),
                    units::distance_to_string(track.negative_elevation, units)
                ))
            )?;
        }
        if track.step_count >= 0.0 {
            queue!(self.out, Print(format!("  Steps:     {:.0}\n", track.step_count)))?;
        }
        queue!(self.out, Print("\n"))?;
        Ok(())
    }
}

impl<W: Write> RefreshSink for TerminalDisplay<W> {
    fn open(&mut self) -> Result<()> {
        execute!(self.out, Hide, DisableLineWrap)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        execute!(self.out, Show, EnableLineWrap)?;
        Ok(())
    }

    fn render(&mut self, frame: &RefreshFrame) -> Result<()> {
        if self.clear_screen {
            queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?;
        }

        self.render_header(frame)?;
        self.render_location(frame.current_best_location.as_ref(), frame.location_error)?;
        if let Some(track) = &frame.track {
            self.render_track(track)?;
        }

        queue!(
            self.out,
            SetForegroundColor(Color::Green),
            Print("=".repeat(60)),
            Print("\nPress Ctrl+C to stop and save\n"),
            ResetColor
        )?;
        self.out.flush()?;
        Ok(())
    }
}
