// src/gpx.rs
//! GPX export of recorded tracks

use crate::error::Result;
use crate::track::Track;
use chrono::SecondsFormat;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub const GPX_FILE_EXTENSION: &str = "gpx";

/// File name convention: recording start date, `yyyy-MM-dd.gpx`
pub fn gpx_file_name(track: &Track) -> String {
    format!("{}.{}", track.recording_start.format("%Y-%m-%d"), GPX_FILE_EXTENSION)
}

/// Render a track as a GPX 1.1 document, points in chronological order
pub fn track_to_gpx(track: &Track) -> String {
    let mut gpx = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="Trackbook" xmlns="http://www.topografix.com/GPX/1/1">
"#);

    gpx.push_str("  <metadata>\n");
    gpx.push_str(&format!("    <name>{}</name>\n", escape_xml(&track.name)));
    gpx.push_str(&format!(
        "    <time>{}</time>\n",
        track.recording_start.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    gpx.push_str("  </metadata>\n");

    // Starred points double as GPX waypoints
    for wp in track.starred_way_points() {
        gpx.push_str(&format!(
            "  <wpt lat=\"{}\" lon=\"{}\">\n    <ele>{}</ele>\n    <time>{}</time>\n    <name>Point of interest</name>\n  </wpt>\n",
            wp.latitude,
            wp.longitude,
            wp.altitude,
            wp.time.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
    }

    gpx.push_str("  <trk>\n");
    gpx.push_str(&format!("    <name>{}</name>\n", escape_xml(&track.name)));
    gpx.push_str("    <trkseg>\n");

    for wp in &track.way_points {
        gpx.push_str(&format!(
            "      <trkpt lat=\"{}\" lon=\"{}\">\n        <ele>{}</ele>\n        <time>{}</time>\n      </trkpt>\n",
            wp.latitude,
            wp.longitude,
            wp.altitude,
            wp.time.to_rfc3339_opts(SecondsFormat::Millis, true)
        ));
    }

    gpx.push_str("    </trkseg>\n");
    gpx.push_str("  </trk>\n");
    gpx.push_str("</gpx>\n");
    gpx
}

/// Write the GPX rendering of a track to `path`
pub fn write_gpx(track: &Track, path: &Path) -> Result<()> {
    let content = track_to_gpx(track);
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waypoint::{Provider, WayPoint};
    use chrono::{DateTime, Duration};

    fn sample_track() -> Track {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut track = Track::new(start);
        track.name = "Walk <home> & back".to_string();
        for i in 0..3 {
            track.push_way_point(WayPoint {
                latitude: 52.52 + i as f64 * 0.001,
                longitude: 13.405,
                altitude: 34.0 + i as f64,
                accuracy: 4.0,
                time: start + Duration::seconds(i * 5),
                provider: Provider::Gps,
                starred: i == 1,
            });
        }
        track
    }

    #[test]
    fn test_file_name() {
        assert_eq!(gpx_file_name(&sample_track()), "2023-11-14.gpx");
    }

    #[test]
    fn test_gpx_structure() {
        let gpx = track_to_gpx(&sample_track());
        assert!(gpx.starts_with("<?xml"));
        assert!(gpx.contains("<gpx version=\"1.1\""));
        assert_eq!(gpx.matches("<trkpt ").count(), 3);
        assert_eq!(gpx.matches("<wpt ").count(), 1);
        assert!(gpx.contains("<trkpt lat=\"52.52\" lon=\"13.405\">"));
        assert!(gpx.contains("<ele>34</ele>"));
        assert!(gpx.contains("<time>2023-11-14T22:13:20.000Z</time>"));
        assert!(gpx.contains("Walk &lt;home&gt; &amp; back"));
    }

    #[test]
    fn test_points_in_chronological_order() {
        let gpx = track_to_gpx(&sample_track());
        let first = gpx.find("2023-11-14T22:13:20.000Z</time>\n      </trkpt>").unwrap();
        let last = gpx.find("2023-11-14T22:13:30.000Z</time>\n      </trkpt>").unwrap();
        assert!(first < last);
    }

    #[test]
    fn test_write_gpx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.gpx");
        write_gpx(&sample_track(), &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("</gpx>"));
    }
}
