//! XMLTV document emission.
//!
//! Builds the whole document as a string with `quick_xml` escaping, then
//! writes it in one pass. Channels are sorted by id and programmes per
//! channel ascending by start, so equal inputs emit byte-identical output.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::escape::escape;
use tokio::io::AsyncWriteExt;

use crate::errors::AppError;
use crate::models::{ChannelBlock, Programme};
use crate::utils::datetime::{format_xmltv, format_xmltv_date};

const GENERATOR: &str = concat!("teamarr/", env!("CARGO_PKG_VERSION"));

/// Render the full document. Pure; the writer below is a thin wrapper.
pub fn render_document(channels: &[ChannelBlock], programmes: &[Programme]) -> String {
    let mut channels: Vec<&ChannelBlock> = channels.iter().collect();
    channels.sort_by(|a, b| a.id.cmp(&b.id));
    channels.dedup_by(|a, b| a.id == b.id);

    let mut by_channel: BTreeMap<&str, Vec<&Programme>> = BTreeMap::new();
    for programme in programmes {
        by_channel
            .entry(programme.channel_id.as_str())
            .or_default()
            .push(programme);
    }
    for list in by_channel.values_mut() {
        list.sort_by_key(|p| p.start);
    }

    let mut out = String::with_capacity(programmes.len() * 256 + 1024);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str("<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n");
    out.push_str(&format!(
        "<tv generator-info-name=\"{}\">\n",
        escape(GENERATOR)
    ));

    for channel in &channels {
        out.push_str(&format!("  <channel id=\"{}\">\n", escape(&channel.id)));
        out.push_str(&format!(
            "    <display-name>{}</display-name>\n",
            escape(&channel.display_name)
        ));
        if let Some(icon) = &channel.icon {
            if !icon.is_empty() {
                out.push_str(&format!("    <icon src=\"{}\"/>\n", escape(icon)));
            }
        }
        out.push_str("  </channel>\n");
    }

    for channel in &channels {
        let Some(list) = by_channel.get(channel.id.as_str()) else {
            continue;
        };
        for programme in list {
            write_programme(&mut out, programme);
        }
    }

    out.push_str("</tv>\n");
    out
}

fn write_programme(out: &mut String, programme: &Programme) {
    out.push_str(&format!(
        "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">\n",
        format_xmltv(&programme.start),
        format_xmltv(&programme.stop),
        escape(&programme.channel_id)
    ));
    out.push_str(&format!("    <title>{}</title>\n", escape(&programme.title)));
    if let Some(subtitle) = &programme.subtitle {
        if !subtitle.is_empty() {
            out.push_str(&format!(
                "    <sub-title>{}</sub-title>\n",
                escape(subtitle)
            ));
        }
    }
    if !programme.description.is_empty() {
        out.push_str(&format!(
            "    <desc>{}</desc>\n",
            escape(&programme.description)
        ));
    }
    for category in &programme.categories {
        out.push_str(&format!(
            "    <category>{}</category>\n",
            escape(category)
        ));
    }
    out.push_str(&format!(
        "    <date>{}</date>\n",
        format_xmltv_date(&programme.start)
    ));
    // Flags only mark real events; filler never carries them
    if programme.filler.is_none() {
        if programme.live {
            out.push_str("    <live/>\n");
        }
        if programme.new {
            out.push_str("    <new/>\n");
        }
    }
    out.push_str("  </programme>\n");
}

/// Write the document to `path`, creating parent directories. Returns the
/// byte count written.
pub async fn write_document(
    path: &Path,
    channels: &[ChannelBlock],
    programmes: &[Programme],
) -> Result<u64, AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let document = render_document(channels, programmes);
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(document.as_bytes()).await?;
    file.flush().await?;
    Ok(document.len() as u64)
}

/// Enforce the per-channel invariant: ascending starts, no overlaps, no
/// zero-length rows. Overlapping rows are clipped to the previous stop.
pub fn sanitize_channel_programmes(programmes: &mut Vec<Programme>) {
    programmes.sort_by(|a, b| {
        a.channel_id
            .cmp(&b.channel_id)
            .then(a.start.cmp(&b.start))
    });

    let mut previous: Option<(String, chrono::DateTime<chrono::Utc>)> = None;
    programmes.retain_mut(|programme| {
        if let Some((channel, prev_stop)) = &previous {
            if *channel == programme.channel_id && programme.start < *prev_stop {
                programme.start = *prev_stop;
            }
        }
        if programme.start >= programme.stop {
            return false;
        }
        previous = Some((programme.channel_id.clone(), programme.stop));
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn programme(channel: &str, start_hour: i64, hours: i64, title: &str) -> Programme {
        let start = Utc.with_ymd_and_hms(2025, 12, 15, 0, 0, 0).unwrap()
            + Duration::hours(start_hour);
        Programme {
            channel_id: channel.to_string(),
            start,
            stop: start + Duration::hours(hours),
            title: title.to_string(),
            subtitle: None,
            description: String::new(),
            categories: vec!["Sports".to_string()],
            live: false,
            new: false,
            filler: None,
        }
    }

    #[test]
    fn document_shape_and_escaping() {
        let channels = vec![ChannelBlock {
            id: "pistons.nba".to_string(),
            display_name: "Pistons <Detroit> & Co".to_string(),
            icon: Some("https://example.com/logo.png".to_string()),
        }];
        let mut game = programme("pistons.nba", 0, 3, "Pistons & Pacers");
        game.new = true;
        let document = render_document(&channels, &[game]);

        assert!(document.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(document.contains("<!DOCTYPE tv SYSTEM \"xmltv.dtd\">"));
        assert!(document.contains("<display-name>Pistons &lt;Detroit&gt; &amp; Co</display-name>"));
        assert!(document.contains("<title>Pistons &amp; Pacers</title>"));
        assert!(document.contains("start=\"20251215000000 +0000\""));
        assert!(document.contains("stop=\"20251215030000 +0000\""));
        assert!(document.contains("<date>20251215</date>"));
        assert!(document.contains("<new/>"));
        assert!(document.ends_with("</tv>\n"));
    }

    #[test]
    fn filler_never_carries_live_or_new() {
        let channels = vec![ChannelBlock {
            id: "c1".to_string(),
            display_name: "C1".to_string(),
            icon: None,
        }];
        let mut filler = programme("c1", 3, 6, "Up Next");
        filler.filler = Some(crate::models::FillerKind::Pregame);
        filler.live = true;
        filler.new = true;

        let document = render_document(&channels, &[filler]);
        assert!(!document.contains("<live/>"));
        assert!(!document.contains("<new/>"));
    }

    #[test]
    fn programmes_sorted_within_channel() {
        let channels = vec![ChannelBlock {
            id: "c1".to_string(),
            display_name: "C1".to_string(),
            icon: None,
        }];
        let late = programme("c1", 6, 3, "Late");
        let early = programme("c1", 0, 3, "Early");
        let document = render_document(&channels, &[late, early]);

        let early_pos = document.find("<title>Early</title>").unwrap();
        let late_pos = document.find("<title>Late</title>").unwrap();
        assert!(early_pos < late_pos);
    }

    #[test]
    fn deterministic_output() {
        let channels = vec![
            ChannelBlock {
                id: "b".to_string(),
                display_name: "B".to_string(),
                icon: None,
            },
            ChannelBlock {
                id: "a".to_string(),
                display_name: "A".to_string(),
                icon: None,
            },
        ];
        let programmes = vec![programme("b", 0, 2, "B0"), programme("a", 0, 2, "A0")];
        assert_eq!(
            render_document(&channels, &programmes),
            render_document(&channels, &programmes)
        );
        // Channel blocks come out ordered by id regardless of input order
        let document = render_document(&channels, &programmes);
        assert!(document.find("id=\"a\"").unwrap() < document.find("id=\"b\"").unwrap());
    }

    #[test]
    fn sanitize_clips_overlaps_and_drops_empty() {
        let mut programmes = vec![
            programme("c1", 0, 3, "Game 1"),
            // Overlaps the first by one hour
            programme("c1", 2, 2, "Game 2"),
            // Fully contained; clipping empties it
            programme("c1", 2, 1, "Ghost"),
        ];
        sanitize_channel_programmes(&mut programmes);

        assert_eq!(programmes.len(), 2);
        assert_eq!(programmes[0].stop, programmes[1].start);
        for pair in programmes.windows(2) {
            assert!(pair[0].stop <= pair[1].start);
        }
    }
}
