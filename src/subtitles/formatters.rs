use crate::request::SubtitleFormat;

use super::Caption;

/// Render a caption track in the requested layout
pub fn render(caption: &Caption, format: SubtitleFormat) -> String {
    match format {
        SubtitleFormat::Txt => format_as_text(caption),
        SubtitleFormat::Srt => format_as_srt(caption),
    }
}

/// Plain text, one caption line per line
pub fn format_as_text(caption: &Caption) -> String {
    let mut out = String::new();
    for entry in &caption.entries {
        out.push_str(&entry.text);
        out.push('\n');
    }
    out
}

/// SubRip: numbered cues with `HH:MM:SS,mmm` timings
pub fn format_as_srt(caption: &Caption) -> String {
    let mut out = String::new();
    for (index, entry) in caption.entries.iter().enumerate() {
        let end = entry.start + entry.duration.max(0.0);
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_timestamp(entry.start),
            format_timestamp(end),
            entry.text.replace('\n', " ")
        ));
    }
    out
}

/// Seconds to `HH:MM:SS,mmm`
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitles::CaptionEntry;

    fn sample() -> Caption {
        Caption {
            language: "en".to_string(),
            auto_generated: false,
            title: None,
            entries: vec![
                CaptionEntry { start: 0.0, duration: 1.5, text: "Hello".into() },
                CaptionEntry { start: 61.25, duration: 2.0, text: "two\nlines".into() },
            ],
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(61.25), "00:01:01,250");
        assert_eq!(format_timestamp(3723.004), "01:02:03,004");
        assert_eq!(format_timestamp(-3.0), "00:00:00,000");
    }

    #[test]
    fn test_text_output() {
        assert_eq!(render(&sample(), SubtitleFormat::Txt), "Hello\ntwo\nlines\n");
    }

    #[test]
    fn test_srt_output() {
        let expected = "1\n00:00:00,000 --> 00:00:01,500\nHello\n\n\
                        2\n00:01:01,250 --> 00:01:03,250\ntwo lines\n\n";
        assert_eq!(render(&sample(), SubtitleFormat::Srt), expected);
    }
}
