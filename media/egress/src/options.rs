/*!
    Egress option strings.

    Options are written the way an encoder command line would be:

    ```text
    -codec:v x264 -bitrate:v 5000 -codec:a aac -bitrate:a 128 -preset:v fast -format mp4
    ```

    Each option is a dash-prefixed key followed by one value. Values cannot
    contain whitespace.
*/

use std::str::FromStr;

use regex::Regex;
use thiserror::Error;

use media_types::{AudioCodec, VideoCodec};

const OPTION_PATTERN: &str = r"-([A-Za-z_]+(?::[A-Za-z])?)\s+([^\s]+)";

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("bad value '{value}' for -{key}")]
    BadValue { key: String, value: String },
    #[error("could not parse '{0}'")]
    Unparsed(String),
    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

/**
    Options parsed from an egress option string.

    Every field is optional so that options only override what they name.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EgressOptions {
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<AudioCodec>,
    /// Kilobits per second.
    pub video_bitrate: Option<u32>,
    /// Kilobits per second.
    pub audio_bitrate: Option<u32>,
    pub preset: Option<String>,
    pub filter: Option<String>,
    pub format: Option<String>,
    pub realtime: Option<bool>,
}

impl EgressOptions {
    pub fn parse(options: &str) -> Result<Self, OptionsError> {
        let pattern = Regex::new(OPTION_PATTERN)?;

        let leftover = pattern.replace_all(options, "");
        let leftover = leftover.trim();
        if !leftover.is_empty() {
            return Err(OptionsError::Unparsed(leftover.to_owned()));
        }

        let mut parsed = Self::default();
        for captures in pattern.captures_iter(options) {
            let (_, [key, value]) = captures.extract();
            parsed.apply(key, value)?;
        }
        Ok(parsed)
    }

    fn apply(&mut self, key: &str, value: &str) -> Result<(), OptionsError> {
        match key.to_ascii_lowercase().as_str() {
            "codec:v" | "c:v" | "vcodec" => {
                self.video_codec = Some(VideoCodec::from_name(value).unwrap_or_else(|| {
                    tracing::warn!(codec = value, "unknown video codec, using x264");
                    VideoCodec::X264
                }));
            }
            "codec:a" | "c:a" | "acodec" => {
                self.audio_codec = Some(AudioCodec::from_name(value).unwrap_or_else(|| {
                    tracing::warn!(codec = value, "unknown audio codec, using aac");
                    AudioCodec::Aac
                }));
            }
            "bitrate:v" | "b:v" => self.video_bitrate = Some(kbps(key, value)?),
            "bitrate:a" | "b:a" => self.audio_bitrate = Some(kbps(key, value)?),
            "preset:v" | "preset" => self.preset = Some(value.to_owned()),
            "filter:v" | "vf" => self.filter = Some(value.to_owned()),
            "format" | "f" => self.format = Some(value.to_owned()),
            "realtime" => {
                self.realtime = Some(match value.to_ascii_lowercase().as_str() {
                    "1" | "true" => true,
                    "0" | "false" => false,
                    _ => return Err(bad_value(key, value)),
                });
            }
            other => tracing::warn!(option = other, value, "ignoring unknown egress option"),
        }
        Ok(())
    }
}

impl FromStr for EgressOptions {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Accepts plain kilobits or a `k` suffix (`5000`, `5000k`).
fn kbps(key: &str, value: &str) -> Result<u32, OptionsError> {
    let digits = value
        .strip_suffix('k')
        .or_else(|| value.strip_suffix('K'))
        .unwrap_or(value);
    match digits.parse::<u32>() {
        Ok(rate) if rate > 0 => Ok(rate),
        _ => Err(bad_value(key, value)),
    }
}

fn bad_value(key: &str, value: &str) -> OptionsError {
    OptionsError::BadValue {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_option_string() {
        let options = EgressOptions::parse(
            "-codec:v vp9 -bitrate:v 5000 -codec:a opus -bitrate:a 96k \
             -preset:v fast -filter:v scale=1280:-1 -format webm",
        )
        .unwrap();
        assert_eq!(options.video_codec, Some(VideoCodec::Vp9));
        assert_eq!(options.audio_codec, Some(AudioCodec::Opus));
        assert_eq!(options.video_bitrate, Some(5000));
        assert_eq!(options.audio_bitrate, Some(96));
        assert_eq!(options.preset.as_deref(), Some("fast"));
        assert_eq!(options.filter.as_deref(), Some("scale=1280:-1"));
        assert_eq!(options.format.as_deref(), Some("webm"));
        assert_eq!(options.realtime, None);
    }

    #[test]
    fn empty_string_overrides_nothing() {
        assert_eq!(EgressOptions::parse("  ").unwrap(), EgressOptions::default());
    }

    #[test]
    fn unknown_codecs_fall_back() {
        let options: EgressOptions = "-c:v prores -c:a flac".parse().unwrap();
        assert_eq!(options.video_codec, Some(VideoCodec::X264));
        assert_eq!(options.audio_codec, Some(AudioCodec::Aac));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let options = EgressOptions::parse("-tune zerolatency -b:v 800").unwrap();
        assert_eq!(options.video_bitrate, Some(800));
    }

    #[test]
    fn rejects_bad_values_and_stray_text() {
        assert!(matches!(
            EgressOptions::parse("-bitrate:v fast"),
            Err(OptionsError::BadValue { .. })
        ));
        assert!(matches!(
            EgressOptions::parse("-bitrate:a 0"),
            Err(OptionsError::BadValue { .. })
        ));
        assert!(matches!(
            EgressOptions::parse("-realtime maybe"),
            Err(OptionsError::BadValue { .. })
        ));
        assert!(matches!(
            EgressOptions::parse("x264 -b:v 100"),
            Err(OptionsError::Unparsed(rest)) if rest == "x264"
        ));
    }
}
