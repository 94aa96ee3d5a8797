use media_types::{MediaDuration, Pts, ScaleMode, VideoFormat};

use crate::CommandError;

/**
    Clip window resolved to ticks, ready to hand to a scheduler.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipWindow {
    pub start: Pts,
    /// [`MediaDuration::UNBOUNDED`] plays until the source ends.
    pub duration: MediaDuration,
    pub looping: bool,
    /// Initial seek position. Zero means start decoding from the beginning.
    pub seek: Pts,
}

impl Default for ClipWindow {
    fn default() -> Self {
        Self {
            start: Pts::ZERO,
            duration: MediaDuration::UNBOUNDED,
            looping: false,
            seek: Pts::ZERO,
        }
    }
}

/**
    Parameters of a producer, as given by the host:

    `<locator> [LOOP] [SEEK n] [IN n] [LENGTH n] [OUT n] [FILTER s | VF s] [SCALE_MODE m]`

    Keywords are case-insensitive and positions are counted in output frames.
    Unrecognized tokens are ignored.
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerParams {
    pub locator: String,
    pub looping: bool,
    pub seek: Option<i64>,
    pub in_frame: Option<i64>,
    pub length: Option<i64>,
    pub out_frame: Option<i64>,
    pub filter: Option<String>,
    pub scale_mode: ScaleMode,
}

impl ProducerParams {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            looping: false,
            seek: None,
            in_frame: None,
            length: None,
            out_frame: None,
            filter: None,
            scale_mode: ScaleMode::default(),
        }
    }

    /**
        Parse a whitespace-separated parameter line.
    */
    pub fn parse_line(line: &str) -> Result<Self, CommandError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        Self::parse(&tokens)
    }

    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, CommandError> {
        let mut tokens = tokens.iter().map(AsRef::as_ref);
        let Some(locator) = tokens.next() else {
            return Err(CommandError::Empty);
        };
        let mut params = Self::new(locator);
        let mut vf = None;

        while let Some(token) = tokens.next() {
            let keyword = token.to_ascii_uppercase();
            match keyword.as_str() {
                "LOOP" => params.looping = true,
                "SEEK" => params.seek = Some(number(&keyword, tokens.next())?),
                "IN" | "START" => params.in_frame = Some(number(&keyword, tokens.next())?),
                "LENGTH" => params.length = Some(number(&keyword, tokens.next())?),
                "OUT" => params.out_frame = Some(number(&keyword, tokens.next())?),
                "FILTER" => params.filter = Some(text(&keyword, tokens.next())?),
                "VF" => vf = Some(text(&keyword, tokens.next())?),
                "SCALE_MODE" => {
                    let value = text(&keyword, tokens.next())?;
                    params.scale_mode =
                        value.parse().map_err(|_| CommandError::BadArgument {
                            command: keyword.clone(),
                            value,
                        })?;
                }
                _ => tracing::trace!(token, "ignoring producer parameter"),
            }
        }

        if vf.is_some() {
            params.filter = vf;
        }
        Ok(params)
    }

    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_in(mut self, frame: i64) -> Self {
        self.in_frame = Some(frame);
        self
    }

    pub fn with_length(mut self, frames: i64) -> Self {
        self.length = Some(frames);
        self
    }

    pub fn with_out(mut self, frame: i64) -> Self {
        self.out_frame = Some(frame);
        self
    }

    pub fn with_seek(mut self, frame: i64) -> Self {
        self.seek = Some(frame);
        self
    }

    /**
        Resolve the in/out/seek frames into a tick window at `format`'s rate.

        `SEEK` defaults to `IN`, `LENGTH` becomes `OUT = IN + LENGTH` unless
        that overflows, and an explicit `OUT` wins over `LENGTH`.
    */
    pub fn clip(&self, format: &VideoFormat) -> ClipWindow {
        let seek = self.seek.or(self.in_frame).unwrap_or(0).max(0);
        let start = self.in_frame.unwrap_or(seek).max(0);

        let mut out = self
            .length
            .and_then(|length| start.checked_add(length.max(0)));
        if self.out_frame.is_some() {
            out = self.out_frame;
        }

        let ticks = |frames: i64| MediaDuration::frames(frames, format.frame_rate);
        let duration = match out {
            Some(out) => ticks(out.saturating_sub(start).max(0)),
            None => MediaDuration::UNBOUNDED,
        };

        ClipWindow {
            start: Pts(ticks(start).0),
            duration,
            looping: self.looping,
            seek: Pts(ticks(seek).0),
        }
    }
}

fn number(command: &str, value: Option<&str>) -> Result<i64, CommandError> {
    let value = value.ok_or_else(|| CommandError::MissingArgument(command.to_owned()))?;
    value.parse().map_err(|_| CommandError::BadArgument {
        command: command.to_owned(),
        value: value.to_owned(),
    })
}

fn text(command: &str, value: Option<&str>) -> Result<String, CommandError> {
    value
        .map(str::to_owned)
        .ok_or_else(|| CommandError::MissingArgument(command.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pal() -> VideoFormat {
        VideoFormat::by_name("PAL").unwrap()
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let params =
            ProducerParams::parse_line("clip.mp4 loop In 10 length 50 scale_mode fit").unwrap();
        assert_eq!(params.locator, "clip.mp4");
        assert!(params.looping);
        assert_eq!(params.in_frame, Some(10));
        assert_eq!(params.length, Some(50));
        assert_eq!(params.scale_mode, ScaleMode::Fit);
    }

    #[test]
    fn seek_defaults_to_in() {
        let clip = ProducerParams::new("a").with_in(25).clip(&pal());
        assert_eq!(clip.start, Pts(1_000_000));
        assert_eq!(clip.seek, Pts(1_000_000));
        assert_eq!(clip.duration, MediaDuration::UNBOUNDED);
    }

    #[test]
    fn out_overrides_length() {
        let clip = ProducerParams::new("a")
            .with_in(25)
            .with_length(100)
            .with_out(50)
            .clip(&pal());
        assert_eq!(clip.duration, MediaDuration(1_000_000));

        let clip = ProducerParams::new("a").with_in(25).with_length(25).clip(&pal());
        assert_eq!(clip.duration, MediaDuration(1_000_000));
    }

    #[test]
    fn overflowing_length_is_unbounded() {
        let clip = ProducerParams::new("a")
            .with_in(10)
            .with_length(i64::MAX)
            .clip(&pal());
        assert_eq!(clip.duration, MediaDuration::UNBOUNDED);
    }

    #[test]
    fn vf_overrides_filter() {
        let params = ProducerParams::parse_line("a VF hflip FILTER vflip").unwrap();
        assert_eq!(params.filter.as_deref(), Some("hflip"));
    }

    #[test]
    fn malformed_parameters() {
        assert_eq!(
            ProducerParams::parse::<&str>(&[]).unwrap_err(),
            CommandError::Empty
        );
        assert_eq!(
            ProducerParams::parse_line("a SEEK").unwrap_err(),
            CommandError::MissingArgument("SEEK".to_owned())
        );
        assert!(matches!(
            ProducerParams::parse_line("a LENGTH ten"),
            Err(CommandError::BadArgument { .. })
        ));
        assert!(matches!(
            ProducerParams::parse_line("a SCALE_MODE zoom"),
            Err(CommandError::BadArgument { .. })
        ));
    }
}
