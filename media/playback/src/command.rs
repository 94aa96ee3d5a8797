/*!
    Host command surface of a playback scheduler.

    Commands are whitespace-separated tokens with a case-insensitive keyword.
    Positions and durations are in ticks. Every command answers with the
    resulting value as a string, so a bare keyword doubles as a query.
*/

use thiserror::Error;

use media_types::{MediaDuration, Pts};

use crate::PlaybackScheduler;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(String),
    #[error("bad argument '{value}' for {command}")]
    BadArgument { command: String, value: String },
}

/**
    Where a `SEEK` is anchored before its offset is applied.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekAnchor {
    Absolute(Pts),
    /// Current play-head position.
    Rel,
    /// Window start.
    In,
    /// Window end.
    Out,
    /// End of the source, or the window end when that is unknown.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    Loop(Option<bool>),
    In(Option<Pts>),
    Out(Option<Pts>),
    Length(Option<MediaDuration>),
    Seek { anchor: SeekAnchor, offset: i64 },
}

impl HostCommand {
    pub fn parse<S: AsRef<str>>(params: &[S]) -> Result<Self, CommandError> {
        let mut tokens = params.iter().map(AsRef::as_ref);
        let keyword = tokens.next().ok_or(CommandError::Empty)?.to_ascii_uppercase();
        let arg = tokens.next();

        let command = match keyword.as_str() {
            "LOOP" => Self::Loop(arg.map(|v| parse_bool(&keyword, v)).transpose()?),
            "IN" | "START" => Self::In(arg.map(|v| ticks(&keyword, v).map(Pts)).transpose()?),
            "OUT" => Self::Out(arg.map(|v| ticks(&keyword, v).map(Pts)).transpose()?),
            "LENGTH" => Self::Length(
                arg.map(|v| ticks(&keyword, v).map(MediaDuration))
                    .transpose()?,
            ),
            "SEEK" => {
                let value = arg.ok_or_else(|| CommandError::MissingArgument(keyword.clone()))?;
                let anchor = match value.to_ascii_uppercase().as_str() {
                    "REL" => SeekAnchor::Rel,
                    "IN" => SeekAnchor::In,
                    "OUT" => SeekAnchor::Out,
                    "END" => SeekAnchor::End,
                    _ => SeekAnchor::Absolute(Pts(ticks(&keyword, value)?)),
                };
                let offset = tokens
                    .next()
                    .map(|v| ticks(&keyword, v))
                    .transpose()?
                    .unwrap_or(0);
                Self::Seek { anchor, offset }
            }
            _ => return Err(CommandError::Unknown(keyword)),
        };
        Ok(command)
    }
}

fn ticks(command: &str, value: &str) -> Result<i64, CommandError> {
    value.parse().map_err(|_| CommandError::BadArgument {
        command: command.to_owned(),
        value: value.to_owned(),
    })
}

fn parse_bool(command: &str, value: &str) -> Result<bool, CommandError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(CommandError::BadArgument {
            command: command.to_owned(),
            value: value.to_owned(),
        }),
    }
}

impl PlaybackScheduler {
    /**
        Execute a host command such as `SEEK REL -40000` or `LOOP 1`.
    */
    pub fn call<S: AsRef<str>>(&self, params: &[S]) -> Result<String, CommandError> {
        let command = HostCommand::parse(params)?;
        tracing::debug!(?command, "host command");
        Ok(self.execute(command))
    }

    pub fn execute(&self, command: HostCommand) -> String {
        let window = self.window();
        match command {
            HostCommand::Loop(value) => {
                if let Some(looping) = value {
                    window.set_loop(looping);
                }
                window.looping().to_string()
            }
            HostCommand::In(value) => {
                if let Some(start) = value {
                    window.set_start(start);
                }
                window.start().0.to_string()
            }
            HostCommand::Out(value) => {
                if let Some(end) = value {
                    window.set_duration(end.saturating_sub(window.start()));
                }
                self.window_end().0.to_string()
            }
            HostCommand::Length(value) => {
                if let Some(duration) = value {
                    window.set_duration(duration);
                }
                let duration = window.duration();
                let length = if duration.is_unbounded() { 0 } else { duration.0 };
                length.to_string()
            }
            HostCommand::Seek { anchor, offset } => {
                let base = match anchor {
                    SeekAnchor::Absolute(position) => position,
                    SeekAnchor::Rel => self.position(),
                    SeekAnchor::In => window.start(),
                    SeekAnchor::Out => self.window_end(),
                    SeekAnchor::End => self
                        .file_duration()
                        .map(|duration| Pts::ZERO.saturating_add(duration))
                        .unwrap_or_else(|| self.window_end()),
                };
                let target = Pts(base.0.saturating_add(offset).max(0));
                self.seek_to(target);
                target.0.to_string()
            }
        }
    }

    /**
        Absolute window end, falling back to the source duration when the
        window is unbounded, and to zero when neither is known.
    */
    fn window_end(&self) -> Pts {
        self.window()
            .end()
            .or_else(|| {
                self.file_duration()
                    .map(|duration| Pts::ZERO.saturating_add(duration))
            })
            .unwrap_or(Pts::ZERO)
    }
}
