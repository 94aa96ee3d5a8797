/*!
    Host output formats, interlaced fields and scale-mode geometry.
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{MediaDuration, Rational};

/**
    The format the host renders at: frame size, frame rate and field count.

    `field_count` is 2 for interlaced formats, where the host pulls every
    frame as two consecutive fields, and 1 for progressive formats.
*/
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub field_count: u32,
}

const NAMED_FORMATS: &[(&str, u32, u32, i32, i32, u32)] = &[
    ("PAL", 720, 576, 25, 1, 2),
    ("NTSC", 720, 486, 30000, 1001, 2),
    ("720p5000", 1280, 720, 50, 1, 1),
    ("720p5994", 1280, 720, 60000, 1001, 1),
    ("1080i5000", 1920, 1080, 25, 1, 2),
    ("1080i5994", 1920, 1080, 30000, 1001, 2),
    ("1080p2500", 1920, 1080, 25, 1, 1),
    ("1080p5000", 1920, 1080, 50, 1, 1),
];

impl VideoFormat {
    /**
        Create a custom format.

        # Panics

        Panics if `field_count` is not 1 or 2.
    */
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        frame_rate: Rational,
        field_count: u32,
    ) -> Self {
        assert!(
            field_count == 1 || field_count == 2,
            "field count must be 1 or 2"
        );
        Self {
            name: name.into(),
            width,
            height,
            frame_rate,
            field_count,
        }
    }

    /**
        Look up one of the built-in formats by name (case-insensitive).
    */
    pub fn by_name(name: &str) -> Option<Self> {
        NAMED_FORMATS
            .iter()
            .find(|(known, ..)| known.eq_ignore_ascii_case(name))
            .map(|&(known, width, height, num, den, fields)| {
                Self::new(known, width, height, Rational::new(num, den), fields)
            })
    }

    /**
        Names of all built-in formats.
    */
    pub fn names() -> impl Iterator<Item = &'static str> {
        NAMED_FORMATS.iter().map(|(name, ..)| *name)
    }

    pub fn is_interlaced(&self) -> bool {
        self.field_count == 2
    }

    pub fn frame_duration(&self) -> MediaDuration {
        MediaDuration::frame(self.frame_rate)
    }

    /**
        Rate at which the host pulls fields.
    */
    pub fn field_rate(&self) -> Rational {
        Rational::new(
            self.frame_rate.num * self.field_count as i32,
            self.frame_rate.den,
        )
    }

    pub fn field_duration(&self) -> MediaDuration {
        MediaDuration::frame(self.field_rate())
    }

    /**
        Whole frames per second, rounded to the nearest integer (never zero).
    */
    pub fn fps_rounded(&self) -> u32 {
        (self.frame_rate.to_f64().round() as u32).max(1)
    }
}

impl Default for VideoFormat {
    fn default() -> Self {
        Self::new("1080p2500", 1920, 1080, Rational::new(25, 1), 1)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/**
    Which field of a frame the host is asking for.

    Progressive formats only ever ask for [`Field::A`].
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    A,
    B,
}

impl Field {
    /**
        Field for the `index`-th pull of an interlaced stream.
    */
    pub const fn for_index(index: u64) -> Self {
        if index % 2 == 0 { Self::A } else { Self::B }
    }
}

/**
    How a source frame is placed inside the output format.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScaleMode {
    /// Scale to cover the output exactly, ignoring aspect ratio
    #[default]
    Stretch,
    /// Preserve aspect ratio and cover the output, cropping overflow
    Fill,
    /// Preserve aspect ratio and fit inside the output, letterboxing
    Fit,
    /// No scaling, centered and cropped to the output
    Crop,
}

/**
    Destination rectangle of a source frame in output coordinates.

    `x`/`y` are negative when the frame overflows the output on that axis.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl ScaleMode {
    /**
        Compute where a `source_width`x`source_height` frame lands in the output.
    */
    pub fn geometry(
        self,
        source_width: u32,
        source_height: u32,
        output_width: u32,
        output_height: u32,
    ) -> FrameGeometry {
        let full = FrameGeometry {
            x: 0,
            y: 0,
            width: output_width,
            height: output_height,
        };
        if source_width == 0 || source_height == 0 {
            return full;
        }

        let (width, height) = match self {
            Self::Stretch => return full,
            Self::Crop => (source_width, source_height),
            Self::Fit | Self::Fill => {
                let sx = output_width as f64 / source_width as f64;
                let sy = output_height as f64 / source_height as f64;
                let scale = if self == Self::Fit {
                    sx.min(sy)
                } else {
                    sx.max(sy)
                };
                (
                    (source_width as f64 * scale).round() as u32,
                    (source_height as f64 * scale).round() as u32,
                )
            }
        };

        FrameGeometry {
            x: (output_width as i64 - width as i64).div_euclid(2) as i32,
            y: (output_height as i64 - height as i64).div_euclid(2) as i32,
            width,
            height,
        }
    }
}

impl FromStr for ScaleMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STRETCH" => Ok(Self::Stretch),
            "FILL" => Ok(Self::Fill),
            "FIT" => Ok(Self::Fit),
            "CROP" => Ok(Self::Crop),
            other => Err(format!("unknown scale mode '{other}'")),
        }
    }
}

impl fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stretch => "STRETCH",
            Self::Fill => "FILL",
            Self::Fit => "FIT",
            Self::Crop => "CROP",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_formats() {
        let pal = VideoFormat::by_name("pal").unwrap();
        assert_eq!((pal.width, pal.height), (720, 576));
        assert!(pal.is_interlaced());
        assert_eq!(pal.frame_duration(), MediaDuration(40_000));
        assert_eq!(pal.field_duration(), MediaDuration(20_000));

        let p50 = VideoFormat::by_name("720p5000").unwrap();
        assert!(!p50.is_interlaced());
        assert_eq!(p50.fps_rounded(), 50);

        assert!(VideoFormat::by_name("4k").is_none());
        assert_eq!(VideoFormat::names().count(), 8);
    }

    #[test]
    fn field_alternates() {
        assert_eq!(Field::for_index(0), Field::A);
        assert_eq!(Field::for_index(1), Field::B);
        assert_eq!(Field::for_index(4), Field::A);
    }

    #[test]
    fn stretch_covers_output() {
        let g = ScaleMode::Stretch.geometry(640, 480, 1920, 1080);
        assert_eq!(
            g,
            FrameGeometry {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080
            }
        );
    }

    #[test]
    fn fit_letterboxes() {
        // 4:3 into 16:9 gets pillarboxed
        let g = ScaleMode::Fit.geometry(640, 480, 1920, 1080);
        assert_eq!((g.width, g.height), (1440, 1080));
        assert_eq!((g.x, g.y), (240, 0));
    }

    #[test]
    fn fill_overflows() {
        let g = ScaleMode::Fill.geometry(640, 480, 1920, 1080);
        assert_eq!((g.width, g.height), (1920, 1440));
        assert_eq!((g.x, g.y), (0, -180));
    }

    #[test]
    fn crop_keeps_native_size() {
        let g = ScaleMode::Crop.geometry(2000, 1000, 1920, 1080);
        assert_eq!((g.width, g.height), (2000, 1000));
        assert_eq!((g.x, g.y), (-40, 40));
    }

    #[test]
    fn scale_mode_parsing() {
        assert_eq!("fit".parse::<ScaleMode>(), Ok(ScaleMode::Fit));
        assert_eq!("CROP".parse::<ScaleMode>(), Ok(ScaleMode::Crop));
        assert!("zoom".parse::<ScaleMode>().is_err());
        assert_eq!(ScaleMode::default(), ScaleMode::Stretch);
    }
}
