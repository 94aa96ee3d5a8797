use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use media_egress::{EgressAdapter, EgressOptions};
use media_engine::{DefaultEngineFactory, EngineFactory};
use media_ingest::IngestAdapter;
use media_playback::{PlaybackScheduler, ProducerParams};
use media_types::VideoFormat;

mod config;
mod host;

use config::BridgeConfig;
use host::HostOptions;

#[derive(Parser, Debug)]
#[command(name = "mediabridge")]
#[command(about = "Decode media into host frames at a fixed field rate, and encode host frames back out")]
#[command(version)]
struct Args {
    /// Log more (-v debug, -vv trace). Overrides RUST_LOG.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory that relative locators are resolved against
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,

    /// Output format name (see the `formats` command)
    #[arg(short, long, global = true)]
    format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a source and print its stream metadata as JSON
    Probe { locator: String },

    /// Play a source at the output field rate
    Play {
        locator: String,

        /// Producer parameters, e.g. `LOOP SEEK 50 LENGTH 100 SCALE_MODE FIT`
        params: Vec<String>,

        /// Stop after this many output frames
        #[arg(short = 'n', long)]
        frames: Option<u64>,

        /// Loop the play window
        #[arg(long = "loop")]
        looping: bool,

        /// Also encode the played frames to this destination
        #[arg(long)]
        record: Option<String>,

        /// Encoder options, e.g. "-codec:v x264 -bitrate:v 5000"
        #[arg(long, allow_hyphen_values = true)]
        options: Option<String>,

        /// Print the final status snapshot as JSON
        #[arg(long)]
        status: bool,
    },

    /// Encode a source as fast as it decodes
    Record {
        locator: String,

        destination: String,

        /// Producer parameters, e.g. `SEEK 50 LENGTH 100`
        params: Vec<String>,

        /// Stop after this many output frames
        #[arg(short = 'n', long)]
        frames: Option<u64>,

        /// Encoder options, e.g. "-codec:v vp9 -format webm"
        #[arg(long, allow_hyphen_values = true)]
        options: Option<String>,
    },

    /// List the built-in output formats
    Formats,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = BridgeConfig::load(args.config.as_deref())?;
    if args.media_root.is_some() {
        config.media_root = args.media_root;
    }
    if let Some(format) = args.format {
        config.format = format;
    }

    let factory = DefaultEngineFactory::shared();
    match args.command {
        Command::Probe { locator } => probe(&config, factory, &locator),
        Command::Play {
            locator,
            params,
            frames,
            looping,
            record,
            options,
            status,
        } => {
            let mut producer = producer_params(&locator, &params)?;
            if looping {
                producer = producer.with_loop(true);
            }
            let scheduler = open_scheduler(&config, factory.clone(), &producer)?;
            let egress = match record {
                Some(destination) => Some(open_egress(
                    &config,
                    factory,
                    scheduler.format(),
                    &destination,
                    options.as_deref(),
                )?),
                None => None,
            };

            let report = host::run(
                &scheduler,
                egress.as_ref(),
                HostOptions {
                    frames,
                    paced: true,
                },
            );
            if let Some(egress) = egress {
                egress.finish().context("failed to finalize recording")?;
            }
            if status {
                println!("{}", serde_json::to_string_pretty(&scheduler.status())?);
            }
            if report.egress_stopped {
                bail!("recording stopped early");
            }
            Ok(())
        }
        Command::Record {
            locator,
            destination,
            params,
            frames,
            options,
        } => {
            let producer = producer_params(&locator, &params)?;
            if producer.looping && frames.is_none() {
                bail!("recording a looping source needs --frames");
            }
            let scheduler = open_scheduler(&config, factory.clone(), &producer)?;
            let egress = open_egress(
                &config,
                factory,
                scheduler.format(),
                &destination,
                options.as_deref(),
            )?;

            let report = host::run(
                &scheduler,
                Some(&egress),
                HostOptions {
                    frames,
                    paced: false,
                },
            );
            egress.finish().context("failed to finalize recording")?;
            if report.egress_stopped {
                bail!("recording stopped early");
            }
            tracing::info!(%destination, frames = report.frames, "recording finished");
            Ok(())
        }
        Command::Formats => {
            for name in VideoFormat::names() {
                if let Some(format) = VideoFormat::by_name(name) {
                    println!(
                        "{name:<10} {}x{} {} fps, {} field(s)",
                        format.width, format.height, format.frame_rate, format.field_count
                    );
                }
            }
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn producer_params(locator: &str, params: &[String]) -> Result<ProducerParams> {
    let tokens: Vec<&str> = std::iter::once(locator)
        .chain(params.iter().map(String::as_str))
        .collect();
    ProducerParams::parse(&tokens).context("invalid producer parameters")
}

fn probe(
    config: &BridgeConfig,
    factory: Arc<dyn EngineFactory>,
    locator: &str,
) -> Result<()> {
    let ingest = IngestAdapter::open(locator, config.ingest(), factory)
        .with_context(|| format!("failed to open {locator}"))?;
    println!("{}", serde_json::to_string_pretty(&ingest.metadata())?);
    Ok(())
}

fn open_scheduler(
    config: &BridgeConfig,
    factory: Arc<dyn EngineFactory>,
    params: &ProducerParams,
) -> Result<PlaybackScheduler> {
    let format = config.output_format()?;
    tracing::info!(locator = %params.locator, %format, "opening source");
    PlaybackScheduler::open(params, config.playback(format), config.ingest(), factory)
        .with_context(|| format!("failed to open {}", params.locator))
}

fn open_egress(
    config: &BridgeConfig,
    factory: Arc<dyn EngineFactory>,
    format: &VideoFormat,
    destination: &str,
    options: Option<&str>,
) -> Result<EgressAdapter> {
    let mut egress = config.egress(destination);
    if let Some(options) = options {
        let options = EgressOptions::parse(options).context("invalid encoder options")?;
        egress = egress.with_options(options);
    }
    EgressAdapter::open(&egress, format, factory)
        .with_context(|| format!("failed to open {destination}"))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn play_takes_producer_parameters_and_encoder_options() {
        let args = Args::try_parse_from([
            "mediabridge",
            "-vv",
            "--format",
            "PAL",
            "play",
            "clip.mp4",
            "SEEK",
            "50",
            "LENGTH",
            "100",
            "--loop",
            "--record",
            "out.mp4",
            "--options",
            "-codec:v x264 -bitrate:v 5000",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.format.as_deref(), Some("PAL"));

        let Command::Play {
            locator,
            params,
            looping,
            record,
            options,
            ..
        } = args.command
        else {
            panic!("expected play");
        };
        assert!(looping);
        assert_eq!(record.as_deref(), Some("out.mp4"));
        assert_eq!(options.as_deref(), Some("-codec:v x264 -bitrate:v 5000"));

        let producer = producer_params(&locator, &params).unwrap();
        assert_eq!(producer.locator, "clip.mp4");
        assert_eq!(producer.seek, Some(50));
        assert_eq!(producer.length, Some(100));
    }

    #[test]
    fn record_needs_a_destination() {
        assert!(Args::try_parse_from(["mediabridge", "record", "clip.mp4"]).is_err());
        assert!(Args::try_parse_from(["mediabridge", "record", "clip.mp4", "out.mkv"]).is_ok());
    }
}
