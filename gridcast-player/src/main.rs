//! gridcast-player entry point.
//!
//! ```text
//! gridcast-player                       Play the configured channel
//! gridcast-player play --seek 12        Play, jumping to frame 12 once it arrives
//! gridcast-player synth --frames 48     Write a demo stream file for the channel
//! gridcast-player --config <path>       Use custom config TOML
//! gridcast-player --gen-config          Dump default config and exit
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gridcast_player::config::PlayerConfig;
use gridcast_player::play;
use gridcast_player::synth::{self, SynthOptions};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gridcast-player", about = "Gridded field stream player")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gridcast-player.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Model / source (overrides config).
    #[arg(long, global = true)]
    model: Option<String>,

    /// Run identifier (overrides config).
    #[arg(long, global = true)]
    run: Option<String>,

    /// Variable and level (overrides config).
    #[arg(long, global = true)]
    variable: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play the channel until Ctrl-C.
    Play {
        /// Seek-control position to jump to once that frame arrives.
        #[arg(long, default_value_t = 0)]
        seek: usize,

        /// Disable background preloading.
        #[arg(long)]
        no_preload: bool,
    },
    /// Write a synthetic stream file for the channel.
    Synth {
        #[arg(long, default_value_t = 24)]
        frames: usize,

        #[arg(long, default_value_t = 64)]
        width: u32,

        #[arg(long, default_value_t = 32)]
        height: u32,

        /// Frames between base frames.
        #[arg(long, default_value_t = 8)]
        iframe_interval: u64,

        /// Milliseconds between appended frames.
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        /// Write every cell as valid (no mask channel).
        #[arg(long)]
        no_mask: bool,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&PlayerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = PlayerConfig::load(&cli.config);
    if let Some(model) = cli.model {
        config.channel.model = model;
    }
    if let Some(run) = cli.run {
        config.channel.run = run;
    }
    if let Some(variable) = cli.variable {
        config.channel.variable = variable;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gridcast-player v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Command::Play {
        seek: 0,
        no_preload: false,
    }) {
        Command::Play { seek, no_preload } => {
            if no_preload {
                config.stream.preload = false;
            }
            config.stream.validate()?;
            play::run(config, seek).await?;
        }
        Command::Synth {
            frames,
            width,
            height,
            iframe_interval,
            delay_ms,
            no_mask,
        } => {
            let opts = SynthOptions {
                frames,
                width,
                height,
                iframe_interval,
                masked: !no_mask,
                delay: Duration::from_millis(delay_ms),
            };
            let path = config.stream_path();
            let written = synth::write_demo(&path, &opts).await?;
            info!("wrote {written} frames to {}", path.display());
        }
    }

    Ok(())
}
