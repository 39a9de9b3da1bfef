use clap::Args;
use serde::Deserialize;

use msgstream::StreamConfig;

use super::error::SimError;

// ═══════════════════════════════════════════════════════════════
//  Config file (TOML)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    pub channels: Option<usize>,
    pub ticks: Option<u64>,
    pub tick_interval: Option<u64>,
    pub inserts_per_tick: Option<usize>,
    pub seed: Option<i64>,
    pub resume: Option<bool>,
    pub subscription: Option<String>,
    /// `[stream]` table, same keys as `StreamConfig`.
    pub stream: Option<StreamConfig>,
    /// `[mq]` table, passed to the in-memory MQ factory as JSON.
    pub mq: Option<toml::Value>,
}

pub fn load_config(path: &str) -> Result<Config, SimError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| SimError::Config(format!("cannot read config {path}: {e}")))?;
    toml::from_str(&content).map_err(|e| SimError::Config(format!("bad config {path}: {e}")))
}

// ═══════════════════════════════════════════════════════════════
//  CLI args
// ═══════════════════════════════════════════════════════════════

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the TOML config (optional if it does not exist)
    #[arg(long, default_value = "msgstream-sim.toml", env = "MSGSTREAM_SIM_CONFIG")]
    pub config: String,

    /// Number of channels
    #[arg(long)]
    pub channels: Option<usize>,

    /// Number of time ticks to broadcast
    #[arg(long)]
    pub ticks: Option<u64>,

    /// Timestamp distance between consecutive ticks
    #[arg(long)]
    pub tick_interval: Option<u64>,

    /// Inserts produced before each tick
    #[arg(long)]
    pub inserts_per_tick: Option<usize>,

    /// PRNG seed (0 = current time)
    #[arg(long)]
    pub seed: Option<i64>,

    /// Close the consumer halfway and resume from the recorded positions
    #[arg(long)]
    pub resume: bool,

    /// Consumer subscription name
    #[arg(long)]
    pub subscription: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Effective: merged config
// ═══════════════════════════════════════════════════════════════

/// Final configuration: config file < env/CLI.
#[derive(Debug)]
pub struct Effective {
    pub channels: usize,
    pub ticks: u64,
    pub tick_interval: u64,
    pub inserts_per_tick: usize,
    pub seed: i64,
    pub resume: bool,
    pub subscription: String,
    pub stream: StreamConfig,
    pub mq_config_json: String,
}

impl Effective {
    pub fn new(args: &RunArgs) -> Result<Self, SimError> {
        let cfg = match load_config(&args.config) {
            Ok(c) => c,
            Err(e) => {
                if std::path::Path::new(&args.config).exists() {
                    return Err(e);
                }
                Config::default()
            }
        };
        Self::merge(args, cfg)
    }

    fn merge(args: &RunArgs, cfg: Config) -> Result<Self, SimError> {
        let mq_config_json = match &cfg.mq {
            Some(v) => serde_json::to_string(v).map_err(|e| SimError::Config(format!("serialize [mq]: {e}")))?,
            None => "{}".to_string(),
        };
        let stream = cfg.stream.unwrap_or_default();
        stream.validate()?;

        let eff = Self {
            channels: args.channels.or(cfg.channels).unwrap_or(2),
            ticks: args.ticks.or(cfg.ticks).unwrap_or(10),
            tick_interval: args.tick_interval.or(cfg.tick_interval).unwrap_or(10),
            inserts_per_tick: args.inserts_per_tick.or(cfg.inserts_per_tick).unwrap_or(5),
            seed: args.seed.or(cfg.seed).unwrap_or(0),
            resume: args.resume || cfg.resume.unwrap_or(false),
            subscription: args.subscription.clone().or(cfg.subscription).unwrap_or_else(|| "msgstream-sim".into()),
            stream,
            mq_config_json,
        };

        if eff.channels == 0 {
            return Err(SimError::Config("channels must be > 0".into()));
        }
        if eff.ticks == 0 {
            return Err(SimError::Config("ticks must be > 0".into()));
        }
        if eff.tick_interval < 2 {
            return Err(SimError::Config("tick_interval must be >= 2".into()));
        }
        Ok(eff)
    }
}
