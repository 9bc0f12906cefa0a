use crate::config::AppConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    #[default]
    Splits,
    Watch,
    Preview,
    Help,
}

impl Command {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "splits" => Some(Command::Splits),
            "watch" => Some(Command::Watch),
            "preview" => Some(Command::Preview),
            "help" | "--help" | "-h" => Some(Command::Help),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliOptions {
    pub command: Command,
    pub config_path: Option<PathBuf>,
    pub output: Option<PathBuf>,
    cascade_count: Option<u32>,
    split_lambda: Option<f32>,
    resolution: Option<u32>,
    blur_kernel: Option<u32>,
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        let mut command_seen = false;
        while let Some(raw) = iter.next() {
            let arg = raw.as_ref();
            let Some(key) = arg.strip_prefix("--") else {
                if command_seen {
                    bail!("Unexpected argument '{arg}'. Only one subcommand is allowed.");
                }
                options.command = Command::parse(arg).ok_or_else(|| anyhow!("Unknown command '{arg}'"))?;
                command_seen = true;
                continue;
            };
            if key == "help" {
                options.command = Command::Help;
                continue;
            }
            let value = iter.next().ok_or_else(|| anyhow!("Expected a value after '{arg}'"))?.as_ref().to_string();
            match key {
                "config" => options.config_path = Some(PathBuf::from(value)),
                "output" => options.output = Some(PathBuf::from(value)),
                "cascades" => {
                    options.cascade_count =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid cascade count '{value}'"))?);
                }
                "lambda" => {
                    options.split_lambda =
                        Some(value.parse::<f32>().with_context(|| format!("Invalid split lambda '{value}'"))?);
                }
                "resolution" => {
                    options.resolution =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid resolution '{value}'"))?);
                }
                "kernel" => {
                    options.blur_kernel =
                        Some(value.parse::<u32>().with_context(|| format!("Invalid kernel width '{value}'"))?);
                }
                _ => bail!(
                    "Unknown flag '{arg}'. Supported flags: --config, --output, --cascades, --lambda, --resolution, --kernel."
                ),
            }
        }
        Ok(options)
    }

    pub fn config_overrides(&self) -> AppConfigOverrides {
        AppConfigOverrides {
            cascade_count: self.cascade_count,
            split_lambda: self.split_lambda,
            resolution: self.resolution,
            blur_kernel: self.blur_kernel,
        }
    }
}
