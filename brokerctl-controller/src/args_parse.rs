use anyhow::Result;
use std::env;

pub(crate) struct Args {
    pub(crate) config_file: String,
    pub(crate) desired_file: Option<String>,
    pub(crate) poll_interval: Option<String>,
    pub(crate) prom_exporter: Option<String>,
}

impl Args {
    fn show_usage() {
        println!("Brokerctl Controller Usage:");
        println!("  --config-file        Path to config file (required)");
        println!("  --desired-file       Path to a JSON list of the desired addresses");
        println!("  --poll-interval      Milliseconds between two broker checks (overrides config)");
        println!("  --prom-exporter      Prometheus Exporter http address (overrides config)");
    }

    pub(crate) fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();

        if args.len() <= 1 {
            Self::show_usage();
            return Err(anyhow::anyhow!("No arguments provided"));
        }

        Self::parse_from(args.iter().skip(1).map(String::as_str))
    }

    fn parse_from<'a>(args: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut config_file = None;
        let mut desired_file = None;
        let mut poll_interval = None;
        let mut prom_exporter = None;

        let mut args_iter = args;
        while let Some(arg) = args_iter.next() {
            match arg {
                "--config-file" => {
                    config_file = args_iter.next().map(|s| s.to_string());
                }
                "--desired-file" => {
                    desired_file = args_iter.next().map(|s| s.to_string());
                }
                "--poll-interval" => {
                    poll_interval = args_iter.next().map(|s| s.to_string());
                }
                "--prom-exporter" => {
                    prom_exporter = args_iter.next().map(|s| s.to_string());
                }
                "--help" | "-h" => {
                    Self::show_usage();
                    return Err(anyhow::anyhow!("Usage requested"));
                }
                _ => return Err(anyhow::anyhow!("Unknown argument: {}", arg)),
            }
        }

        Ok(Args {
            config_file: config_file
                .ok_or_else(|| anyhow::anyhow!("Missing required --config-file"))?,
            desired_file,
            poll_interval,
            prom_exporter,
        })
    }
}
