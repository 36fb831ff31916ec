//! Pulls Logpull records for one zone and writes them to stdout as NDJSON.
//!
//! Every option can also be given through the environment (a `.env` file is
//! honoured), e.g. `LOGSHARE_ZONE_ID`, `LOGSHARE_START`, `LOGSHARE_END`.
//! Credentials and client settings are read by `ClientConfig::from_env`.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Parser, ValueHint};
use lib_logshare::{ClientConfig, LogClient, LoggerLocal, LoggerLocalOptions, Query, TimestampFormat, relay_ndjson};

#[derive(Parser, Debug)]
#[command(
    name = "logshare-pull",
    version,
    about = "Streams Cloudflare Logpull records for a zone to stdout as NDJSON."
)]
pub struct Cli {
    /// Zone to pull from.
    #[arg(long, env = "LOGSHARE_ZONE_ID")]
    pub zone_id: String,

    /// Window start, Unix seconds or RFC 3339.
    #[arg(long, env = "LOGSHARE_START", value_parser = parse_time, requires = "end")]
    pub start: Option<i64>,

    /// Window end (exclusive), Unix seconds or RFC 3339.
    #[arg(long, env = "LOGSHARE_END", value_parser = parse_time, requires = "start")]
    pub end: Option<i64>,

    /// Look up a single request instead of a window.
    #[arg(
        long,
        env = "LOGSHARE_RAY_ID",
        conflicts_with_all = ["start", "end"],
        required_unless_present = "start"
    )]
    pub ray_id: Option<String>,

    /// Record limit; negative means no limit.
    #[arg(long, env = "LOGSHARE_COUNT", default_value_t = -1, allow_negative_numbers = true)]
    pub count: i64,

    /// Sampling fraction in (0, 1].
    #[arg(long, env = "LOGSHARE_SAMPLE")]
    pub sample: Option<f64>,

    /// Field names to return.
    #[arg(long, env = "LOGSHARE_FIELDS", value_delimiter = ',')]
    pub fields: Vec<String>,

    /// `unix`, `unixnano` or `rfc3339`.
    #[arg(long, env = "LOGSHARE_TIMESTAMP_FORMAT")]
    pub timestamp_format: Option<TimestampFormat>,

    /// Also write daily log files into this directory.
    #[arg(long, env = "LOGSHARE_LOG_DIR", value_hint = ValueHint::DirPath)]
    pub log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    let options = LoggerLocalOptions {
        log_dir: args.log_dir.clone(),
        ..LoggerLocalOptions::default()
    };
    let _logger = match LoggerLocal::init("logshare-pull", Some(options)) {
        Ok(logger) => Some(logger),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    if let Err(e) = run(&args).await {
        tracing::error!(error = %e, "pull failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: &Cli) -> Result<()> {
    let config = ClientConfig::from_env().context("loading client configuration")?;
    tracing::debug!("{}", config);

    let query = build_query(args)?;
    let client = LogClient::new(&config)?;
    let started = Instant::now();
    let records = client.open(&args.zone_id, &query).await?;

    let mut stdout = tokio::io::stdout();
    let written = relay_ndjson(records, &mut stdout).await?;

    tracing::info!(
        zone_id = %args.zone_id,
        records = written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "pull complete"
    );
    Ok(())
}

fn build_query(args: &Cli) -> Result<Query> {
    let mut builder = Query::builder().count(args.count);

    if let Some(ray_id) = &args.ray_id {
        builder = builder.ray_id(ray_id.clone());
    } else if let (Some(start), Some(end)) = (args.start, args.end) {
        builder = builder.time_range(start, end);
    }
    if let Some(sample) = args.sample {
        builder = builder.sample(sample);
    }
    let fields: Vec<&str> = args.fields.iter().map(|f| f.trim()).filter(|f| !f.is_empty()).collect();
    if !fields.is_empty() {
        builder = builder.fields(fields);
    }
    if let Some(format) = args.timestamp_format {
        builder = builder.timestamp_format(format);
    }

    builder.build().context("invalid query")
}

/// Unix seconds, or an RFC 3339 timestamp such as `2024-01-01T00:00:00Z`.
fn parse_time(value: &str) -> Result<i64, String> {
    if let Ok(secs) = value.trim().parse::<i64>() {
        return Ok(secs);
    }
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.timestamp())
        .map_err(|e| format!("expected Unix seconds or RFC 3339, got {value:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;
    use lib_logshare::{Count, Selector};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("logshare-pull").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn time_range_with_rfc3339_and_options() {
        let args = parse(&[
            "--zone-id", "z1",
            "--start", "2024-01-01T00:00:00Z",
            "--end", "1704070800",
            "--count", "-1",
            "--sample", "0.1",
            "--fields", "RayID, ClientIP",
            "--timestamp-format", "rfc3339",
        ])
        .unwrap();
        assert_eq!(args.start, Some(1_704_067_200));

        let q = build_query(&args).unwrap();
        assert_eq!(q.selector(), &Selector::TimeRange { start: 1_704_067_200, end: 1_704_070_800 });
        assert_eq!(q.count(), Count::Unbounded);
        assert_eq!(q.sample(), Some(0.1));
        assert_eq!(q.fields(), ["RayID", "ClientIP"]);
        assert_eq!(q.timestamp_format(), Some(TimestampFormat::Rfc3339));
    }

    #[test]
    fn ray_id_lookup() {
        let args = parse(&["--zone-id", "z1", "--ray-id", "7d1a", "--count", "1"]).unwrap();
        let q = build_query(&args).unwrap();
        assert_eq!(q.selector(), &Selector::RayId("7d1a".into()));
        assert_eq!(q.count(), Count::Limit(1));
    }

    #[test]
    fn selector_rules_are_enforced_by_the_parser() {
        let err = parse(&["--zone-id", "z", "--ray-id", "r", "--start", "1", "--end", "2"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);

        let err = parse(&["--zone-id", "z", "--start", "1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = parse(&["--zone-id", "z"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = parse(&["--zone-id", "z", "--start", "yesterday", "--end", "2"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let err = parse(&["--zone-id", "z", "--ray-id", "r", "--timestamp-format", "iso"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let args = parse(&["--zone-id", "z", "--start", "5", "--end", "5"]).unwrap();
        assert!(build_query(&args).is_err());
    }
}
