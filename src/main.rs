use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use reescraper::{
    clock::TimeResolver,
    config::AppConfig,
    fetch::ReeClient,
    ingest::{
        setup::{self, checkpoint_store},
        Ingestor, RunOutcome,
    },
    process::{normalize::format_utc, Granularity},
    store::{reader::read_aggregates, AppendStore},
};
use std::env;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const USAGE: &str = "usage:
  reescraper run [--day YYYY-MM-DD]
  reescraper init <YYYY-MM-DD>
  reescraper status
  reescraper query <10mn|1h|1d> <YYYY-MM-DD> <YYYY-MM-DD>";

enum Command {
    Run { day: Option<NaiveDate> },
    Init { since: NaiveDate },
    Status,
    Query { granularity: Granularity, from: NaiveDate, to: NaiveDate },
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

fn parse_args(args: &[String]) -> Result<Command> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let cmd = match args.as_slice() {
        [] | ["run"] => Command::Run { day: None },
        ["run", "--day", d] => Command::Run { day: Some(parse_date(d)?) },
        ["init", d] => Command::Init { since: parse_date(d)? },
        ["status"] => Command::Status,
        ["query", g, from, to] => Command::Query {
            granularity: g.parse()?,
            from: parse_date(from)?,
            to: parse_date(to)?,
        },
        _ => bail!("{USAGE}"),
    };
    Ok(cmd)
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    // ─── 2) load config & parse args ─────────────────────────────────
    let args: Vec<String> = env::args().skip(1).collect();
    let command = parse_args(&args)?;
    let cfg = AppConfig::load().context("loading configuration")?;
    info!(data_dir = %cfg.storage.data_dir.display(), tz = %cfg.region.timezone, "startup");

    match command {
        Command::Run { day } => run(&cfg, day).await,
        Command::Init { since } => {
            let report = setup::initialize(&cfg, since).context("initializing data directory")?;
            for path in &report.headers_written {
                info!(path = %path.display(), "header written");
            }
            match report.checkpoint {
                Some(c) => info!(checkpoint = %format_utc(&c), "checkpoint created"),
                None => info!("checkpoint already present"),
            }
            Ok(())
        }
        Command::Status => {
            let resolver = TimeResolver::system(cfg.region.tz()?);
            let s = setup::status(&cfg, &resolver)?;
            let show = |t: Option<chrono::DateTime<chrono::Utc>>| {
                t.map(|t| format_utc(&t)).unwrap_or_else(|| "-".to_string())
            };
            println!("checkpoint  {}", show(s.checkpoint));
            match s.pending {
                Some(r) if r.is_empty() => println!("pending     none"),
                Some(r) => println!("pending     {} .. {} ({} days)", r.begin, r.end, r.len()),
                None => println!("pending     unknown (no checkpoint)"),
            }
            println!("raw         {}", show(s.raw_tail));
            for (g, tail) in s.aggregate_tails {
                println!("{:<11} {}", g.name(), show(tail));
            }
            Ok(())
        }
        Command::Query { granularity, from, to } => {
            let path = cfg.storage.aggregate_path(granularity);
            let rows = read_aggregates(&path, from, to)
                .with_context(|| format!("querying {}", path.display()))?;
            let mut wtr = csv::Writer::from_writer(std::io::stdout());
            wtr.write_record(reescraper::store::AGGREGATE_HEADER)?;
            for r in &rows {
                wtr.write_record([
                    format_utc(&r.bucket),
                    r.actual.to_string(),
                    r.planned.to_string(),
                    r.forecast.to_string(),
                ])?;
            }
            wtr.flush()?;
            Ok(())
        }
    }
}

async fn run(cfg: &AppConfig, day: Option<NaiveDate>) -> Result<()> {
    // ─── 3) wire the pipeline ────────────────────────────────────────
    let client = ReeClient::new(&cfg.api).context("building HTTP client")?;
    let resolver = TimeResolver::system(cfg.region.tz()?);
    let store = AppendStore::open(&cfg.storage, &cfg.granularities())
        .context("opening data files")?;
    let mut ingestor = Ingestor::new(
        client,
        resolver,
        store,
        checkpoint_store(cfg),
        cfg.ingest.checkpoint,
    );

    // ─── 4) ingest ───────────────────────────────────────────────────
    if let Some(day) = day {
        let report = ingestor.run_day(day).await?;
        info!(%day, raw_rows = report.raw_rows, "explicit day ingested");
        return Ok(());
    }

    match ingestor.run().await {
        Ok(RunOutcome::UpToDate { checkpoint }) => {
            info!(checkpoint = %format_utc(&checkpoint), "nothing to do");
            Ok(())
        }
        Ok(RunOutcome::Completed(summary)) => {
            let raw: usize = summary.days.iter().map(|d| d.raw_rows).sum();
            info!(
                days = summary.days.len(),
                raw_rows = raw,
                checkpoint = %format_utc(&summary.checkpoint),
                "done"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "ingestion aborted");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_commands() {
        assert!(matches!(parse_args(&args("")).unwrap(), Command::Run { day: None }));
        assert!(matches!(
            parse_args(&args("run --day 2024-02-18")).unwrap(),
            Command::Run { day: Some(d) } if d == NaiveDate::from_ymd_opt(2024, 2, 18).unwrap()
        ));
        assert!(matches!(parse_args(&args("status")).unwrap(), Command::Status));
        assert!(matches!(
            parse_args(&args("query 1h 2024-02-01 2024-02-03")).unwrap(),
            Command::Query { granularity: Granularity::Hour, .. }
        ));
        assert!(parse_args(&args("init yesterday")).is_err());
        assert!(parse_args(&args("query 5m 2024-02-01 2024-02-03")).is_err());
        assert!(parse_args(&args("frobnicate")).is_err());
    }
}
