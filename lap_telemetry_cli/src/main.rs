use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use lap_telemetry::{
    calibrate, read_reference_points, read_session, validate_reference, AlignedPair, OriginPolicy,
    SampleRateConfig, SectorEvent, SectorExtractor, Session, Value, DEFAULT_ALTITUDE_M,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lap telemetry inspection CLI", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize the header, info block and channels of one or more session exports
    Inspect(InspectArgs),
    /// Derive the track origin from a reference-points file
    Calibrate(CalibrateArgs),
    /// Write two channels aligned at their common change positions as CSV
    Pair(PairArgs),
    /// Write sector events detected on a marker channel as CSV
    Sectors(SectorsArgs),
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Session exports to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Sample-rate config applied to every session
    #[arg(long, value_hint = ValueHint::FilePath)]
    rates: Option<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct CalibrateArgs {
    /// Reference-points file (header line + two `x y latitude longitude` lines)
    #[arg(value_hint = ValueHint::FilePath)]
    reference: PathBuf,

    /// Which candidate origin to keep
    #[arg(long, value_enum, default_value_t = PolicyOpt::Second)]
    policy: PolicyOpt,

    /// Track altitude above mean sea level (meters)
    #[arg(long, default_value_t = DEFAULT_ALTITUDE_M)]
    altitude: f64,
}

#[derive(Parser, Debug)]
struct PairArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    session: PathBuf,

    /// Sample-rate config
    #[arg(long, required = true, value_hint = ValueHint::FilePath)]
    rates: PathBuf,

    /// First channel identifier
    first: String,

    /// Second channel identifier
    second: String,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct SectorsArgs {
    #[arg(value_hint = ValueHint::FilePath)]
    session: PathBuf,

    /// Sample-rate config
    #[arg(long, required = true, value_hint = ValueHint::FilePath)]
    rates: PathBuf,

    /// Marker channel identifier
    marker: String,

    /// Companion channel identifiers resolved at each event
    companions: Vec<String>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PolicyOpt {
    First,
    Second,
    Midpoint,
}

impl From<PolicyOpt> for OriginPolicy {
    fn from(value: PolicyOpt) -> Self {
        match value {
            PolicyOpt::First => OriginPolicy::First,
            PolicyOpt::Second => OriginPolicy::Second,
            PolicyOpt::Midpoint => OriginPolicy::Midpoint,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Inspect(args) => handle_inspect(args),
        Command::Calibrate(args) => handle_calibrate(args),
        Command::Pair(args) => handle_pair(args),
        Command::Sectors(args) => handle_sectors(args),
    }
}

fn load_rates(path: &Path) -> Result<SampleRateConfig> {
    SampleRateConfig::read(path)
        .with_context(|| format!("failed to read sample rates {}", path.display()))
}

fn load_session(path: &Path, rates: Option<&SampleRateConfig>) -> Result<Session> {
    let t_parse = Instant::now();
    let mut session =
        read_session(path).with_context(|| format!("failed to parse {}", path.display()))?;
    debug!(
        "Parsed {} in {:.1} ms",
        path.display(),
        t_parse.elapsed().as_secs_f64() * 1000.0
    );
    if let Some(rates) = rates {
        session
            .frame
            .assign_sample_rates(rates)
            .with_context(|| format!("failed to assign sample rates to {}", path.display()))?;
    }
    Ok(session)
}

fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        Ok(Box::new(io::stdout().lock()))
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Box::new(file))
    }
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let rates = args.rates.as_deref().map(load_rates).transpose()?;

    let mut sessions: Vec<(usize, PathBuf, Session)> = args
        .inputs
        .iter()
        .cloned()
        .enumerate()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(idx, path)| -> Result<(usize, PathBuf, Session)> {
            let session = load_session(&path, rates.as_ref())?;
            Ok((idx, path, session))
        })
        .collect::<Result<Vec<_>>>()?;
    sessions.sort_by_key(|(idx, _, _)| *idx);

    let mut report = String::new();
    for (_, path, session) in &sessions {
        report.push_str(&session_report(path, session));
        report.push('\n');
    }

    if args.output.as_os_str() == "-" {
        io::stdout().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Session report written: {}", args.output.display());
    }
    Ok(())
}

fn format_opt(value: Option<f64>) -> String {
    value.map_or("n/a".into(), |v| format!("{:.3}", v))
}

fn session_report(path: &Path, session: &Session) -> String {
    let frame = &session.frame;
    let mut report = format!("FILE: {}\n", path.display());
    if let Some(recorded) = session.header.recorded_at() {
        report.push_str(&format!("  recorded: {}\n", recorded));
    }
    report.push_str("  header:\n");
    for (key, value) in session.header.iter() {
        report.push_str(&format!("    {}: {}\n", key, value));
    }
    if !session.info.is_empty() {
        report.push_str("  info:\n");
        for (_, field) in session.info.iter() {
            report.push_str(&format!("    {}\n", field));
        }
    }
    report.push_str(&format!("  rows: {}\n", frame.row_count()));
    match frame.time_axes() {
        Ok(axes) => {
            for (rate, axis) in axes {
                report.push_str(&format!("  axis {} Hz: {} samples\n", rate, axis.len()));
            }
        }
        Err(err) => debug!("No time axes for {}: {}", path.display(), err),
    }
    report.push_str("  channels:\n");
    for (id, field) in frame.iter() {
        let summary = field.summary();
        let rate = field
            .sample_rate()
            .map_or("unset".to_string(), |r| format!("{} Hz", r.current_rate()));
        report.push_str(&format!(
            "    - {} ({}) [{}] rate={} runs={} min={} max={}\n",
            id,
            field.title(),
            field.unit(),
            rate,
            summary.runs,
            format_opt(summary.min),
            format_opt(summary.max)
        ));
    }
    report
}

fn handle_calibrate(args: CalibrateArgs) -> Result<()> {
    let points = read_reference_points(&args.reference)
        .with_context(|| format!("failed to read {}", args.reference.display()))?;
    let error = validate_reference(&points, args.altitude)?;
    info!("Reference distance error: {:.3} m", error);
    let calibration = calibrate(&points, args.policy.into(), args.altitude)?;
    let json = serde_json::to_string_pretty(&calibration)?;
    println!("{}", json);
    Ok(())
}

fn cell(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_default()
}

fn write_pair_rows<W: Write>(
    pair: &AlignedPair<'_>,
    headers: [&str; 3],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record(headers)?;
    for ((position, first), second) in pair
        .positions
        .iter()
        .zip(pair.first.iter())
        .zip(pair.second.iter())
    {
        writer.write_record([position.to_string(), cell(*first), cell(*second)])?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_pair(args: PairArgs) -> Result<()> {
    let rates = load_rates(&args.rates)?;
    let session = load_session(&args.session, Some(&rates))?;
    let pair = session.frame.aligned_pair(&args.first, &args.second)?;
    if pair.is_empty() {
        warn!("Channels {} and {} hold no samples", args.first, args.second);
    }
    let mut writer = csv::Writer::from_writer(open_output(&args.output)?);
    write_pair_rows(
        &pair,
        ["reference_position", args.first.as_str(), args.second.as_str()],
        &mut writer,
    )?;
    info!("Wrote {} aligned rows", pair.len());
    Ok(())
}

fn write_sector_rows<W: Write>(
    events: &[SectorEvent],
    companions: &[String],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    let mut headers = vec!["reference_position".to_string(), "time_s".into(), "marker".into()];
    headers.extend(companions.iter().cloned());
    writer.write_record(&headers)?;
    for event in events {
        let mut record = vec![
            event.reference_position.to_string(),
            event.time.map(|t| format!("{:.3}", t)).unwrap_or_default(),
            event.marker.to_string(),
        ];
        record.extend(event.companions.iter().map(|v| cell(v.as_ref())));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_sectors(args: SectorsArgs) -> Result<()> {
    let rates = load_rates(&args.rates)?;
    let session = load_session(&args.session, Some(&rates))?;
    let companions: Vec<&str> = args.companions.iter().map(String::as_str).collect();
    let events = SectorExtractor::new(&session.frame, &args.marker, &companions)?.events()?;
    if events.is_empty() {
        warn!("Marker channel {} never changes; no sector events", args.marker);
    }
    let mut writer = csv::Writer::from_writer(open_output(&args.output)?);
    write_sector_rows(&events, &args.companions, &mut writer)?;
    info!("Wrote {} sector events", events.len());
    Ok(())
}
