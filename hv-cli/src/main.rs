//! HV event camera command line tools.
//!
//! Decodes EVT2 recordings to CSV, inspects headers, records live camera
//! streams and replays recordings at device speed.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hv_core::output::CsvWriter;
use hv_core::reader::EventReader;
use hv_core::replay::ReplayClock;
use hv_core::subframe::{EVS_HEIGHT, EVS_WIDTH};
use hv_core::writer::EventWriter;
use hv_core::HvCamera;
use indicatif::{ProgressBar, ProgressStyle};

/// HV event camera toolkit.
///
/// Works on .raw files in EVT2 format and on live cameras attached over USB.
#[derive(Parser, Debug)]
#[command(name = "hv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode an EVT2 .raw recording to CSV (x,y,polarity,timestamp rows).
    Decode {
        /// Input EVT2 .raw file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output .csv file path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Events decoded per batch
        #[arg(short, long, default_value_t = 100_000)]
        batch: usize,

        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print the header of an EVT2 .raw recording.
    Info {
        /// Input EVT2 .raw file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Record the live event stream of an attached camera.
    Record {
        /// USB vendor id (hex)
        #[arg(long, value_parser = parse_hex_u16, default_value = "1d6b")]
        vendor: u16,

        /// USB product id (hex)
        #[arg(long, value_parser = parse_hex_u16, default_value = "0105")]
        product: u16,

        /// Output .raw file path
        #[arg(short, long, default_value = "recorded_events.raw")]
        output: PathBuf,

        /// Recording duration in seconds
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },

    /// Replay a recording at device speed, printing batch statistics.
    Play {
        /// Input EVT2 .raw file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Playback speed factor (1.0 = real time)
        #[arg(short, long, default_value_t = 1.0)]
        speed: f64,

        /// Events replayed per batch
        #[arg(short, long, default_value_t = 10_000)]
        batch: usize,
    },
}

fn parse_hex_u16(value: &str) -> std::result::Result<u16, String> {
    let digits = value.trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|err| format!("invalid hex id {value:?}: {err}"))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Decode {
            input,
            output,
            batch,
            quiet,
        } => decode(&input, &output, batch, quiet),
        Command::Info { input } => info(&input),
        Command::Record {
            vendor,
            product,
            output,
            duration,
        } => record(vendor, product, &output, duration),
        Command::Play {
            input,
            speed,
            batch,
        } => play(&input, speed, batch),
    }
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb
    }
}

fn decode(input: &PathBuf, output: &PathBuf, batch: usize, quiet: bool) -> Result<()> {
    let progress = spinner(quiet);
    progress.set_message(format!(
        "Decoding {:?}...",
        input.file_name().unwrap_or_default()
    ));
    let start_time = Instant::now();

    let mut reader = EventReader::open(input).context("Failed to open EVT2 recording")?;
    let (width, height) = reader.image_size();

    let file = File::create(output).context("Failed to create CSV output")?;
    let mut csv = CsvWriter::new(file);
    csv.write_geometry(width, height)?;

    let mut write_result: std::result::Result<(), hv_core::output::OutputError> = Ok(());
    let total = reader.stream_events(batch, |events| {
        if write_result.is_ok() {
            write_result = csv.write_events(events);
        }
        progress.tick();
    })?;
    write_result.context("Failed to write CSV output")?;
    csv.flush()?;

    let duration = start_time.elapsed();
    progress.finish_with_message(format!(
        "Done! Decoded {} events in {:.2}s (sensor: {}x{})",
        total,
        duration.as_secs_f64(),
        width,
        height
    ));

    if !quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {input:?}");
        eprintln!("  Output:       {output:?}");
        eprintln!("  CD Events:    {total}");
        eprintln!("  Sensor:       {width}x{height}");
        eprintln!("  Duration:     {:.3}s", duration.as_secs_f64());
        eprintln!(
            "  Throughput:   {:.0} events/s",
            total as f64 / duration.as_secs_f64()
        );
    }
    Ok(())
}

fn info(input: &PathBuf) -> Result<()> {
    let reader = EventReader::open(input).context("Failed to open EVT2 recording")?;
    let header = reader.header();
    println!("File:            {input:?}");
    println!("Format:          EVT2");
    println!("Sensor:          {}x{}", header.width, header.height);
    println!("Integrator:      {}", header.integrator);
    println!("Date:            {}", header.date);
    println!("Start timestamp: {} us", header.start_timestamp);
    Ok(())
}

fn record(vendor: u16, product: u16, output: &PathBuf, duration: u64) -> Result<()> {
    let mut camera = HvCamera::new(vendor, product);
    camera
        .open()
        .context("Failed to open camera (is it connected and accessible?)")?;

    let writer = EventWriter::create(output, EVS_WIDTH as u32, EVS_HEIGHT as u32, 0)
        .context("Failed to create output recording")?;
    let writer = Arc::new(Mutex::new(writer));

    let callback_writer = Arc::clone(&writer);
    camera
        .start_event_capture(move |events| {
            let mut writer = callback_writer.lock().unwrap();
            if let Err(err) = writer.write_events(events) {
                log::error!("dropping batch, write failed: {err}");
            }
        })
        .context("Failed to start event capture")?;

    eprintln!("Recording {duration}s of events to {output:?}...");
    let progress = spinner(false);
    let start_time = Instant::now();
    while start_time.elapsed() < Duration::from_secs(duration) {
        thread::sleep(Duration::from_millis(1000));
        // Flush once a second so a crash loses at most the last second.
        let mut writer = writer.lock().unwrap();
        writer.flush().context("Failed to flush recording")?;
        progress.set_message(format!(
            "{} events, {} bytes, {} blocks dropped",
            writer.written_event_count(),
            writer.file_size(),
            camera.dropped_blocks()
        ));
    }

    camera.stop_event_capture();
    camera.close();

    let mut writer = writer.lock().unwrap();
    writer.close().context("Failed to close recording")?;
    progress.finish_with_message(format!(
        "Done! {} events, {} bytes",
        writer.written_event_count(),
        writer.file_size()
    ));
    Ok(())
}

fn play(input: &PathBuf, speed: f64, batch: usize) -> Result<()> {
    anyhow::ensure!(speed > 0.0, "speed must be positive");

    let mut reader = EventReader::open(input).context("Failed to open EVT2 recording")?;
    let (width, height) = reader.image_size();
    eprintln!("Replaying {input:?} ({width}x{height}) at {speed}x");

    let progress = spinner(false);
    let mut clock = ReplayClock::new(speed);
    let mut events = Vec::with_capacity(batch);
    let mut total = 0u64;
    let start_time = Instant::now();

    loop {
        events.clear();
        let count = reader.read_events(batch, &mut events)?;
        if count == 0 {
            break;
        }
        let batch_end = events[events.len() - 1].timestamp;
        clock.throttle(batch_end);
        total += count as u64;
        progress.set_message(format!(
            "t = {:.3}s, {} events",
            batch_end as f64 / 1e6,
            total
        ));
    }

    progress.finish_with_message(format!(
        "Done! Replayed {} events in {:.2}s",
        total,
        start_time.elapsed().as_secs_f64()
    ));
    Ok(())
}
