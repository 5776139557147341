use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, Metadata, Record};

use toy_os_sim::io::{ConsoleSink, DiskDriver};
use toy_os_sim::kernel::{DiskRequest, Irq, SchedulingAlgorithm};
use toy_os_sim::{Kernel, KernelConfig};

/// Boots the simulated machine, loads programs and runs them to completion
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML machine configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Program file of hex bytes; repeat to load several
    #[arg(short, long = "program")]
    programs: Vec<PathBuf>,

    /// Priority for every loaded program (lower runs first)
    #[arg(long)]
    priority: Option<i32>,

    /// Scheduling algorithm (rr, fcfs, priority)
    #[arg(short, long)]
    algorithm: Option<SchedulingAlgorithm>,

    /// Round-robin quantum in CPU bursts
    #[arg(short, long)]
    quantum: Option<u32>,

    /// Quick-format the disk before loading (needed to swap)
    #[arg(long)]
    format: bool,

    /// Milliseconds between clock ticks
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Stop after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,

    /// Diagnostic log level (off, error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{:<5} {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => KernelConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => KernelConfig::default(),
    };
    if let Some(algorithm) = args.algorithm {
        config.scheduler.algorithm = algorithm;
    }
    if let Some(quantum) = args.quantum {
        config.scheduler.quantum = quantum;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.clock.tick_ms = tick_ms;
    }
    if args.max_ticks.is_some() {
        config.clock.max_ticks = args.max_ticks;
    }

    let level = match args.log_level.as_deref().or(config.log_level.as_deref()) {
        Some(name) => name
            .parse::<LevelFilter>()
            .map_err(|_| anyhow::anyhow!("Invalid log level '{}'", name))?,
        None => LevelFilter::Warn,
    };
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(level))
        .map_err(|err| anyhow::anyhow!("{}", err))?;

    let disk = match &config.disk.image {
        Some(path) if path.exists() => {
            let image = fs::read(path).with_context(|| format!("Failed to read disk image {}", path.display()))?;
            DiskDriver::from_image(&config.disk, &image)?
        }
        _ => DiskDriver::new(&config.disk),
    };
    let mut kernel = Kernel::with_disk(config.clone(), disk, ConsoleSink)?;

    if args.format {
        kernel.enqueue(Irq::Disk(DiskRequest::Format { quick: true }));
        kernel.tick()?;
    }

    let mut loaded = Vec::new();
    for path in &args.programs {
        let source = fs::read_to_string(path).with_context(|| format!("Failed to read program {}", path.display()))?;
        match kernel.load_program(&source, args.priority) {
            Ok(pid) => loaded.push(pid),
            Err(err) => println!("Skipping {}: {}", path.display(), err),
        }
    }

    if loaded.is_empty() {
        println!("No programs to run.");
    } else {
        kernel.enqueue(Irq::RunAllProcesses);
        drive(&mut kernel, &config)?;
        print_stats(&kernel, config.scheduler.algorithm);
    }

    if let Some(path) = &config.disk.image {
        if kernel.disk().is_formatted() {
            fs::write(path, kernel.disk().to_image())
                .with_context(|| format!("Failed to write disk image {}", path.display()))?;
        }
    }
    kernel.shutdown();
    Ok(())
}

/// Ticks the kernel on the host clock until it has nothing left to do.
fn drive(kernel: &mut Kernel, config: &KernelConfig) -> Result<()> {
    let interval = Duration::from_millis(config.clock.tick_ms);
    let mut ticks = 0;

    while !kernel.is_idle() {
        if config.clock.max_ticks.map_or(false, |max| ticks >= max) {
            log::warn!("stopping after {} ticks", ticks);
            break;
        }
        kernel.tick()?;
        ticks += 1;
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    Ok(())
}

fn print_stats(kernel: &Kernel, algorithm: SchedulingAlgorithm) {
    println!("Stats for executed processes ({} scheduling):", algorithm);
    println!("... PID | Priority | State      | Wait  | Executing | Turnaround | Output");
    println!("...-----|----------|------------|-------|-----------|------------|-------");
    for pcb in kernel.context().residents.iter() {
        println!(
            "... {:03} | {:>8} | {:<10} | {:>5} | {:>9} | {:>10} | {}",
            pcb.get_pid(),
            pcb.priority.active,
            pcb.state.to_string(),
            pcb.wait_time,
            pcb.time_spent_executing,
            pcb.turnaround_time(),
            pcb.output_buffer
        );
    }
}
