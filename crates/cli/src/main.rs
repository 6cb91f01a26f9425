use std::cell::Cell;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use live::{MediaSource, Scheduler, SchedulerConfig, Sink, SourceConfig, ThreadPool, Timer};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "rtsp-live-server",
    about = "Stream H.264/AAC elementary stream files through the live runtime"
)]
struct Args {
    /// H.264 Annex B file
    #[arg(long)]
    h264: Option<PathBuf>,

    /// AAC ADTS file
    #[arg(long)]
    aac: Option<PathBuf>,

    /// Extraction worker threads
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Frame slots per source
    #[arg(long, default_value_t = 4)]
    slots: usize,

    /// Stop after this many seconds (0 runs until Enter is pressed)
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Upper bound on one poll wait, in milliseconds
    #[arg(long, default_value_t = 2000)]
    poll_wait_ms: u64,
}

struct Output {
    sink: Sink,
    bytes: Rc<Cell<u64>>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    if args.h264.is_none() && args.aac.is_none() {
        eprintln!("Nothing to stream: pass --h264 and/or --aac");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Failed to run server: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> live::Result<()> {
    let scheduler = Scheduler::new(SchedulerConfig {
        poll_max_wait: Duration::from_millis(args.poll_wait_ms),
    })?;
    let mut pool = ThreadPool::new(args.workers)?;

    let mut sources = Vec::new();
    if let Some(path) = &args.h264 {
        let config = SourceConfig {
            frame_slots: args.slots,
            ..SourceConfig::h264()
        };
        sources.push(MediaSource::open_h264(path, pool.handle(), config));
    }
    if let Some(path) = &args.aac {
        let config = SourceConfig {
            frame_slots: args.slots,
            ..SourceConfig::aac()
        };
        sources.push(MediaSource::open_aac(path, pool.handle(), config));
    }

    let outputs: Rc<Vec<Output>> = Rc::new(
        sources
            .into_iter()
            .map(|source| {
                let bytes = Rc::new(Cell::new(0u64));
                let counter = bytes.clone();
                let sink = Sink::attach(&scheduler, source, move |frame| {
                    counter.set(counter.get() + frame.payload().len() as u64);
                });
                Output { sink, bytes }
            })
            .collect(),
    );

    let stats_timer = {
        let outputs = outputs.clone();
        Timer::new(move || {
            for out in outputs.iter() {
                let source = out.sink.source();
                let (free, ready) = source.queue_depths();
                tracing::info!(
                    source = source.name(),
                    codec = %source.codec(),
                    frames = out.sink.frames_delivered(),
                    bytes = out.bytes.get(),
                    underruns = out.sink.underruns(),
                    free,
                    ready,
                    "sink stats"
                );
            }
            true
        })
    };
    let stats_id = scheduler.add_timer(&stats_timer, STATS_INTERVAL);

    let remote = scheduler.remote();
    let duration_timer = (args.duration > 0).then(|| {
        let remote = remote.clone();
        let timer = Timer::new(move || {
            tracing::info!("duration elapsed");
            remote.stop();
            false
        });
        let secs = Duration::from_secs(args.duration);
        scheduler.run_after(&timer, secs, secs);
        timer
    });

    thread::spawn(move || {
        let mut input = String::new();
        // a closed stdin leaves the loop running
        if let Ok(n) = io::stdin().read_line(&mut input) {
            if n > 0 {
                remote.stop();
            }
        }
    });

    println!("Streaming {} source(s), press Enter to stop", outputs.len());
    scheduler.run_forever();

    scheduler.remove_timer(stats_id);
    drop(stats_timer);
    drop(duration_timer);
    match Rc::try_unwrap(outputs) {
        Ok(outputs) => {
            for out in outputs {
                out.sink.detach(&scheduler);
            }
        }
        Err(_) => tracing::warn!("sinks still shared at shutdown"),
    }

    pool.shutdown();
    Ok(())
}
