use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use libhit_builder::config::Config;
use libhit_builder::error::ProcessorError;
use libhit_builder::process::{create_subsets, process_subset};
use libhit_builder::worker_status::WorkerStatus;

const LOG_PATH: &str = "./hit_builder.log";

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

/// Send everything to a log file; the terminal belongs to the progress bars
fn init_logging() {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from(LOG_PATH))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()
            .expect("Could not create log file!"),
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(spdlog::Level::Info))
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()
            .expect("Could not create logger!"),
    );
    spdlog::set_default_logger(logger);
}

/// Join a finished worker and show how it went. Returns false if it failed.
fn report_worker(
    idx: usize,
    handle: JoinHandle<Result<(), ProcessorError>>,
    pb: &ProgressBar,
) -> bool {
    match handle.join() {
        Ok(Ok(())) => {
            spdlog::info!("Worker {idx} finished");
            pb.finish_with_message(format!("Worker {idx} done"));
            true
        }
        Ok(Err(e)) => {
            spdlog::error!("Worker {idx} failed with error: {e}");
            pb.abandon_with_message(format!("Worker {idx} failed: {e}"));
            false
        }
        Err(_) => {
            spdlog::error!("Failed to join worker {idx}!");
            pb.abandon_with_message(format!("Worker {idx} panicked"));
            false
        }
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("hit_builder_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    init_logging();
    spdlog::info!("Starting hit_builder_cli");
    let pb_manager = MultiProgress::new();

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!("Making a template config at {}...", config_path.display());
        make_template_config(&config_path);
        println!("Wrote template config to {}", config_path.display());
        return;
    }

    // Load our config
    spdlog::info!("Loading config from {}...", config_path.display());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            eprintln!("Could not load config: {e}");
            return;
        }
    };
    if !config.is_n_threads_valid() {
        eprintln!("n_threads must be at least 1");
        return;
    }
    if !config.has_evt_path() {
        eprintln!("Config has no evt_path");
        return;
    }
    spdlog::info!("Config successfully loaded.");
    spdlog::info!(
        "EVT Path: {}",
        config
            .evt_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    );
    spdlog::info!("Output Path: {}", config.output_path.display());
    match &config.channel_map_path {
        Some(p) => spdlog::info!("Channel Map Path: {}", p.display()),
        None => spdlog::info!("Channel Map Path: default"),
    }
    spdlog::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    for stream in config.streams.iter() {
        spdlog::info!("Stream {}: {:?}", stream.name, stream.build_window);
    }

    // Spawn the workers, one progress bar each
    let style = ProgressStyle::with_template("[{bar:40.cyan/blue}] {percent:>3}% {msg}")
        .expect("Bad progress bar template!")
        .progress_chars("=> ");
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    let mut workers: Vec<(usize, JoinHandle<Result<(), ProcessorError>>)> = Vec::new();
    let mut bars: Vec<ProgressBar> = Vec::new();
    for (idx, subset) in create_subsets(&config).into_iter().enumerate() {
        let pb = pb_manager.add(ProgressBar::new(100));
        pb.set_style(style.clone());
        pb.set_message(format!("Worker {idx} waiting"));
        bars.push(pb);
        // Dont make empty workers
        if subset.is_empty() {
            bars[idx].finish_with_message(format!("Worker {idx} had no runs"));
            continue;
        }
        let conf = config.clone();
        let worker_tx = tx.clone();
        workers.push((
            idx,
            std::thread::spawn(move || process_subset(conf, worker_tx, idx, subset)),
        ));
    }
    drop(tx);

    let mut failed = false;
    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(status) => {
                if let Some(pb) = bars.get(status.worker_id) {
                    pb.set_position((status.progress * 100.0) as u64);
                    pb.set_message(format!(
                        "Run {} | {} hits",
                        status.run_number, status.hits_built
                    ));
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let (finished, running): (Vec<_>, Vec<_>) =
            workers.drain(..).partition(|(_, h)| h.is_finished());
        workers = running;
        for (idx, handle) in finished {
            failed |= !report_worker(idx, handle, &bars[idx]);
        }
    }
    // Every sender is gone, so whatever is left has stopped
    for (idx, handle) in workers {
        failed |= !report_worker(idx, handle, &bars[idx]);
    }

    if failed {
        eprintln!("Hit building had errors, check {LOG_PATH} for details.");
    } else {
        println!("Done.");
    }
    spdlog::info!("Done.");
}
