use std::sync::mpsc::Sender;

use super::channel_map::ChannelMap;
use super::config::Config;
use super::error::ProcessorError;
use super::evt_stack::EvtStack;
use super::pipeline::HitBuilder;
use super::ring_item::{BeginRunItem, EndRunItem, RingType, RunInfo};
use super::sink::OutputSink;
use super::worker_status::WorkerStatus;

#[cfg(feature = "hdf5")]
use super::hdf_writer::HDFWriter;
#[cfg(not(feature = "hdf5"))]
use super::sink::MemorySink;

/// Fraction of the run between progress reports
const PROGRESS_STEP: f32 = 0.01;

fn hits_built<S: OutputSink>(builder: &HitBuilder<S>) -> u64 {
    builder.systems().iter().map(|s| s.state.hits_built).sum()
}

/// Read every ring item of a run and push the physics buffers through the builder.
///
/// The builder is handed back unfinished so the caller can still write to its sink.
fn build_run<S: OutputSink>(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
    sink: S,
) -> Result<(HitBuilder<S>, RunInfo), ProcessorError> {
    let evt_path = config.get_evt_directory(run_number)?;
    let mut evt_stack = EvtStack::new(&evt_path)?;
    let channel_map = ChannelMap::new(config.channel_map_path.as_deref())?;
    let mut builder = HitBuilder::new(
        Box::new(channel_map),
        &config.systems(),
        &config.streams,
        config.builder_options(),
        sink,
    )?;

    let total_data_size = evt_stack.get_total_stack_size_bytes();
    spdlog::info!(
        "Total run size: {}",
        human_bytes::human_bytes(total_data_size as f64)
    );
    let flush_val = (total_data_size as f64 * PROGRESS_STEP as f64) as u64;
    let mut last_report = 0;
    let mut progress: f32 = 0.0;

    let mut run_info = RunInfo::new();
    let mut scaler_counter: u64 = 0;
    let mut unclaimed_counter: u64 = 0;

    tx.send(WorkerStatus::new(0.0, run_number, *worker_id, 0))?;
    while let Some(ring) = evt_stack.get_next_ring_item()? {
        match ring.ring_type {
            RingType::BeginRun => {
                let begin = BeginRunItem::try_from(ring)?;
                builder.run_restart(begin.0.unix_time);
                run_info.begin = Some(begin);
                spdlog::info!("Detected begin run -- {}", run_info.print_begin());
            }
            RingType::EndRun => {
                run_info.end = Some(EndRunItem::try_from(ring)?);
                spdlog::info!("Detected end run -- {}", run_info.print_end());
                break;
            }
            RingType::Physics => match config.source_system(ring.source_id()) {
                Some(system) => {
                    builder.process_buffer(system, &ring.body)?;
                }
                None => unclaimed_counter += 1,
            },
            RingType::Scalers => scaler_counter += 1,
            RingType::PauseRun | RingType::ResumeRun => {
                spdlog::info!("Run state change: {:?}", ring.ring_type)
            }
            RingType::Format | RingType::PhysicsCount => (),
            RingType::Unknown(raw) => spdlog::debug!("Skipping ring item of type {raw}"),
        }

        let bytes_read = evt_stack.get_bytes_read();
        if bytes_read - last_report > flush_val {
            last_report = bytes_read;
            progress = bytes_read as f32 / total_data_size as f32;
            tx.send(WorkerStatus::new(
                progress,
                run_number,
                *worker_id,
                hits_built(&builder),
            ))?;
        }
    }

    if run_info.end.is_none() {
        spdlog::warn!("Run {run_number} has no end run item, it may have been cut short");
    }
    if unclaimed_counter > 0 {
        spdlog::warn!(
            "{unclaimed_counter} physics items came from sources with no detector system and were skipped"
        );
    }
    spdlog::info!(
        "Read {} physics buffers and {} scaler items ({:.0}% of the run at last report)",
        builder.n_buffers(),
        scaler_counter,
        progress * 100.0
    );

    Ok((builder, run_info))
}

/// Build one run and write it to the run's HDF5 file.
#[cfg(feature = "hdf5")]
pub fn process_run(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<(), ProcessorError> {
    let hdf_path = config.get_output_file_name(run_number)?;
    spdlog::info!("Writing run {run_number} to {}", hdf_path.display());
    let writer = HDFWriter::new(&hdf_path)?;
    let (mut builder, run_info) = build_run(config, run_number, tx, worker_id, writer)?;
    builder.sink_mut().write_run_info(&run_info)?;
    let n_hits = hits_built(&builder);
    builder.finish()?;

    tx.send(WorkerStatus::new(1.0, run_number, *worker_id, n_hits))?;
    spdlog::info!("Done with run {run_number}: {n_hits} hits built.");
    Ok(())
}

/// Build one run without writing anything, logging what each stream would have written.
#[cfg(not(feature = "hdf5"))]
pub fn process_run(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<(), ProcessorError> {
    spdlog::warn!("Built without HDF5 support, run {run_number} will only be counted");
    let (builder, _) = build_run(config, run_number, tx, worker_id, MemorySink::tally())?;
    let n_hits = hits_built(&builder);
    let sink = builder.finish()?;
    for stream in sink.streams() {
        spdlog::info!(
            "Stream {}: {} records, {} hits",
            stream.name,
            stream.n_records,
            stream.n_hits
        );
    }

    tx.send(WorkerStatus::new(1.0, run_number, *worker_id, n_hits))?;
    spdlog::info!("Done with run {run_number}: {n_hits} hits built.");
    Ok(())
}

/// The function to be called by a separate thread.
/// Allows multiple runs to be processed
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<(), ProcessorError> {
    let runs: Vec<i32> = (config.first_run_number..(config.last_run_number + 1)).collect();
    process_subset(config, tx, worker_id, runs)
}

/// Process a subset of runs
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<i32>,
) -> Result<(), ProcessorError> {
    for run in subset {
        if config.does_run_exist(run) {
            spdlog::info!("Processing run {}...", run);
            process_run(&config, run, &tx, &worker_id)?;
            spdlog::info!("Finished processing run {}.", run);
        } else {
            spdlog::info!("Run {} does not exist, skipping...", run);
        }
    }
    Ok(())
}

/// Divide a run range in to a set of subranges (per thread/worker)
pub fn create_subsets(config: &Config) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads.max(1) as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets
}
