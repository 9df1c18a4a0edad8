/// Progress report sent from a worker thread to whoever is watching it
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub run_number: i32,
    pub worker_id: usize,
    /// Hits built in the current run so far
    pub hits_built: u64,
}

impl WorkerStatus {
    pub fn new(progress: f32, run_number: i32, worker_id: usize, hits_built: u64) -> Self {
        Self {
            progress,
            run_number,
            worker_id,
            hits_built,
        }
    }
}
