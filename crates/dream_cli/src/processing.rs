use dream_core::{GradientProvider, Model, Objective, Synthesis, SynthesisConfig, SynthesisEvent};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Progress update from the synthesis thread.
#[derive(Debug, Clone)]
pub enum ProcessingProgress {
    /// Synthesis started
    Started { total_iterations: usize },
    /// Iteration completed
    Progress {
        octave: usize,
        iteration: usize,
        fraction: f64,
    },
    /// Octave completed, with a display-range preview
    Octave { octave: usize, preview: Array3<f32> },
    /// Synthesis finished successfully
    Finished { result: Array3<f32> },
    /// Synthesis was cancelled
    Cancelled,
    /// Error occurred
    Error(String),
}

/// Background synthesis run.
///
/// Dropping the worker cancels it and waits for the thread to exit.
pub struct SynthesisWorker {
    /// Channel to receive progress updates
    progress_rx: Receiver<ProcessingProgress>,
    /// Cancel flag shared with worker thread
    cancel_flag: Arc<AtomicBool>,
    /// Handle to worker thread
    worker_handle: Option<JoinHandle<()>>,
}

impl SynthesisWorker {
    /// Start synthesizing `objective` on `image`.
    ///
    /// With a `seed`, tile shifts come from a seeded RNG and the run is
    /// reproducible.
    pub fn spawn<M>(
        model: M,
        objective: Objective,
        config: SynthesisConfig<f32>,
        image: Array3<f32>,
        seed: Option<u64>,
    ) -> Self
    where
        M: Model<f32> + Send + 'static,
    {
        let (tx, rx) = channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let worker_cancel = cancel_flag.clone();

        let handle = thread::spawn(move || {
            synthesis_worker(model, objective, config, image, seed, tx, worker_cancel);
        });

        Self {
            progress_rx: rx,
            cancel_flag,
            worker_handle: Some(handle),
        }
    }

    /// Block until the next update. `None` once the worker has exited and
    /// every message has been received.
    pub fn recv(&self) -> Option<ProcessingProgress> {
        self.progress_rx.recv().ok()
    }

    /// Request cancellation. The worker stops before its next iteration.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Wait for the worker thread to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SynthesisWorker {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Worker function that runs in background thread.
fn synthesis_worker<M>(
    model: M,
    objective: Objective,
    config: SynthesisConfig<f32>,
    image: Array3<f32>,
    seed: Option<u64>,
    tx: Sender<ProcessingProgress>,
    cancel_flag: Arc<AtomicBool>,
) where
    M: Model<f32>,
{
    let provider = match model.objective(&objective) {
        Ok(provider) => provider,
        Err(e) => {
            let _ = tx.send(ProcessingProgress::Error(format!(
                "Invalid objective '{}': {}",
                objective, e
            )));
            return;
        }
    };

    let total_iterations = config.total_iterations();
    let started = match seed {
        Some(seed) => {
            Synthesis::with_rng(config, image, &provider, StdRng::seed_from_u64(seed))
                .map(|s| drive(s, total_iterations, &tx, &cancel_flag))
        }
        None => Synthesis::new(config, image, &provider)
            .map(|s| drive(s, total_iterations, &tx, &cancel_flag)),
    };

    if let Err(e) = started {
        let _ = tx.send(ProcessingProgress::Error(format!(
            "Failed to start synthesis: {}",
            e
        )));
    }
}

/// Pull events from the synthesis iterator and forward them.
fn drive<P, G>(
    mut synthesis: Synthesis<'_, f32, P, G>,
    total_iterations: usize,
    tx: &Sender<ProcessingProgress>,
    cancel_flag: &AtomicBool,
) where
    P: GradientProvider<f32> + ?Sized,
    G: Rng,
{
    if tx
        .send(ProcessingProgress::Started { total_iterations })
        .is_err()
    {
        return;
    }

    loop {
        // Check for cancellation
        if cancel_flag.load(Ordering::SeqCst) {
            let _ = tx.send(ProcessingProgress::Cancelled);
            return;
        }

        let message = match synthesis.next() {
            Some(Ok(SynthesisEvent::Progress {
                octave,
                iteration,
                fraction,
            })) => ProcessingProgress::Progress {
                octave,
                iteration,
                fraction,
            },
            Some(Ok(SynthesisEvent::OctaveComplete { octave, preview })) => {
                ProcessingProgress::Octave { octave, preview }
            }
            Some(Err(e)) => {
                let _ = tx.send(ProcessingProgress::Error(format!("Synthesis failed: {}", e)));
                return;
            }
            None => break,
        };

        if tx.send(message).is_err() {
            return;
        }
    }

    // Send completion
    let _ = tx.send(ProcessingProgress::Finished {
        result: synthesis.into_image(),
    });
}
