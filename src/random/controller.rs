/// random page pool with a background refill worker
///
/// pages move by value: the engine hands a used page to the worker over one channel and receives
/// refilled pages over another. a page can only be refilled while the worker owns it, so a page the
/// engine holds is never touched. the ledger mirrors those moves for observers.
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use rayon::prelude::*;
use std::sync::mpsc::{self, Receiver, SendError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::page::{PageLedger, PageLayout, PageState, PoolSnapshot, RandomPage};
use crate::cancel::CancellationToken;
use crate::device::Device;
use crate::error::{DeviceError, RandomPoolError};

/// commands sent to the refill worker
enum RefillCommand {
    Refill(RandomPage),
    Stop,
}

/// what the worker hands back when it exits: the pages it was still holding
struct WorkerExit {
    parked: Vec<RandomPage>,
    error: Option<RandomPoolError>,
}

enum RefillError {
    Cancelled,
    Device(DeviceError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ControllerState {
    Idle,
    Running,
    Stopped,
    Disposed,
}

/// state moved onto the worker thread
struct RefillWorker<D: Device> {
    device: Arc<D>,
    layout: PageLayout,
    seed: u64,
    cancel: CancellationToken,
    ledger: Arc<PageLedger>,
    incoming: Receiver<RefillCommand>,
    outgoing: Sender<RandomPage>,
}

impl<D: Device> RefillWorker<D> {
    fn run(self) -> WorkerExit {
        let mut parked = Vec::new();
        let mut error = None;
        // one staging buffer reused for every page
        let mut staging = vec![0.0; self.layout.len()];
        let mut master = Pcg32::seed_from_u64(self.seed);

        while let Ok(command) = self.incoming.recv() {
            let RefillCommand::Refill(mut page) = command else {
                break;
            };
            if self.cancel.is_cancelled() {
                parked.push(page);
                break;
            }

            match self.refill(&mut page, &mut staging, &mut master) {
                Ok(()) => {
                    // a missing entry would mean a page from another pool, which cannot reach this queue
                    let _ = self.ledger.set(page.id(), PageState::Ready);
                    tracing::debug!(page = %page.id(), "page refilled");
                    if let Err(SendError(page)) = self.outgoing.send(page) {
                        // controller gone
                        parked.push(page);
                        break;
                    }
                }
                Err(RefillError::Cancelled) => {
                    parked.push(page);
                    break;
                }
                Err(RefillError::Device(e)) => {
                    tracing::error!(page = %page.id(), error = %e, "refill worker stopped on device error");
                    parked.push(page);
                    error = Some(e.into());
                    break;
                }
            }
        }

        // whatever is still queued stays with the worker until disposal collects it
        loop {
            match self.incoming.try_recv() {
                Ok(RefillCommand::Refill(page)) => parked.push(page),
                Ok(RefillCommand::Stop) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        tracing::debug!(parked = parked.len(), "refill worker exiting");
        WorkerExit { parked, error }
    }

    /// regenerate every draw of the page on the host, then copy it to the device
    fn refill(&self, page: &mut RandomPage, staging: &mut [f64], master: &mut Pcg32) -> Result<(), RefillError> {
        profiling::scope!("refill_page");
        let row_len = self.layout.row_len();
        let seeds: Vec<u64> = (0..self.layout.population_size)
            .map(|_| master.random::<u64>())
            .collect();

        let cancel = &self.cancel;
        staging
            .par_chunks_mut(row_len)
            .zip(seeds.par_iter())
            .try_for_each(|(row, &seed)| {
                if cancel.is_cancelled() {
                    return Err(RefillError::Cancelled);
                }
                let mut rng = Pcg32::seed_from_u64(seed);
                row.iter_mut().for_each(|value| *value = rng.random::<f64>());
                Ok(())
            })?;

        self.device
            .upload(page.buffer_mut(), staging)
            .map_err(RefillError::Device)
    }
}

/// owns a fixed pool of random pages for the lifetime of a run.
///
/// every page is at all times in exactly one of: ready (outgoing queue), retired (incoming
/// queue or being refilled), or checked out to the caller.
pub struct RandomPageController<D: Device> {
    device: Arc<D>,
    layout: PageLayout,
    pool_size: usize,
    incoming: Sender<RefillCommand>,
    outgoing: Receiver<RandomPage>,
    pending_worker: Option<RefillWorker<D>>, // built in `new`, moved onto its thread by `start`
    worker: Option<JoinHandle<WorkerExit>>,
    cancel: CancellationToken,
    ledger: Arc<PageLedger>,
    returned: Vec<RandomPage>, // pages given back without a refill (disposal, dead worker)
    state: ControllerState,
}

impl<D: Device> RandomPageController<D> {
    /// allocate `pool_size` pages and queue all of them for their first refill
    pub fn new(device: Arc<D>, layout: PageLayout, pool_size: usize, seed: u64) -> Result<Self, RandomPoolError> {
        profiling::scope!("RandomPageController::new");
        let (incoming, worker_incoming) = mpsc::channel();
        let (worker_outgoing, outgoing) = mpsc::channel();
        let ledger = Arc::new(PageLedger::default());
        let cancel = CancellationToken::new();

        for _ in 0..pool_size {
            let page = RandomPage::allocate(device.as_ref(), layout)?;
            ledger.insert(page.id(), PageState::Retired);
            // receiver is alive in `pending_worker` below
            let _ = incoming.send(RefillCommand::Refill(page));
        }
        tracing::debug!(pool_size, row_len = layout.row_len(), "random pages allocated");

        let pending_worker = RefillWorker {
            device: Arc::clone(&device),
            layout,
            seed,
            cancel: cancel.clone(),
            ledger: Arc::clone(&ledger),
            incoming: worker_incoming,
            outgoing: worker_outgoing,
        };

        Ok(Self {
            device,
            layout,
            pool_size,
            incoming,
            outgoing,
            pending_worker: Some(pending_worker),
            worker: None,
            cancel,
            ledger,
            returned: Vec::new(),
            state: ControllerState::Idle,
        })
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        self.ledger.snapshot()
    }

    /// shared handle for observing the partition from another thread
    pub fn ledger(&self) -> Arc<PageLedger> {
        Arc::clone(&self.ledger)
    }

    /// spawn the refill worker
    pub fn start(&mut self) -> Result<(), RandomPoolError> {
        match self.state {
            ControllerState::Idle => {}
            ControllerState::Running => return Err(RandomPoolError::AlreadyStarted),
            ControllerState::Stopped | ControllerState::Disposed => return Err(RandomPoolError::AlreadyStopped),
        }
        let worker = self.pending_worker.take().ok_or(RandomPoolError::AlreadyStarted)?;
        let handle = thread::Builder::new()
            .name("random-refill".to_owned())
            .spawn(move || worker.run())
            .map_err(|e| RandomPoolError::Spawn(e.to_string()))?;
        self.worker = Some(handle);
        self.state = ControllerState::Running;
        tracing::debug!("refill worker started");
        Ok(())
    }

    /// request cancellation without waiting for the worker
    pub fn stop(&mut self) -> Result<(), RandomPoolError> {
        match self.state {
            ControllerState::Idle => return Err(RandomPoolError::NotStarted),
            ControllerState::Running => {}
            ControllerState::Stopped | ControllerState::Disposed => return Ok(()),
        }
        self.cancel.cancel();
        let _ = self.incoming.send(RefillCommand::Stop);
        self.state = ControllerState::Stopped;
        Ok(())
    }

    /// block until the first refilled page is ready
    pub fn take_first(&mut self) -> Result<RandomPage, RandomPoolError> {
        self.take()
    }

    /// retire `old` and block until the next refilled page is ready
    pub fn recycle_and_take_next(&mut self, old: RandomPage) -> Result<RandomPage, RandomPoolError> {
        profiling::scope!("recycle_and_take_next");
        if self.state != ControllerState::Running {
            self.give_back(old);
            return Err(self.not_running());
        }
        self.ledger.set(old.id(), PageState::Retired)?;
        tracing::debug!(page = %old.id(), "page retired");
        if let Err(SendError(command)) = self.incoming.send(RefillCommand::Refill(old)) {
            if let RefillCommand::Refill(page) = command {
                self.returned.push(page);
            }
            return Err(RandomPoolError::WorkerStopped);
        }
        self.take()
    }

    /// hand a page back without asking for a refill (end of run)
    pub fn return_page(&mut self, page: RandomPage) -> Result<(), RandomPoolError> {
        self.ledger.set(page.id(), PageState::Retired)?;
        self.returned.push(page);
        Ok(())
    }

    fn take(&mut self) -> Result<RandomPage, RandomPoolError> {
        if self.state != ControllerState::Running {
            return Err(self.not_running());
        }
        let page = self.outgoing.recv().map_err(|_| RandomPoolError::WorkerStopped)?;
        self.ledger.set(page.id(), PageState::CheckedOut)?;
        Ok(page)
    }

    fn give_back(&mut self, page: RandomPage) {
        // foreign pages are simply dropped
        if self.ledger.set(page.id(), PageState::Retired).is_ok() {
            self.returned.push(page);
        }
    }

    fn not_running(&self) -> RandomPoolError {
        match self.state {
            ControllerState::Idle => RandomPoolError::NotStarted,
            _ => RandomPoolError::WorkerStopped,
        }
    }

    /// stop the worker, wait for it to let go of its pages, then free every page once.
    /// returns the number of pages freed; later calls free nothing.
    pub fn dispose(&mut self) -> usize {
        profiling::scope!("RandomPageController::dispose");
        if self.state == ControllerState::Disposed {
            return 0;
        }
        self.cancel.cancel();
        let _ = self.incoming.send(RefillCommand::Stop);

        let mut pages = std::mem::take(&mut self.returned);
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(exit) => {
                    pages.extend(exit.parked);
                    if let Some(e) = exit.error {
                        tracing::debug!(error = %e, "refill worker had failed before disposal");
                    }
                }
                Err(_) => tracing::error!("refill worker panicked"),
            }
        }
        if let Some(worker) = self.pending_worker.take() {
            // never started: the pages are still queued for their first refill
            pages.extend(worker.incoming.try_iter().filter_map(|command| match command {
                RefillCommand::Refill(page) => Some(page),
                RefillCommand::Stop => None,
            }));
        }
        pages.extend(self.outgoing.try_iter());

        let freed = pages.len();
        for page in pages {
            self.device.free(page.into_buffer());
        }
        if freed != self.pool_size {
            tracing::warn!(freed, pool_size = self.pool_size, "not every random page came back before disposal");
        }
        self.state = ControllerState::Disposed;
        tracing::debug!(freed, "random pages freed");
        freed
    }
}

impl<D: Device> Drop for RandomPageController<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}
