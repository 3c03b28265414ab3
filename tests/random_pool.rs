//! Page pool behavior while the refill worker runs concurrently with the consumer

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use diffevo_gpu::random::{PageLayout, RandomPageController};
use diffevo_gpu::{CpuDevice, RandomPoolError};

fn layout() -> PageLayout {
    PageLayout { population_size: 32, page_size: 7, number_of_pages: 4 }
}

#[test]
fn test_pages_survive_concurrent_churn() {
    let device = Arc::new(CpuDevice::with_threads(2).unwrap());
    let mut controller = RandomPageController::new(Arc::clone(&device), layout(), 4, 7).unwrap();
    let pool_size = controller.pool_size();
    let ledger = controller.ledger();
    let done = Arc::new(AtomicBool::new(false));

    // the ledger holds one entry per page id; what it can get wrong is the state of each entry
    let observer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut observed = 0;
            while !done.load(Ordering::Acquire) {
                let snapshot = ledger.snapshot();
                assert!(snapshot.checked_out.len() <= 1, "{snapshot:?}");
                observed += 1;
            }
            observed
        })
    };

    controller.start().unwrap();
    let mut page = controller.take_first().unwrap();
    let mut ids = std::collections::HashSet::new();
    for _ in 0..200 {
        ids.insert(page.id());
        page = controller.recycle_and_take_next(page).unwrap();
    }
    controller.return_page(page).unwrap();
    done.store(true, Ordering::Release);

    assert!(observer.join().unwrap() > 0);
    assert_eq!(ids.len(), pool_size);
    let snapshot = controller.snapshot();
    assert!(snapshot.checked_out.is_empty());
    assert_eq!(snapshot.retired.len() + snapshot.ready.len(), pool_size);

    // physical count: every page buffer must come back from the channels, the worker and the caller
    assert_eq!(controller.dispose(), pool_size);
    assert_eq!(device.stats().live_buffers, 0);
}

#[test]
fn test_consecutive_pages_differ() {
    let device = Arc::new(CpuDevice::with_threads(2).unwrap());
    let mut controller = RandomPageController::new(Arc::clone(&device), layout(), 1, 3).unwrap();
    controller.start().unwrap();
    let page = controller.take_first().unwrap();
    let first = page.row(0).to_vec();
    // a pool of one hands the same page back, refilled
    let page = controller.recycle_and_take_next(page).unwrap();
    assert_ne!(page.row(0), first.as_slice());
    controller.return_page(page).unwrap();
}

#[test]
fn test_stopped_pool_refuses_checkouts() {
    let device = Arc::new(CpuDevice::with_threads(1).unwrap());
    let mut controller = RandomPageController::new(Arc::clone(&device), layout(), 2, 1).unwrap();
    controller.start().unwrap();
    let page = controller.take_first().unwrap();
    controller.stop().unwrap();
    controller.stop().unwrap();
    assert_eq!(controller.recycle_and_take_next(page).unwrap_err(), RandomPoolError::WorkerStopped);
    // the refused page was kept for disposal
    assert_eq!(controller.dispose(), 2);
    assert_eq!(device.stats().live_buffers, 0);
}
