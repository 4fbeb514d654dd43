//! Concurrency tests
//!
//! Client threads take and drop references while the polling thread
//! reconciles a bus whose devices keep coming and going. At the end every
//! raw device reference must have been given back exactly once.

use launcher::bus::{Bus, MockBus};
use launcher::{Controller, ControllerOptions, Error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const CLIENTS: usize = 8;
const ROUNDS: usize = 200;

#[test]
fn test_references_race_with_polling() {
    let bus = Arc::new(MockBus::new());
    let controller = Arc::new(
        Controller::init(
            bus.clone(),
            ControllerOptions {
                initial_capacity: 2,
                max_capacity: Some(16),
                poll_rate: 1,
            },
        )
        .unwrap(),
    );
    for _ in 0..4 {
        bus.plug_launcher();
    }
    controller.start_polling().unwrap();

    let barrier = Arc::new(Barrier::new(CLIENTS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let clients: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let controller = controller.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                for round in 0..ROUNDS {
                    let array = controller.launchers().unwrap();
                    for launcher in &array {
                        // Each reference taken here is dropped again below
                        let taken = launcher.reference().unwrap();
                        assert!(taken >= 2);
                        if round % 3 == 0 {
                            std::thread::yield_now();
                        }
                        launcher.dereference().unwrap();
                    }
                    array.free().unwrap();
                }
            })
        })
        .collect();

    let churn = {
        let bus = bus.clone();
        let controller = controller.clone();
        let done = done.clone();
        let barrier = barrier.clone();
        std::thread::spawn(move || {
            barrier.wait();
            while !done.load(Ordering::SeqCst) {
                let device = bus.plug_launcher();
                controller.refresh().unwrap();
                std::thread::sleep(Duration::from_millis(2));
                bus.unplug(device.key);
                controller.refresh().unwrap();
            }
        })
    };

    for client in clients {
        client.join().unwrap();
    }
    done.store(true, Ordering::SeqCst);
    churn.join().unwrap();
    controller.stop_polling().unwrap();

    // Unplug everything; with no references left one scan empties the table
    for device in bus.enumerate().unwrap() {
        bus.unplug(device.key);
    }
    let report = controller.refresh().unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(controller.launcher_count().unwrap(), 0);
    assert_eq!(bus.live_references(), 0);
}

#[test]
fn test_last_dereference_races_with_unplug() {
    for _ in 0..50 {
        let bus = Arc::new(MockBus::new());
        let controller =
            Arc::new(Controller::init(bus.clone(), ControllerOptions::default()).unwrap());
        let device = bus.plug_launcher();
        controller.refresh().unwrap();

        let array = controller.launchers().unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let releaser = {
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                array.free()
            })
        };
        let scanner = {
            let controller = controller.clone();
            let bus = bus.clone();
            std::thread::spawn(move || {
                barrier.wait();
                bus.unplug(device.key);
                controller.refresh()
            })
        };

        releaser.join().unwrap().unwrap();
        scanner.join().unwrap().unwrap();

        // Whichever side ran last removed it; nobody removed it twice
        controller.refresh().unwrap();
        assert_eq!(controller.launcher_count().unwrap(), 0);
        assert_eq!(bus.live_references(), 0);
        assert_eq!(bus.released(), 1);
    }
}

#[test]
fn test_dereference_after_retire_is_rejected() {
    let bus = Arc::new(MockBus::new());
    let controller = Controller::init(bus.clone(), ControllerOptions::default()).unwrap();
    let device = bus.plug_launcher();
    controller.refresh().unwrap();
    let launcher = controller.launcher(device.key).unwrap();

    bus.unplug(device.key);
    controller.refresh().unwrap();
    assert!(launcher.is_retired().unwrap());
    assert!(matches!(launcher.dereference(), Err(Error::InvalidHandle)));
    assert!(matches!(launcher.reference(), Err(Error::InvalidHandle)));
}
