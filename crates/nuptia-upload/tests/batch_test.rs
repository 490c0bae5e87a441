mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{test_config, FakeBroker, FakeTransport};
use nuptia_core::{BatchState, TransportError, UploadError, UploadEvent, UploadFile, UploadPhase};
use nuptia_upload::{BatchOptions, BatchScheduler, UploadEvents, UploadPipeline};

fn photos(count: usize) -> Vec<UploadFile> {
    (1..=count)
        .map(|i| {
            UploadFile::new(format!("photo-{}.jpg", i), "image/jpeg", vec![i as u8; 2048])
                .with_id(format!("photo-{}", i))
        })
        .collect()
}

fn scheduler(
    broker: &Arc<FakeBroker>,
    transport: &Arc<FakeTransport>,
    concurrency: usize,
) -> BatchScheduler {
    let pipeline = UploadPipeline::new(&test_config(), broker.clone(), transport.clone());
    BatchScheduler::new(
        Arc::new(pipeline),
        BatchOptions {
            concurrency,
            ..BatchOptions::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn one_failing_file_does_not_affect_its_siblings() {
    let broker = FakeBroker::new();
    let transport = FakeTransport::new();
    transport.always_fail("photo-2.jpg", TransportError::status(400, "bad request"));
    let scheduler = scheduler(&broker, &transport, 2);

    let report = scheduler
        .run(photos(4), &CancellationToken::new(), &UploadEvents::disabled())
        .await;

    assert_eq!(report.total(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].file_id(), "photo-2");
    assert!(matches!(report.failures[0], UploadError::Transfer { .. }));

    let succeeded: Vec<&str> = report
        .successes
        .iter()
        .map(|success| success.file_id.as_str())
        .collect();
    assert_eq!(succeeded, vec!["photo-1", "photo-3", "photo-4"]);
    assert!(report
        .successes
        .iter()
        .all(|success| success.result.file_size == 2048));
}

#[tokio::test(start_paused = true)]
async fn waves_are_bounded_and_paced() {
    let broker = FakeBroker::new();
    let transport = FakeTransport::new();
    let scheduler = scheduler(&broker, &transport, 2);

    let started = Instant::now();
    let report = scheduler
        .run(photos(5), &CancellationToken::new(), &UploadEvents::disabled())
        .await;

    assert!(report.all_succeeded());
    assert_eq!(transport.max_in_flight(), 2);
    // Three waves, two pauses of max(2000ms, 500ms * 2).
    assert!(started.elapsed() >= Duration::from_millis(4000));
    assert!(started.elapsed() < Duration::from_millis(6000));
}

#[tokio::test(start_paused = true)]
async fn batch_state_is_published() {
    let broker = FakeBroker::new();
    let transport = FakeTransport::new();
    transport.always_fail("photo-3.jpg", TransportError::status(400, "bad request"));
    let scheduler = scheduler(&broker, &transport, 3);
    let mut states = scheduler.subscribe();

    let observer = tokio::spawn(async move {
        let mut max_in_flight = 0;
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            max_in_flight = max_in_flight.max(state.in_flight);
            if state.total > 0 && state.is_finished() {
                return (state, max_in_flight);
            }
        }
        (BatchState::default(), max_in_flight)
    });

    scheduler
        .run(photos(4), &CancellationToken::new(), &UploadEvents::disabled())
        .await;

    let (final_state, max_in_flight) = observer.await.unwrap();
    assert_eq!(
        final_state,
        BatchState {
            total: 4,
            completed: 3,
            failed: 1,
            in_flight: 0,
        }
    );
    assert!(max_in_flight >= 1 && max_in_flight <= 3);
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_batch_skips_waves_not_yet_started() {
    let broker = FakeBroker::new();
    let transport = FakeTransport::new();
    let scheduler = scheduler(&broker, &transport, 2);
    let cancel = CancellationToken::new();
    let mut states = scheduler.subscribe();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while states.changed().await.is_ok() {
                if states.borrow_and_update().completed >= 2 {
                    cancel.cancel();
                    break;
                }
            }
        })
    };

    let (events, mut receiver) = UploadEvents::channel();
    let report = scheduler.run(photos(6), &cancel, &events).await;
    canceller.await.unwrap();

    assert_eq!(report.successes.len(), 2);
    assert_eq!(report.failures.len(), 4);
    assert!(report.failures.iter().all(UploadError::is_cancelled));
    assert_eq!(broker.negotiations(), 2);
    assert_eq!(*scheduler.subscribe().borrow(), BatchState {
        total: 6,
        completed: 2,
        failed: 4,
        in_flight: 0,
    });

    let mut cancelled = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        if let UploadEvent::Phase {
            file_id,
            phase: UploadPhase::Cancelled,
        } = event
        {
            cancelled.push(file_id);
        }
    }
    assert_eq!(cancelled, vec!["photo-3", "photo-4", "photo-5", "photo-6"]);
}
