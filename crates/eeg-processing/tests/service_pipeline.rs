use eeg_core::{EogChannelMap, SampleChunk};
use eeg_processing::{
    spawn_guided_session, start_processing_service, ClassifierWindow, EogDetector, EogWindowBuilder, FilterSettings,
    Gesture, GestureClassifier, GuidedAction, ProcessorCommand, ProcessorEvent, ProcessorSettings, SequencerTimings,
    TrialPlan,
};
use std::f32::consts::PI;
use std::time::Duration;
use tokio::sync::broadcast;

const RATE: f32 = 250.0;

fn tone(channels: usize, start: usize, frames: usize, freq: f32) -> SampleChunk {
    let rows = (0..channels)
        .map(|_| {
            (start..start + frames)
                .map(|i| 50.0 * (2.0 * PI * freq * i as f32 / RATE).sin())
                .collect()
        })
        .collect();
    SampleChunk::from_rows(rows).unwrap()
}

async fn recording_finished(events: &mut broadcast::Receiver<ProcessorEvent>) -> Option<usize> {
    loop {
        match events.recv().await {
            Ok(ProcessorEvent::RecordingFinished(payload)) => return payload.map(|p| p.data.frames()),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(e) => panic!("event channel failed: {}", e),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn alpha_tone_dominates_band_powers() {
    let settings = ProcessorSettings {
        filters: FilterSettings {
            high_pass: 1.0,
            low_pass: 40.0,
            ..FilterSettings::default()
        },
        ..ProcessorSettings::default()
    };
    let (tx, rx) = broadcast::channel(256);
    let mut handle = start_processing_service(rx, settings, 4, RATE, None).unwrap();
    handle.send(ProcessorCommand::Start).await.unwrap();
    tokio::task::yield_now().await;

    let mut sent = 0;
    for _ in 0..60 {
        tx.send(tone(4, sent, 25, 10.0)).unwrap();
        sent += 25;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // The newest spectrum sees a ring full of settled tone
    let mut report = None;
    loop {
        match handle.events.try_recv() {
            Ok(ProcessorEvent::Spectrum(r)) => report = Some(r),
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    let report = report.expect("no spectrum emitted");
    let bands = report.spectrum.band_powers;
    assert!(bands.alpha > bands.delta);
    assert!(bands.alpha > bands.theta);
    assert!(bands.alpha > bands.beta);
    assert!(bands.alpha > bands.gamma);

    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_recording_keeps_every_admitted_sample() {
    let (tx, rx) = broadcast::channel(256);
    let mut handle =
        start_processing_service(rx, ProcessorSettings::default(), 2, RATE, None).unwrap();
    handle.send(ProcessorCommand::Start).await.unwrap();
    handle.send(ProcessorCommand::StartRecording).await.unwrap();
    tokio::task::yield_now().await;

    let widths = [25usize, 13, 40, 7, 25, 1];
    for (i, width) in widths.iter().enumerate() {
        tx.send(tone(2, 0, *width, 10.0)).unwrap();
        if i % 2 == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    handle.send(ProcessorCommand::StopRecording).await.unwrap();

    let frames = recording_finished(&mut handle.events).await;
    assert_eq!(frames, Some(widths.iter().sum()));
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn commands_apply_after_chunks_sent_before_them() {
    for _ in 0..50 {
        let (tx, rx) = broadcast::channel(256);
        let mut handle =
            start_processing_service(rx, ProcessorSettings::default(), 2, RATE, None).unwrap();
        handle.send(ProcessorCommand::Start).await.unwrap();
        handle.send(ProcessorCommand::StartRecording).await.unwrap();
        tokio::task::yield_now().await;

        for _ in 0..5 {
            tx.send(SampleChunk::zeros(2, 10)).unwrap();
        }
        handle.send(ProcessorCommand::AddMarker("BURST_END".into())).await.unwrap();
        handle.send(ProcessorCommand::StopRecording).await.unwrap();

        let payload = loop {
            match handle.events.recv().await {
                Ok(ProcessorEvent::RecordingFinished(p)) => break p.expect("recording was empty"),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel failed: {}", e),
            }
        };
        assert_eq!(payload.data.frames(), 50);
        assert_eq!(payload.marker_timestamps, vec![50]);
        handle.shutdown().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn guided_session_drives_recording() {
    let (tx, rx) = broadcast::channel(256);
    let mut handle =
        start_processing_service(rx, ProcessorSettings::default(), 2, RATE, None).unwrap();
    handle.send(ProcessorCommand::Start).await.unwrap();
    tokio::task::yield_now().await;

    let feeder = tokio::spawn(async move {
        loop {
            if tx.send(tone(2, 0, 25, 10.0)).is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    });

    let plan = TrialPlan::from_actions(vec![GuidedAction::Fixation, GuidedAction::BlinkOnce]);
    let session = spawn_guided_session(plan, SequencerTimings::default(), handle.commands.clone());
    session.join().await;

    let payload = loop {
        match handle.events.recv().await {
            Ok(ProcessorEvent::RecordingFinished(p)) => break p.expect("guided recording was empty"),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(e) => panic!("event channel failed: {}", e),
        }
    };
    feeder.abort();

    assert_eq!(
        payload.marker_labels,
        vec![
            "GUIDED_SESSION_START",
            "FIXATION_START",
            "FIXATION_END",
            "BLINK_ONCE_START",
            "BLINK_ONCE_END",
            "GUIDED_SESSION_END"
        ]
    );
    assert!(payload.marker_timestamps.windows(2).all(|w| w[0] <= w[1]));
    assert!(payload.data.frames() > 0);
    handle.shutdown().await.unwrap();
}

struct AlwaysUp;

impl GestureClassifier for AlwaysUp {
    fn classify(&mut self, _: &ClassifierWindow) -> (Gesture, f32) {
        (Gesture::Up, 0.95)
    }
}

#[tokio::test(start_paused = true)]
async fn eog_detector_consumes_filtered_output() {
    let settings = ProcessorSettings {
        filters: FilterSettings {
            high_pass: 0.0,
            low_pass: 0.0,
            ..FilterSettings::default()
        },
        ..ProcessorSettings::default()
    };
    let (tx, rx) = broadcast::channel(256);
    let mut handle = start_processing_service(rx, settings, 4, RATE, None).unwrap();
    handle
        .send(ProcessorCommand::SetChannelNames(vec![
            "EOG Up".into(),
            "EOG Down".into(),
            "EOG Left".into(),
            "EOG Right".into(),
        ]))
        .await
        .unwrap();
    handle.send(ProcessorCommand::Start).await.unwrap();
    tokio::task::yield_now().await;

    // Upward saccade: the up electrode steps by 200 uV near the end
    for block in 0..16 {
        let mut chunk = SampleChunk::zeros(4, 25);
        if block == 15 {
            chunk.data_mut().row_mut(0).fill(200.0);
        }
        tx.send(chunk).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let roles = EogChannelMap::from_names(&["EOG Up", "EOG Down", "EOG Left", "EOG Right"]).unwrap();
    let mut detector = EogDetector::new(EogWindowBuilder::new(roles, RATE).unwrap(), AlwaysUp);
    let now = std::time::Instant::now();
    let mut gestures = Vec::new();
    loop {
        match handle.events.try_recv() {
            Ok(ProcessorEvent::Filtered(chunk)) => gestures.extend(detector.push(&chunk, now)),
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert_eq!(gestures, vec![Gesture::Up]);
    handle.shutdown().await.unwrap();
}
