use crate::gate::{DeviceFactory, DistanceSource, FrameSource, ProximityGate};
use crate::greeter::{AcceptedMatch, Greeter};
use crate::status::KioskStats;
use kiosk_core::{
    DetectionAdapter, EmotionClassifier, FaceLocator, FaceObservation, FeatureEncoder, FrameView,
    MatchResult, Matcher, Registry,
};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Vision components owned by the sensing thread.
pub struct Vision<L, E> {
    pub adapter: DetectionAdapter<L, E>,
    pub classifier: Box<dyn EmotionClassifier>,
    pub matcher: Box<dyn Matcher + Send>,
    pub tolerance: f32,
}

/// Async side of the loop: where accepted matches go.
pub struct Handoff {
    pub greeter: Arc<Greeter>,
    pub tracker: TaskTracker,
    pub runtime: Handle,
    pub stats: Arc<KioskStats>,
}

/// Match every observation in one frame and read emotion for accepted ones.
///
/// A customer matched more than once in the same frame is reported once.
/// Unmatched faces produce nothing.
pub fn match_observations(
    observations: &[FaceObservation],
    registry: &Registry,
    matcher: &dyn Matcher,
    tolerance: f32,
    classifier: &mut dyn EmotionClassifier,
    stats: &KioskStats,
) -> Vec<AcceptedMatch> {
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();

    for observation in observations {
        match matcher.compare(&observation.detection.feature_vector, registry, tolerance) {
            MatchResult::Matched {
                customer_id,
                distance_score,
            } => {
                KioskStats::bump(&stats.matches);
                if !seen.insert(customer_id.clone()) {
                    continue;
                }
                let emotion = classifier.classify(&observation.face);
                tracing::info!(
                    customer_id = %customer_id,
                    distance = distance_score,
                    %emotion,
                    "customer recognized"
                );
                accepted.push(AcceptedMatch {
                    customer_id,
                    emotion,
                    distance_score,
                });
            }
            MatchResult::Unmatched => {
                KioskStats::bump(&stats.unmatched);
                tracing::debug!(
                    confidence = observation.detection.bounding_region.confidence,
                    "unrecognized face"
                );
            }
        }
    }
    accepted
}

/// Spawn the sensing loop. It runs until `stop` is cancelled and never
/// waits on storage or notifications.
pub fn spawn_sensing<S, F, L, E>(
    sensor: S,
    factory: F,
    threshold_cm: f32,
    mut vision: Vision<L, E>,
    registry: Arc<Registry>,
    handoff: Handoff,
    stop: CancellationToken,
) -> std::io::Result<std::thread::JoinHandle<()>>
where
    S: DistanceSource + 'static,
    F: DeviceFactory + 'static,
    L: FaceLocator + 'static,
    E: FeatureEncoder + 'static,
{
    std::thread::Builder::new()
        .name("kiosk-sensing".into())
        .spawn(move || {
            tracing::info!("sensing loop started");
            let mut gate = ProximityGate::new(sensor, factory, threshold_cm);
            let stats = handoff.stats.clone();

            while !stop.is_cancelled() {
                gate.poll();
                stats.capture_active.store(gate.is_active(), Ordering::Relaxed);
                let Some(device) = gate.device() else {
                    continue;
                };

                let frame = match device.capture() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "frame capture failed");
                        continue;
                    }
                };
                KioskStats::bump(&stats.frames);
                if frame.is_dark {
                    tracing::debug!(sequence = frame.sequence, "dark frame skipped");
                    continue;
                }

                let view = FrameView {
                    data: &frame.data,
                    width: frame.width,
                    height: frame.height,
                    timestamp: frame.captured_at,
                };
                let observations = vision.adapter.detect(&view);
                stats.faces.fetch_add(observations.len() as u64, Ordering::Relaxed);

                let accepted = match_observations(
                    &observations,
                    &registry,
                    vision.matcher.as_ref(),
                    vision.tolerance,
                    vision.classifier.as_mut(),
                    &stats,
                );
                for m in accepted {
                    handoff.greeter.hand_off(m, &handoff.tracker, &handoff.runtime);
                }
            }

            stats.capture_active.store(false, Ordering::Relaxed);
            tracing::info!("sensing loop exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::{dispatcher, FakeChannel, FakeSpeech, FakeText};
    use crate::gate::tests::{ScriptedSensor, StillFactory};
    use crate::gateway::{tests::fast_policy, PersistenceGateway};
    use crate::visits::tests::{customer, ManualClock};
    use crate::visits::VisitStateStore;
    use kiosk_core::{
        BoundingRegion, Detection, DetectorError, EncodeError, Emotion, EuclideanMatcher,
        FaceImage, FeatureVector, KnownCustomer, UnknownEmotion,
    };
    use kiosk_hw::Frame;
    use kiosk_store::{CustomerStore, SqliteStore};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    struct Fixed(Emotion, usize);

    impl EmotionClassifier for Fixed {
        fn classify(&mut self, _face: &FaceImage) -> Emotion {
            self.1 += 1;
            self.0
        }
    }

    fn observation(values: Vec<f32>) -> FaceObservation {
        FaceObservation {
            detection: Detection {
                feature_vector: FeatureVector::new(values),
                bounding_region: BoundingRegion {
                    x: 0.0,
                    y: 0.0,
                    width: 8.0,
                    height: 8.0,
                    confidence: 0.9,
                },
                frame_timestamp: Instant::now(),
            },
            face: FaceImage::from_gray(8, 8, vec![100; 64]).unwrap(),
        }
    }

    fn registry() -> Registry {
        Registry::build(
            2,
            [KnownCustomer {
                customer_id: "alice".into(),
                display_name: "Alice".into(),
                vectors: vec![FeatureVector::new(vec![0.0, 0.0])],
                phone_number: None,
            }],
        )
    }

    #[test]
    fn test_unmatched_probe_yields_nothing() {
        let stats = KioskStats::default();
        let mut classifier = Fixed(Emotion::Happy, 0);
        let accepted = match_observations(
            &[observation(vec![5.0, 5.0])],
            &registry(),
            &EuclideanMatcher,
            1.0,
            &mut classifier,
            &stats,
        );
        assert!(accepted.is_empty());
        assert_eq!(classifier.1, 0);
        assert_eq!(stats.unmatched.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_match_reads_emotion_once_per_customer() {
        let stats = KioskStats::default();
        let mut classifier = Fixed(Emotion::Surprise, 0);
        let accepted = match_observations(
            &[
                observation(vec![0.0, 0.1]),
                observation(vec![0.1, 0.0]),
                observation(vec![9.0, 9.0]),
            ],
            &registry(),
            &EuclideanMatcher,
            1.0,
            &mut classifier,
            &stats,
        );
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].customer_id, "alice");
        assert_eq!(accepted[0].emotion, Emotion::Surprise);
        assert_eq!(classifier.1, 1);
        assert_eq!(stats.matches.load(Ordering::Relaxed), 2);
        assert_eq!(stats.unmatched.load(Ordering::Relaxed), 1);
    }

    /// Always reports someone standing close.
    struct Near;

    impl DistanceSource for Near {
        fn poll(&mut self) -> Option<f32> {
            std::thread::sleep(Duration::from_millis(2));
            Some(40.0)
        }
    }

    /// One face in the middle of the frame; counts calls.
    struct CenterLocator(Arc<AtomicUsize>);

    impl FaceLocator for CenterLocator {
        fn locate(&mut self, _frame: &FrameView<'_>) -> Result<Vec<BoundingRegion>, DetectorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![BoundingRegion { x: 8.0, y: 8.0, width: 16.0, height: 16.0, confidence: 0.9 }])
        }
    }

    struct OriginEncoder;

    impl FeatureEncoder for OriginEncoder {
        fn dimension(&self) -> usize {
            2
        }

        fn encode(&mut self, _face: &FaceImage) -> Result<FeatureVector, EncodeError> {
            Ok(FeatureVector::new(vec![0.0, 0.0]))
        }
    }

    fn factory(level: u8) -> (StillFactory, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let factory = StillFactory {
            frame: Frame::new(vec![level; 32 * 32], 32, 32, 0),
            opens: opens.clone(),
            fail_first: 0,
        };
        (factory, opens)
    }

    fn vision(locates: Arc<AtomicUsize>) -> Vision<CenterLocator, OriginEncoder> {
        Vision {
            adapter: DetectionAdapter::new(CenterLocator(locates), OriginEncoder),
            classifier: Box::new(UnknownEmotion),
            matcher: Box::new(EuclideanMatcher),
            tolerance: 1.0,
        }
    }

    struct Rig {
        registry: Arc<Registry>,
        handoff: Handoff,
        speech: Arc<FakeSpeech>,
        stats: Arc<KioskStats>,
    }

    async fn rig() -> Rig {
        let mut doc = customer("alice", None);
        doc.encodings = vec![vec![0.0, 0.0]];
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.upsert(&doc).await.unwrap();
        let registry = Arc::new(Registry::build(2, [doc.to_known_customer()]));

        let gateway = Arc::new(PersistenceGateway::new(Arc::new(store), fast_policy(3)));
        let clock = Arc::new(ManualClock::at(chrono::Utc::now()));
        let visits = Arc::new(VisitStateStore::new(gateway, clock, chrono::Duration::hours(24), 4));
        let speech = Arc::new(FakeSpeech::default());
        let dispatcher = dispatcher(
            FakeText { greeting: Ok("Welcome back".into()), message: Ok("Thanks".into()) },
            speech.clone(),
            Arc::new(FakeChannel::default()),
        );
        let stats = Arc::new(KioskStats::default());
        let greeter = Arc::new(Greeter::new(registry.clone(), visits, dispatcher, stats.clone()));

        Rig {
            registry,
            handoff: Handoff {
                greeter,
                tracker: TaskTracker::new(),
                runtime: Handle::current(),
                stats: stats.clone(),
            },
            speech,
            stats,
        }
    }

    async fn join(handle: std::thread::JoinHandle<()>) {
        tokio::task::spawn_blocking(move || handle.join())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loop_greets_customer_once_and_stops() {
        let rig = rig().await;
        let tracker = rig.handoff.tracker.clone();
        let locates = Arc::new(AtomicUsize::new(0));
        let (factory, opens) = factory(128);
        let stop = CancellationToken::new();

        let handle = spawn_sensing(
            Near,
            factory,
            100.0,
            vision(locates.clone()),
            rig.registry,
            rig.handoff,
            stop.clone(),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while rig.speech.spoken.lock().unwrap().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Keep the customer in view a little longer; nothing more is said.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rig.stats.capture_active.load(Ordering::Relaxed));

        stop.cancel();
        join(handle).await;
        tracker.close();
        tracker.wait().await;

        assert!(!rig.stats.capture_active.load(Ordering::Relaxed));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(locates.load(Ordering::SeqCst) > 1);
        assert_eq!(rig.stats.notified.load(Ordering::Relaxed), 1);
        assert_eq!(*rig.speech.spoken.lock().unwrap(), vec!["Welcome back".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dark_frames_never_reach_detection() {
        let rig = rig().await;
        let locates = Arc::new(AtomicUsize::new(0));
        let (factory, opens) = factory(0);
        let sensor = ScriptedSensor([Some(50.0), Some(50.0), Some(50.0)].into_iter().collect());
        let stop = CancellationToken::new();

        let handle = spawn_sensing(
            sensor,
            factory,
            100.0,
            vision(locates.clone()),
            rig.registry,
            rig.handoff,
            stop.clone(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.cancel();
        join(handle).await;

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(rig.stats.frames.load(Ordering::Relaxed), 3);
        assert_eq!(locates.load(Ordering::SeqCst), 0);
        assert_eq!(rig.stats.notified.load(Ordering::Relaxed), 0);
        assert!(!rig.stats.capture_active.load(Ordering::Relaxed));
    }
}
