//! Image tracking model: handle plus the actor thread that owns all mutable
//! tracking state.

use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use opencv::core::{Mat, Point2f, Size};
use opencv::prelude::*;
use tracing::{debug, info, warn};

use crate::error::{Result, TrackingError};
use crate::features::{DescriptorType, FeaturesExtractingParams, KeypointType, RecognitionParams};
use crate::geometry::{Contour, NUMBER_OF_QUADRANGLE_CORNERS};
use crate::recognition::serialization::{
    read_image_object, read_text_file, write_image_object, write_points, write_text_file,
    TokenReader,
};
use crate::recognition::ImageObject;
use crate::tracking::{
    AsyncTracker, CascadeTracker, FeatureSubstitutionTracker, ImageContourStabilizator,
    MedianFlowParams, MedianFlowTracker, ObjectTracker, RecognitionBasedTracker,
    StabilizationParams, TrackingParams, TrackingState,
};

use super::messages::{ModelCommand, RecognitionOutcome};
use super::shared_state::{ModelSnapshot, SharedModelState};

/// Pending commands before callers block on `send`.
const COMMAND_QUEUE_CAPACITY: usize = 8;

const RECOGNITION_BASED_PRIORITY: f32 = 1.0;
const FEATURE_SUBSTITUTION_PRIORITY: f32 = 0.6;
const MEDIAN_FLOW_PRIORITY: f32 = 0.1;

/// Builds the whole-frame searcher used after the target was lost.
pub(crate) type SearcherFactory =
    Arc<dyn Fn(&ImageObject, &TrackingParams) -> Box<dyn ObjectTracker> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOptions {
    /// Run whole-frame recognition, and the recognition-based and
    /// feature-substitution cascade members, on worker threads. When off,
    /// every `track` call does all of its work before returning.
    pub asynchronous: bool,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self { asynchronous: true }
    }
}

/// Handle to a tracking model.
///
/// All methods take `&self`; the handle may be shared between threads. Calls
/// are serialized by the actor, so two tracking cycles for one model never
/// overlap, and a `track` call made while another caller's cycle is running
/// returns the last published location at once.
pub struct ImageTrackingModel {
    commands: Sender<ModelCommand>,
    shared: Arc<SharedModelState>,
    actor: Option<JoinHandle<()>>,
}

impl ImageTrackingModel {
    pub fn new() -> Result<Self> {
        Self::with_options(ModelOptions::default())
    }

    pub fn with_options(options: ModelOptions) -> Result<Self> {
        Self::spawn(options, Arc::new(default_searcher))
    }

    #[cfg(test)]
    pub(crate) fn with_searcher(options: ModelOptions, searcher: SearcherFactory) -> Result<Self> {
        Self::spawn(options, searcher)
    }

    fn spawn(options: ModelOptions, searcher: SearcherFactory) -> Result<Self> {
        let shared = SharedModelState::new();
        let (commands, command_receiver) = bounded::<ModelCommand>(COMMAND_QUEUE_CAPACITY);
        // One recognition worker at a time, so a single slot never blocks it.
        let (outcome_sender, outcome_receiver) = bounded::<RecognitionOutcome>(1);

        let actor = ModelActor::new(options, Arc::clone(&shared), searcher, outcome_sender);
        let handle = thread::Builder::new()
            .name("image-tracking-model".into())
            .spawn(move || actor.run(command_receiver, outcome_receiver))?;

        Ok(Self {
            commands,
            shared,
            actor: Some(handle),
        })
    }

    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> ModelCommand) -> Result<T> {
        let (reply, response) = bounded(1);
        self.commands
            .send(command(reply))
            .map_err(|_| TrackingError::ModelUnavailable)?;
        response.recv().map_err(|_| TrackingError::ModelUnavailable)
    }

    /// Track `target` from now on. Rebuilds the tracker cascade.
    pub fn set_target(&self, target: &ImageObject) -> Result<()> {
        if target.is_empty() {
            return Err(TrackingError::invalid_input("target object has no features"));
        }
        let target = target.clone();
        self.request(|reply| ModelCommand::SetTarget { target, reply })?
    }

    /// Process one grayscale frame and return the target location, if known.
    ///
    /// While a background recognition is in flight, or another caller's
    /// cycle is running, this is a no-op.
    pub fn track(&self, frame: &Mat, params: &TrackingParams) -> Result<Option<Contour>> {
        if frame.empty() || frame.channels() != 1 {
            return Err(TrackingError::invalid_input(
                "tracking needs a non-empty single-channel frame",
            ));
        }
        let frame = frame.try_clone()?;
        if !self.shared.try_begin_cycle() {
            debug!("Tracking cycle busy, frame skipped");
            return Ok(self.location());
        }
        let params = *params;
        let result = self.request(move |reply| ModelCommand::Track {
            frame,
            params,
            reply,
        });
        self.shared.end_cycle();
        result?
    }

    /// Stabilization settings used from now on. They are kept across targets
    /// and saved with the model.
    pub fn set_stabilization(&self, params: &StabilizationParams) -> Result<()> {
        ImageContourStabilizator::validate(params)
            .map_err(|e| TrackingError::invalid_input(e.to_string()))?;
        let params = *params;
        self.request(|reply| ModelCommand::SetStabilization { params, reply })?
    }

    /// Forget the last location and the stabilization history.
    pub fn refresh(&self) -> Result<()> {
        self.request(|reply| ModelCommand::Refresh { reply })?
    }

    /// Tell the model where the target is.
    pub fn reinforce(&self, location: &[Point2f]) -> Result<()> {
        let location = location.to_vec();
        self.request(|reply| ModelCommand::Reinforce { location, reply })?
    }

    pub fn is_valid(&self) -> bool {
        self.shared.state() != TrackingState::Invalid
    }

    pub fn state(&self) -> TrackingState {
        self.shared.state()
    }

    /// Last published location; `None` when the target is not located.
    pub fn location(&self) -> Option<Contour> {
        let location = self.shared.location();
        (!location.is_empty()).then_some(location)
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        self.shared.snapshot()
    }

    /// Whether a whole-frame recognition is running in the background.
    pub fn is_recognizing(&self) -> bool {
        self.shared.is_recognizing()
    }

    /// Block until no background recognition is in flight.
    pub fn wait_idle(&self) -> Result<()> {
        self.request(|reply| ModelCommand::WaitIdle { reply })
    }

    pub fn serialize(&self) -> Result<String> {
        self.request(|reply| ModelCommand::Serialize { reply })?
    }

    /// Replace the model with the one described by `text`. On failure the
    /// model is left as it was.
    pub fn deserialize(&self, text: &str) -> Result<()> {
        let text = text.to_owned();
        self.request(|reply| ModelCommand::Restore { text, reply })?
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        write_text_file(path, &self.serialize()?)?;
        info!(path = %path.display(), "Tracking model saved");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.deserialize(&read_text_file(path)?)?;
        info!(path = %path.display(), "Tracking model loaded");
        Ok(())
    }

    /// Stop the actor, waiting for any background recognition to finish.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(ModelCommand::Shutdown);
        if let Some(handle) = self.actor.take() {
            if handle.join().is_err() {
                warn!("Tracking model actor panicked");
            }
        }
    }
}

impl Drop for ImageTrackingModel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn default_searcher(target: &ImageObject, params: &TrackingParams) -> Box<dyn ObjectTracker> {
    Box::new(RecognitionBasedTracker::new(
        target.clone(),
        params.frames_features_extracting,
        params.recognition,
    ))
}

/// Run a whole-frame search, turning a panic into an error so the model never
/// stays stuck in recognition.
fn search_frame(searcher: &mut dyn ObjectTracker, frame: &Mat) -> Result<Option<Contour>> {
    panic::catch_unwind(AssertUnwindSafe(|| searcher.track(frame))).unwrap_or_else(|_| {
        warn!("Whole-frame searcher panicked");
        Err(TrackingError::TrackerPanicked)
    })
}

/// Recognition-based, feature-substitution and median-flow trackers with
/// their fixed presets.
fn build_cascade(
    target: &ImageObject,
    expected_offset: f64,
    asynchronous: bool,
) -> Result<CascadeTracker> {
    let recognition_based: Box<dyn ObjectTracker> = Box::new(RecognitionBasedTracker::new(
        target.clone(),
        FeaturesExtractingParams::orb(1.15, 5000),
        RecognitionParams::new(70, 0.005, 0.1),
    ));
    let feature_substitution: Box<dyn ObjectTracker> = Box::new(FeatureSubstitutionTracker::new(
        FeaturesExtractingParams {
            keypoints_type: KeypointType::Gftt,
            descriptors_type: DescriptorType::Orb,
            ..FeaturesExtractingParams::default()
        },
        RecognitionParams::new(30, 0.05, 0.1),
        expected_offset as f32,
    ));
    let median_flow = MedianFlowTracker::new(MedianFlowParams {
        points_in_grid: 10,
        window_size: Size::new(16, 16),
        pyramid_max_level: 16,
    })?;

    let (recognition_based, feature_substitution) = if asynchronous {
        (
            Box::new(AsyncTracker::new(recognition_based)) as Box<dyn ObjectTracker>,
            Box::new(AsyncTracker::new(feature_substitution)) as Box<dyn ObjectTracker>,
        )
    } else {
        (recognition_based, feature_substitution)
    };

    let mut cascade = CascadeTracker::default();
    cascade.enable_tracker(recognition_based, RECOGNITION_BASED_PRIORITY);
    cascade.enable_tracker(feature_substitution, FEATURE_SUBSTITUTION_PRIORITY);
    cascade.enable_tracker(Box::new(median_flow), MEDIAN_FLOW_PRIORITY);
    Ok(cascade)
}

/// Owns the target, cascade and stabilizer of one model.
struct ModelActor {
    options: ModelOptions,
    shared: Arc<SharedModelState>,
    searcher: SearcherFactory,
    target: ImageObject,
    cascade: Option<CascadeTracker>,
    /// Search-window offset the cascade was built with.
    cascade_offset: f64,
    params: TrackingParams,
    stabilization: StabilizationParams,
    stabilizer: ImageContourStabilizator,
    state: TrackingState,
    location: Contour,
    /// Bumped whenever the target or location is replaced; older background
    /// results are discarded.
    generation: u64,
    worker: Option<JoinHandle<()>>,
    outcomes: Sender<RecognitionOutcome>,
    idle_waiters: Vec<Sender<()>>,
}

impl ModelActor {
    fn new(
        options: ModelOptions,
        shared: Arc<SharedModelState>,
        searcher: SearcherFactory,
        outcomes: Sender<RecognitionOutcome>,
    ) -> Self {
        Self {
            options,
            shared,
            searcher,
            target: ImageObject::new(),
            cascade: None,
            cascade_offset: 0.0,
            params: TrackingParams::default(),
            stabilization: StabilizationParams::default(),
            stabilizer: ImageContourStabilizator::new(),
            state: TrackingState::Invalid,
            location: Contour::new(),
            generation: 0,
            worker: None,
            outcomes,
            idle_waiters: Vec::new(),
        }
    }

    fn run(mut self, commands: Receiver<ModelCommand>, outcomes: Receiver<RecognitionOutcome>) {
        loop {
            select! {
                recv(commands) -> command => match command {
                    Ok(ModelCommand::Shutdown) | Err(_) => break,
                    Ok(command) => self.handle(command),
                },
                recv(outcomes) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.finish_recognition(outcome);
                    }
                }
            }
        }
        self.join_worker();
        debug!("Tracking model actor stopped");
    }

    fn handle(&mut self, command: ModelCommand) {
        match command {
            ModelCommand::SetTarget { target, reply } => {
                let _ = reply.send(self.set_target(target));
            }
            ModelCommand::Track {
                frame,
                params,
                reply,
            } => {
                let _ = reply.send(self.track(frame, params));
            }
            ModelCommand::SetStabilization { params, reply } => {
                self.stabilization = params;
                self.stabilizer.reset();
                let _ = reply.send(Ok(()));
            }
            ModelCommand::Refresh { reply } => {
                let _ = reply.send(self.refresh());
            }
            ModelCommand::Reinforce { location, reply } => {
                let _ = reply.send(self.reinforce(location));
            }
            ModelCommand::Serialize { reply } => {
                let _ = reply.send(self.serialize());
            }
            ModelCommand::Restore { text, reply } => {
                let _ = reply.send(self.restore(&text));
            }
            ModelCommand::WaitIdle { reply } => {
                if self.worker.is_none() {
                    let _ = reply.send(());
                } else {
                    self.idle_waiters.push(reply);
                }
            }
            ModelCommand::Shutdown => {}
        }
    }

    fn publish(&self) {
        self.shared.publish(self.state, &self.location);
    }

    fn current_location(&self) -> Option<Contour> {
        (!self.location.is_empty()).then(|| self.location.clone())
    }

    fn set_target(&mut self, target: ImageObject) -> Result<()> {
        let cascade = build_cascade(&target, self.params.expected_offset, self.options.asynchronous)?;
        info!(
            features = target.features().len(),
            rate = target.recognition_rate(),
            "Tracking target set"
        );
        self.install(target, cascade, Contour::new());
        Ok(())
    }

    /// Swap in a new target and cascade, seeded with `location` if non-empty.
    fn install(&mut self, target: ImageObject, mut cascade: CascadeTracker, location: Contour) {
        if !location.is_empty() {
            cascade.reinforcement(&location);
        }
        self.target = target;
        self.cascade = Some(cascade);
        self.cascade_offset = self.params.expected_offset;
        self.generation += 1;
        self.stabilizer.reset();
        self.location = location;
        self.state = self.resting_state();
        self.publish();
    }

    /// State of a valid model that is not following the target right now.
    fn resting_state(&self) -> TrackingState {
        if !self.location.is_empty() {
            TrackingState::Appeared
        } else if self.worker.is_some() {
            TrackingState::InProcess
        } else {
            TrackingState::Undetected
        }
    }

    fn track(&mut self, frame: Mat, params: TrackingParams) -> Result<Option<Contour>> {
        if self.state == TrackingState::Invalid {
            return Err(TrackingError::InvalidModel);
        }
        self.params = params;
        self.update_search_window()?;

        match self.state {
            TrackingState::Undetected if self.worker.is_none() => self.start_recognition(frame)?,
            state if state.is_following() => self.follow(&frame),
            state => debug!(?state, "Recognition in flight, frame skipped"),
        }
        Ok(self.current_location())
    }

    /// Rebuild the cascade when the expected offset changed, keeping the location.
    fn update_search_window(&mut self) -> Result<()> {
        if (self.params.expected_offset - self.cascade_offset).abs() <= f64::EPSILON {
            return Ok(());
        }
        let mut cascade =
            build_cascade(&self.target, self.params.expected_offset, self.options.asynchronous)?;
        if !self.location.is_empty() {
            cascade.reinforcement(&self.location);
        }
        debug!(offset = self.params.expected_offset, "Tracker cascade rebuilt");
        self.cascade = Some(cascade);
        self.cascade_offset = self.params.expected_offset;
        Ok(())
    }

    fn start_recognition(&mut self, frame: Mat) -> Result<()> {
        let mut searcher = (self.searcher)(&self.target, &self.params);

        if !self.options.asynchronous {
            let result = search_frame(searcher.as_mut(), &frame);
            self.apply_recognition(result);
            return Ok(());
        }

        let generation = self.generation;
        let outcomes = self.outcomes.clone();
        let worker = thread::Builder::new()
            .name("image-recognition".into())
            .spawn(move || {
                let result = search_frame(searcher.as_mut(), &frame);
                let _ = outcomes.send(RecognitionOutcome { generation, result });
            })?;

        self.worker = Some(worker);
        self.shared.set_recognizing(true);
        self.state = TrackingState::InProcess;
        self.publish();
        debug!("Background recognition started");
        Ok(())
    }

    fn finish_recognition(&mut self, outcome: RecognitionOutcome) {
        self.join_worker();
        if outcome.generation == self.generation {
            self.apply_recognition(outcome.result);
        } else {
            debug!("Discarding recognition result for a replaced target");
            if self.state == TrackingState::InProcess {
                self.state = self.resting_state();
                self.publish();
            }
        }
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Recognition worker panicked");
            }
        }
        self.shared.set_recognizing(false);
    }

    fn apply_recognition(&mut self, result: Result<Option<Contour>>) {
        match result {
            Ok(Some(location)) => {
                info!("Target appeared");
                if let Some(cascade) = self.cascade.as_mut() {
                    cascade.reinforcement(&location);
                }
                let mut stabilized = location;
                self.stabilize(&mut stabilized);
                self.location = stabilized;
                self.state = TrackingState::Appeared;
            }
            Ok(None) => {
                debug!("Target not found in frame");
                self.lose();
            }
            Err(e) => {
                warn!(error = %e, "Whole-frame recognition failed");
                self.lose();
            }
        }
        self.publish();
    }

    fn follow(&mut self, frame: &Mat) {
        let tracked = match self.cascade.as_mut() {
            Some(cascade) => cascade.track(frame).unwrap_or_else(|e| {
                warn!(error = %e, "Tracker cascade failed");
                None
            }),
            None => None,
        };

        match tracked {
            Some(mut location) => {
                self.stabilize(&mut location);
                self.location = location;
                self.state = TrackingState::Tracked;
            }
            None => {
                debug!("Target lost");
                self.lose();
            }
        }
        self.publish();
    }

    fn lose(&mut self) {
        self.stabilizer.reset();
        self.location.clear();
        self.state = TrackingState::Undetected;
    }

    fn stabilize(&mut self, location: &mut Contour) {
        match self.stabilizer.stabilize(location, &self.stabilization) {
            Ok(status) => debug!(?status, "Contour stabilization"),
            Err(e) => warn!(error = %e, "Contour left unstabilized"),
        }
    }

    fn refresh(&mut self) -> Result<()> {
        if self.state == TrackingState::Invalid {
            return Err(TrackingError::InvalidModel);
        }
        self.generation += 1;
        self.stabilizer.reset();
        self.location.clear();
        if let Some(cascade) = self.cascade.as_mut() {
            cascade.reinforcement(&[]);
        }
        self.state = self.resting_state();
        self.publish();
        Ok(())
    }

    fn reinforce(&mut self, location: Contour) -> Result<()> {
        if self.state == TrackingState::Invalid {
            return Err(TrackingError::InvalidModel);
        }
        if location.len() != NUMBER_OF_QUADRANGLE_CORNERS {
            return Err(TrackingError::invalid_input(format!(
                "reinforcement needs {NUMBER_OF_QUADRANGLE_CORNERS} corners, got {}",
                location.len()
            )));
        }
        if let Some(cascade) = self.cascade.as_mut() {
            cascade.reinforcement(&location);
        }
        self.generation += 1;
        self.stabilizer.reset();
        self.location = location;
        self.state = TrackingState::Appeared;
        self.publish();
        Ok(())
    }

    /// Target, then stabilization settings, then the last location.
    fn serialize(&self) -> Result<String> {
        let mut out = String::new();
        write_image_object(&mut out, &self.target)?;
        let s = &self.stabilization;
        let _ = writeln!(out, "{} {}", s.enabled as u8, s.history_amount);
        let _ = writeln!(
            out,
            "{} {} {} {}",
            s.stabilization_speed,
            s.stabilization_acceleration,
            s.tolerant_shift,
            s.tolerant_shift_extra
        );
        write_points(&mut out, &self.location);
        Ok(out)
    }

    fn restore(&mut self, text: &str) -> Result<()> {
        let mut reader = TokenReader::new(text);
        let target = read_image_object(&mut reader)?;
        let stabilization = StabilizationParams {
            enabled: reader.next_flag("stabilization flag")?,
            history_amount: reader.next("history amount")?,
            stabilization_speed: reader.next("stabilization speed")?,
            stabilization_acceleration: reader.next("stabilization acceleration")?,
            tolerant_shift: reader.next("tolerant shift")?,
            tolerant_shift_extra: reader.next("tolerant shift extra")?,
        };
        let location = reader.next_points("last location")?;
        reader.finish()?;

        let cascade = if target.is_empty() {
            None
        } else {
            Some(build_cascade(
                &target,
                self.params.expected_offset,
                self.options.asynchronous,
            )?)
        };

        self.stabilization = stabilization;
        match cascade {
            Some(cascade) => self.install(target, cascade, location),
            None => {
                self.target = target;
                self.cascade = None;
                self.generation += 1;
                self.stabilizer.reset();
                self.location.clear();
                self.state = TrackingState::Invalid;
                self.publish();
            }
        }
        info!(state = ?self.state, "Tracking model restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        assert_contour_near, flat_image, scene_with_target, square, textured_image,
    };
    use crate::tracking::{next_tracker_id, TrackerId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn target() -> ImageObject {
        ImageObject::from_image(
            &textured_image(200, 200, 31),
            &FeaturesExtractingParams::default(),
            &[],
        )
        .unwrap()
    }

    fn params() -> TrackingParams {
        TrackingParams {
            frames_features_extracting: FeaturesExtractingParams::orb(1.2, 5000),
            recognition: RecognitionParams::new(15, 0.33, 0.1),
            ..TrackingParams::default()
        }
    }

    fn synchronous() -> ModelOptions {
        ModelOptions {
            asynchronous: false,
        }
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("image-tracking-model-{}-{name}", std::process::id()))
    }

    /// Whole-frame searcher that blocks until the test opens the gate.
    struct GatedSearcher {
        id: TrackerId,
        gate: Receiver<()>,
        calls: Arc<AtomicUsize>,
        result: Contour,
    }

    impl ObjectTracker for GatedSearcher {
        fn track(&mut self, _frame: &Mat) -> Result<Option<Contour>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv();
            Ok(Some(self.result.clone()))
        }

        fn reinforcement(&mut self, _location: &[Point2f]) {}

        fn clone_box(&self) -> Box<dyn ObjectTracker> {
            Box::new(Self {
                id: next_tracker_id(),
                gate: self.gate.clone(),
                calls: Arc::clone(&self.calls),
                result: self.result.clone(),
            })
        }

        fn id(&self) -> TrackerId {
            self.id
        }
    }

    /// Searcher factory whose searchers wait for the returned gate sender.
    fn gated_factory(location: &Contour) -> (Sender<()>, Arc<AtomicUsize>, SearcherFactory) {
        let (open, gate) = crossbeam_channel::unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let factory: SearcherFactory = {
            let calls = Arc::clone(&calls);
            let location = location.clone();
            Arc::new(move |_: &ImageObject, _: &TrackingParams| {
                Box::new(GatedSearcher {
                    id: next_tracker_id(),
                    gate: gate.clone(),
                    calls: Arc::clone(&calls),
                    result: location.clone(),
                }) as Box<dyn ObjectTracker>
            })
        };
        (open, calls, factory)
    }

    fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
        for _ in 0..5000 {
            if calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("searcher was not called {expected} times");
    }

    /// Whole-frame searcher that always panics.
    struct PanickingSearcher {
        id: TrackerId,
        calls: Arc<AtomicUsize>,
    }

    impl ObjectTracker for PanickingSearcher {
        fn track(&mut self, _frame: &Mat) -> Result<Option<Contour>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            panic!("searcher failure");
        }

        fn reinforcement(&mut self, _location: &[Point2f]) {}

        fn clone_box(&self) -> Box<dyn ObjectTracker> {
            Box::new(Self {
                id: next_tracker_id(),
                calls: Arc::clone(&self.calls),
            })
        }

        fn id(&self) -> TrackerId {
            self.id
        }
    }

    #[test]
    fn test_model_without_target_is_invalid() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        assert!(!model.is_valid());
        assert_eq!(model.state(), TrackingState::Invalid);
        assert!(matches!(
            model.track(&flat_image(64, 64, 0), &params()),
            Err(TrackingError::InvalidModel)
        ));
        assert!(matches!(model.refresh(), Err(TrackingError::InvalidModel)));
        assert!(matches!(
            model.set_target(&ImageObject::new()),
            Err(TrackingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_loss_and_recovery() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        model.set_target(&target()).unwrap();
        assert_eq!(model.state(), TrackingState::Undetected);

        let scene = scene_with_target(640, 480, 200, 31, 200, 120);
        let expected = square(200.0, 120.0, 200.0);

        let found = model.track(&scene, &params()).unwrap().unwrap();
        assert_eq!(model.state(), TrackingState::Appeared);
        assert_contour_near(&found, &expected, 3.0);

        let found = model.track(&scene, &params()).unwrap().unwrap();
        assert_eq!(model.state(), TrackingState::Tracked);
        assert_contour_near(&found, &expected, 3.0);

        // A location pushed down the cascade on the previous frame may carry
        // over one frame before the trackers see the empty scene.
        let empty = flat_image(640, 480, 128);
        let mut lost = false;
        for _ in 0..3 {
            model.track(&empty, &params()).unwrap();
            if model.state() == TrackingState::Undetected {
                lost = true;
                break;
            }
        }
        assert!(lost);
        assert!(model.location().is_none());

        let found = model.track(&scene, &params()).unwrap().unwrap();
        assert_eq!(model.state(), TrackingState::Appeared);
        assert_contour_near(&found, &expected, 3.0);
    }

    #[test]
    fn test_background_recognition_is_single_flight() {
        let location = square(40.0, 30.0, 100.0);
        let (open, calls, factory) = gated_factory(&location);

        let model = ImageTrackingModel::with_searcher(ModelOptions::default(), factory).unwrap();
        model.set_target(&target()).unwrap();

        let frame = flat_image(64, 64, 0);
        assert_eq!(model.track(&frame, &params()).unwrap(), None);
        assert_eq!(model.state(), TrackingState::InProcess);
        assert!(model.is_recognizing());

        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    let frame = flat_image(64, 64, 0);
                    assert_eq!(model.track(&frame, &params()).unwrap(), None);
                });
            }
        });
        assert_eq!(model.state(), TrackingState::InProcess);
        assert!(model.location().is_none());

        open.send(()).unwrap();
        model.wait_idle().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!model.is_recognizing());
        assert_eq!(model.state(), TrackingState::Appeared);
        assert_eq!(model.location(), Some(location));
    }

    #[test]
    fn test_concurrent_track_does_not_wait_for_running_cycle() {
        let location = square(40.0, 30.0, 100.0);
        let (open, calls, factory) = gated_factory(&location);
        let model = ImageTrackingModel::with_searcher(synchronous(), factory).unwrap();
        model.set_target(&target()).unwrap();

        thread::scope(|s| {
            let first = s.spawn(|| {
                let frame = flat_image(64, 64, 0);
                model.track(&frame, &params()).unwrap()
            });
            wait_for_calls(&calls, 1);

            // The first cycle is stuck in the searcher; this one must not queue.
            let frame = flat_image(64, 64, 0);
            assert_eq!(model.track(&frame, &params()).unwrap(), None);
            assert_eq!(calls.load(Ordering::SeqCst), 1);

            open.send(()).unwrap();
            assert_eq!(first.join().unwrap(), Some(location.clone()));
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(model.state(), TrackingState::Appeared);
    }

    #[test]
    fn test_panicking_searcher_does_not_stall_model() {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory: SearcherFactory = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &ImageObject, _: &TrackingParams| {
                Box::new(PanickingSearcher {
                    id: next_tracker_id(),
                    calls: Arc::clone(&calls),
                }) as Box<dyn ObjectTracker>
            })
        };
        let model = ImageTrackingModel::with_searcher(ModelOptions::default(), factory).unwrap();
        model.set_target(&target()).unwrap();

        let frame = flat_image(64, 64, 0);
        for round in 1..=2 {
            model.track(&frame, &params()).unwrap();
            model.wait_idle().unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), round);
            assert_eq!(model.state(), TrackingState::Undetected);
            assert!(!model.is_recognizing());
        }
    }

    #[test]
    fn test_refresh_and_reinforce() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        model.set_target(&target()).unwrap();

        let location = square(10.0, 20.0, 150.0);
        model.reinforce(&location).unwrap();
        assert_eq!(model.state(), TrackingState::Appeared);
        assert_eq!(model.location(), Some(location));

        assert!(matches!(
            model.reinforce(&[Point2f::new(0.0, 0.0)]),
            Err(TrackingError::InvalidInput(_))
        ));

        model.refresh().unwrap();
        assert_eq!(model.state(), TrackingState::Undetected);
        assert!(model.location().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        model.set_target(&target()).unwrap();
        let location = square(200.0, 120.0, 200.0);
        model.reinforce(&location).unwrap();

        let path = temp_path("round-trip.txt");
        model.save(&path).unwrap();

        let loaded = ImageTrackingModel::with_options(synchronous()).unwrap();
        loaded.load(&path).unwrap();
        assert!(loaded.is_valid());
        assert_eq!(loaded.state(), TrackingState::Appeared);
        assert_eq!(loaded.location(), Some(location));
        assert_eq!(loaded.serialize().unwrap(), model.serialize().unwrap());

        let _ = std::fs::remove_file(&path);
    }

    fn stabilization_tail(model: &ImageTrackingModel) -> Vec<String> {
        let text = model.serialize().unwrap();
        let mut tail: Vec<String> = text.lines().rev().take(3).map(str::to_owned).collect();
        tail.reverse();
        tail
    }

    #[test]
    fn test_stabilization_settings_are_persisted() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        model.set_target(&target()).unwrap();
        model
            .set_stabilization(&StabilizationParams {
                enabled: false,
                history_amount: 7,
                ..StabilizationParams::default()
            })
            .unwrap();
        model.track(&flat_image(64, 64, 128), &params()).unwrap();

        assert_eq!(stabilization_tail(&model), ["0 7", "0.3 0.1 0.00006 1.3", "0"]);
        assert!(matches!(
            model.set_stabilization(&StabilizationParams {
                history_amount: 0,
                ..StabilizationParams::default()
            }),
            Err(TrackingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_loaded_stabilization_survives_tracking() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        model.set_target(&target()).unwrap();
        model
            .set_stabilization(&StabilizationParams {
                enabled: false,
                history_amount: 7,
                stabilization_speed: 0.5,
                ..StabilizationParams::default()
            })
            .unwrap();
        let saved = model.serialize().unwrap();

        let loaded = ImageTrackingModel::with_options(synchronous()).unwrap();
        loaded.deserialize(&saved).unwrap();
        let defaults = TrackingParams::from_config(&crate::config::EngineConfig::new());
        loaded.track(&flat_image(64, 64, 128), &defaults).unwrap();
        loaded.track(&flat_image(64, 64, 128), &defaults).unwrap();

        assert_eq!(stabilization_tail(&loaded), ["0 7", "0.5 0.1 0.00006 1.3", "0"]);
    }

    #[test]
    fn test_failed_load_leaves_model_unchanged() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        model.set_target(&target()).unwrap();
        let location = square(200.0, 120.0, 200.0);
        model.reinforce(&location).unwrap();
        let before = model.serialize().unwrap();

        assert!(matches!(
            model.load(temp_path("missing.txt")),
            Err(TrackingError::PermissionDenied(_))
        ));
        assert!(matches!(
            model.deserialize("1 0 0\n0\n0\n0 0 0\nnot-a-flag"),
            Err(TrackingError::Parse { .. })
        ));

        assert_eq!(model.serialize().unwrap(), before);
        assert_eq!(model.state(), TrackingState::Appeared);
        assert_eq!(model.location(), Some(location));
    }

    #[test]
    fn test_loading_empty_target_invalidates() {
        let model = ImageTrackingModel::with_options(synchronous()).unwrap();
        model.set_target(&target()).unwrap();
        model
            .deserialize("1 0 0\n0\n0\n0 0 0\n1 3\n0.3 0.1 0.00006 1.3\n0\n")
            .unwrap();
        assert!(!model.is_valid());
    }
}
