//! Game-state classifier.
//!
//! `evaluate` applies the ordered rules to one set of inputs; `Classifier`
//! wraps it in a small state machine that reuses a positive verdict longer
//! than a negative one so brief GPU dips do not flicker the state.

use crate::config::ClassifierThresholds;
use crate::inspector::ForegroundContext;
use crate::platform::ProcessSample;
use crate::registry::Registry;
use std::time::Instant;
use tracing::info;

/// Which rule produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Foreground process or title is on the non-game denylist.
    Denylisted,
    /// GPU load alone crossed the gaming threshold.
    GpuLoad,
    /// Borderless fullscreen with moderate GPU load.
    Fullscreen,
    /// Ambiguous fullscreen app with strong GPU and memory evidence.
    SuspectOverride,
    GameTitle,
    GameProcess,
    /// An allowlisted game is using CPU in the background.
    ActiveGameProcess,
    /// GPU load plus memory pressure.
    GpuHeuristic,
    /// An allowlisted game is running and the GPU is busy.
    RunningGame,
    /// Only a launcher is running, with heavy GPU use.
    LauncherWithLoad,
    NoMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub is_gaming: bool,
    pub reason: Reason,
}

impl Decision {
    fn gaming(reason: Reason) -> Self {
        Self {
            is_gaming: true,
            reason,
        }
    }

    fn not_gaming(reason: Reason) -> Self {
        Self {
            is_gaming: false,
            reason,
        }
    }
}

/// Everything one classification looks at.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierInput<'a> {
    pub context: &'a ForegroundContext,
    /// GPU load in percent.
    pub gpu_load: Option<f64>,
    /// GPU memory utilization in percent.
    pub gpu_memory: Option<f64>,
    /// Running processes, if enumeration succeeded.
    pub processes: Option<&'a [ProcessSample]>,
    pub strict_non_game_fullscreen: bool,
}

fn at_least(value: Option<f64>, threshold: f64) -> bool {
    value.map_or(false, |v| v >= threshold)
}

fn above(value: Option<f64>, threshold: f64) -> bool {
    value.map_or(false, |v| v > threshold)
}

/// Apply the classification rules in priority order; first match wins.
pub fn evaluate(input: &ClassifierInput<'_>, registry: &Registry, t: &ClassifierThresholds) -> Decision {
    let ctx = input.context;
    let load = input.gpu_load;
    let memory = input.gpu_memory;

    if registry.is_denied(ctx) {
        return Decision::not_gaming(Reason::Denylisted);
    }

    let suspect = input.strict_non_game_fullscreen && ctx.is_fullscreen && registry.is_suspect(ctx);

    if !suspect && at_least(load, t.gaming_load) {
        return Decision::gaming(Reason::GpuLoad);
    }

    if ctx.is_fullscreen && !suspect && at_least(load, t.fullscreen_load) {
        return Decision::gaming(Reason::Fullscreen);
    }

    if suspect {
        let overridden = match memory {
            Some(_) => at_least(load, t.suspect_load) && at_least(memory, t.suspect_memory),
            None => at_least(load, t.suspect_load_without_memory),
        };
        if overridden {
            return Decision::gaming(Reason::SuspectOverride);
        }
    }

    if ctx
        .window_title
        .as_deref()
        .map_or(false, |title| registry.title_has_game_term(title))
    {
        return Decision::gaming(Reason::GameTitle);
    }

    if ctx
        .process_name
        .as_deref()
        .map_or(false, |name| registry.is_game_process(name))
    {
        return Decision::gaming(Reason::GameProcess);
    }

    let processes = input.processes.unwrap_or(&[]);

    if processes
        .iter()
        .any(|p| p.cpu_percent > t.process_cpu && registry.is_game_process(&p.name))
    {
        return Decision::gaming(Reason::ActiveGameProcess);
    }

    let (heuristic_load, heuristic_memory) = if suspect {
        (t.suspect_heuristic_load, t.suspect_heuristic_memory)
    } else {
        (t.heuristic_load, t.heuristic_memory)
    };
    if above(load, heuristic_load) && above(memory, heuristic_memory) {
        return Decision::gaming(Reason::GpuHeuristic);
    }

    let game_running = processes.iter().any(|p| registry.is_game_process(&p.name));
    if game_running && above(load, t.game_process_load) {
        return Decision::gaming(Reason::RunningGame);
    }

    let launcher_running = processes.iter().any(|p| registry.is_launcher(&p.name));
    if launcher_running {
        let heavy = match memory {
            Some(_) => above(load, t.launcher_load) && above(memory, t.launcher_memory),
            None => above(load, t.launcher_load_without_memory),
        };
        if heavy {
            return Decision::gaming(Reason::LauncherWithLoad);
        }
    }

    Decision::not_gaming(Reason::NoMatch)
}

/// Classifier state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GameState {
    /// No decision made yet
    Unknown,
    Gaming { since: Instant },
    NotGaming { since: Instant },
}

impl GameState {
    pub fn is_gaming(&self) -> bool {
        matches!(self, GameState::Gaming { .. })
    }
}

/// Stateful classifier with asymmetric result reuse.
pub struct Classifier {
    state: GameState,
    last_decision: Option<(Decision, Instant)>,
    thresholds: ClassifierThresholds,
}

impl Classifier {
    pub fn new(thresholds: ClassifierThresholds) -> Self {
        Self {
            state: GameState::Unknown,
            last_decision: None,
            thresholds,
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn is_gaming(&self) -> bool {
        self.state.is_gaming()
    }

    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision.map(|(d, _)| d)
    }

    /// Classify using the current time.
    pub fn classify(&mut self, input: &ClassifierInput<'_>, registry: &Registry) -> Decision {
        self.classify_with_time(input, registry, Instant::now())
    }

    /// Classify with an explicit timestamp (for testing).
    ///
    /// A positive verdict is reused for `positive_hold`, a negative one for
    /// `negative_hold`; after that the rules are evaluated again.
    pub fn classify_with_time(
        &mut self,
        input: &ClassifierInput<'_>,
        registry: &Registry,
        now: Instant,
    ) -> Decision {
        if let Some((decision, at)) = self.last_decision {
            let hold = if decision.is_gaming {
                self.thresholds.positive_hold()
            } else {
                self.thresholds.negative_hold()
            };
            if now.saturating_duration_since(at) < hold {
                return decision;
            }
        }

        let decision = evaluate(input, registry, &self.thresholds);
        self.last_decision = Some((decision, now));

        match (self.state, decision.is_gaming) {
            (GameState::Gaming { .. }, true) | (GameState::NotGaming { .. }, false) => {}
            (_, true) => {
                info!(reason = ?decision.reason, "Game detected");
                self.state = GameState::Gaming { since: now };
            }
            (previous, false) => {
                if previous.is_gaming() {
                    info!(reason = ?decision.reason, "Game no longer detected");
                }
                self.state = GameState::NotGaming { since: now };
            }
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    fn ctx(process: &str, title: &str, fullscreen: bool) -> ForegroundContext {
        ForegroundContext {
            process_name: Some(process.to_string()),
            window_title: Some(title.to_string()),
            pid: Some(4242),
            is_fullscreen: fullscreen,
        }
    }

    fn input<'a>(context: &'a ForegroundContext, load: Option<f64>, memory: Option<f64>) -> ClassifierInput<'a> {
        ClassifierInput {
            context,
            gpu_load: load,
            gpu_memory: memory,
            processes: None,
            strict_non_game_fullscreen: true,
        }
    }

    fn decide(input: &ClassifierInput<'_>) -> Decision {
        evaluate(input, &Registry::default(), &ClassifierThresholds::default())
    }

    #[test]
    fn test_fullscreen_browser_under_load_is_not_gaming() {
        let c = ctx("chrome.exe", "Some video - Google Chrome", true);
        let d = decide(&input(&c, Some(95.0), Some(80.0)));
        assert!(!d.is_gaming);
        assert_eq!(d.reason, Reason::Denylisted);
    }

    #[test]
    fn test_unknown_windowed_process_with_load_is_gaming() {
        let c = ctx("unknowngame.exe", "Untitled", false);
        let d = decide(&input(&c, Some(40.0), None));
        assert!(d.is_gaming);
        assert_eq!(d.reason, Reason::GpuLoad);
    }

    #[test]
    fn test_fullscreen_lowers_load_bar() {
        let c = ctx("indie.exe", "Untitled", true);
        assert_eq!(decide(&input(&c, Some(28.0), None)).reason, Reason::Fullscreen);

        let windowed = ctx("indie.exe", "Untitled", false);
        assert!(!decide(&input(&windowed, Some(28.0), None)).is_gaming);
    }

    #[test]
    fn test_suspect_fullscreen_needs_strong_evidence() {
        let c = ctx("javaw.exe", "Launcher", true);
        assert!(!decide(&input(&c, Some(50.0), Some(80.0))).is_gaming);
        assert!(!decide(&input(&c, Some(65.0), Some(60.0))).is_gaming);
        assert_eq!(
            decide(&input(&c, Some(65.0), Some(72.0))).reason,
            Reason::SuspectOverride
        );
        assert!(!decide(&input(&c, Some(65.0), None)).is_gaming);
        assert!(decide(&input(&c, Some(72.0), None)).is_gaming);
    }

    #[test]
    fn test_strict_mode_off_treats_suspect_normally() {
        let c = ctx("javaw.exe", "Launcher", true);
        let mut i = input(&c, Some(50.0), None);
        i.strict_non_game_fullscreen = false;
        assert_eq!(decide(&i).reason, Reason::GpuLoad);
    }

    #[test]
    fn test_fallback_title_and_process() {
        let c = ctx("someclient.exe", "Apex Legends", false);
        assert_eq!(decide(&input(&c, Some(5.0), None)).reason, Reason::GameTitle);

        let c = ctx("cs2.exe", "", false);
        assert_eq!(decide(&input(&c, None, None)).reason, Reason::GameProcess);

        let c = ctx("steam.exe", "Steam", false);
        assert!(!decide(&input(&c, Some(5.0), None)).is_gaming);
    }

    #[test]
    fn test_fallback_process_scan() {
        let c = ctx("desktop.exe", "Desktop", false);
        let running = vec![
            ProcessSample { pid: 1, name: "eldenring.exe".to_string(), cpu_percent: 14.0 },
        ];
        let mut i = input(&c, Some(5.0), None);
        i.processes = Some(&running);
        assert_eq!(decide(&i).reason, Reason::ActiveGameProcess);

        let idle = vec![
            ProcessSample { pid: 1, name: "eldenring.exe".to_string(), cpu_percent: 0.5 },
        ];
        i.processes = Some(&idle);
        assert!(!decide(&i).is_gaming);
        i.gpu_load = Some(15.0);
        assert_eq!(decide(&i).reason, Reason::RunningGame);
    }

    #[test]
    fn test_fallback_launcher_requires_heavy_load() {
        let c = ctx("desktop.exe", "Desktop", false);
        let running = vec![
            ProcessSample { pid: 1, name: "steam.exe".to_string(), cpu_percent: 3.0 },
        ];
        let mut i = input(&c, Some(30.0), Some(40.0));
        i.processes = Some(&running);
        assert!(!decide(&i).is_gaming);

        // Load must stay under the plain GPU-load rule to reach the fallback.
        let mut t = ClassifierThresholds::default();
        t.gaming_load = 90.0;
        i.gpu_load = Some(55.0);
        i.gpu_memory = Some(45.0);
        assert!(!evaluate(&i, &Registry::default(), &t).is_gaming);
        i.gpu_memory = Some(65.0);
        assert_eq!(
            evaluate(&i, &Registry::default(), &t).reason,
            Reason::GpuHeuristic
        );

        t.heuristic_memory = 90.0;
        assert_eq!(
            evaluate(&i, &Registry::default(), &t).reason,
            Reason::LauncherWithLoad
        );
    }

    #[test]
    fn test_no_signals_is_not_gaming() {
        let c = ForegroundContext::default();
        let d = decide(&input(&c, None, None));
        assert_eq!(d, Decision::not_gaming(Reason::NoMatch));
    }

    #[test]
    fn test_positive_result_held_longer_than_negative() {
        let registry = Registry::default();
        let mut classifier = Classifier::new(ClassifierThresholds::default());
        let t0 = Instant::now();

        let c = ctx("unknowngame.exe", "Untitled", false);
        assert!(classifier.classify_with_time(&input(&c, Some(80.0), None), &registry, t0).is_gaming);
        assert!(matches!(classifier.state(), GameState::Gaming { .. }));

        // A dip inside the positive hold reuses the verdict.
        let dip = input(&c, Some(10.0), None);
        assert!(classifier.classify_with_time(&dip, &registry, t0 + Duration::from_millis(400)).is_gaming);
        assert!(!classifier.classify_with_time(&dip, &registry, t0 + Duration::from_millis(500)).is_gaming);

        // The negative verdict is only held for 0.2 s.
        let busy = input(&c, Some(80.0), None);
        assert!(!classifier.classify_with_time(&busy, &registry, t0 + Duration::from_millis(650)).is_gaming);
        assert!(classifier.classify_with_time(&busy, &registry, t0 + Duration::from_millis(700)).is_gaming);
    }

    #[test]
    fn test_classify_idempotent_within_hold() {
        let registry = Registry::default();
        let mut classifier = Classifier::new(ClassifierThresholds::default());
        let c = ctx("unknowngame.exe", "Untitled", true);
        let i = input(&c, Some(30.0), None);
        let t0 = Instant::now();

        let first = classifier.classify_with_time(&i, &registry, t0);
        let second = classifier.classify_with_time(&i, &registry, t0 + Duration::from_millis(100));
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_denylist_wins_for_any_load(
            load in 0.0f64..=100.0,
            memory in prop::option::of(0.0f64..=100.0),
            fullscreen in any::<bool>(),
            strict in any::<bool>(),
            process in prop::sample::select(vec!["chrome.exe", "vlc.exe", "msedge.exe", "POWERPNT.EXE"]),
        ) {
            let c = ctx(process, "Counter-Strike 2 highlights", fullscreen);
            let running = vec![ProcessSample { pid: 1, name: "cs2.exe".to_string(), cpu_percent: 40.0 }];
            let i = ClassifierInput {
                context: &c,
                gpu_load: Some(load),
                gpu_memory: memory,
                processes: Some(&running),
                strict_non_game_fullscreen: strict,
            };
            let d = decide(&i);
            prop_assert!(!d.is_gaming);
            prop_assert_eq!(d.reason, Reason::Denylisted);
        }

        #[test]
        fn prop_same_input_same_result_within_negative_hold(
            load in prop::option::of(0.0f64..=100.0),
            fullscreen in any::<bool>(),
            offset_ms in 0u64..200,
        ) {
            let registry = Registry::default();
            let mut classifier = Classifier::new(ClassifierThresholds::default());
            let c = ctx("app.exe", "Window", fullscreen);
            let i = input(&c, load, None);
            let t0 = Instant::now();

            let first = classifier.classify_with_time(&i, &registry, t0);
            let second = classifier.classify_with_time(&i, &registry, t0 + Duration::from_millis(offset_ms));
            prop_assert_eq!(first, second);
        }
    }
}
