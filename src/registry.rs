//! Game and non-game process/title registry.
//!
//! The registry is built once from the static defaults merged with the
//! user's custom entries and is then read-only. Process names are compared
//! case-insensitively with any directory and `.exe` suffix stripped, so
//! `C:\Games\cs2.exe` and `cs2` are the same entry.

use crate::config::Settings;
use crate::inspector::ForegroundContext;
use crate::platform::ProcessSample;
use std::collections::BTreeSet;

/// Processes that are never games, however much GPU they use.
const NON_GAME_PROCESSES: &[&str] = &[
    "chrome", "msedge", "firefox", "opera", "brave", "vivaldi", "iexplore",
    "vlc", "potplayer", "potplayermini64", "mpc-hc64", "mpv", "wmplayer",
    "spotify", "netflix", "obs64", "obs", "winword", "excel", "powerpnt",
    "onenote", "acrobat", "acrord32", "code", "devenv", "explorer", "notepad",
    "zoom", "teams", "ms-teams", "slack", "discord", "wechat", "qq",
    "photoshop", "premiere", "afterfx", "blender", "davinciresolve",
];

/// Window title keywords that mark non-game content.
const NON_GAME_TITLES: &[&str] = &[
    "youtube", "netflix", "twitch", "bilibili", "prime video", "disney+",
    "hulu", "microsoft word", "microsoft excel", "powerpoint",
    "visual studio", "zoom meeting", "google docs", "google meet",
];

/// Hosts that run both games and ordinary apps, and so need stronger GPU
/// evidence when fullscreen.
const SUSPECT_PROCESSES: &[&str] = &[
    "javaw", "java", "applicationframehost", "python", "pythonw", "electron",
    "msedgewebview2", "dwm",
];

const SUSPECT_TITLES: &[&str] = &[
    "player", "video", "movie", "stream", "live", "slides", "presentation",
    "slideshow", "wallpaper",
];

/// Known game executables.
const GAME_PROCESSES: &[&str] = &[
    "cs2", "csgo", "valorant-win64-shipping", "league of legends", "dota2",
    "fortniteclient-win64-shipping", "r5apex", "overwatch", "genshinimpact",
    "yuanshen", "starrail", "tslgame", "eldenring", "cyberpunk2077", "cod",
    "bf2042", "rainbowsix", "rocketleague", "warframe.x64", "destiny2", "gta5",
    "rdr2", "witcher3", "minecraft", "hl2", "deadlock", "pathofexile",
    "diablo iv", "wow", "hearthstone", "eurotrucks2", "baldur's gate 3", "bg3",
];

/// Platform launchers. Allowlisted, but only weak evidence of gaming.
const LAUNCHERS: &[&str] = &[
    "steam", "steamwebhelper", "epicgameslauncher", "battle.net",
    "riotclientservices", "origin", "eadesktop", "ubisoftconnect",
    "galaxyclient", "wegame", "xboxapp",
];

/// Title vocabulary that marks a game window.
const GAME_TITLE_TERMS: &[&str] = &[
    "counter-strike", "valorant", "league of legends", "dota 2", "fortnite",
    "apex legends", "overwatch", "genshin impact", "pubg", "elden ring",
    "cyberpunk 2077", "call of duty", "battlefield", "rainbow six",
    "rocket league", "minecraft", "warframe", "destiny 2", "grand theft auto",
    "red dead redemption", "path of exile", "diablo", "world of warcraft",
];

/// Fast-paced shooter that gets the aggressive FPS profile.
const SHOOTER_PROCESSES: &[&str] = &["cs2", "csgo"];
const SHOOTER_TITLES: &[&str] = &["counter-strike", "cs2"];

/// Additive FPS corrections for titles whose heuristics read low.
const CALIBRATION: &[(&str, f64)] = &[
    ("valorant", 15.0),
    ("cs2", 20.0),
    ("csgo", 15.0),
    ("r5apex", 8.0),
    ("overwatch", 10.0),
    ("league of legends", 12.0),
    ("dota2", 8.0),
];

/// Normalise a process name or path for lookups.
pub fn normalize_process_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let lower = base.to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.to_string(),
        None => lower,
    }
}

fn to_set(entries: &[&str]) -> BTreeSet<String> {
    entries.iter().map(|e| e.to_string()).collect()
}

fn contains_any(haystack: &str, needles: &BTreeSet<String>) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| !n.is_empty() && haystack.contains(n.as_str()))
}

/// Immutable allow/deny sets used for one configuration generation.
#[derive(Debug, Clone)]
pub struct Registry {
    non_game_processes: BTreeSet<String>,
    non_game_titles: BTreeSet<String>,
    suspect_processes: BTreeSet<String>,
    suspect_titles: BTreeSet<String>,
    game_processes: BTreeSet<String>,
    launchers: BTreeSet<String>,
    game_title_terms: BTreeSet<String>,
    shooter_processes: BTreeSet<String>,
    shooter_titles: BTreeSet<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(&BTreeSet::new(), &BTreeSet::new())
    }
}

impl Registry {
    /// Static defaults merged with user-supplied denylist entries.
    pub fn new(custom_processes: &BTreeSet<String>, custom_titles: &BTreeSet<String>) -> Self {
        let mut non_game_processes = to_set(NON_GAME_PROCESSES);
        non_game_processes.extend(
            custom_processes
                .iter()
                .map(|p| normalize_process_name(p))
                .filter(|p| !p.is_empty()),
        );

        let mut non_game_titles = to_set(NON_GAME_TITLES);
        non_game_titles.extend(
            custom_titles
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );

        Self {
            non_game_processes,
            non_game_titles,
            suspect_processes: to_set(SUSPECT_PROCESSES),
            suspect_titles: to_set(SUSPECT_TITLES),
            game_processes: to_set(GAME_PROCESSES),
            launchers: to_set(LAUNCHERS),
            game_title_terms: to_set(GAME_TITLE_TERMS),
            shooter_processes: to_set(SHOOTER_PROCESSES),
            shooter_titles: to_set(SHOOTER_TITLES),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.custom_non_game_processes,
            &settings.custom_non_game_titles,
        )
    }

    pub fn is_non_game_process(&self, name: &str) -> bool {
        self.non_game_processes
            .contains(&normalize_process_name(name))
    }

    pub fn is_non_game_title(&self, title: &str) -> bool {
        contains_any(title, &self.non_game_titles)
    }

    /// Denylisted by process or by title.
    pub fn is_denied(&self, context: &ForegroundContext) -> bool {
        context
            .process_name
            .as_deref()
            .map_or(false, |p| self.is_non_game_process(p))
            || context
                .window_title
                .as_deref()
                .map_or(false, |t| self.is_non_game_title(t))
    }

    /// Ambiguous host or media-like title.
    pub fn is_suspect(&self, context: &ForegroundContext) -> bool {
        context
            .process_name
            .as_deref()
            .map_or(false, |p| self.suspect_processes.contains(&normalize_process_name(p)))
            || context
                .window_title
                .as_deref()
                .map_or(false, |t| contains_any(t, &self.suspect_titles))
    }

    pub fn is_launcher(&self, name: &str) -> bool {
        self.launchers.contains(&normalize_process_name(name))
    }

    /// Allowlisted game executable, launchers excluded.
    pub fn is_game_process(&self, name: &str) -> bool {
        self.game_processes.contains(&normalize_process_name(name))
    }

    pub fn title_has_game_term(&self, title: &str) -> bool {
        contains_any(title, &self.game_title_terms)
    }

    /// Foreground or running process belongs to the fast-shooter profile.
    pub fn is_fast_shooter(
        &self,
        context: &ForegroundContext,
        processes: Option<&[ProcessSample]>,
    ) -> bool {
        let by_title = context
            .window_title
            .as_deref()
            .map_or(false, |t| contains_any(t, &self.shooter_titles));
        let by_process = context
            .process_name
            .as_deref()
            .map_or(false, |p| self.shooter_processes.contains(&normalize_process_name(p)));
        let by_scan = processes.map_or(false, |list| {
            list.iter()
                .any(|p| self.shooter_processes.contains(&normalize_process_name(&p.name)))
        });
        by_title || by_process || by_scan
    }
}

/// Per-title additive FPS offsets.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    entries: Vec<(String, f64)>,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::new(CALIBRATION.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }
}

impl CalibrationTable {
    pub fn new(entries: Vec<(String, f64)>) -> Self {
        Self { entries }
    }

    /// Exact match wins over substring match; unknown processes get 0.
    pub fn offset_for(&self, process_name: Option<&str>) -> f64 {
        let Some(name) = process_name.map(normalize_process_name) else {
            return 0.0;
        };
        if let Some((_, offset)) = self.entries.iter().find(|(key, _)| *key == name) {
            return *offset;
        }
        self.entries
            .iter()
            .find(|(key, _)| name.contains(key.as_str()))
            .map_or(0.0, |(_, offset)| *offset)
    }
}
