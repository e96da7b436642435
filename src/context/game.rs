//! Game detection. Classification is heuristic by nature, so it sits behind [GameClassifier]
//! and never leaks into segmentation.

use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info};

use super::{identity::game_key, window::WindowSource, ActivityContext, ContextKind, ContextProvider};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

/// Contract for enumerating running processes.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessSource: Send {
    fn processes(&mut self) -> Result<Vec<ProcessInfo>>;

    fn process(&mut self, pid: u32) -> Result<Option<ProcessInfo>>;
}

pub struct SysinfoProcessSource {
    system: System,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

fn to_process_info(pid: Pid, process: &sysinfo::Process) -> ProcessInfo {
    ProcessInfo {
        pid: pid.as_u32(),
        name: process.name().to_string_lossy().into_owned(),
        exe: process.exe().map(Path::to_path_buf),
    }
}

impl ProcessSource for SysinfoProcessSource {
    fn processes(&mut self) -> Result<Vec<ProcessInfo>> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        Ok(self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| to_process_info(*pid, process))
            .collect())
    }

    fn process(&mut self, pid: u32) -> Result<Option<ProcessInfo>> {
        let pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Ok(self
            .system
            .process(pid)
            .map(|process| to_process_info(pid, process)))
    }
}

/// Decides whether a process is a game.
pub trait GameClassifier: Send + Sync {
    fn is_game(&self, process: &ProcessInfo) -> bool;
}

const KNOWN_GAMES: &[&str] = &[
    "gta5", "gtav", "cyberpunk2077", "witcher3", "fortniteclient", "league of legends",
    "valorant", "csgo", "cs2", "dota2", "minecraft", "rocketleague", "r5apex", "overwatch",
    "pubg", "among us", "fallguys", "robloxplayer", "wow", "hearthstone", "eldenring",
    "sekiro", "destiny2", "skyrim", "fallout4", "terraria", "stardew valley", "factorio",
];

const GAME_FOLDERS: &[&str] = &["steamapps", "common", "games"];

const LAUNCHERS: &[&str] = &[
    "steam", "steamwebhelper", "epicgameslauncher", "origin", "upc", "galaxyclient",
    "battle.net",
];

const NOT_GAMES: &[&str] = &[
    "chrome", "firefox", "msedge", "opera", "brave", "safari", "explorer", "notepad", "cmd",
    "powershell", "code", "cursor", "python", "windowsterminal", "terminal", "dwell",
];

const PLATFORMS: &[(&str, &str)] = &[
    ("steam", "Steam"),
    ("epic games", "Epic Games"),
    ("gog galaxy", "GOG Galaxy"),
    ("battle.net", "Battle.net"),
    ("ubisoft", "Ubisoft"),
    ("origin", "Origin"),
];

/// Name list based classifier: known game executables, executables inside game library folders,
/// minus launchers and everyday applications.
pub struct KnownGames {
    known: Vec<String>,
    folders: Vec<String>,
    launchers: Vec<String>,
    excluded: Vec<String>,
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for KnownGames {
    fn default() -> Self {
        Self {
            known: owned(KNOWN_GAMES),
            folders: owned(GAME_FOLDERS),
            launchers: owned(LAUNCHERS),
            excluded: owned(NOT_GAMES),
        }
    }
}

impl GameClassifier for KnownGames {
    fn is_game(&self, process: &ProcessInfo) -> bool {
        let name = game_name(process).to_lowercase();
        if self.launchers.contains(&name) || self.excluded.iter().any(|v| name == *v) {
            return false;
        }
        if self.known.contains(&name) {
            return true;
        }
        let Some(exe) = &process.exe else {
            return false;
        };
        exe.components().any(|component| match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy().to_lowercase();
                self.folders.contains(&part)
            }
            _ => false,
        })
    }
}

/// Process name without the platform executable suffix.
pub fn game_name(process: &ProcessInfo) -> String {
    let name = process.name.trim();
    match name.len().checked_sub(4) {
        Some(split) if name.is_char_boundary(split) && name[split..].eq_ignore_ascii_case(".exe") => {
            name[..split].to_owned()
        }
        _ => name.to_owned(),
    }
}

/// Store the game was installed through, inferred from the executable location.
pub fn game_platform(exe: &Path) -> Option<&'static str> {
    let path = exe.to_string_lossy().to_lowercase();
    PLATFORMS
        .iter()
        .find(|(needle, _)| path.contains(needle))
        .map(|(_, platform)| *platform)
}

fn game_context(process: &ProcessInfo) -> ActivityContext {
    let name = game_name(process);
    let platform = process
        .exe
        .as_deref()
        .and_then(game_platform)
        .unwrap_or("unknown");
    ActivityContext::new(ContextKind::Game, game_key(&name))
        .with_field("game_name", name)
        .with_field("platform", platform)
        .with_field("pid", process.pid.to_string())
}

/// Reports the game that currently has focus.
///
/// With a [WindowSource] the foreground window's process is classified on every poll. Without
/// one, games are only discovered by [ContextProvider::probe] scanning all processes, and
/// polls report the probed game for as long as its process is alive.
pub struct GameProvider {
    windows: Option<Box<dyn WindowSource>>,
    processes: Box<dyn ProcessSource>,
    classifier: Box<dyn GameClassifier>,
    probed: Option<ProcessInfo>,
}

impl GameProvider {
    pub fn new(
        windows: Option<Box<dyn WindowSource>>,
        processes: Box<dyn ProcessSource>,
        classifier: Box<dyn GameClassifier>,
    ) -> Self {
        Self {
            windows,
            processes,
            classifier,
            probed: None,
        }
    }

    fn foreground_game(&mut self) -> Result<Option<ProcessInfo>> {
        let Some(windows) = self.windows.as_mut() else {
            return Ok(None);
        };
        let Some(pid) = windows.active_window()?.and_then(|v| v.pid) else {
            return Ok(None);
        };
        Ok(self
            .processes
            .process(pid)?
            .filter(|process| self.classifier.is_game(process)))
    }

    fn probed_game(&mut self) -> Result<Option<ProcessInfo>> {
        let Some(probed) = self.probed.take() else {
            return Ok(None);
        };
        match self.processes.process(probed.pid)? {
            Some(current) if current.name == probed.name => {
                self.probed = Some(current.clone());
                Ok(Some(current))
            }
            _ => {
                debug!("Game {} is no longer running", probed.name);
                Ok(None)
            }
        }
    }
}

impl ContextProvider for GameProvider {
    fn poll(&mut self) -> Result<Option<ActivityContext>> {
        let game = if self.windows.is_some() {
            self.foreground_game()?
        } else {
            self.probed_game()?
        };
        Ok(game.as_ref().map(game_context))
    }

    fn probe(&mut self) -> Result<Option<ActivityContext>> {
        let game = self
            .processes
            .processes()?
            .into_iter()
            .find(|process| self.classifier.is_game(process));
        if let Some(game) = &game {
            info!("Found running game {} ({})", game.name, game.pid);
        }
        self.probed = game.clone();
        Ok(game.as_ref().map(game_context))
    }
}
