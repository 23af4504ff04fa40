//! Ordered plugin phases.
//!
//! `Initialize -> Load -> Ready -> Terminate -> Unload`. Load needs a
//! completed Initialize, Ready needs Load, Terminate needs Ready. A phase
//! whose hook fails leaves its own flag cleared so the caller can retry it.

use std::fmt;
use tracing::{error, info, warn};

pub type HookError = Box<dyn std::error::Error + Send + Sync>;
pub type HookResult = Result<(), HookError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Initialize,
    Load,
    Ready,
    Terminate,
    Unload,
}

impl Phase {
    fn requires(self) -> Option<Phase> {
        match self {
            Phase::Load => Some(Phase::Initialize),
            Phase::Ready => Some(Phase::Load),
            Phase::Terminate => Some(Phase::Ready),
            Phase::Initialize | Phase::Unload => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{phase} requires {requires} to have completed")]
    Precondition { phase: Phase, requires: Phase },
    #[error("{phase} failed: {source}")]
    Hook {
        phase: Phase,
        #[source]
        source: HookError,
    },
}

/// Work done in each phase.
pub trait LifecycleHooks {
    fn on_initialize(&mut self) -> HookResult;
    fn on_load(&mut self) -> HookResult;
    fn on_ready(&mut self) -> HookResult;
    fn on_terminate(&mut self) -> HookResult;
    fn on_unload(&mut self) -> HookResult;
}

/// Completion flags, one per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseFlags {
    pub initialized: bool,
    pub loaded: bool,
    pub ready: bool,
    pub terminated: bool,
    pub unloaded: bool,
}

impl PhaseFlags {
    pub fn completed(&self, phase: Phase) -> bool {
        match phase {
            Phase::Initialize => self.initialized,
            Phase::Load => self.loaded,
            Phase::Ready => self.ready,
            Phase::Terminate => self.terminated,
            Phase::Unload => self.unloaded,
        }
    }

    fn set(&mut self, phase: Phase, value: bool) {
        match phase {
            Phase::Initialize => self.initialized = value,
            Phase::Load => self.loaded = value,
            Phase::Ready => self.ready = value,
            Phase::Terminate => self.terminated = value,
            Phase::Unload => self.unloaded = value,
        }
    }
}

pub struct LifecycleManager<H> {
    hooks: H,
    flags: PhaseFlags,
}

impl<H: LifecycleHooks> LifecycleManager<H> {
    pub fn new(hooks: H) -> Self {
        Self {
            hooks,
            flags: PhaseFlags::default(),
        }
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn flags(&self) -> PhaseFlags {
        self.flags
    }

    pub fn is_ready(&self) -> bool {
        self.flags.ready
    }

    pub fn initialize(&mut self) -> Result<(), LifecycleError> {
        self.run(Phase::Initialize)
    }

    pub fn load(&mut self) -> Result<(), LifecycleError> {
        self.run(Phase::Load)
    }

    pub fn ready(&mut self) -> Result<(), LifecycleError> {
        self.run(Phase::Ready)
    }

    pub fn terminate(&mut self) -> Result<(), LifecycleError> {
        self.run(Phase::Terminate)
    }

    pub fn unload(&mut self) -> Result<(), LifecycleError> {
        self.run(Phase::Unload)
    }

    /// Initialize, Load, Ready.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.initialize()?;
        self.load()?;
        self.ready()
    }

    /// Terminate (when ready), then Unload.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        if self.flags.ready {
            self.terminate()?;
        }
        self.unload()
    }

    /// Walk back to phase zero, then forward again.
    ///
    /// From Ready this is Terminate, Unload, Initialize, Load, Ready. From a
    /// partial start it is Unload, Initialize only. From nothing it is
    /// Initialize.
    pub fn reload(&mut self) -> Result<(), LifecycleError> {
        if self.flags.ready {
            info!("reloading fully started plugin");
            self.terminate()?;
            self.unload()?;
            self.start()
        } else if self.flags.initialized {
            info!("reloading partially started plugin");
            self.unload()?;
            self.initialize()
        } else {
            self.initialize()
        }
    }

    fn run(&mut self, phase: Phase) -> Result<(), LifecycleError> {
        if let Some(requires) = phase.requires() {
            if !self.flags.completed(requires) {
                warn!(%phase, %requires, "lifecycle phase refused");
                return Err(LifecycleError::Precondition { phase, requires });
            }
        }

        self.flags.set(phase, true);
        let result = match phase {
            Phase::Initialize => self.hooks.on_initialize(),
            Phase::Load => self.hooks.on_load(),
            Phase::Ready => self.hooks.on_ready(),
            Phase::Terminate => self.hooks.on_terminate(),
            Phase::Unload => self.hooks.on_unload(),
        };
        if let Err(source) = result {
            self.flags.set(phase, false);
            error!(%phase, error = %source, "lifecycle phase failed");
            return Err(LifecycleError::Hook { phase, source });
        }

        match phase {
            Phase::Initialize => {
                self.flags.terminated = false;
                self.flags.unloaded = false;
            }
            Phase::Terminate => self.flags.ready = false,
            Phase::Unload => {
                self.flags.initialized = false;
                self.flags.loaded = false;
                self.flags.ready = false;
                self.flags.terminated = false;
            }
            Phase::Load | Phase::Ready => {}
        }
        info!(%phase, "lifecycle phase completed");
        Ok(())
    }
}
