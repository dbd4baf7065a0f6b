//! Interaction event types recorded by the usage tracker.

use crate::registry::ModuleId;

/// Scroll direction as seen by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollDirection {
    #[default]
    Down,
    Up,
}

/// One user-interaction or module-usage event.
///
/// Events originate in the excluded UI layer and are forwarded over the
/// engine boundary; the engine only ever reads them.
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionKind {
    /// Pointer click on an element, optionally attributed to a module.
    Click { module: Option<ModuleId> },
    /// Pointer hover over a module-bound element.
    Hover { module: ModuleId },
    /// Scroll sample with direction and velocity in px/s.
    Scroll {
        direction: ScrollDirection,
        velocity_px_s: f64,
    },
    /// A module finished rendering (mount lifecycle signal).
    ModuleRendered { module: ModuleId },
    /// A module artifact finished loading (scheduler signal).
    ///
    /// Recorded in the event buffer only; sequence learning keys off
    /// renders, not loads, so speculative preloads cannot reinforce
    /// their own predictions.
    ModuleLoaded { module: ModuleId },
    /// Route navigation within the host application.
    Navigation { route: String },
}

impl InteractionKind {
    /// The module this event is attributed to, if any.
    pub fn module(&self) -> Option<&ModuleId> {
        match self {
            InteractionKind::Click { module } => module.as_ref(),
            InteractionKind::Hover { module } => Some(module),
            InteractionKind::ModuleRendered { module } => Some(module),
            InteractionKind::ModuleLoaded { module } => Some(module),
            InteractionKind::Scroll { .. } | InteractionKind::Navigation { .. } => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            InteractionKind::Click { .. } => "click",
            InteractionKind::Hover { .. } => "hover",
            InteractionKind::Scroll { .. } => "scroll",
            InteractionKind::ModuleRendered { .. } => "module-rendered",
            InteractionKind::ModuleLoaded { .. } => "module-loaded",
            InteractionKind::Navigation { .. } => "navigation",
        }
    }
}

/// A timestamped interaction event.
///
/// Timestamps are milliseconds since the tracker's epoch (engine start),
/// monotonic within a session.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionEvent {
    /// Milliseconds since tracker epoch.
    pub at_ms: u64,
    /// What happened.
    pub kind: InteractionKind,
}
