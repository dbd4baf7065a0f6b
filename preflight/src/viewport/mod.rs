//! Viewport proximity triggering.
//!
//! The host UI registers the layout geometry of module-bound elements; the
//! trigger consumes scroll-state updates and decides which modules are
//! about to be needed. Two escalation stages:
//!
//! - **Approaching**: the element entered the proximity margin, or the
//!   velocity-projected time-to-visibility dropped under the approach
//!   horizon. Worth an idle-lane preload.
//! - **Imminent**: projected time-to-visibility is under ~1s. Escalates to
//!   an immediate-priority load instead of waiting for the idle lane.
//!
//! Each stage fires at most once per observed element, so a slow scroll
//! through a long page produces one signal per module, not one per sample.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::registry::ModuleId;
use crate::usage::ScrollDirection;

/// Layout geometry of an observed element, in document pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementGeometry {
    /// Distance from document top to the element's top edge.
    pub top_px: f64,
    /// Element height.
    pub height_px: f64,
}

/// Current viewport scroll state, forwarded from the host UI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportState {
    /// Scroll offset from document top.
    pub scroll_top_px: f64,
    /// Visible viewport height.
    pub height_px: f64,
    /// Scroll velocity magnitude in px/s.
    pub velocity_px_s: f64,
    /// Scroll direction.
    pub direction: ScrollDirection,
}

/// How urgently a triggered module is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TriggerUrgency {
    /// Entering the proximity margin; idle-lane preload.
    Approaching,
    /// Visible in under the imminent threshold; immediate load.
    Imminent,
}

/// An "about to be needed" signal for one module.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerSignal {
    /// The module bound to the triggering element.
    pub module_id: ModuleId,
    /// Escalation stage.
    pub urgency: TriggerUrgency,
}

/// Tuning for proximity and escalation.
#[derive(Debug, Clone)]
pub struct ViewportConfig {
    /// Margin around the viewport treated as "near" (px).
    pub proximity_margin_px: f64,
    /// Time-to-visibility below which a load is imminent.
    pub imminent_threshold: Duration,
    /// Time-to-visibility below which an element counts as approaching.
    pub approach_horizon: Duration,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            proximity_margin_px: 200.0,
            imminent_threshold: Duration::from_secs(1),
            approach_horizon: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct Observed {
    geometry: ElementGeometry,
    fired: Option<TriggerUrgency>,
}

/// Tracks observed elements and emits trigger signals on scroll updates.
pub struct ViewportTrigger {
    config: ViewportConfig,
    observed: Mutex<HashMap<ModuleId, Observed>>,
}

impl ViewportTrigger {
    /// Create a trigger with the given config.
    pub fn new(config: ViewportConfig) -> Self {
        Self {
            config,
            observed: Mutex::new(HashMap::new()),
        }
    }

    /// Observe (or re-measure) a module-bound element.
    ///
    /// Re-observing with new geometry resets nothing: an already-fired
    /// stage stays fired for the element's lifetime.
    pub fn observe(&self, module_id: ModuleId, geometry: ElementGeometry) {
        let mut observed = self.observed.lock();
        observed
            .entry(module_id)
            .and_modify(|o| o.geometry = geometry)
            .or_insert(Observed {
                geometry,
                fired: None,
            });
    }

    /// Stop observing an element (it unmounted).
    pub fn unobserve(&self, module_id: &ModuleId) {
        self.observed.lock().remove(module_id);
    }

    /// Number of currently observed elements.
    pub fn observed_count(&self) -> usize {
        self.observed.lock().len()
    }

    /// Process a scroll-state update, returning newly fired signals.
    pub fn update(&self, state: ViewportState) -> Vec<TriggerSignal> {
        let mut signals = Vec::new();
        let mut observed = self.observed.lock();

        for (id, entry) in observed.iter_mut() {
            let urgency = self.classify(&entry.geometry, &state);
            let Some(urgency) = urgency else {
                continue;
            };
            // Fire each stage once; escalate approaching -> imminent.
            let already = entry.fired;
            let fire = match (already, urgency) {
                (None, _) => true,
                (Some(TriggerUrgency::Approaching), TriggerUrgency::Imminent) => true,
                _ => false,
            };
            if fire {
                entry.fired = Some(urgency.max(already.unwrap_or(TriggerUrgency::Approaching)));
                trace!(module = %id, ?urgency, "viewport trigger fired");
                signals.push(TriggerSignal {
                    module_id: id.clone(),
                    urgency,
                });
            }
        }
        signals
    }

    /// Classify one element against the viewport state.
    fn classify(&self, geometry: &ElementGeometry, state: &ViewportState) -> Option<TriggerUrgency> {
        let viewport_top = state.scroll_top_px;
        let viewport_bottom = state.scroll_top_px + state.height_px;
        let element_top = geometry.top_px;
        let element_bottom = geometry.top_px + geometry.height_px;

        // Visible or inside the proximity margin: at least approaching.
        let within_margin = element_bottom >= viewport_top - self.config.proximity_margin_px
            && element_top <= viewport_bottom + self.config.proximity_margin_px;
        let visible = element_bottom >= viewport_top && element_top <= viewport_bottom;
        if visible {
            return Some(TriggerUrgency::Imminent);
        }

        // Distance along the scroll direction to bring the element on-screen.
        let distance_px = match state.direction {
            ScrollDirection::Down if element_top > viewport_bottom => element_top - viewport_bottom,
            ScrollDirection::Up if element_bottom < viewport_top => viewport_top - element_bottom,
            _ => {
                // Scrolling away from the element; only the static margin
                // can trigger it.
                return within_margin.then_some(TriggerUrgency::Approaching);
            }
        };

        if state.velocity_px_s > 0.0 {
            let ttv = Duration::from_secs_f64(distance_px / state.velocity_px_s);
            if ttv <= self.config.imminent_threshold {
                return Some(TriggerUrgency::Imminent);
            }
            if ttv <= self.config.approach_horizon {
                return Some(TriggerUrgency::Approaching);
            }
        }
        within_margin.then_some(TriggerUrgency::Approaching)
    }
}

impl Default for ViewportTrigger {
    fn default() -> Self {
        Self::new(ViewportConfig::default())
    }
}

impl std::fmt::Debug for ViewportTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewportTrigger")
            .field("observed", &self.observed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport(scroll_top: f64, velocity: f64) -> ViewportState {
        ViewportState {
            scroll_top_px: scroll_top,
            height_px: 800.0,
            velocity_px_s: velocity,
            direction: ScrollDirection::Down,
        }
    }

    fn trigger_with(id: &str, top: f64) -> ViewportTrigger {
        let t = ViewportTrigger::default();
        t.observe(
            id.into(),
            ElementGeometry {
                top_px: top,
                height_px: 300.0,
            },
        );
        t
    }

    #[test]
    fn test_far_element_silent() {
        let t = trigger_with("gallery", 10_000.0);
        assert!(t.update(viewport(0.0, 100.0)).is_empty());
    }

    #[test]
    fn test_margin_entry_fires_approaching() {
        let t = trigger_with("gallery", 1_000.0);
        // Viewport bottom at 900, margin 200 reaches 1100; slow scroll.
        let signals = t.update(viewport(100.0, 10.0));
        assert_eq!(
            signals,
            vec![TriggerSignal {
                module_id: "gallery".into(),
                urgency: TriggerUrgency::Approaching,
            }]
        );
    }

    #[test]
    fn test_fast_scroll_escalates_to_imminent() {
        let t = trigger_with("gallery", 2_000.0);
        // 1200px away at 1500px/s: visible in 0.8s.
        let signals = t.update(viewport(0.0, 1_500.0));
        assert_eq!(signals[0].urgency, TriggerUrgency::Imminent);
    }

    #[test]
    fn test_visible_element_is_imminent() {
        let t = trigger_with("hero", 100.0);
        let signals = t.update(viewport(0.0, 0.0));
        assert_eq!(signals[0].urgency, TriggerUrgency::Imminent);
    }

    #[test]
    fn test_each_stage_fires_once() {
        let t = trigger_with("gallery", 1_000.0);
        assert_eq!(t.update(viewport(100.0, 10.0)).len(), 1);
        // Same stage again: silent.
        assert!(t.update(viewport(110.0, 10.0)).is_empty());
        // Escalation to imminent fires once more.
        let signals = t.update(viewport(900.0, 10.0));
        assert_eq!(signals[0].urgency, TriggerUrgency::Imminent);
        assert!(t.update(viewport(900.0, 10.0)).is_empty());
    }

    #[test]
    fn test_scrolling_away_only_margin_triggers() {
        let t = trigger_with("footer", 2_000.0);
        // Scrolling up, far below: nothing.
        let away = ViewportState {
            direction: ScrollDirection::Up,
            ..viewport(0.0, 500.0)
        };
        assert!(t.update(away).is_empty());
    }

    #[test]
    fn test_unobserve_stops_signals() {
        let t = trigger_with("gallery", 1_000.0);
        t.unobserve(&"gallery".into());
        assert!(t.update(viewport(100.0, 10.0)).is_empty());
        assert_eq!(t.observed_count(), 0);
    }
}
