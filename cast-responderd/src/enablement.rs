use shared::types::{PowerState, StandbyBehavior};
use crate::config::Config;

/// Inputs to the activation decision plus the identity strings pushed with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationContext {
    pub enabled: bool,
    pub standby_behavior: StandbyBehavior,
    pub power_state: PowerState,
    pub network_standby_mode: bool,
    pub friendly_name: String,
    pub manufacturer_name: String,
    pub model_name: String,
    /// Logical interface (ETHERNET / WIFI) of the last successful connect
    pub active_interface: String,
}

impl ActivationContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.responder.enabled,
            standby_behavior: config.responder.standby_behavior,
            power_state: config.power.initial_state,
            network_standby_mode: config.power.network_standby,
            friendly_name: config.responder.friendly_name.clone(),
            manufacturer_name: String::new(),
            model_name: String::new(),
            active_interface: String::new(),
        }
    }

    pub fn should_be_active(&self) -> bool {
        should_be_active(self.enabled, self.standby_behavior, self.power_state)
    }
}

/// Advertise only when enabled, and then only while powered on unless the
/// operator asked for advertising in standby too.
pub fn should_be_active(enabled: bool, standby: StandbyBehavior, power: PowerState) -> bool {
    enabled && (standby.is_active() || power == PowerState::On)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    SetActivation { active: bool, friendly_name: String },
    SetNetworkStandbyMode(bool),
}

/// Tracks what the running discovery service was last told so reconciliation
/// only pushes transitions, and remembers a deep-sleep cycle that needs a
/// full relaunch on the next power-on.
#[derive(Debug, Default)]
pub struct EnablementEngine {
    applied_activation: Option<(bool, String)>,
    applied_network_standby: Option<bool>,
    restart_pending: bool,
}

impl EnablementEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything that differs between `ctx` and what was last applied.
    pub fn plan(&self, ctx: &ActivationContext) -> Vec<ReconcileAction> {
        let mut actions = Vec::new();
        if let Some(action) = self.activation_action(ctx.should_be_active(), &ctx.friendly_name) {
            actions.push(action);
        }
        if self.applied_network_standby != Some(ctx.network_standby_mode) {
            actions.push(ReconcileAction::SetNetworkStandbyMode(ctx.network_standby_mode));
        }
        actions
    }

    pub fn activation_action(&self, active: bool, friendly_name: &str) -> Option<ReconcileAction> {
        match &self.applied_activation {
            Some((applied, name)) if *applied == active && name == friendly_name => None,
            _ => Some(ReconcileAction::SetActivation {
                active,
                friendly_name: friendly_name.to_string(),
            }),
        }
    }

    pub fn mark_applied(&mut self, action: &ReconcileAction) {
        match action {
            ReconcileAction::SetActivation { active, friendly_name } => {
                self.applied_activation = Some((*active, friendly_name.clone()));
            }
            ReconcileAction::SetNetworkStandbyMode(enabled) => {
                self.applied_network_standby = Some(*enabled);
            }
        }
    }

    /// The service instance is gone; the next one starts from scratch.
    pub fn forget_applied(&mut self) {
        self.applied_activation = None;
        self.applied_network_standby = None;
    }

    pub fn applied_activation(&self) -> Option<bool> {
        self.applied_activation.as_ref().map(|(active, _)| *active)
    }

    /// Record a power transition. Returns true when the service must be
    /// rebuilt because the device is coming back from deep sleep. Notifiers
    /// may coalesce transitions, so a `previous` of deep sleep counts even
    /// if the deep-sleep state itself was never observed.
    pub fn observe_power_state(&mut self, previous: PowerState, current: PowerState) -> bool {
        match current {
            PowerState::StandbyDeepSleep => {
                self.restart_pending = true;
                false
            }
            PowerState::On => {
                std::mem::take(&mut self.restart_pending) || previous == PowerState::StandbyDeepSleep
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const POWER_STATES: [PowerState; 5] = [
        PowerState::On,
        PowerState::Standby,
        PowerState::StandbyDeepSleep,
        PowerState::Off,
        PowerState::Unknown,
    ];

    fn ctx() -> ActivationContext {
        ActivationContext::from_config(&Config::default())
    }

    fn apply_all(engine: &mut EnablementEngine, ctx: &ActivationContext) -> Vec<ReconcileAction> {
        let actions = engine.plan(ctx);
        for action in &actions {
            engine.mark_applied(action);
        }
        actions
    }

    #[test]
    fn test_decision_truth_table() {
        for enabled in [false, true] {
            for standby in [StandbyBehavior::Active, StandbyBehavior::Inactive] {
                for power in POWER_STATES {
                    let expected = enabled && (standby == StandbyBehavior::Active || power == PowerState::On);
                    assert_eq!(
                        should_be_active(enabled, standby, power),
                        expected,
                        "enabled={} standby={:?} power={:?}",
                        enabled,
                        standby,
                        power
                    );
                }
            }
        }
    }

    #[test]
    fn test_unchanged_inputs_produce_no_actions() {
        let mut engine = EnablementEngine::new();
        let mut ctx = ctx();
        ctx.enabled = true;

        assert_eq!(apply_all(&mut engine, &ctx).len(), 2);
        assert!(apply_all(&mut engine, &ctx).is_empty());
    }

    #[test]
    fn test_friendly_name_change_is_pushed() {
        let mut engine = EnablementEngine::new();
        let mut ctx = ctx();
        ctx.enabled = true;
        apply_all(&mut engine, &ctx);

        ctx.friendly_name = "Kitchen".to_string();

        assert_eq!(
            engine.plan(&ctx),
            vec![ReconcileAction::SetActivation { active: true, friendly_name: "Kitchen".to_string() }]
        );
    }

    #[test]
    fn test_network_standby_is_independent_of_activation() {
        let mut engine = EnablementEngine::new();
        let mut ctx = ctx();
        apply_all(&mut engine, &ctx);

        ctx.network_standby_mode = true;

        assert_eq!(engine.plan(&ctx), vec![ReconcileAction::SetNetworkStandbyMode(true)]);
    }

    #[test]
    fn test_forget_applied_replays_everything() {
        let mut engine = EnablementEngine::new();
        let ctx = ctx();
        apply_all(&mut engine, &ctx);
        engine.forget_applied();

        assert_eq!(engine.applied_activation(), None);
        assert_eq!(engine.plan(&ctx).len(), 2);
    }

    #[test]
    fn test_deep_sleep_restart_fires_once() {
        use PowerState::*;
        let mut engine = EnablementEngine::new();

        assert!(!engine.observe_power_state(Unknown, On));
        assert!(!engine.observe_power_state(On, StandbyDeepSleep));
        assert!(!engine.observe_power_state(StandbyDeepSleep, Standby));
        assert!(engine.observe_power_state(Standby, On));
        assert!(!engine.observe_power_state(On, On));
    }

    #[test]
    fn test_coalesced_wake_from_deep_sleep_restarts() {
        use PowerState::*;
        let mut engine = EnablementEngine::new();

        assert!(engine.observe_power_state(StandbyDeepSleep, On));
        assert!(!engine.observe_power_state(On, On));
    }

    #[test]
    fn test_light_standby_does_not_restart() {
        use PowerState::*;
        let mut engine = EnablementEngine::new();

        assert!(!engine.observe_power_state(On, Standby));
        assert!(!engine.observe_power_state(Standby, On));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Enabled(bool),
        Standby(StandbyBehavior),
        Power(PowerState),
        NetworkStandby(bool),
        Name(u8),
    }

    fn step_strategy() -> impl Strategy<Value = Step> {
        prop_oneof![
            any::<bool>().prop_map(Step::Enabled),
            any::<bool>().prop_map(|a| Step::Standby(if a {
                StandbyBehavior::Active
            } else {
                StandbyBehavior::Inactive
            })),
            (0..POWER_STATES.len()).prop_map(|i| Step::Power(POWER_STATES[i])),
            any::<bool>().prop_map(Step::NetworkStandby),
            (0u8..3).prop_map(Step::Name),
        ]
    }

    proptest! {
        #[test]
        fn prop_applied_state_tracks_decision(steps in prop::collection::vec(step_strategy(), 0..64)) {
            let mut engine = EnablementEngine::new();
            let mut ctx = ctx();
            let mut last_name = ctx.friendly_name.clone();

            for step in steps {
                let before = engine.applied_activation();
                match step {
                    Step::Enabled(v) => ctx.enabled = v,
                    Step::Standby(v) => ctx.standby_behavior = v,
                    Step::Power(v) => ctx.power_state = v,
                    Step::NetworkStandby(v) => ctx.network_standby_mode = v,
                    Step::Name(n) => ctx.friendly_name = format!("Room {}", n),
                }
                let actions = apply_all(&mut engine, &ctx);
                let expected = should_be_active(ctx.enabled, ctx.standby_behavior, ctx.power_state);

                prop_assert_eq!(engine.applied_activation(), Some(expected));
                let pushed = actions
                    .iter()
                    .any(|a| matches!(a, ReconcileAction::SetActivation { .. }));
                prop_assert_eq!(pushed, before != Some(expected) || ctx.friendly_name != last_name);
                last_name = ctx.friendly_name.clone();
            }
        }
    }
}
